//! Packet struct with header accessors and lazy body decoding.
//!
//! Represents one complete protocol frame: start line, ordered headers and
//! raw content. Whether a packet is a response is always derived from its
//! start line, for wire-received and builder-constructed packets alike.
//!
//! # Example
//!
//! ```
//! use dapwire::protocol::{header_names, Header, Packet};
//!
//! let packet = Packet::new(
//!     "HTTP/1.1 200 OK",
//!     vec![
//!         Header::new(header_names::CONTENT_TYPE, "text/plain"),
//!         Header::new(header_names::INVOKE_ID, "7"),
//!     ],
//!     &b"done"[..],
//! );
//!
//! assert!(packet.is_response());
//! assert_eq!(packet.invoke_id(), Some("7"));
//! assert_eq!(packet.body().unwrap().as_text(), Some("done"));
//! ```

use std::sync::OnceLock;

use bytes::{BufMut, Bytes, BytesMut};
use serde::de::DeserializeOwned;

use super::wire_format::{
    header_names, parse_request_line, parse_response_line, Header, RequestLine, ResponseLine,
    END_OF_LINE,
};
use crate::codec::{Body, ContentType};
use crate::error::{DapwireError, Result};

/// A complete protocol frame.
#[derive(Debug, Clone)]
pub struct Packet {
    start_line: String,
    headers: Vec<Header>,
    content: Bytes,
    /// Memoized decoded view of `content`.
    body: OnceLock<Body>,
}

impl Packet {
    /// Create a packet from its parts.
    pub fn new(start_line: impl Into<String>, headers: Vec<Header>, content: impl Into<Bytes>) -> Self {
        Self {
            start_line: start_line.into(),
            headers,
            content: content.into(),
            body: OnceLock::new(),
        }
    }

    #[inline]
    pub fn start_line(&self) -> &str {
        &self.start_line
    }

    #[inline]
    pub fn headers(&self) -> &[Header] {
        &self.headers
    }

    /// Raw body bytes.
    #[inline]
    pub fn content(&self) -> &Bytes {
        &self.content
    }

    /// Check if this is a response (`HTTP/x.y <code> <reason>` start line).
    #[inline]
    pub fn is_response(&self) -> bool {
        self.response_line().is_some()
    }

    pub fn response_line(&self) -> Option<ResponseLine<'_>> {
        parse_response_line(&self.start_line)
    }

    pub fn request_line(&self) -> Option<RequestLine<'_>> {
        parse_request_line(&self.start_line)
    }

    /// Status code, for responses.
    pub fn code(&self) -> Option<u16> {
        self.response_line().map(|line| line.code)
    }

    /// Route, for requests.
    pub fn route(&self) -> Option<&str> {
        self.request_line().map(|line| line.path)
    }

    /// Value of the first header named exactly `name`.
    pub fn header_value(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|h| h.name == name)
            .map(|h| h.value.as_str())
    }

    pub fn required_header_value(&self, name: &str) -> Result<&str> {
        self.header_value(name)
            .ok_or_else(|| DapwireError::MissingHeader(name.to_string()))
    }

    /// Correlation id, if present.
    #[inline]
    pub fn invoke_id(&self) -> Option<&str> {
        self.header_value(header_names::INVOKE_ID)
    }

    pub fn content_type(&self) -> Result<ContentType> {
        ContentType::parse(self.required_header_value(header_names::CONTENT_TYPE)?)
    }

    pub fn content_length(&self) -> Result<usize> {
        let value = self.required_header_value(header_names::CONTENT_LENGTH)?;
        value
            .parse()
            .map_err(|_| DapwireError::InvalidContentLength(value.to_string()))
    }

    /// Decoded body, according to `Content-Type`.
    ///
    /// The first successful decode is memoized. Failures are not cached and
    /// never leave a partially decoded body behind.
    pub fn body(&self) -> Result<&Body> {
        if let Some(body) = self.body.get() {
            return Ok(body);
        }

        let decoded = Body::decode(self.content_type()?, &self.content)?;
        Ok(self.body.get_or_init(|| decoded))
    }

    /// Decode the body into a typed value.
    pub fn body_as<T: DeserializeOwned>(&self) -> Result<T> {
        self.body()?.to_typed()
    }

    /// Replace the value of an existing header or append a new one.
    ///
    /// An empty value is rejected: headers cannot be removed this way.
    pub fn set_header(&mut self, name: &str, value: impl ToString) -> Result<()> {
        let value = value.to_string();
        if value.is_empty() {
            return Err(DapwireError::EmptyHeaderValue(name.to_string()));
        }

        if name == header_names::CONTENT_TYPE {
            self.body = OnceLock::new();
        }

        self.upsert_header(name, value);
        Ok(())
    }

    fn upsert_header(&mut self, name: &str, value: String) {
        match self.headers.iter_mut().find(|h| h.name == name) {
            Some(header) => header.value = value,
            None => self.headers.push(Header::new(name, value)),
        }
    }

    /// Serialize to wire bytes.
    ///
    /// `Content-Length` is always recomputed from the actual content and
    /// overwritten (or appended) before encoding.
    pub fn to_bytes(&mut self) -> Bytes {
        let content_length = self.content.len().to_string();
        self.upsert_header(header_names::CONTENT_LENGTH, content_length);

        let prefix_len = self.start_line.len()
            + END_OF_LINE.len()
            + self
                .headers
                .iter()
                .map(|h| h.name.len() + h.value.len() + 2 + END_OF_LINE.len())
                .sum::<usize>()
            + END_OF_LINE.len();

        let mut buf = BytesMut::with_capacity(prefix_len + self.content.len());
        buf.put_slice(self.start_line.as_bytes());
        buf.put_slice(END_OF_LINE.as_bytes());
        for header in &self.headers {
            buf.put_slice(header.to_string().as_bytes());
            buf.put_slice(END_OF_LINE.as_bytes());
        }
        buf.put_slice(END_OF_LINE.as_bytes());
        buf.put_slice(&self.content);

        buf.freeze()
    }
}

impl PartialEq for Packet {
    fn eq(&self, other: &Self) -> bool {
        self.start_line == other.start_line
            && self.headers == other.headers
            && self.content == other.content
    }
}

impl Eq for Packet {}
