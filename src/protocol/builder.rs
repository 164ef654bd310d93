//! Packet builder for requests and responses.
//!
//! Every packet must declare a `Content-Type`; the body (if any) is encoded
//! according to it when the packet is built.
//!
//! # Example
//!
//! ```
//! use dapwire::codec::ContentType;
//! use dapwire::protocol::PacketBuilder;
//! use serde_json::json;
//!
//! let packet = PacketBuilder::request("/dap")
//!     .content_type(ContentType::Json)
//!     .invoke_id(7)
//!     .body(&json!({"command": "launch"}))
//!     .build()
//!     .unwrap();
//!
//! assert_eq!(packet.start_line(), "POST /dap HTTP/1.1");
//! assert_eq!(&packet.content()[..], br#"{"command":"launch"}"#);
//! ```

use bytes::Bytes;
use serde::Serialize;
use serde_json::Value;

use super::packet::Packet;
use super::wire_format::{
    header_names, request_start_line, response_start_line, Header, ResponseCode,
};
use crate::codec::{Body, ContentType};
use crate::error::{DapwireError, Result};

/// Fluent builder for [`Packet`]s.
#[derive(Debug)]
pub struct PacketBuilder {
    start_line: String,
    headers: Vec<Header>,
    body: Option<std::result::Result<Value, serde_json::Error>>,
}

impl PacketBuilder {
    /// Start a `POST <route> HTTP/1.1` request.
    pub fn request(route: &str) -> Self {
        Self::with_start_line(request_start_line(route))
    }

    /// Start a response with one of the known status codes.
    pub fn response(code: ResponseCode) -> Self {
        Self::response_with(code.code(), code.reason())
    }

    /// Start a response with an arbitrary code and reason phrase.
    pub fn response_with(code: u16, reason: &str) -> Self {
        Self::with_start_line(response_start_line(code, reason))
    }

    fn with_start_line(start_line: String) -> Self {
        Self {
            start_line,
            headers: Vec::new(),
            body: None,
        }
    }

    /// Set a header. A later call with the same name replaces the value.
    pub fn header(mut self, name: &str, value: impl ToString) -> Self {
        let value = value.to_string();
        match self.headers.iter_mut().find(|h| h.name == name) {
            Some(header) => header.value = value,
            None => self.headers.push(Header::new(name, value)),
        }
        self
    }

    /// Set all headers from a list, in order.
    pub fn headers(self, headers: impl IntoIterator<Item = Header>) -> Self {
        headers
            .into_iter()
            .fold(self, |builder, h| builder.header(&h.name, h.value))
    }

    pub fn content_type(self, content_type: ContentType) -> Self {
        self.header(header_names::CONTENT_TYPE, content_type)
    }

    pub fn invoke_id(self, id: impl ToString) -> Self {
        self.header(header_names::INVOKE_ID, id)
    }

    pub fn instance_id(self, id: impl ToString) -> Self {
        self.header(header_names::INSTANCE_ID, id)
    }

    pub fn invoke_contract(self, contract: impl ToString) -> Self {
        self.header(header_names::INVOKE_CONTRACT, contract)
    }

    /// Attach a body, encoded at `build()` time.
    pub fn body<T: Serialize + ?Sized>(mut self, body: &T) -> Self {
        self.body = Some(serde_json::to_value(body));
        self
    }

    /// Encode the body and produce the packet.
    ///
    /// Fails if `Content-Type` is missing, or if a body is present and its
    /// content type has no encoder.
    pub fn build(self) -> Result<Packet> {
        let content_type = self
            .headers
            .iter()
            .find(|h| h.name == header_names::CONTENT_TYPE)
            .map(|h| h.value.as_str())
            .ok_or(DapwireError::ContentTypeRequired)?;

        let content = match self.body {
            None => Bytes::new(),
            Some(value) => {
                let content_type = ContentType::parse(content_type)?;
                Bytes::from(Body::encode(content_type, &value?)?)
            }
        };

        Ok(Packet::new(self.start_line, self.headers, content))
    }
}

/// Build a request packet for `route`.
pub fn build_request<B: Serialize + ?Sized>(
    route: &str,
    headers: Vec<Header>,
    body: Option<&B>,
) -> Result<Packet> {
    let builder = PacketBuilder::request(route).headers(headers);
    match body {
        Some(body) => builder.body(body).build(),
        None => builder.build(),
    }
}

/// Build a response packet.
pub fn build_response<B: Serialize + ?Sized>(
    code: u16,
    reason: &str,
    headers: Vec<Header>,
    body: Option<&B>,
) -> Result<Packet> {
    let builder = PacketBuilder::response_with(code, reason).headers(headers);
    match body {
        Some(body) => builder.body(body).build(),
        None => builder.build(),
    }
}
