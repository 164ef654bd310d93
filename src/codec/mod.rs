//! Codec module - content types and body encoding/decoding.
//!
//! A packet body is interpreted according to its `Content-Type` header.
//! The supported kinds are modelled as a closed sum type ([`Body`]) so that
//! decoding is a fallible conversion at the boundary:
//!
//! - `application/json` - [`JsonCodec`], decoded into [`Body::Json`]
//! - `text/plain` - [`TextCodec`], decoded into [`Body::Text`]
//! - `xapplication/msgpack` - [`MsgPackCodec`], decoded into [`Body::MsgPack`]
//!
//! Content type values are literal and case-sensitive; anything else fails
//! with [`DapwireError::UnsupportedContentType`].
//!
//! # Example
//!
//! ```
//! use dapwire::codec::{Body, ContentType};
//!
//! let body = Body::decode(ContentType::Json, br#"{"success":true}"#).unwrap();
//! assert_eq!(body.as_json().unwrap()["success"], true);
//! ```

mod json;
mod msgpack;
mod text;

use std::fmt;

use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::error::{DapwireError, Result};

pub use json::JsonCodec;
pub use msgpack::MsgPackCodec;
pub use text::TextCodec;

/// Content types understood by the packet model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ContentType {
    /// `application/json`
    Json,
    /// `text/plain`
    Text,
    /// `xapplication/msgpack`
    MsgPack,
}

impl ContentType {
    pub const JSON: &'static str = "application/json";
    pub const TEXT: &'static str = "text/plain";
    pub const MSGPACK: &'static str = "xapplication/msgpack";

    /// Header value for this content type.
    pub const fn as_str(&self) -> &'static str {
        match self {
            ContentType::Json => Self::JSON,
            ContentType::Text => Self::TEXT,
            ContentType::MsgPack => Self::MSGPACK,
        }
    }

    /// Parse a `Content-Type` header value (exact match).
    pub fn parse(value: &str) -> Result<Self> {
        match value {
            Self::JSON => Ok(ContentType::Json),
            Self::TEXT => Ok(ContentType::Text),
            Self::MSGPACK => Ok(ContentType::MsgPack),
            other => Err(DapwireError::UnsupportedContentType(other.to_string())),
        }
    }
}

impl fmt::Display for ContentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Decoded packet body.
#[derive(Debug, Clone, PartialEq)]
pub enum Body {
    /// Structured value from `application/json`.
    Json(Value),
    /// Raw string from `text/plain`.
    Text(String),
    /// Structured value from `xapplication/msgpack`.
    MsgPack(Value),
}

impl Body {
    /// Decode raw content. Either the whole body decodes or an error is returned.
    pub fn decode(content_type: ContentType, content: &[u8]) -> Result<Self> {
        match content_type {
            ContentType::Json => Ok(Body::Json(JsonCodec::decode(content)?)),
            ContentType::Text => Ok(Body::Text(TextCodec::decode(content)?)),
            ContentType::MsgPack => Ok(Body::MsgPack(MsgPackCodec::decode(content)?)),
        }
    }

    /// Encode a structured value as content of the given type.
    ///
    /// `text/plain` only accepts string values.
    pub fn encode(content_type: ContentType, value: &Value) -> Result<Vec<u8>> {
        match content_type {
            ContentType::Json => JsonCodec::encode(value),
            ContentType::MsgPack => MsgPackCodec::encode(value),
            ContentType::Text => match value {
                Value::String(text) => Ok(TextCodec::encode(text)),
                _ => Err(DapwireError::UnsupportedContentType(format!(
                    "{} with non-string body",
                    ContentType::TEXT
                ))),
            },
        }
    }

    /// The content type this body was decoded from.
    pub fn content_type(&self) -> ContentType {
        match self {
            Body::Json(_) => ContentType::Json,
            Body::Text(_) => ContentType::Text,
            Body::MsgPack(_) => ContentType::MsgPack,
        }
    }

    /// Structured value, for JSON and MsgPack bodies.
    pub fn as_json(&self) -> Option<&Value> {
        match self {
            Body::Json(value) | Body::MsgPack(value) => Some(value),
            Body::Text(_) => None,
        }
    }

    /// String content, for text bodies.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Body::Text(text) => Some(text),
            _ => None,
        }
    }

    /// Convert a structured body into a typed value.
    pub fn to_typed<T: DeserializeOwned>(&self) -> Result<T> {
        match self {
            Body::Json(value) | Body::MsgPack(value) => Ok(T::deserialize(value)?),
            Body::Text(text) => Ok(T::deserialize(Value::String(text.clone()))?),
        }
    }
}
