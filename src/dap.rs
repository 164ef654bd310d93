//! Debug-adapter protocol message envelope.
//!
//! Only the envelope is modelled here. Arguments and bodies stay as raw JSON
//! values because the command semantics belong to the adapter session, not
//! to the transport.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Event that ends a debug session.
pub const TERMINATED_EVENT: &str = "terminated";

/// Command whose response ends a debug session.
pub const DISCONNECT_COMMAND: &str = "disconnect";

/// A debug-adapter protocol message, discriminated by its `type` field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ProtocolMessage {
    Request(Request),
    Response(Response),
    Event(Event),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Request {
    pub seq: u64,
    pub command: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub arguments: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    pub seq: u64,
    pub request_seq: u64,
    pub success: bool,
    pub command: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub seq: u64,
    pub event: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<Value>,
}

impl ProtocolMessage {
    pub fn request(seq: u64, command: impl Into<String>, arguments: Option<Value>) -> Self {
        Self::Request(Request {
            seq,
            command: command.into(),
            arguments,
        })
    }

    pub fn event(seq: u64, event: impl Into<String>, body: Option<Value>) -> Self {
        Self::Event(Event {
            seq,
            event: event.into(),
            body,
        })
    }

    /// Successful response to `request`.
    pub fn success(seq: u64, request: &Request, body: Option<Value>) -> Self {
        Self::Response(Response {
            seq,
            request_seq: request.seq,
            success: true,
            command: request.command.clone(),
            message: None,
            body,
        })
    }

    /// Failed response to `request`.
    pub fn error(seq: u64, request: &Request, message: impl Into<String>) -> Self {
        Self::Response(Response {
            seq,
            request_seq: request.seq,
            success: false,
            command: request.command.clone(),
            message: Some(message.into()),
            body: None,
        })
    }

    pub fn seq(&self) -> u64 {
        match self {
            Self::Request(r) => r.seq,
            Self::Response(r) => r.seq,
            Self::Event(e) => e.seq,
        }
    }

    /// A `terminated` event or a `disconnect` response.
    pub fn ends_session(&self) -> bool {
        match self {
            Self::Event(e) => e.event == TERMINATED_EVENT,
            Self::Response(r) => r.command == DISCONNECT_COMMAND,
            Self::Request(_) => false,
        }
    }
}
