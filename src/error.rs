//! Error types for dapwire.

use std::sync::Arc;

use thiserror::Error;

/// Main error type for all dapwire operations.
///
/// The type is `Clone`: a single connection failure is delivered to every
/// waiter of a lazy connection and to every pending invocation at once.
#[derive(Debug, Clone, Error)]
pub enum DapwireError {
    /// I/O error during socket/pipe operations.
    #[error("I/O error: {0}")]
    Io(Arc<std::io::Error>),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(Arc<serde_json::Error>),

    /// MsgPack serialization error.
    #[error("MsgPack encode error: {0}")]
    MsgPackEncode(Arc<rmp_serde::encode::Error>),

    /// MsgPack deserialization error.
    #[error("MsgPack decode error: {0}")]
    MsgPackDecode(Arc<rmp_serde::decode::Error>),

    /// Packet text that must be UTF-8 is not.
    #[error("Invalid UTF-8 in {0}")]
    InvalidUtf8(&'static str),

    /// Header block complete but `Content-Length` is absent.
    #[error("Content-Length header is missing")]
    ContentLengthMissing,

    /// `Content-Length` is present but not a byte count.
    #[error("Invalid Content-Length: {0:?}")]
    InvalidContentLength(String),

    /// Malformed header block.
    #[error("Framing error: {0}")]
    Framing(String),

    /// Declared content or header block exceeds the configured limit.
    #[error("Content size {size} exceeds maximum {max}")]
    ContentTooLarge { size: usize, max: usize },

    /// Body cannot be encoded or decoded for this content type.
    #[error("Unsupported content type: ({0})")]
    UnsupportedContentType(String),

    /// Packet construction without a `Content-Type` header.
    #[error("Content-Type header must be specified")]
    ContentTypeRequired,

    /// Lookup of a header that the packet does not carry.
    #[error("Packet does not contain header [{0}]")]
    MissingHeader(String),

    /// Attempt to clear a header by assigning an empty value.
    #[error("Clearing header [{0}] with an empty value is not supported")]
    EmptyHeaderValue(String),

    /// Outbound call without an `Invoke-Id` header.
    #[error("Missing invocation id")]
    MissingInvokeId,

    /// The connection terminated while the invocation was pending.
    #[error("Invocation broken")]
    InvocationBroken,

    /// The remote side answered with a non-OK status.
    #[error("Remote failure: {code} {reason}")]
    RemoteFailure { code: u16, reason: String },

    /// Transport address is not `tcp://...` or `ipc://...`.
    #[error("Invalid transport address: ({0})")]
    InvalidAddress(String),

    /// Connection closed unexpectedly.
    #[error("Connection closed")]
    ConnectionClosed,

    /// Backpressure timeout - write queue full.
    #[error("Backpressure timeout")]
    BackpressureTimeout,

    /// Queue was closed.
    #[error("Object closed")]
    Closed,

    /// A second `dequeue` was issued while one is still suspended.
    #[error("Concurrent dequeue on a single-consumer queue")]
    ConcurrentDequeue,

    /// A lazy value was reset while its initialization was in flight.
    #[error("Value reset")]
    ValueReset,
}

impl From<std::io::Error> for DapwireError {
    fn from(err: std::io::Error) -> Self {
        DapwireError::Io(Arc::new(err))
    }
}

impl From<serde_json::Error> for DapwireError {
    fn from(err: serde_json::Error) -> Self {
        DapwireError::Json(Arc::new(err))
    }
}

impl From<rmp_serde::encode::Error> for DapwireError {
    fn from(err: rmp_serde::encode::Error) -> Self {
        DapwireError::MsgPackEncode(Arc::new(err))
    }
}

impl From<rmp_serde::decode::Error> for DapwireError {
    fn from(err: rmp_serde::decode::Error) -> Self {
        DapwireError::MsgPackDecode(Arc::new(err))
    }
}

impl DapwireError {
    /// Whether this error is fatal to a stream parser (framing class).
    pub fn is_framing(&self) -> bool {
        matches!(
            self,
            DapwireError::ContentLengthMissing
                | DapwireError::InvalidContentLength(_)
                | DapwireError::Framing(_)
                | DapwireError::ContentTooLarge { .. }
        )
    }
}

/// Result type alias using DapwireError.
pub type Result<T> = std::result::Result<T, DapwireError>;
