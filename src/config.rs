//! Remoting configuration.
//!
//! [`RemotingConfig`] deserializes from the remoting section of a launch
//! configuration. Every field except `address` has a default:
//!
//! ```json
//! {
//!     "address": "tcp://localhost:9000",
//!     "instance_id": "editor-1",
//!     "writer": { "backpressure_timeout_ms": 2000 }
//! }
//! ```

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::protocol::{DEFAULT_MAX_CONTENT_LENGTH, DEFAULT_MAX_HEADER_SIZE};
use crate::transport::{ConnectionOptions, TransportAddress, DEFAULT_READ_BUFFER_SIZE};
use crate::writer::WriterConfig;

/// Settings for one debugger backend connection.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct RemotingConfig {
    /// Transport address, `tcp://host:port` or `ipc://name`.
    pub address: String,

    /// Sent as `Instance-Id` with every invocation when set.
    #[serde(default)]
    pub instance_id: Option<String>,

    /// Bytes requested from the stream per read.
    #[serde(default = "default_read_buffer_size")]
    pub read_buffer_size: usize,

    /// Largest accepted packet body.
    #[serde(default = "default_max_content_length")]
    pub max_content_length: usize,

    /// Largest accepted header block.
    #[serde(default = "default_max_header_size")]
    pub max_header_size: usize,

    #[serde(default)]
    pub writer: WriterConfig,
}

fn default_read_buffer_size() -> usize {
    DEFAULT_READ_BUFFER_SIZE
}

fn default_max_content_length() -> usize {
    DEFAULT_MAX_CONTENT_LENGTH
}

fn default_max_header_size() -> usize {
    DEFAULT_MAX_HEADER_SIZE
}

impl RemotingConfig {
    /// Configuration with defaults for everything but the address.
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            instance_id: None,
            read_buffer_size: DEFAULT_READ_BUFFER_SIZE,
            max_content_length: DEFAULT_MAX_CONTENT_LENGTH,
            max_header_size: DEFAULT_MAX_HEADER_SIZE,
            writer: WriterConfig::default(),
        }
    }

    /// Parse from a JSON document.
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Set the instance id attached to invocations.
    pub fn instance_id(mut self, id: impl Into<String>) -> Self {
        self.instance_id = Some(id.into());
        self
    }

    /// Set the read buffer size.
    ///
    /// Default: 64 KiB
    pub fn read_buffer_size(mut self, size: usize) -> Self {
        self.read_buffer_size = size;
        self
    }

    /// Set the maximum body size.
    ///
    /// Default: 1 GiB
    pub fn max_content_length(mut self, size: usize) -> Self {
        self.max_content_length = size;
        self
    }

    /// Set the maximum header block size.
    ///
    /// Default: 64 KiB
    pub fn max_header_size(mut self, size: usize) -> Self {
        self.max_header_size = size;
        self
    }

    /// Set the maximum pending packets for backpressure.
    ///
    /// Default: 1024
    pub fn max_pending_packets(mut self, limit: usize) -> Self {
        self.writer.max_pending_packets = limit;
        self
    }

    /// Set the writer channel capacity.
    ///
    /// Default: 1024
    pub fn channel_capacity(mut self, capacity: usize) -> Self {
        self.writer.channel_capacity = capacity;
        self
    }

    /// Set the backpressure timeout.
    ///
    /// Default: 5 seconds
    pub fn backpressure_timeout(mut self, timeout: Duration) -> Self {
        self.writer.backpressure_timeout = timeout;
        self
    }

    /// Parsed transport address.
    pub fn transport_address(&self) -> Result<TransportAddress> {
        TransportAddress::parse(&self.address)
    }

    /// Per-connection options derived from this configuration.
    pub fn connection_options(&self) -> ConnectionOptions {
        ConnectionOptions {
            read_buffer_size: self.read_buffer_size,
            writer: self.writer.clone(),
        }
    }
}

/// Serde adapter storing a [`Duration`] as whole milliseconds.
pub(crate) mod duration_ms {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis().try_into().unwrap_or(u64::MAX))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}
