//! Transport module - address parsing and connected byte streams.
//!
//! Supports:
//! - TCP sockets (`tcp://host:port`)
//! - Unix Domain Sockets (Linux/macOS) and Named Pipes (Windows) (`ipc://name`)

mod address;
mod connection;

pub use address::TransportAddress;
pub use connection::{Connection, ConnectionOptions, DEFAULT_READ_BUFFER_SIZE};
