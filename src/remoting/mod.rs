//! Remoting layer - connection ownership, correlation and sessions.
//!
//! - [`RequestService`] owns the lazy connection and fans decoded packets out
//!   to subscribers
//! - [`RemoteClient`] matches responses to calls by `Invoke-Id`
//! - [`MessageStream`] queues unsolicited debug-adapter messages
//! - [`DebuggerHost`] ties them together for one configured backend

mod host;
mod message_stream;
mod remote_client;
mod request_service;

pub use host::{DebuggerHost, CREATE_SESSION_ROUTE};
pub use message_stream::{MessageStream, DAP_ROUTE};
pub use remote_client::RemoteClient;
pub use request_service::{RequestService, ServiceEvent, Subscription};
