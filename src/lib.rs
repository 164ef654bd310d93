//! # dapwire
//!
//! Transport layer between a debug-adapter front end and a remote script
//! debugger backend.
//!
//! Messages travel as HTTP-like frames over one persistent TCP or local
//! socket connection:
//!
//! ```text
//! POST /dap HTTP/1.1\r\n
//! Content-Type: application/json\r\n
//! Invoke-Id: 7\r\n
//! Content-Length: 20\r\n
//! \r\n
//! {"command":"launch"}
//! ```
//!
//! ## Architecture
//!
//! - **Protocol**: packet model, builder and incremental stream parser
//! - **Remoting**: lazily opened connection with one read loop, request /
//!   response correlation by `Invoke-Id`, debug-adapter message stream
//! - **Sync**: single-consumer async queue and single-flight lazy value
//!
//! ## Example
//!
//! ```ignore
//! use dapwire::{DebuggerHost, ProtocolMessage, RemotingConfig};
//!
//! #[tokio::main]
//! async fn main() -> dapwire::Result<()> {
//!     let config = RemotingConfig::new("tcp://localhost:8845").instance_id("editor");
//!     let host = DebuggerHost::from_config(&config)?;
//!
//!     let session = host.open_session("main").await?;
//!     session
//!         .send_message(&ProtocolMessage::request(1, "initialize", None))
//!         .await?;
//!
//!     while let Ok(message) = session.get_message().await {
//!         println!("{message:?}");
//!     }
//!     Ok(())
//! }
//! ```

pub mod codec;
pub mod config;
pub mod dap;
pub mod error;
pub mod protocol;
pub mod remoting;
pub mod sync;
pub mod transport;
pub mod writer;

pub use codec::{Body, ContentType};
pub use config::RemotingConfig;
pub use dap::ProtocolMessage;
pub use error::{DapwireError, Result};
pub use protocol::{
    build_request, build_response, Header, Packet, PacketBuilder, ResponseCode, StreamParser,
};
pub use remoting::{
    DebuggerHost, MessageStream, RemoteClient, RequestService, ServiceEvent, Subscription,
};
pub use sync::{AsyncQueue, LazyAsyncValue};
pub use transport::{Connection, TransportAddress};
