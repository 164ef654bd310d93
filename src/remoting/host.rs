//! Debugger backend host.
//!
//! [`DebuggerHost`] combines one [`RequestService`] and one [`RemoteClient`]
//! for a configured backend. It numbers invocations, tags them with the
//! instance id and maps non-OK replies to errors.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;

use super::message_stream::MessageStream;
use super::remote_client::RemoteClient;
use super::request_service::RequestService;
use crate::codec::ContentType;
use crate::config::RemotingConfig;
use crate::error::{DapwireError, Result};
use crate::protocol::{Packet, PacketBuilder, ResponseCode};

/// Route prefix of the session handshake.
pub const CREATE_SESSION_ROUTE: &str = "/debug/create";

/// Client side of a debugger backend.
pub struct DebuggerHost {
    client: RemoteClient,
    instance_id: Option<String>,
    last_invoke_id: AtomicU64,
}

impl DebuggerHost {
    /// Host for the backend at `config.address`.
    ///
    /// The address is validated immediately; the connection opens on the
    /// first invocation. Must be called inside a tokio runtime.
    pub fn from_config(config: &RemotingConfig) -> Result<Self> {
        let service = RequestService::from_config(config)?;
        Ok(Self::new(Arc::new(service), config.instance_id.clone()))
    }

    /// Host over an existing service.
    pub fn new(service: Arc<RequestService>, instance_id: Option<String>) -> Self {
        Self {
            client: RemoteClient::new(service),
            instance_id,
            last_invoke_id: AtomicU64::new(0),
        }
    }

    pub fn request_service(&self) -> &Arc<RequestService> {
        self.client.request_service()
    }

    pub fn remote_client(&self) -> &RemoteClient {
        &self.client
    }

    fn next_invoke_id(&self) -> u64 {
        self.last_invoke_id.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Call `route` with an optional JSON body and wait for the reply.
    ///
    /// A reply with a code other than 200 fails with
    /// [`DapwireError::RemoteFailure`].
    pub async fn invoke<B>(&self, route: &str, body: Option<&B>) -> Result<Arc<Packet>>
    where
        B: Serialize + ?Sized,
    {
        let invoke_id = self.next_invoke_id();
        let mut builder = PacketBuilder::request(route)
            .content_type(ContentType::Json)
            .invoke_id(invoke_id);
        if let Some(instance_id) = &self.instance_id {
            builder = builder.instance_id(instance_id);
        }
        if let Some(body) = body {
            builder = builder.body(body);
        }

        tracing::debug!(route, invoke_id, "invoking");
        let response = self.client.send(builder.build()?).await?;

        match response.response_line() {
            Some(line) if line.code == ResponseCode::Ok.code() => Ok(response),
            Some(line) => Err(DapwireError::RemoteFailure {
                code: line.code,
                reason: line.reason.to_string(),
            }),
            None => Err(DapwireError::Framing(format!(
                "invocation {} answered by a request",
                invoke_id
            ))),
        }
    }

    /// [`invoke`](Self::invoke) and decode the reply body.
    pub async fn invoke_as<B, R>(&self, route: &str, body: Option<&B>) -> Result<R>
    where
        B: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        self.invoke(route, body).await?.body_as()
    }

    /// Create a debug session at `location` and return its message stream.
    ///
    /// The stream subscribes before the handshake is sent, so no message
    /// that follows the handshake reply is missed.
    pub async fn open_session(&self, location: &str) -> Result<MessageStream> {
        let stream = MessageStream::new(self.request_service().clone());
        let route = format!("{}/{}", CREATE_SESSION_ROUTE, location);

        self.invoke::<()>(&route, None).await?;
        tracing::debug!(location, "debug session created");

        Ok(stream)
    }

    /// Close the underlying service. Pending invocations are broken.
    pub fn close(&self) {
        self.request_service().close();
    }
}
