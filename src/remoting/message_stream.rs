//! Debug-adapter message hand-off.
//!
//! A [`MessageStream`] turns the unsolicited frames of a [`RequestService`]
//! into a queue of [`ProtocolMessage`]s for the adapter session. Outbound
//! messages are posted to `/dap` as JSON.
//!
//! The queue is closed after a message that ends the session (`terminated`
//! event, `disconnect` response) and when the service stream closes or
//! fails. Messages already queued stay readable.

use std::sync::Arc;

use tokio::task::JoinHandle;

use super::request_service::{RequestService, ServiceEvent, Subscription};
use crate::codec::ContentType;
use crate::dap::ProtocolMessage;
use crate::error::Result;
use crate::protocol::PacketBuilder;
use crate::sync::AsyncQueue;

/// Route that carries debug-adapter messages.
pub const DAP_ROUTE: &str = "/dap";

/// Queue of inbound debug-adapter messages plus an outbound sender.
pub struct MessageStream {
    service: Arc<RequestService>,
    queue: Arc<AsyncQueue<ProtocolMessage>>,
    reader: JoinHandle<()>,
}

impl MessageStream {
    /// Start collecting messages from `service`.
    ///
    /// Must be called inside a tokio runtime. Only frames decoded after this
    /// call are delivered.
    pub fn new(service: Arc<RequestService>) -> Self {
        let queue = Arc::new(AsyncQueue::new());
        let reader = tokio::spawn(read_messages(service.subscribe(), queue.clone()));

        Self {
            service,
            queue,
            reader,
        }
    }

    /// Next inbound message.
    ///
    /// Fails with [`DapwireError::Closed`](crate::DapwireError::Closed) once
    /// the session ended and the backlog is drained.
    pub async fn get_message(&self) -> Result<ProtocolMessage> {
        self.queue.dequeue().await
    }

    /// Post `message` to the remote side.
    pub async fn send_message(&self, message: &ProtocolMessage) -> Result<()> {
        let packet = PacketBuilder::request(DAP_ROUTE)
            .content_type(ContentType::Json)
            .body(message)
            .build()?;

        self.service.send(packet).await
    }

    /// Whether the session ended.
    pub fn is_closed(&self) -> bool {
        self.queue.is_closed()
    }

    /// End the session locally. Queued messages stay readable.
    pub fn close(&self) {
        self.reader.abort();
        self.queue.close();
    }
}

impl Drop for MessageStream {
    fn drop(&mut self) {
        self.close();
    }
}

async fn read_messages(mut subscription: Subscription, queue: Arc<AsyncQueue<ProtocolMessage>>) {
    while let Some(event) = subscription.recv().await {
        let packet = match event {
            ServiceEvent::Packet(packet) if !packet.is_response() => packet,
            ServiceEvent::Packet(_) => continue,
            ServiceEvent::Closed { .. } => break,
            ServiceEvent::Failed { error, .. } => {
                tracing::debug!(error = %error, "message stream failed");
                break;
            }
        };

        let message = match packet.body_as::<ProtocolMessage>() {
            Ok(message) => message,
            Err(err) => {
                tracing::error!(
                    error = %err,
                    start_line = packet.start_line(),
                    "undecodable debug-adapter message"
                );
                break;
            }
        };

        let ends_session = message.ends_session();
        if queue.enqueue(message).is_err() || ends_session {
            break;
        }
    }

    queue.close();
}
