//! Request/response correlation over a [`RequestService`].
//!
//! Every outbound request carries an `Invoke-Id`. The client keeps the
//! pending invocations in issue order and resolves the first one whose id
//! matches an inbound response. Requests from the remote side are ignored
//! here; see [`MessageStream`](super::MessageStream).
//!
//! Unmatched responses are dropped: a late reply to an abandoned call is
//! expected, not an error. When the service reports closure or failure,
//! every invocation registered before that read loop ended is rejected with
//! [`DapwireError::InvocationBroken`] in one pass. Invocations registered
//! after it ended go out on the next connection and stay pending.

use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use super::request_service::{RequestService, ServiceEvent, Subscription};
use crate::error::{DapwireError, Result};
use crate::protocol::Packet;

type Reply = oneshot::Sender<Result<Arc<Packet>>>;

struct PendingInvocation {
    seq: u64,
    /// Service generation observed at registration.
    generation: u64,
    invoke_id: String,
    reply: Reply,
}

#[derive(Default)]
struct PendingSet {
    next_seq: u64,
    entries: Vec<PendingInvocation>,
}

impl PendingSet {
    fn register(&mut self, generation: u64, invoke_id: String, reply: Reply) -> u64 {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.entries.push(PendingInvocation {
            seq,
            generation,
            invoke_id,
            reply,
        });
        seq
    }

    fn remove(&mut self, seq: u64) {
        self.entries.retain(|entry| entry.seq != seq);
    }

    fn take_matching(&mut self, invoke_id: &str) -> Option<PendingInvocation> {
        let index = self
            .entries
            .iter()
            .position(|entry| entry.invoke_id == invoke_id)?;
        Some(self.entries.remove(index))
    }

    fn take_all(&mut self) -> Vec<PendingInvocation> {
        std::mem::take(&mut self.entries)
    }

    /// Remove the invocations registered before loop `generation` ended.
    fn take_through(&mut self, generation: u64) -> Vec<PendingInvocation> {
        let (broken, kept) = std::mem::take(&mut self.entries)
            .into_iter()
            .partition(|entry| entry.generation <= generation);
        self.entries = kept;
        broken
    }
}

type SharedPending = Arc<Mutex<PendingSet>>;

fn lock(pending: &Mutex<PendingSet>) -> MutexGuard<'_, PendingSet> {
    pending.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Awaitable calls over a shared [`RequestService`].
pub struct RemoteClient {
    service: Arc<RequestService>,
    pending: SharedPending,
    dispatcher: JoinHandle<()>,
}

impl RemoteClient {
    /// Subscribe to `service` and start dispatching responses.
    ///
    /// Must be called inside a tokio runtime.
    pub fn new(service: Arc<RequestService>) -> Self {
        let pending = SharedPending::default();
        let dispatcher = tokio::spawn(dispatch(service.subscribe(), pending.clone()));

        Self {
            service,
            pending,
            dispatcher,
        }
    }

    /// The underlying service.
    pub fn request_service(&self) -> &Arc<RequestService> {
        &self.service
    }

    /// Send `request` and wait for the response with the same `Invoke-Id`.
    ///
    /// Fails with [`DapwireError::MissingInvokeId`] before any I/O when the
    /// header is absent. If the write fails, the invocation is withdrawn and
    /// the write error returned.
    pub async fn send(&self, request: Packet) -> Result<Arc<Packet>> {
        let invoke_id = request
            .invoke_id()
            .ok_or(DapwireError::MissingInvokeId)?
            .to_string();

        let (tx, rx) = oneshot::channel();
        let generation = self.service.generation();
        let seq = lock(&self.pending).register(generation, invoke_id, tx);

        if let Err(err) = self.service.send(request).await {
            lock(&self.pending).remove(seq);
            return Err(err);
        }

        rx.await.unwrap_or(Err(DapwireError::InvocationBroken))
    }

    /// Number of invocations waiting for a response.
    pub fn pending_count(&self) -> usize {
        lock(&self.pending).entries.len()
    }
}

impl Drop for RemoteClient {
    fn drop(&mut self) {
        self.dispatcher.abort();
        reject(lock(&self.pending).take_all());
    }
}

async fn dispatch(mut subscription: Subscription, pending: SharedPending) {
    while let Some(event) = subscription.recv().await {
        match event {
            ServiceEvent::Packet(packet) => handle_inbound(&pending, packet),
            ServiceEvent::Closed { generation } => {
                reject(lock(&pending).take_through(generation));
            }
            ServiceEvent::Failed { generation, error } => {
                tracing::debug!(error = %error, generation, "breaking invocations after stream failure");
                reject(lock(&pending).take_through(generation));
            }
        }
    }

    reject(lock(&pending).take_all());
}

fn handle_inbound(pending: &Mutex<PendingSet>, packet: Arc<Packet>) {
    if !packet.is_response() {
        return;
    }

    let Some(invoke_id) = packet.invoke_id() else {
        tracing::debug!(start_line = packet.start_line(), "response without invocation id");
        return;
    };

    let Some(invocation) = lock(pending).take_matching(invoke_id) else {
        tracing::debug!(invoke_id, "dropping unmatched response");
        return;
    };

    let _ = invocation.reply.send(Ok(packet));
}

fn reject(broken: Vec<PendingInvocation>) {
    if !broken.is_empty() {
        tracing::debug!(count = broken.len(), "invocations broken");
    }
    for invocation in broken {
        let _ = invocation.reply.send(Err(DapwireError::InvocationBroken));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::ContentType;
    use crate::protocol::{PacketBuilder, ResponseCode, StreamParser};
    use crate::transport::{Connection, ConnectionOptions};
    use serde_json::json;
    use std::time::Duration;
    use tokio::io::{duplex, AsyncReadExt, AsyncWriteExt, DuplexStream};

    fn client_over(stream: DuplexStream) -> RemoteClient {
        let stream = Arc::new(Mutex::new(Some(stream)));
        let service = RequestService::new(move || {
            let stream = stream.lock().unwrap().take();
            async move {
                let stream = stream.ok_or(DapwireError::ConnectionClosed)?;
                Ok::<_, DapwireError>(Connection::from_stream(stream, ConnectionOptions::default()))
            }
        });
        RemoteClient::new(Arc::new(service))
    }

    fn call(invoke_id: &str) -> Packet {
        PacketBuilder::request("/call")
            .content_type(ContentType::Json)
            .invoke_id(invoke_id)
            .body(&json!({}))
            .build()
            .unwrap()
    }

    fn reply(invoke_id: &str, value: i64) -> Vec<u8> {
        PacketBuilder::response(ResponseCode::Ok)
            .content_type(ContentType::Json)
            .invoke_id(invoke_id)
            .body(&json!({ "value": value }))
            .build()
            .unwrap()
            .to_bytes()
            .to_vec()
    }

    /// Read from `server` until one full packet has arrived.
    async fn read_request(server: &mut DuplexStream) -> Packet {
        let mut parser = StreamParser::new();
        let mut buf = [0u8; 1024];
        loop {
            let n = server.read(&mut buf).await.unwrap();
            assert!(n > 0, "stream ended before a full packet");
            if let Some(packet) = parser.push(&buf[..n]).unwrap().into_iter().next() {
                return packet;
            }
        }
    }

    async fn wait_pending(client: &RemoteClient, count: usize) {
        while client.pending_count() < count {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
    }

    #[tokio::test]
    async fn test_missing_invoke_id_rejected_before_io() {
        let (client_end, _server) = duplex(1024);
        let client = client_over(client_end);

        let request = PacketBuilder::request("/call")
            .content_type(ContentType::Json)
            .build()
            .unwrap();
        let err = client.send(request).await.unwrap_err();

        assert!(matches!(err, DapwireError::MissingInvokeId));
        assert_eq!(client.pending_count(), 0);
        assert!(!client.request_service().is_running());
    }

    #[tokio::test]
    async fn test_responses_matched_by_invoke_id() {
        let (client_end, mut server) = duplex(4096);
        let client = Arc::new(client_over(client_end));

        let a = tokio::spawn({
            let client = client.clone();
            async move { client.send(call("a")).await }
        });
        let b = tokio::spawn({
            let client = client.clone();
            async move { client.send(call("b")).await }
        });
        wait_pending(&client, 2).await;

        // Out of order, with an unmatched reply in between
        let mut data = reply("b", 2);
        data.extend(reply("zzz", 0));
        data.extend(reply("a", 1));
        server.write_all(&data).await.unwrap();

        let a = a.await.unwrap().unwrap();
        let b = b.await.unwrap().unwrap();
        assert_eq!(a.body().unwrap().as_json().unwrap()["value"], 1);
        assert_eq!(b.body().unwrap().as_json().unwrap()["value"], 2);
        assert_eq!(client.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_requests_from_remote_ignored() {
        let (client_end, mut server) = duplex(4096);
        let client = Arc::new(client_over(client_end));

        let pending = tokio::spawn({
            let client = client.clone();
            async move { client.send(call("1")).await }
        });
        wait_pending(&client, 1).await;

        // A request carrying the same id is not a response
        let mut event = call("1");
        server.write_all(&event.to_bytes()).await.unwrap();
        server.write_all(&reply("1", 7)).await.unwrap();

        let response = pending.await.unwrap().unwrap();
        assert!(response.is_response());
        assert_eq!(response.code(), Some(200));
    }

    #[tokio::test]
    async fn test_stream_closure_breaks_all_pending() {
        let (client_end, mut server) = duplex(4096);
        let client = Arc::new(client_over(client_end));

        let calls: Vec<_> = ["1", "2", "3"]
            .into_iter()
            .map(|id| {
                let client = client.clone();
                tokio::spawn(async move { client.send(call(id)).await })
            })
            .collect();
        wait_pending(&client, 3).await;

        // All three requests are on the wire before the stream ends
        let mut parser = StreamParser::new();
        let mut received = 0;
        let mut buf = [0u8; 1024];
        while received < 3 {
            let n = server.read(&mut buf).await.unwrap();
            received += parser.push(&buf[..n]).unwrap().len();
        }
        drop(server);

        for call in calls {
            let err = call.await.unwrap().unwrap_err();
            assert!(matches!(err, DapwireError::InvocationBroken));
        }
        assert_eq!(client.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_send_failure_withdraws_invocation() {
        let service = RequestService::new(|| async {
            Err::<Connection, _>(DapwireError::InvalidAddress("ipc://".into()))
        });
        let client = RemoteClient::new(Arc::new(service));

        let err = client.send(call("1")).await.unwrap_err();
        assert!(matches!(err, DapwireError::InvalidAddress(_)));
        assert_eq!(client.pending_count(), 0);
    }

    #[test]
    fn test_pending_set_first_match_wins() {
        let mut set = PendingSet::default();
        let (tx1, _rx1) = oneshot::channel();
        let (tx2, _rx2) = oneshot::channel();
        let first = set.register(0, "dup".into(), tx1);
        let second = set.register(0, "dup".into(), tx2);

        assert_eq!(set.take_matching("dup").unwrap().seq, first);
        assert_eq!(set.take_matching("dup").unwrap().seq, second);
        assert!(set.take_matching("dup").is_none());
    }

    #[test]
    fn test_pending_set_take_through_keeps_later_generations() {
        let mut set = PendingSet::default();
        let mut receivers = Vec::new();
        for (generation, id) in [(0, "a"), (1, "b"), (0, "c"), (2, "d")] {
            let (tx, rx) = oneshot::channel();
            set.register(generation, id.into(), tx);
            receivers.push(rx);
        }

        let broken: Vec<_> = set.take_through(0).into_iter().map(|e| e.invoke_id).collect();
        assert_eq!(broken, ["a", "c"]);
        assert_eq!(set.entries.len(), 2);

        let broken: Vec<_> = set.take_through(1).into_iter().map(|e| e.invoke_id).collect();
        assert_eq!(broken, ["b"]);
        assert_eq!(set.entries[0].invoke_id, "d");
    }

    #[tokio::test]
    async fn test_invocation_after_reconnect_survives_old_closure() {
        let (first_end, mut first_server) = duplex(4096);
        let (second_end, mut second_server) = duplex(4096);
        // Popped from the back
        let streams = Arc::new(Mutex::new(vec![second_end, first_end]));
        let service = Arc::new(RequestService::new(move || {
            let stream = streams.lock().unwrap().pop();
            async move {
                let stream = stream.ok_or(DapwireError::ConnectionClosed)?;
                Ok::<_, DapwireError>(Connection::from_stream(stream, ConnectionOptions::default()))
            }
        }));
        let client = Arc::new(RemoteClient::new(service.clone()));

        let old = tokio::spawn({
            let client = client.clone();
            async move { client.send(call("old")).await }
        });
        read_request(&mut first_server).await;
        drop(first_server);

        // The first loop has ended; its closure notice may still be queued.
        while service.generation() == 0 {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
        let new = tokio::spawn({
            let client = client.clone();
            async move { client.send(call("new")).await }
        });

        read_request(&mut second_server).await;
        second_server.write_all(&reply("new", 9)).await.unwrap();

        assert!(matches!(
            old.await.unwrap(),
            Err(DapwireError::InvocationBroken)
        ));
        let response = new.await.unwrap().unwrap();
        assert_eq!(response.body().unwrap().as_json().unwrap()["value"], 9);
    }
}
