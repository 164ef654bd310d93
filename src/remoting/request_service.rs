//! Connection owner and packet fan-out.
//!
//! A [`RequestService`] owns one lazily opened [`Connection`]. The first
//! `send` starts a single read loop that feeds a [`StreamParser`] and
//! publishes every decoded packet to all subscribers, in stream order.
//!
//! When the loop ends (end of stream, read error, framing error) the lazy
//! connection is reset, so the next `send` opens a fresh connection and
//! starts a fresh loop. Subscribers then receive [`ServiceEvent::Closed`]
//! or [`ServiceEvent::Failed`]. There is no automatic reconnect.
//!
//! Terminal events carry the generation of the loop that ended: the number
//! of loops that had ended before it. [`RequestService::generation`] read
//! before a send is always greater than any generation whose loop ended
//! before that read.

use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};

use tokio::sync::{mpsc, Notify};

use crate::config::RemotingConfig;
use crate::error::{DapwireError, Result};
use crate::protocol::{Packet, StreamParser, DEFAULT_MAX_CONTENT_LENGTH, DEFAULT_MAX_HEADER_SIZE};
use crate::sync::LazyAsyncValue;
use crate::transport::Connection;

/// Notification delivered to subscribers.
#[derive(Debug, Clone)]
pub enum ServiceEvent {
    /// A decoded packet.
    Packet(Arc<Packet>),
    /// The stream ended or the service was closed.
    Closed { generation: u64 },
    /// The read loop stopped on an error.
    Failed { generation: u64, error: DapwireError },
}

impl ServiceEvent {
    /// `true` for `Closed` and `Failed`.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, ServiceEvent::Packet(_))
    }

    /// Generation of the loop that ended, `None` for packets.
    pub fn generation(&self) -> Option<u64> {
        match self {
            ServiceEvent::Packet(_) => None,
            ServiceEvent::Closed { generation } | ServiceEvent::Failed { generation, .. } => {
                Some(*generation)
            }
        }
    }
}

struct Subscribers {
    next_id: u64,
    list: Vec<(u64, mpsc::UnboundedSender<ServiceEvent>)>,
}

struct Inner {
    connection: LazyAsyncValue<Arc<Connection>>,
    subscribers: Mutex<Subscribers>,
    running: Mutex<bool>,
    /// Ended loops. Only advanced under the `running` lock.
    generation: AtomicU64,
    closed: AtomicBool,
    shutdown: Notify,
    max_content_length: usize,
    max_header_size: usize,
}

/// Owner of the remoting connection.
pub struct RequestService {
    inner: Arc<Inner>,
}

impl RequestService {
    /// Create a service that opens its connection with `factory` on first use.
    pub fn new<F, Fut>(factory: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Connection>> + Send + 'static,
    {
        Self::with_limits(factory, DEFAULT_MAX_CONTENT_LENGTH, DEFAULT_MAX_HEADER_SIZE)
    }

    /// Like [`new`](Self::new) with explicit parser limits.
    pub fn with_limits<F, Fut>(factory: F, max_content_length: usize, max_header_size: usize) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Connection>> + Send + 'static,
    {
        let factory = Arc::new(factory);
        let connection = LazyAsyncValue::new(move || {
            let connect = factory();
            async move { connect.await.map(Arc::new) }
        });

        Self {
            inner: Arc::new(Inner {
                connection,
                subscribers: Mutex::new(Subscribers {
                    next_id: 0,
                    list: Vec::new(),
                }),
                running: Mutex::new(false),
                generation: AtomicU64::new(0),
                closed: AtomicBool::new(false),
                shutdown: Notify::new(),
                max_content_length,
                max_header_size,
            }),
        }
    }

    /// Service connecting to the configured transport address.
    ///
    /// The address is validated here; the connection is opened on the
    /// first `send`.
    pub fn from_config(config: &RemotingConfig) -> Result<Self> {
        let address = config.transport_address()?;
        let options = config.connection_options();

        Ok(Self::with_limits(
            move || {
                let address = address.clone();
                let options = options.clone();
                async move { Connection::open(&address, options).await }
            },
            config.max_content_length,
            config.max_header_size,
        ))
    }

    /// Register a subscriber. Dropping the [`Subscription`] unsubscribes.
    pub fn subscribe(&self) -> Subscription {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut subscribers = lock(&self.inner.subscribers);
        let id = subscribers.next_id;
        subscribers.next_id += 1;
        subscribers.list.push((id, tx));

        Subscription {
            id,
            rx,
            service: Arc::downgrade(&self.inner),
        }
    }

    /// Number of live subscribers.
    pub fn subscriber_count(&self) -> usize {
        lock(&self.inner.subscribers).list.len()
    }

    /// Write a packet, opening the connection and starting the read loop
    /// if needed.
    ///
    /// Packets reach the stream in the order `send` is called.
    pub async fn send(&self, mut packet: Packet) -> Result<()> {
        if self.inner.closed.load(Ordering::Acquire) {
            return Err(DapwireError::Closed);
        }

        self.ensure_running()?;

        let connection = self.inner.connection.wait_value().await?;
        let bytes = packet.to_bytes();
        tracing::trace!(
            start_line = packet.start_line(),
            bytes = bytes.len(),
            "sending packet"
        );
        connection.write(bytes).await
    }

    /// Number of read loops that have ended so far.
    pub fn generation(&self) -> u64 {
        self.inner.generation.load(Ordering::Acquire)
    }

    /// Whether the read loop is active.
    pub fn is_running(&self) -> bool {
        *lock(&self.inner.running)
    }

    /// Stop the read loop and refuse further sends.
    ///
    /// Subscribers receive [`ServiceEvent::Closed`] once the loop exits, or
    /// immediately if no loop is running.
    pub fn close(&self) {
        if self.inner.closed.swap(true, Ordering::AcqRel) {
            return;
        }

        let running = lock(&self.inner.running);
        if *running {
            self.inner.shutdown.notify_one();
        } else {
            let generation = self.inner.generation.load(Ordering::Acquire);
            drop(running);
            self.inner.connection.reset(Some(DapwireError::Closed));
            self.inner.publish(ServiceEvent::Closed { generation });
        }
    }

    /// Whether [`close`](Self::close) was called.
    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    fn ensure_running(&self) -> Result<()> {
        let mut running = lock(&self.inner.running);
        // `close` may have finished after the check in `send`.
        if self.inner.closed.load(Ordering::Acquire) {
            return Err(DapwireError::Closed);
        }
        if *running {
            return Ok(());
        }
        *running = true;

        let inner = Arc::clone(&self.inner);
        tokio::spawn(inner.run());
        Ok(())
    }
}

impl Drop for RequestService {
    fn drop(&mut self) {
        self.close();
    }
}

impl std::fmt::Debug for RequestService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestService")
            .field("running", &self.is_running())
            .field("closed", &self.is_closed())
            .field("subscribers", &self.subscriber_count())
            .finish()
    }
}

impl Inner {
    async fn run(self: Arc<Self>) {
        tracing::debug!("request service read loop started");

        let outcome = self.read_loop().await;

        let generation = {
            let mut running = lock(&self.running);
            let generation = self.generation.fetch_add(1, Ordering::AcqRel);
            self.connection.reset(None);
            *running = false;
            generation
        };

        let event = match outcome {
            Ok(()) => ServiceEvent::Closed { generation },
            Err(error) => {
                tracing::warn!(error = %error, generation, "request service read loop failed");
                ServiceEvent::Failed { generation, error }
            }
        };

        tracing::debug!(generation, "request service read loop stopped");
        self.publish(event);
    }

    async fn read_loop(&self) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Ok(());
        }

        let connection = tokio::select! {
            connection = self.connection.wait_value() => connection?,
            _ = self.shutdown.notified() => return Ok(()),
        };

        let mut parser = StreamParser::with_limits(self.max_content_length, self.max_header_size);

        loop {
            let chunk = tokio::select! {
                chunk = connection.read() => chunk?,
                _ = self.shutdown.notified() => {
                    connection.close();
                    return Ok(());
                }
            };

            let Some(chunk) = chunk else {
                return Ok(());
            };

            for packet in parser.packets(Some(&chunk[..])) {
                let packet = packet?;
                tracing::trace!(start_line = packet.start_line(), "packet received");
                self.publish(ServiceEvent::Packet(Arc::new(packet)));
            }
        }
    }

    /// Deliver `event` to every subscriber, pruning the ones that are gone.
    fn publish(&self, event: ServiceEvent) {
        lock(&self.subscribers)
            .list
            .retain(|(_, tx)| tx.send(event.clone()).is_ok());
    }

    fn unsubscribe(&self, id: u64) {
        lock(&self.subscribers).list.retain(|(sid, _)| *sid != id);
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Receiver side of a [`RequestService`] subscription.
pub struct Subscription {
    id: u64,
    rx: mpsc::UnboundedReceiver<ServiceEvent>,
    service: Weak<Inner>,
}

impl Subscription {
    /// Next event. `None` once the service is gone.
    pub async fn recv(&mut self) -> Option<ServiceEvent> {
        self.rx.recv().await
    }

    /// Next event if one is already queued.
    pub fn try_recv(&mut self) -> Option<ServiceEvent> {
        self.rx.try_recv().ok()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(service) = self.service.upgrade() {
            service.unsubscribe(self.id);
        }
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription").field("id", &self.id).finish()
    }
}
