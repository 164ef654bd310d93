//! Dedicated writer task for outbound packets.
//!
//! Every serialized packet goes through one mpsc channel to a single writer
//! task, so packets reach the stream in the order `send` was called. Packets
//! that are ready at the same time are written with one vectored write.
//!
//! ```text
//! RemoteClient  ─┐
//! MessageStream ─┼─► mpsc::Sender<OutboundPacket> ─► Writer Task ─► Socket/Pipe
//! DebuggerHost  ─┘
//! ```
//!
//! Senders are throttled by a pending gauge: once `max_pending_packets`
//! packets are accepted but not yet flushed, `send` parks until the writer
//! drains a batch or the backpressure timeout elapses.

use std::collections::VecDeque;
use std::io::IoSlice;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::{Buf, Bytes};
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::{mpsc, Notify};
use tokio::task::JoinHandle;

use crate::error::{DapwireError, Result};

pub const DEFAULT_MAX_PENDING_PACKETS: usize = 1024;
pub const DEFAULT_CHANNEL_CAPACITY: usize = 1024;
pub const DEFAULT_BACKPRESSURE_TIMEOUT: Duration = Duration::from_secs(5);

/// Upper bound on packets drained from the channel per write.
const MAX_BATCH_SIZE: usize = 64;

/// A serialized packet ready to be written.
#[derive(Debug, Clone)]
pub struct OutboundPacket {
    pub bytes: Bytes,
}

impl OutboundPacket {
    #[inline]
    pub fn new(bytes: Bytes) -> Self {
        Self { bytes }
    }

    #[inline]
    pub fn size(&self) -> usize {
        self.bytes.len()
    }
}

/// Writer task settings, usually embedded in `RemotingConfig`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct WriterConfig {
    pub max_pending_packets: usize,
    pub channel_capacity: usize,
    #[serde(rename = "backpressure_timeout_ms", with = "crate::config::duration_ms")]
    pub backpressure_timeout: Duration,
}

impl Default for WriterConfig {
    fn default() -> Self {
        Self {
            max_pending_packets: DEFAULT_MAX_PENDING_PACKETS,
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
            backpressure_timeout: DEFAULT_BACKPRESSURE_TIMEOUT,
        }
    }
}

/// Count of packets accepted by a handle and not yet flushed by the task.
#[derive(Debug, Default)]
struct PendingGauge {
    count: AtomicUsize,
    drained: Notify,
}

impl PendingGauge {
    fn get(&self) -> usize {
        self.count.load(Ordering::Acquire)
    }

    fn add(&self) {
        self.count.fetch_add(1, Ordering::AcqRel);
    }

    fn release(&self, n: usize) {
        self.count.fetch_sub(n, Ordering::AcqRel);
        self.drained.notify_waiters();
    }

    /// Park until the gauge drops below `limit`.
    async fn wait_below(&self, limit: usize) {
        loop {
            let drained = self.drained.notified();
            if self.get() < limit {
                return;
            }
            drained.await;
        }
    }
}

/// Cloneable sending side of the writer task.
#[derive(Clone, Debug)]
pub struct WriterHandle {
    tx: mpsc::Sender<OutboundPacket>,
    gauge: Arc<PendingGauge>,
    max_pending: usize,
    timeout: Duration,
}

impl WriterHandle {
    fn new(
        tx: mpsc::Sender<OutboundPacket>,
        gauge: Arc<PendingGauge>,
        max_pending: usize,
        timeout: Duration,
    ) -> Self {
        Self {
            tx,
            gauge,
            max_pending,
            timeout,
        }
    }

    /// Queue a packet for writing.
    ///
    /// Fails with [`DapwireError::BackpressureTimeout`] if the pending count
    /// stays at the limit for longer than the configured timeout, and with
    /// [`DapwireError::ConnectionClosed`] once the writer task has stopped.
    pub async fn send(&self, packet: OutboundPacket) -> Result<()> {
        if self.is_backpressure_active() {
            tokio::time::timeout(self.timeout, self.gauge.wait_below(self.max_pending))
                .await
                .map_err(|_| DapwireError::BackpressureTimeout)?;
        }

        self.gauge.add();
        if self.tx.send(packet).await.is_err() {
            self.gauge.release(1);
            return Err(DapwireError::ConnectionClosed);
        }
        Ok(())
    }

    #[inline]
    pub fn is_backpressure_active(&self) -> bool {
        self.gauge.get() >= self.max_pending
    }

    #[inline]
    pub fn pending_count(&self) -> usize {
        self.gauge.get()
    }

    /// Whether the writer task has stopped.
    #[inline]
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Spawn the writer task over `writer`.
///
/// The task ends with `Ok(())` after every handle is dropped, or with the
/// first I/O error.
pub fn spawn_writer_task<W>(writer: W, config: WriterConfig) -> (WriterHandle, JoinHandle<Result<()>>)
where
    W: AsyncWrite + Unpin + Send + 'static,
{
    let (tx, rx) = mpsc::channel(config.channel_capacity.max(1));
    let gauge = Arc::new(PendingGauge::default());
    let handle = WriterHandle::new(
        tx,
        Arc::clone(&gauge),
        config.max_pending_packets.max(1),
        config.backpressure_timeout,
    );

    (handle, tokio::spawn(writer_loop(rx, writer, gauge)))
}

async fn writer_loop<W>(
    mut rx: mpsc::Receiver<OutboundPacket>,
    mut writer: W,
    gauge: Arc<PendingGauge>,
) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let mut batch = Vec::with_capacity(MAX_BATCH_SIZE);

    while rx.recv_many(&mut batch, MAX_BATCH_SIZE).await > 0 {
        let count = batch.len();
        let chunks: VecDeque<Bytes> = batch.drain(..).map(|p| p.bytes).collect();

        if let Err(err) = write_all_vectored(&mut writer, chunks).await {
            tracing::error!(error = %err, "writer task failed");
            gauge.release(count);
            return Err(err);
        }
        tracing::trace!(packets = count, "batch written");
        gauge.release(count);
    }

    let _ = writer.shutdown().await;
    Ok(())
}

/// Write every chunk in order, resuming after partial vectored writes.
async fn write_all_vectored<W>(writer: &mut W, mut chunks: VecDeque<Bytes>) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    chunks.retain(|c| !c.is_empty());

    while !chunks.is_empty() {
        let slices: Vec<IoSlice<'_>> = chunks.iter().map(|c| IoSlice::new(c)).collect();
        let written = writer.write_vectored(&slices).await?;
        if written == 0 {
            return Err(std::io::Error::from(std::io::ErrorKind::WriteZero).into());
        }
        consume(&mut chunks, written);
    }

    writer.flush().await?;
    Ok(())
}

/// Drop `n` written bytes from the front of `chunks`.
fn consume(chunks: &mut VecDeque<Bytes>, mut n: usize) {
    while n > 0 {
        let Some(front) = chunks.front_mut() else {
            return;
        };
        if n < front.len() {
            front.advance(n);
            return;
        }
        n -= front.len();
        chunks.pop_front();
    }
}
