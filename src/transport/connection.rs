//! Connected byte stream with a background read pump and writer task.
//!
//! A [`Connection`] splits its stream in two:
//! - the read half is drained by a pump task into an [`AsyncQueue`] of
//!   chunks, so readers never hold the socket
//! - the write half belongs to the writer task (see [`crate::writer`])
//!
//! End of stream closes the chunk queue. A read error is queued as an
//! `Err` chunk and then the queue is closed.

use std::sync::Arc;

use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite};
use tokio::task::JoinHandle;

use super::address::TransportAddress;
use crate::error::{DapwireError, Result};
use crate::sync::AsyncQueue;
use crate::writer::{spawn_writer_task, OutboundPacket, WriterConfig, WriterHandle};

/// Default read buffer size (64 KiB).
pub const DEFAULT_READ_BUFFER_SIZE: usize = 64 * 1024;

/// Tuning for a single connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionOptions {
    /// Bytes requested from the stream per read.
    pub read_buffer_size: usize,
    /// Writer task configuration.
    pub writer: WriterConfig,
}

impl Default for ConnectionOptions {
    fn default() -> Self {
        Self {
            read_buffer_size: DEFAULT_READ_BUFFER_SIZE,
            writer: WriterConfig::default(),
        }
    }
}

/// An open duplex byte stream.
pub struct Connection {
    inbound: Arc<AsyncQueue<Result<Bytes>>>,
    writer: WriterHandle,
    read_task: JoinHandle<()>,
    _writer_task: JoinHandle<Result<()>>,
}

impl Connection {
    /// Open a connection to `address`.
    pub async fn open(address: &TransportAddress, options: ConnectionOptions) -> Result<Self> {
        tracing::debug!(%address, "opening connection");

        match address {
            TransportAddress::Tcp { host, port } => {
                let stream = tokio::net::TcpStream::connect((host.as_str(), *port)).await?;
                stream.set_nodelay(true)?;
                Ok(Self::from_stream(stream, options))
            }
            TransportAddress::Ipc { .. } => {
                let path = address
                    .ipc_path()
                    .ok_or_else(|| DapwireError::InvalidAddress(address.to_string()))?;
                open_ipc(&path, options).await
            }
        }
    }

    /// Wrap an already connected stream.
    ///
    /// Must be called inside a tokio runtime: the read pump and the writer
    /// task are spawned immediately.
    pub fn from_stream<S>(stream: S, options: ConnectionOptions) -> Self
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (reader, write_half) = tokio::io::split(stream);
        let (writer, writer_task) = spawn_writer_task(write_half, options.writer);

        let inbound = Arc::new(AsyncQueue::new());
        let read_task = tokio::spawn(read_pump(
            reader,
            inbound.clone(),
            options.read_buffer_size.max(1),
        ));

        Self {
            inbound,
            writer,
            read_task,
            _writer_task: writer_task,
        }
    }

    /// Next chunk of inbound bytes.
    ///
    /// Returns `Ok(None)` at end of stream and the read error if the stream
    /// failed. Single consumer: a concurrent second `read` fails with
    /// [`DapwireError::ConcurrentDequeue`].
    pub async fn read(&self) -> Result<Option<Bytes>> {
        match self.inbound.dequeue().await {
            Ok(chunk) => chunk.map(Some),
            Err(DapwireError::Closed) => Ok(None),
            Err(err) => Err(err),
        }
    }

    /// Queue bytes for writing. Writes reach the stream in call order.
    pub async fn write(&self, bytes: Bytes) -> Result<()> {
        self.writer.send(OutboundPacket::new(bytes)).await
    }

    /// Stop reading. Pending and future `read` calls see end of stream.
    pub fn close(&self) {
        self.read_task.abort();
        self.inbound.close();
    }

    /// Whether the writer task is gone.
    pub fn is_closed(&self) -> bool {
        self.writer.is_closed()
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.read_task.abort();
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("buffered_chunks", &self.inbound.len())
            .field("pending_writes", &self.writer.pending_count())
            .finish()
    }
}

async fn read_pump<R>(mut reader: R, queue: Arc<AsyncQueue<Result<Bytes>>>, buffer_size: usize)
where
    R: AsyncRead + Unpin,
{
    let mut buf = BytesMut::with_capacity(buffer_size);

    loop {
        buf.reserve(buffer_size);
        match reader.read_buf(&mut buf).await {
            Ok(0) => {
                tracing::debug!("connection reached end of stream");
                break;
            }
            Ok(n) => {
                tracing::trace!(bytes = n, "raw read");
                if queue.enqueue(Ok(buf.split().freeze())).is_err() {
                    break;
                }
            }
            Err(err) => {
                tracing::warn!(error = %err, "connection read failed");
                let _ = queue.enqueue(Err(err.into()));
                break;
            }
        }
    }

    queue.close();
}

#[cfg(unix)]
async fn open_ipc(path: &str, options: ConnectionOptions) -> Result<Connection> {
    let stream = tokio::net::UnixStream::connect(path).await?;
    Ok(Connection::from_stream(stream, options))
}

#[cfg(windows)]
async fn open_ipc(path: &str, options: ConnectionOptions) -> Result<Connection> {
    use tokio::net::windows::named_pipe::ClientOptions;

    let pipe = ClientOptions::new().open(path)?;
    Ok(Connection::from_stream(pipe, options))
}
