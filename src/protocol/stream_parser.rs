//! Stream parser for accumulating partial reads into packets.
//!
//! Bytes arrive in chunks of arbitrary size: a chunk may split a packet
//! anywhere (start line, headers, body) or carry several packets at once.
//! The parser keeps one growable buffer plus a write cursor and implements
//! a small state machine:
//! - `WaitingForHeader`: no complete header block yet
//! - `WaitingForContent`: header block parsed, need `Content-Length` bytes
//!
//! The buffer grows in fixed-size blocks and never shrinks. After a packet
//! is extracted the unconsumed tail is moved to offset 0 and the free space
//! is zero-filled.
//!
//! # Example
//!
//! ```
//! use dapwire::protocol::StreamParser;
//!
//! let mut parser = StreamParser::new();
//! let wire = b"HTTP/1.1 200 OK\r\nContent-Type: text/plain\r\nContent-Length: 2\r\n\r\nok";
//!
//! assert!(parser.push(&wire[..10]).unwrap().is_empty());
//! let packets = parser.push(&wire[10..]).unwrap();
//! assert_eq!(packets.len(), 1);
//! assert!(packets[0].is_response());
//! ```

use bytes::Bytes;

use super::packet::Packet;
use super::wire_format::{
    parse_prefix, ParsedPrefix, DEFAULT_MAX_CONTENT_LENGTH, DEFAULT_MAX_HEADER_SIZE,
};
use crate::error::{DapwireError, Result};

/// Buffer growth granularity.
pub const BUFFER_BLOCK_ALIGNMENT: usize = 256;

/// Initial buffer capacity.
pub const BUFFER_INITIAL_SIZE: usize = BUFFER_BLOCK_ALIGNMENT * 2;

fn aligned_size(size: usize, align: usize) -> usize {
    if size <= align {
        return align;
    }
    size.div_ceil(align) * align
}

#[derive(Debug, Clone)]
enum State {
    WaitingForHeader,
    WaitingForContent { prefix: ParsedPrefix, end: usize },
}

/// Incremental parser turning byte chunks into [`Packet`]s.
///
/// A framing error (for example a header block without `Content-Length`)
/// is fatal: the parser keeps returning the same error afterwards.
#[derive(Debug)]
pub struct StreamParser {
    /// Zero-filled storage; `buffer.len()` is the capacity.
    buffer: Vec<u8>,
    /// Bytes before this position are pending data.
    write_pos: usize,
    state: State,
    max_content_length: usize,
    max_header_size: usize,
    failure: Option<DapwireError>,
}

impl StreamParser {
    /// Create a parser with default limits (1 GB body, 64 KB header block).
    pub fn new() -> Self {
        Self::with_limits(DEFAULT_MAX_CONTENT_LENGTH, DEFAULT_MAX_HEADER_SIZE)
    }

    pub fn with_limits(max_content_length: usize, max_header_size: usize) -> Self {
        Self {
            buffer: vec![0; BUFFER_INITIAL_SIZE],
            write_pos: 0,
            state: State::WaitingForHeader,
            max_content_length,
            max_header_size,
            failure: None,
        }
    }

    /// Number of pending (unconsumed) bytes.
    #[inline]
    pub fn size(&self) -> usize {
        self.write_pos
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.buffer.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.write_pos == 0
    }

    /// Append a chunk to the buffer without extracting packets.
    pub fn add_data(&mut self, data: &[u8]) {
        let free = self.capacity() - self.write_pos;
        if free < data.len() {
            let append = aligned_size(data.len() - free, BUFFER_BLOCK_ALIGNMENT);
            let new_capacity = self.capacity() + append + BUFFER_BLOCK_ALIGNMENT;
            self.buffer.resize(new_capacity, 0);
        }

        self.buffer[self.write_pos..self.write_pos + data.len()].copy_from_slice(data);
        self.write_pos += data.len();
    }

    /// Try to extract the next packet.
    ///
    /// Returns:
    /// - `Ok(Some(packet))` if a complete packet was extracted
    /// - `Ok(None)` if more data is needed
    /// - `Err(...)` on a framing error (sticky)
    pub fn try_get_packet(&mut self) -> Result<Option<Packet>> {
        if let Some(err) = &self.failure {
            return Err(err.clone());
        }

        self.extract().inspect_err(|err| {
            tracing::debug!(error = %err, pending = self.write_pos, "stream parser failed");
            self.failure = Some(err.clone());
        })
    }

    fn extract(&mut self) -> Result<Option<Packet>> {
        if let State::WaitingForHeader = self.state {
            let Some(prefix) = parse_prefix(&self.buffer[..self.write_pos], self.max_header_size)?
            else {
                return Ok(None);
            };

            let content_length = prefix
                .content_length
                .ok_or(DapwireError::ContentLengthMissing)?;

            if content_length > self.max_content_length {
                return Err(DapwireError::ContentTooLarge {
                    size: content_length,
                    max: self.max_content_length,
                });
            }

            let end = prefix.parsed_length + content_length;
            self.state = State::WaitingForContent { prefix, end };
        }

        let State::WaitingForContent { end, .. } = self.state else {
            return Ok(None);
        };
        if self.write_pos < end {
            return Ok(None);
        }

        let State::WaitingForContent { prefix, end } =
            std::mem::replace(&mut self.state, State::WaitingForHeader)
        else {
            return Ok(None);
        };

        let content = Bytes::copy_from_slice(&self.buffer[prefix.parsed_length..end]);
        self.compact(end);

        Ok(Some(Packet::new(prefix.start_line, prefix.headers, content)))
    }

    /// Drop `consumed` bytes from the front and zero the free space.
    fn compact(&mut self, consumed: usize) {
        self.buffer.copy_within(consumed..self.write_pos, 0);
        self.write_pos -= consumed;
        self.buffer[self.write_pos..].fill(0);
    }

    /// Push a chunk and extract every complete packet, in arrival order.
    pub fn push(&mut self, data: &[u8]) -> Result<Vec<Packet>> {
        self.packets(Some(data)).collect()
    }

    /// Optionally add a chunk, then iterate over the packets now complete.
    ///
    /// The iterator ends at the first "need more data" result or after
    /// yielding an error. Buffered state carries over to the next call.
    pub fn packets(&mut self, data: Option<&[u8]>) -> Packets<'_> {
        if let Some(data) = data {
            self.add_data(data);
        }
        Packets {
            parser: self,
            done: false,
        }
    }

    /// Discard buffered data and any failure.
    pub fn clear(&mut self) {
        self.buffer.fill(0);
        self.write_pos = 0;
        self.state = State::WaitingForHeader;
        self.failure = None;
    }

    #[cfg(test)]
    fn state_name(&self) -> &'static str {
        match &self.state {
            State::WaitingForHeader => "WaitingForHeader",
            State::WaitingForContent { .. } => "WaitingForContent",
        }
    }
}

impl Default for StreamParser {
    fn default() -> Self {
        Self::new()
    }
}

/// Iterator returned by [`StreamParser::packets`].
pub struct Packets<'a> {
    parser: &'a mut StreamParser,
    done: bool,
}

impl Iterator for Packets<'_> {
    type Item = Result<Packet>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }

        match self.parser.try_get_packet() {
            Ok(Some(packet)) => Some(Ok(packet)),
            Ok(None) => {
                self.done = true;
                None
            }
            Err(err) => {
                self.done = true;
                Some(Err(err))
            }
        }
    }
}
