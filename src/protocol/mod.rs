//! Protocol module - wire format, packets, builder and stream parser.
//!
//! This module implements the HTTP-like framing used on the remoting stream:
//! - start-line and header-block parsing (`wire_format`)
//! - the [`Packet`] model with header accessors and lazy body decoding
//! - [`PacketBuilder`] for requests and responses
//! - [`StreamParser`] for accumulating partial reads

mod builder;
mod packet;
mod stream_parser;
mod wire_format;

pub use builder::{build_request, build_response, PacketBuilder};
pub use packet::Packet;
pub use stream_parser::{Packets, StreamParser, BUFFER_BLOCK_ALIGNMENT, BUFFER_INITIAL_SIZE};
pub use wire_format::{
    header_names, parse_headers, parse_prefix, parse_request_line, parse_response_line,
    request_start_line, response_start_line, Header, ParsedPrefix, RequestLine, ResponseCode,
    ResponseLine, DEFAULT_MAX_CONTENT_LENGTH, DEFAULT_MAX_HEADER_SIZE, END_OF_HEADERS,
    END_OF_LINE, HEADER_DELIMITER, HTTP_VERSION, REQUEST_METHOD,
};
