//! Wire format constants and header-block parsing.
//!
//! Every frame is an HTTP-like text prefix followed by a binary-safe body:
//! ```text
//! <start-line>\r\n
//! <Header-Name>: <value>\r\n
//! ...
//! \r\n
//! <body, exactly Content-Length bytes>
//! ```
//!
//! The start line is `POST <route> HTTP/1.1` for requests and
//! `HTTP/1.1 <code> <reason>` for responses. Header names are matched
//! exactly (case-sensitive) and the first match wins.

use std::fmt;

use crate::error::{DapwireError, Result};

/// Line terminator.
pub const END_OF_LINE: &str = "\r\n";

/// Terminator of the header block (end of last line + blank line).
pub const END_OF_HEADERS: &str = "\r\n\r\n";

/// Separator between header name and value.
pub const HEADER_DELIMITER: char = ':';

/// Protocol version written into start lines.
pub const HTTP_VERSION: &str = "HTTP/1.1";

/// Method used for every outbound request.
pub const REQUEST_METHOD: &str = "POST";

/// Default limit for a header block that has not been terminated yet.
pub const DEFAULT_MAX_HEADER_SIZE: usize = 64 * 1024;

/// Default maximum body size (1 GB).
pub const DEFAULT_MAX_CONTENT_LENGTH: usize = 1_073_741_824;

/// Header names used programmatically.
pub mod header_names {
    pub const CONTENT_TYPE: &str = "Content-Type";
    pub const CONTENT_LENGTH: &str = "Content-Length";
    pub const INSTANCE_ID: &str = "Instance-Id";
    /// Correlation key between a request and its response.
    pub const INVOKE_ID: &str = "Invoke-Id";
    pub const INVOKE_CONTRACT: &str = "Invoke-Contract";
}

/// Response status codes used by the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum ResponseCode {
    Ok = 200,
    ApplicationError = 400,
    InternalError = 500,
}

impl ResponseCode {
    #[inline]
    pub const fn code(self) -> u16 {
        self as u16
    }

    /// Reason phrase written after the code.
    pub const fn reason(self) -> &'static str {
        match self {
            ResponseCode::Ok => "OK",
            ResponseCode::ApplicationError => "Application Error",
            ResponseCode::InternalError => "Internal Error",
        }
    }

    pub fn from_code(code: u16) -> Option<Self> {
        match code {
            200 => Some(ResponseCode::Ok),
            400 => Some(ResponseCode::ApplicationError),
            500 => Some(ResponseCode::InternalError),
            _ => None,
        }
    }
}

/// One `Name: value` header line.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Header {
    pub name: String,
    pub value: String,
}

impl Header {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

impl fmt::Display for Header {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{} {}", self.name, HEADER_DELIMITER, self.value)
    }
}

/// Parsed `POST <path> HTTP/x.y` start line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestLine<'a> {
    pub method: &'a str,
    pub path: &'a str,
}

/// Parsed `HTTP/x.y <code> <reason>` start line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseLine<'a> {
    pub code: u16,
    pub reason: &'a str,
}

/// Build a request start line for `route`.
pub fn request_start_line(route: &str) -> String {
    format!("{} {} {}", REQUEST_METHOD, route, HTTP_VERSION)
}

/// Build a response start line.
pub fn response_start_line(code: u16, reason: &str) -> String {
    format!("{} {:03} {}", HTTP_VERSION, code, reason)
}

fn is_version_number(s: &str) -> bool {
    match s.split_once('.') {
        Some((major, minor)) => {
            !major.is_empty()
                && !minor.is_empty()
                && major.bytes().all(|b| b.is_ascii_digit())
                && minor.bytes().all(|b| b.is_ascii_digit())
        }
        None => false,
    }
}

/// Parse a request start line such as `POST /path1/path2 HTTP/1.1`.
pub fn parse_request_line(line: &str) -> Option<RequestLine<'_>> {
    let (method, rest) = line.split_once(char::is_whitespace)?;
    if method.is_empty() || !method.chars().all(|c| c.is_alphanumeric() || c == '_') {
        return None;
    }

    let (path, version) = rest.trim_start().rsplit_once(char::is_whitespace)?;
    let path = path.trim_end();
    if path.is_empty() {
        return None;
    }

    if !is_version_number(version.strip_prefix("HTTP/")?) {
        return None;
    }

    Some(RequestLine { method, path })
}

/// Parse a response start line such as `HTTP/1.1 200 OK`.
pub fn parse_response_line(line: &str) -> Option<ResponseLine<'_>> {
    let rest = line.strip_prefix("HTTP/")?;
    let (version, rest) = rest.split_once(' ')?;
    if version.is_empty() || !version.bytes().all(|b| b.is_ascii_digit() || b == b'.') {
        return None;
    }

    let (code, reason) = rest.split_once(' ')?;
    if code.len() != 3 || !code.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }

    Some(ResponseLine {
        code: code.parse().ok()?,
        reason,
    })
}

/// Parse the header lines between the start line and the blank line.
///
/// Each line splits at its first `:`; name and value are trimmed.
pub fn parse_headers(raw: &str) -> Result<Vec<Header>> {
    if raw.is_empty() {
        return Ok(Vec::new());
    }

    raw.split(END_OF_LINE)
        .map(|line| {
            line.split_once(HEADER_DELIMITER)
                .map(|(name, value)| Header::new(name.trim(), value.trim()))
                .ok_or_else(|| DapwireError::Framing(format!("malformed header line {:?}", line)))
        })
        .collect()
}

/// Result of scanning a buffer for a complete header block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedPrefix {
    pub start_line: String,
    pub headers: Vec<Header>,
    /// Offset of the first body byte.
    pub parsed_length: usize,
    pub content_length: Option<usize>,
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}

/// Scan `buf` for a complete header block.
///
/// Returns `Ok(None)` while the start line or the blank line is still
/// missing. A malformed block, or one longer than `max_header_size`
/// without a terminator, is a framing error.
pub fn parse_prefix(buf: &[u8], max_header_size: usize) -> Result<Option<ParsedPrefix>> {
    let window = &buf[..buf.len().min(max_header_size + END_OF_HEADERS.len())];

    let Some(start_line_end) = find(window, END_OF_LINE.as_bytes()) else {
        return check_header_limit(buf.len(), max_header_size);
    };
    if start_line_end == 0 {
        return Err(DapwireError::Framing("empty start line".to_string()));
    }

    let Some(headers_end) = find(window, END_OF_HEADERS.as_bytes()) else {
        return check_header_limit(buf.len(), max_header_size);
    };

    let start_line = std::str::from_utf8(&buf[..start_line_end])
        .map_err(|_| DapwireError::Framing("start line is not valid UTF-8".to_string()))?;

    // No header lines at all when the blank line follows the start line directly.
    let raw_headers = if headers_end > start_line_end {
        std::str::from_utf8(&buf[start_line_end + END_OF_LINE.len()..headers_end])
            .map_err(|_| DapwireError::Framing("header block is not valid UTF-8".to_string()))?
    } else {
        ""
    };

    let headers = parse_headers(raw_headers)?;
    let content_length = headers
        .iter()
        .find(|h| h.name == header_names::CONTENT_LENGTH)
        .map(|h| {
            h.value
                .parse::<usize>()
                .map_err(|_| DapwireError::InvalidContentLength(h.value.clone()))
        })
        .transpose()?;

    Ok(Some(ParsedPrefix {
        start_line: start_line.to_string(),
        headers,
        parsed_length: headers_end + END_OF_HEADERS.len(),
        content_length,
    }))
}

fn check_header_limit(len: usize, max_header_size: usize) -> Result<Option<ParsedPrefix>> {
    if len > max_header_size + END_OF_HEADERS.len() {
        return Err(DapwireError::Framing(format!(
            "header block exceeds {} bytes",
            max_header_size
        )));
    }
    Ok(None)
}
