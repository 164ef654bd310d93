//! Transport address parsing.
//!
//! Two schemes are accepted:
//! - `tcp://<host>:<port>` - TCP socket; an empty host means `localhost`
//! - `ipc://<name>` - local socket
//!
//! IPC names resolve per platform:
//! - Unix: an absolute path is used as is, a bare name becomes `/tmp/<name>.sock`
//! - Windows: `ipc://<name>` opens `\\.\pipe\<name>`, `ipc://<host>/<name>`
//!   opens `\\<host>\pipe\<name>`

use std::fmt;
use std::str::FromStr;

use crate::error::{DapwireError, Result};

const TCP_SCHEME: &str = "tcp://";
const IPC_SCHEME: &str = "ipc://";
const DEFAULT_TCP_HOST: &str = "localhost";

/// A parsed transport address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportAddress {
    /// TCP endpoint.
    Tcp { host: String, port: u16 },
    /// Local socket or named pipe. `host` is only meaningful for Windows
    /// pipes on another machine.
    Ipc { host: Option<String>, name: String },
}

impl TransportAddress {
    /// Parse an address string.
    ///
    /// IPv6 TCP hosts are written in brackets (`tcp://[::1]:4711`); the
    /// brackets are not part of the stored host.
    ///
    /// Fails with [`DapwireError::InvalidAddress`] for unknown schemes, a
    /// missing or invalid TCP port, unbalanced brackets, or an empty IPC name.
    pub fn parse(address: &str) -> Result<Self> {
        let invalid = || DapwireError::InvalidAddress(address.to_string());

        if let Some(rest) = address.strip_prefix(TCP_SCHEME) {
            let (host, port) = rest.rsplit_once(':').ok_or_else(invalid)?;
            let port: u16 = port.parse().map_err(|_| invalid())?;
            if port == 0 {
                return Err(invalid());
            }
            let host = match host.strip_prefix('[') {
                Some(inner) => inner.strip_suffix(']').filter(|h| h.contains(':')),
                None if host.contains([':', '[', ']']) => None,
                None if host.is_empty() => Some(DEFAULT_TCP_HOST),
                None => Some(host),
            }
            .ok_or_else(invalid)?;
            return Ok(Self::Tcp {
                host: host.to_string(),
                port,
            });
        }

        if let Some(rest) = address.strip_prefix(IPC_SCHEME) {
            if rest.is_empty() {
                return Err(invalid());
            }
            if rest.starts_with('/') {
                return Ok(Self::Ipc {
                    host: None,
                    name: rest.to_string(),
                });
            }
            return match rest.split_once('/') {
                Some((host, name)) if !name.is_empty() => Ok(Self::Ipc {
                    host: (!host.is_empty()).then(|| host.to_string()),
                    name: name.to_string(),
                }),
                Some(_) => Err(invalid()),
                None => Ok(Self::Ipc {
                    host: None,
                    name: rest.to_string(),
                }),
            };
        }

        Err(invalid())
    }

    /// `true` for TCP addresses.
    pub fn is_tcp(&self) -> bool {
        matches!(self, Self::Tcp { .. })
    }

    /// Platform path of an IPC endpoint, `None` for TCP.
    pub fn ipc_path(&self) -> Option<String> {
        match self {
            Self::Tcp { .. } => None,
            Self::Ipc { host, name } => Some(ipc_path(host.as_deref(), name)),
        }
    }
}

#[cfg(unix)]
fn ipc_path(_host: Option<&str>, name: &str) -> String {
    if name.starts_with('/') {
        name.to_string()
    } else {
        format!("/tmp/{}.sock", name)
    }
}

#[cfg(windows)]
fn ipc_path(host: Option<&str>, name: &str) -> String {
    format!(r"\\{}\pipe\{}", host.unwrap_or("."), name)
}

impl FromStr for TransportAddress {
    type Err = DapwireError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl fmt::Display for TransportAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Tcp { host, port } if host.contains(':') => {
                write!(f, "{}[{}]:{}", TCP_SCHEME, host, port)
            }
            Self::Tcp { host, port } => write!(f, "{}{}:{}", TCP_SCHEME, host, port),
            Self::Ipc {
                host: Some(host),
                name,
            } => write!(f, "{}{}/{}", IPC_SCHEME, host, name),
            Self::Ipc { host: None, name } => write!(f, "{}{}", IPC_SCHEME, name),
        }
    }
}
