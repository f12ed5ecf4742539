//! Runtime configuration for the listener.

use std::fmt;
use std::net::{Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::ack::{AckMode, DEFAULT_APP_NAME};
use crate::encoding::TextEncoding;
use crate::mllp::DEFAULT_MAX_FRAME_LENGTH;

/// Port the listener binds when none is given.
pub const DEFAULT_PORT: u16 = 5000;
/// Timeout for blocking reads and writes on every connection.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(300);
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone)]
pub struct Config {
    /// Address the listener binds to
    pub bind: SocketAddr,

    /// Encoding of inbound messages, also used for ACKs and relayed messages
    pub encoding: TextEncoding,

    pub ack_mode: AckMode,

    /// Sending application/facility in ACKs
    pub app_name: String,

    /// Where to relay every received message, if anywhere
    pub passthrough: Option<PassthroughTarget>,

    /// Serve MLLP over TLS with these credentials
    pub tls: Option<TlsConfig>,

    /// Read timeout for inbound connections
    pub read_timeout: Duration,

    /// Write timeout for ACKs and relayed messages
    pub write_timeout: Duration,

    /// How long to wait for the passthrough host's response to a relayed message
    pub passthrough_ack_timeout: Duration,

    pub connect_timeout: Duration,

    /// Cap on bytes buffered while waiting for an end block
    pub max_frame_length: usize,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            bind: SocketAddr::from((Ipv4Addr::UNSPECIFIED, DEFAULT_PORT)),
            encoding: TextEncoding::default(),
            ack_mode: AckMode::default(),
            app_name: DEFAULT_APP_NAME.to_string(),
            passthrough: None,
            tls: None,
            read_timeout: DEFAULT_TIMEOUT,
            write_timeout: DEFAULT_TIMEOUT,
            passthrough_ack_timeout: DEFAULT_TIMEOUT,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            max_frame_length: DEFAULT_MAX_FRAME_LENGTH,
        }
    }
}

/// PEM encoded server credentials.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TlsConfig {
    /// Certificate chain, leaf first
    pub cert: PathBuf,
    pub key: PathBuf,
}

/// A remote HL7 endpoint, `host:port`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PassthroughTarget {
    pub host: String,
    pub port: u16,
}

impl fmt::Display for PassthroughTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum InvalidTarget {
    #[error("expected host:port, e.g. somehost:5000")]
    MissingPort,
    #[error("the port number needs to be an integer between 1 and 65535")]
    InvalidPort,
}

impl FromStr for PassthroughTarget {
    type Err = InvalidTarget;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (host, port) = s.rsplit_once(':').ok_or(InvalidTarget::MissingPort)?;
        if host.is_empty() {
            return Err(InvalidTarget::MissingPort);
        }
        let port = match port.parse::<u16>() {
            Ok(0) | Err(_) => return Err(InvalidTarget::InvalidPort),
            Ok(port) => port,
        };
        Ok(PassthroughTarget {
            host: host.to_string(),
            port,
        })
    }
}
