//! Command line arguments for the `hl7-listener` binary.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use thiserror::Error;

use crate::ack::{AckMode, DEFAULT_APP_NAME};
use crate::archive::FileArchive;
use crate::config::{Config, PassthroughTarget, TlsConfig};
use crate::encoding::TextEncoding;

#[derive(Parser, Debug)]
#[command(name = "hl7-listener")]
#[command(about = "Receives HL7 v2 messages over MLLP, archives them to disk and acknowledges them")]
#[command(version)]
pub struct Args {
    /// Port to listen on (1025-65535)
    #[arg(short, long, value_parser = clap::value_parser!(u16).range(1025..))]
    pub port: u16,

    /// Directory received messages are saved to
    #[arg(short = 'f', long, default_value = ".")]
    pub file_path: PathBuf,

    /// Don't send ACKs
    #[arg(short = 'n', long, conflicts_with = "ack_mode")]
    pub no_ack: bool,

    /// always, or requested (only when MSH-15 is AL)
    #[arg(long, default_value_t = AckMode::Always)]
    pub ack_mode: AckMode,

    /// Relay every received message to another HL7 listener
    #[arg(short = 't', long = "passthru", value_name = "HOST:PORT")]
    pub passthru: Option<PassthroughTarget>,

    /// Encoding of inbound messages: ASCII, UTF8 or Latin1
    #[arg(short, long, default_value_t = TextEncoding::Utf8)]
    pub encoding: TextEncoding,

    /// PEM certificate chain; serves MLLP over TLS
    #[arg(long, requires = "tls_key")]
    pub tls_cert: Option<PathBuf>,

    /// PEM private key for --tls-cert
    #[arg(long, requires = "tls_cert")]
    pub tls_key: Option<PathBuf>,

    /// Address to bind
    #[arg(long, default_value_t = IpAddr::V4(Ipv4Addr::UNSPECIFIED))]
    pub bind: IpAddr,

    /// Read and write timeout, in seconds
    #[arg(long, default_value_t = 300, value_parser = clap::value_parser!(u64).range(1..))]
    pub timeout: u64,

    /// Sending application and facility in ACKs
    #[arg(long, default_value = DEFAULT_APP_NAME)]
    pub app_name: String,
}

#[derive(Debug, Error)]
pub enum ArgsError {
    #[error("the directory {0} does not exist")]
    MissingDirectory(PathBuf),
}

impl Args {
    /// Splits the arguments into the listener configuration and the archive it writes to.
    pub fn into_config(self) -> Result<(Config, FileArchive), ArgsError> {
        if !self.file_path.is_dir() {
            return Err(ArgsError::MissingDirectory(self.file_path));
        }

        let tls = match (self.tls_cert, self.tls_key) {
            (Some(cert), Some(key)) => Some(TlsConfig { cert, key }),
            _ => None,
        };
        let timeout = Duration::from_secs(self.timeout);

        let config = Config {
            bind: SocketAddr::new(self.bind, self.port),
            encoding: self.encoding,
            ack_mode: if self.no_ack {
                AckMode::Never
            } else {
                self.ack_mode
            },
            app_name: self.app_name,
            passthrough: self.passthru,
            tls,
            read_timeout: timeout,
            write_timeout: timeout,
            passthrough_ack_timeout: timeout,
            ..Config::default()
        };

        Ok((config, FileArchive::new(self.file_path)))
    }
}
