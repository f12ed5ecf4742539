use std::io;
use std::net::SocketAddr;

use thiserror::Error;

use crate::config::PassthroughTarget;

/// Startup failures. Anything that goes wrong once the listener is running is contained and logged by the
/// session or forwarder it happened in.
#[derive(Debug, Error)]
pub enum Error {
    #[error("unable to start the listener on {addr}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },

    #[error("unable to create connection to passthrough host {target}")]
    Passthrough {
        target: PassthroughTarget,
        #[source]
        source: io::Error,
    },

    #[error("unable to load TLS credentials: {0}")]
    Tls(String),

    #[error(transparent)]
    Io(#[from] io::Error),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
