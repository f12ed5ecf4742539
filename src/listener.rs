//! The listener supervisor: accept loop, per-connection tasks, and the passthrough forwarder's lifecycle.

use std::net::SocketAddr;
use std::sync::Arc;

use log::{debug, error, info, warn};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_rustls::TlsAcceptor;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use crate::archive::Archive;
use crate::config::Config;
use crate::error::{Error, Result};
use crate::forwarder::Forwarder;
use crate::session::{Session, SessionContext};
use crate::tls;

pub struct Listener {
    config: Config,
    archive: Arc<dyn Archive>,
}

impl Listener {
    pub fn new(config: Config, archive: Arc<dyn Archive>) -> Self {
        Listener { config, archive }
    }

    /// Loads TLS credentials, binds, and connects to the passthrough host, in that order. Nothing is spawned
    /// until all three have succeeded.
    pub async fn start(self) -> Result<ListenerHandle> {
        let acceptor = match &self.config.tls {
            Some(credentials) => Some(tls::build_acceptor(credentials)?),
            None => None,
        };

        let listener = TcpListener::bind(self.config.bind)
            .await
            .map_err(|source| Error::Bind {
                addr: self.config.bind,
                source,
            })?;
        let local_addr = listener.local_addr()?;

        let forwarder = match &self.config.passthrough {
            Some(target) => Some(Forwarder::connect(target.clone(), &self.config).await?),
            None => None,
        };

        info!(
            "Listening on {} (encoding: {}, acknowledgements: {}, TLS: {})",
            local_addr,
            self.config.encoding,
            self.config.ack_mode,
            if acceptor.is_some() { "enabled" } else { "disabled" }
        );

        let cancel = CancellationToken::new();
        let tracker = TaskTracker::new();

        let outbound = forwarder.map(|forwarder| {
            info!("Passthrough mode enabled, relaying messages to {}", forwarder.target());
            let (tx, rx) = mpsc::unbounded_channel();
            tracker.spawn(forwarder.run(rx, cancel.clone()));
            tx
        });

        let context = Arc::new(SessionContext::new(&self.config, self.archive, outbound));
        tracker.spawn(accept_loop(
            listener,
            acceptor,
            context,
            tracker.clone(),
            cancel.clone(),
        ));
        tracker.close();

        Ok(ListenerHandle {
            local_addr,
            cancel,
            tracker,
        })
    }
}

/// Controls a running listener.
pub struct ListenerHandle {
    local_addr: SocketAddr,
    cancel: CancellationToken,
    tracker: TaskTracker,
}

impl ListenerHandle {
    /// The bound address, useful when listening on port 0.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Signals every session, the accept loop and the forwarder to stop. Blocked reads, writes and accepts
    /// return immediately.
    pub fn request_stop(&self) {
        info!("Stopping listener on {}", self.local_addr);
        self.cancel.cancel();
    }

    /// Waits for every task to finish. Only returns after [`request_stop`](Self::request_stop).
    pub async fn join(self) {
        self.tracker.wait().await;
        info!("Listener on {} has stopped", self.local_addr);
    }
}

async fn accept_loop(
    listener: TcpListener,
    acceptor: Option<TlsAcceptor>,
    context: Arc<SessionContext>,
    tracker: TaskTracker,
    cancel: CancellationToken,
) {
    loop {
        let (stream, peer) = tokio::select! {
            biased;

            _ = cancel.cancelled() => break,

            accepted = listener.accept() => match accepted {
                Ok(accepted) => accepted,
                Err(e) => {
                    error!("Error accepting connection: {}", e);
                    continue;
                }
            },
        };

        info!("Connection received from {}", peer);
        if let Err(e) = stream.set_nodelay(true) {
            debug!("Unable to set TCP_NODELAY for {}: {}", peer, e);
        }

        tracker.spawn(serve(
            stream,
            peer,
            acceptor.clone(),
            Arc::clone(&context),
            cancel.clone(),
        ));
    }
}

async fn serve(
    stream: TcpStream,
    peer: SocketAddr,
    acceptor: Option<TlsAcceptor>,
    context: Arc<SessionContext>,
    cancel: CancellationToken,
) {
    let acceptor = match acceptor {
        Some(acceptor) => acceptor,
        None => {
            Session::new(stream, peer, context, cancel).run().await;
            return;
        }
    };

    let handshake = tokio::select! {
        biased;

        _ = cancel.cancelled() => return,

        handshake = timeout(context.read_timeout, acceptor.accept(stream)) => handshake,
    };

    match handshake {
        Ok(Ok(stream)) => {
            debug!("TLS handshake with {} complete", peer);
            Session::new(stream, peer, context, cancel).run().await;
        }
        Ok(Err(e)) => warn!("TLS handshake with {} failed: {}", peer, e),
        Err(_) => warn!("TLS handshake with {} timed out", peer),
    }
}
