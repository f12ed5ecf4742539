//! Relays every received message, in arrival order, to a second HL7 endpoint.

use std::io;
use std::time::Duration;

use futures::{FutureExt, SinkExt, StreamExt};
use log::{debug, info, warn};
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::time::timeout;
use tokio_util::codec::Framed;
use tokio_util::sync::CancellationToken;

use crate::config::{Config, PassthroughTarget};
use crate::encoding::TextEncoding;
use crate::error::{Error, Result};
use crate::mllp::MllpCodec;

/// The single consumer of the outbound queue. Owns the passthrough connection outright; sessions only ever see
/// the sending half of the queue.
pub struct Forwarder {
    target: PassthroughTarget,
    encoding: TextEncoding,
    write_timeout: Duration,
    ack_timeout: Duration,
    connect_timeout: Duration,
    max_frame_length: usize,
    connection: Option<Framed<TcpStream, MllpCodec>>,
}

impl Forwarder {
    /// Connects to the passthrough host up front, so a listener with an unreachable target never starts.
    pub async fn connect(target: PassthroughTarget, config: &Config) -> Result<Self> {
        let mut forwarder = Forwarder {
            target,
            encoding: config.encoding,
            write_timeout: config.write_timeout,
            ack_timeout: config.passthrough_ack_timeout,
            connect_timeout: config.connect_timeout,
            max_frame_length: config.max_frame_length,
            connection: None,
        };

        match forwarder.open().await {
            Ok(transport) => forwarder.connection = Some(transport),
            Err(source) => {
                return Err(Error::Passthrough {
                    target: forwarder.target,
                    source,
                })
            }
        }
        info!("Connected to passthrough host {}", forwarder.target);
        Ok(forwarder)
    }

    pub fn target(&self) -> &PassthroughTarget {
        &self.target
    }

    /// Drains the queue until it's closed or `cancel` fires. Entries still queued at that point are not relayed.
    pub async fn run(mut self, mut queue: UnboundedReceiver<String>, cancel: CancellationToken) {
        loop {
            let text = tokio::select! {
                biased;

                _ = cancel.cancelled() => break,

                next = queue.recv() => match next {
                    Some(text) => text,
                    None => break,
                },
            };

            tokio::select! {
                biased;

                _ = cancel.cancelled() => break,

                _ = self.relay(&text) => {}
            }
        }

        self.disconnect().await;
        info!("Passthrough forwarder for {} has stopped", self.target);
    }

    /// Sends one message and waits for the remote's response. Failures drop the message, never the forwarder.
    async fn relay(&mut self, text: &str) {
        if let Err(e) = self.ensure_connected().await {
            warn!(
                "Unable to connect to passthrough host {}, message not relayed: {}",
                self.target, e
            );
            return;
        }

        let payload = self.encoding.encode(text);
        let transport = match self.connection.as_mut() {
            Some(transport) => transport,
            None => return,
        };

        info!("Sending message to passthrough host {}", self.target);
        match timeout(self.write_timeout, transport.send(payload)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                warn!("Failed to send message to passthrough host {}: {}", self.target, e);
                self.connection = None;
                return;
            }
            Err(_) => {
                warn!("Timed out sending message to passthrough host {}", self.target);
                self.connection = None;
                return;
            }
        }

        match timeout(self.ack_timeout, transport.next()).await {
            Ok(Some(Ok(response))) => {
                debug!(
                    "Received {} byte response from passthrough host {}",
                    response.len(),
                    self.target
                );
            }
            Ok(Some(Err(e))) => {
                warn!("Failed to read response from passthrough host {}: {}", self.target, e);
                self.connection = None;
            }
            Ok(None) => {
                warn!("Passthrough host {} closed the connection", self.target);
                self.connection = None;
            }
            // a late response is left for the next read; the connection itself may still be fine
            Err(_) => warn!(
                "Timed out waiting for a response from passthrough host {}",
                self.target
            ),
        }
    }

    async fn ensure_connected(&mut self) -> io::Result<()> {
        match &self.connection {
            Some(transport) if is_writable(transport.get_ref()) => return Ok(()),
            Some(_) => {
                info!(
                    "Passthrough connection to {} is no longer writable, reconnecting",
                    self.target
                );
                self.disconnect().await;
            }
            None => info!("Reconnecting to passthrough host {}", self.target),
        }

        self.connection = Some(self.open().await?);
        Ok(())
    }

    async fn open(&self) -> io::Result<Framed<TcpStream, MllpCodec>> {
        let connect = TcpStream::connect((self.target.host.as_str(), self.target.port));
        let stream = timeout(self.connect_timeout, connect)
            .await
            .map_err(|_| io::Error::new(io::ErrorKind::TimedOut, "connect timed out"))??;
        stream.set_nodelay(true)?;

        Ok(Framed::new(
            stream,
            MllpCodec::with_max_frame_length(self.max_frame_length),
        ))
    }

    async fn disconnect(&mut self) {
        if let Some(mut transport) = self.connection.take() {
            if let Err(e) = transport.get_mut().shutdown().await {
                debug!("Error closing passthrough connection to {}: {}", self.target, e);
            }
        }
    }
}

/// Whether a write is worth attempting: the peer hasn't closed its end and the socket hasn't reported an error.
fn is_writable(stream: &TcpStream) -> bool {
    let mut peeked = [0u8; 1];
    match stream.peek(&mut peeked).now_or_never() {
        // nothing to read yet
        None => true,
        Some(Ok(0)) => false,
        Some(Ok(_)) => true,
        Some(Err(_)) => false,
    }
}
