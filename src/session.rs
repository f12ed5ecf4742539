//! One accepted connection: read frames, archive, relay and acknowledge them, strictly one at a time.

use std::fmt;
use std::io;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use bytes::BytesMut;
use chrono::Local;
use futures::StreamExt;
use log::{debug, info, warn};
use rand::Rng;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, ReadBuf};
use tokio::sync::mpsc::UnboundedSender;
use tokio::time::{sleep_until, timeout, Instant};
use tokio_util::codec::Framed;
use tokio_util::sync::CancellationToken;

use crate::ack::{self, AckMode};
use crate::archive::{self, Archive};
use crate::config::Config;
use crate::encoding::TextEncoding;
use crate::hl7::{Hl7Error, Message};
use crate::mllp::MllpCodec;

/// Everything a session needs that's shared with the rest of the listener.
pub struct SessionContext {
    pub archive: Arc<dyn Archive>,
    /// Queue feeding the passthrough forwarder, when one is configured
    pub outbound: Option<UnboundedSender<String>>,
    pub ack_mode: AckMode,
    pub app_name: String,
    pub encoding: TextEncoding,
    pub read_timeout: Duration,
    pub write_timeout: Duration,
    pub max_frame_length: usize,
}

impl SessionContext {
    pub fn new(
        config: &Config,
        archive: Arc<dyn Archive>,
        outbound: Option<UnboundedSender<String>>,
    ) -> Self {
        SessionContext {
            archive,
            outbound,
            ack_mode: config.ack_mode,
            app_name: config.app_name.clone(),
            encoding: config.encoding,
            read_timeout: config.read_timeout,
            write_timeout: config.write_timeout,
            max_frame_length: config.max_frame_length,
        }
    }
}

/// Why a session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    /// The peer closed its end
    Disconnected,
    /// No bytes arrived within the read timeout
    TimedOut,
    /// The listener is shutting down
    Cancelled,
    /// A read or write on the socket failed, or an ACK couldn't be written in time
    TransportError,
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            CloseReason::Disconnected => "disconnected",
            CloseReason::TimedOut => "timed out",
            CloseReason::Cancelled => "cancelled",
            CloseReason::TransportError => "transport error",
        })
    }
}

enum FrameError {
    Malformed(Hl7Error),
    Transport(io::Error),
    WriteTimeout,
}

/// A connection session over any byte stream, plain TCP or TLS.
pub struct Session<S> {
    peer: SocketAddr,
    transport: Framed<ReadActivity<S>, MllpCodec>,
    context: Arc<SessionContext>,
    cancel: CancellationToken,
    message_count: u64,
    // keeps archive filenames from concurrent sessions apart without any coordination
    sequence_base: u64,
}

impl<S> Session<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    pub fn new(
        stream: S,
        peer: SocketAddr,
        context: Arc<SessionContext>,
        cancel: CancellationToken,
    ) -> Self {
        let codec = MllpCodec::with_max_frame_length(context.max_frame_length);
        Session {
            peer,
            transport: Framed::new(ReadActivity::new(stream), codec),
            context,
            cancel,
            message_count: 0,
            sequence_base: rand::thread_rng().gen_range(0..1_000_000),
        }
    }

    /// Handles frames until the peer goes away, the read times out, or the listener is stopped.
    pub async fn run(mut self) -> CloseReason {
        let cancel = self.cancel.clone();
        let reason = loop {
            let frame = match self.read_frame(&cancel).await {
                Ok(frame) => frame,
                Err(reason) => break reason,
            };

            let handled = tokio::select! {
                biased;

                _ = cancel.cancelled() => break CloseReason::Cancelled,

                handled = self.handle_frame(frame) => handled,
            };

            match handled {
                Ok(()) => {}
                Err(FrameError::Malformed(e)) => {
                    warn!("Unable to parse the HL7 message from {}: {}", self.peer, e);
                }
                Err(FrameError::Transport(e)) => {
                    info!("Error sending an ACK to the client {}: {}", self.peer, e);
                    break CloseReason::TransportError;
                }
                Err(FrameError::WriteTimeout) => {
                    info!("Timed out sending an ACK to the client {}", self.peer);
                    break CloseReason::TransportError;
                }
            }
        };

        info!(
            "Total messages received from {}: {} ({})",
            self.peer, self.message_count, reason
        );
        reason
    }

    /// The next complete frame. The read timeout restarts whenever bytes arrive, so a frame trickling in
    /// slowly is still read in full.
    async fn read_frame(&mut self, cancel: &CancellationToken) -> Result<BytesMut, CloseReason> {
        let read_timeout = self.context.read_timeout;
        loop {
            let deadline = self.transport.get_ref().last_read + read_timeout;
            tokio::select! {
                biased;

                _ = cancel.cancelled() => return Err(CloseReason::Cancelled),

                next = self.transport.next() => return match next {
                    Some(Ok(frame)) => Ok(frame),
                    Some(Err(e)) => {
                        info!("Connection from {} has ended: {}", self.peer, e);
                        Err(CloseReason::TransportError)
                    }
                    None => {
                        info!("The client {} has disconnected", self.peer);
                        Err(CloseReason::Disconnected)
                    }
                },

                _ = sleep_until(deadline) => {
                    if self.transport.get_ref().last_read + read_timeout <= Instant::now() {
                        info!("Connection from {} timed out", self.peer);
                        return Err(CloseReason::TimedOut);
                    }
                }
            }
        }
    }

    async fn handle_frame(&mut self, frame: BytesMut) -> Result<(), FrameError> {
        let context = Arc::clone(&self.context);
        let text = context.encoding.decode(&frame);
        let message = Message::parse(&text).map_err(FrameError::Malformed)?;

        self.message_count += 1;
        let now = Local::now();
        let filename = archive::filename(
            &now,
            self.sequence_base + self.message_count,
            &message.message_type(),
        );
        if let Err(e) = context.archive.write(&text, &filename).await {
            warn!("Failed to write file {}: {}", filename, e);
        }

        if let Some(outbound) = &context.outbound {
            if outbound.send(text.to_string()).is_err() {
                warn!(
                    "Passthrough forwarder has stopped, message {} will not be relayed",
                    message.control_id()
                );
            }
        }

        if !context.ack_mode.should_acknowledge(&message) {
            debug!("Not acknowledging message {}", message.control_id());
            return Ok(());
        }

        info!("Sending ACK (Message Control ID: {})", message.control_id());
        let response = ack::synthesize(&text, &context.app_name, context.encoding)
            .map_err(FrameError::Malformed)?;

        // already framed; the codec's write buffer is always empty here
        let stream = self.transport.get_mut();
        let write = async {
            stream.write_all(&response).await?;
            stream.flush().await?;
            Ok::<_, io::Error>(())
        };
        match timeout(context.write_timeout, write).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(FrameError::Transport(e)),
            Err(_) => Err(FrameError::WriteTimeout),
        }
    }
}

/// Remembers when bytes last arrived from the peer.
struct ReadActivity<S> {
    inner: S,
    last_read: Instant,
}

impl<S> ReadActivity<S> {
    fn new(inner: S) -> Self {
        ReadActivity {
            inner,
            last_read: Instant::now(),
        }
    }
}

impl<S: AsyncRead + Unpin> AsyncRead for ReadActivity<S> {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let before = buf.filled().len();
        let poll = Pin::new(&mut self.inner).poll_read(cx, buf);
        if let Poll::Ready(Ok(())) = poll {
            if buf.filled().len() > before {
                self.last_read = Instant::now();
            }
        }
        poll
    }
}

impl<S: AsyncWrite + Unpin> AsyncWrite for ReadActivity<S> {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.inner).poll_write(cx, buf)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_shutdown(cx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use futures::SinkExt;
    use std::sync::Mutex;
    use tokio::io::{duplex, AsyncWriteExt, DuplexStream};
    use tokio::sync::mpsc;

    const ADT: &str = "MSH|^~\\&|EPIC|EPICADT|SMS|SMSADT|199912271408|CHARRIS|ADT^A04|1817457|D|2.5|\rPID||0493575^^^2^ID 1|454721||DOE^JOHN^^^^";

    #[derive(Default)]
    struct MemoryArchive {
        files: Mutex<Vec<(String, String)>>,
    }

    #[async_trait]
    impl Archive for MemoryArchive {
        async fn write(&self, text: &str, filename: &str) -> io::Result<()> {
            self.files
                .lock()
                .unwrap()
                .push((filename.to_string(), text.to_string()));
            Ok(())
        }
    }

    struct FailingArchive;

    #[async_trait]
    impl Archive for FailingArchive {
        async fn write(&self, _text: &str, _filename: &str) -> io::Result<()> {
            Err(io::Error::new(io::ErrorKind::PermissionDenied, "read only"))
        }
    }

    fn context(
        archive: Arc<dyn Archive>,
        outbound: Option<UnboundedSender<String>>,
        ack_mode: AckMode,
    ) -> Arc<SessionContext> {
        let config = Config {
            ack_mode,
            read_timeout: Duration::from_secs(5),
            ..Config::default()
        };
        Arc::new(SessionContext::new(&config, archive, outbound))
    }

    fn peer() -> SocketAddr {
        "127.0.0.1:40000".parse().unwrap()
    }

    fn spawn_session(
        context: Arc<SessionContext>,
        cancel: CancellationToken,
    ) -> (Framed<DuplexStream, MllpCodec>, tokio::task::JoinHandle<CloseReason>) {
        let (client, server) = duplex(4096);
        let session = Session::new(server, peer(), context, cancel);
        (Framed::new(client, MllpCodec::new()), tokio::spawn(session.run()))
    }

    #[tokio::test]
    async fn archives_relays_and_acknowledges() {
        let archive = Arc::new(MemoryArchive::default());
        let (tx, mut rx) = mpsc::unbounded_channel();
        let ctx = context(archive.clone(), Some(tx), AckMode::Always);
        let (mut client, session) = spawn_session(ctx, CancellationToken::new());

        client.send(BytesMut::from(ADT)).await.unwrap();
        let ack = client.next().await.unwrap().unwrap();
        let ack = std::str::from_utf8(&ack).unwrap();
        assert!(ack.contains("|ACK^A04|1817457|D|2.5\rMSA|CA|1817457"), "{}", ack);

        assert_eq!(rx.recv().await.unwrap(), ADT);

        drop(client);
        assert_eq!(session.await.unwrap(), CloseReason::Disconnected);

        let files = archive.files.lock().unwrap();
        assert_eq!(files.len(), 1);
        assert!(files[0].0.ends_with("_ADT_A04.hl7"), "{}", files[0].0);
        assert_eq!(files[0].1, ADT);
    }

    #[tokio::test]
    async fn reassembles_a_frame_written_in_pieces() {
        let archive = Arc::new(MemoryArchive::default());
        let ctx = context(archive.clone(), None, AckMode::Always);
        let (client, server) = duplex(4096);
        let session = Session::new(server, peer(), ctx, CancellationToken::new());
        let session = tokio::spawn(session.run());

        let mut client = Framed::new(client, MllpCodec::new());
        let framed = crate::mllp::frame(ADT.as_bytes());
        let last = framed.len() - 1;
        for piece in [&framed[..1], &framed[1..20], &framed[20..last], &framed[last..]] {
            client.get_mut().write_all(piece).await.unwrap();
            client.get_mut().flush().await.unwrap();
            tokio::task::yield_now().await;
        }

        let ack = client.next().await.unwrap().unwrap();
        assert!(ack.ends_with(b"MSA|CA|1817457"));
        drop(client);
        session.await.unwrap();
        assert_eq!(archive.files.lock().unwrap()[0].1, ADT);
    }

    #[tokio::test]
    async fn sequential_messages_get_distinct_filenames() {
        let archive = Arc::new(MemoryArchive::default());
        let ctx = context(archive.clone(), None, AckMode::Always);
        let (mut client, session) = spawn_session(ctx, CancellationToken::new());

        for _ in 0..3 {
            client.send(BytesMut::from(ADT)).await.unwrap();
            client.next().await.unwrap().unwrap();
        }
        drop(client);
        session.await.unwrap();

        let files = archive.files.lock().unwrap();
        let mut names: Vec<&str> = files.iter().map(|(name, _)| name.as_str()).collect();
        names.dedup();
        assert_eq!(names.len(), 3);
    }

    #[tokio::test]
    async fn malformed_frames_are_dropped_and_the_session_continues() {
        let archive = Arc::new(MemoryArchive::default());
        let (tx, mut rx) = mpsc::unbounded_channel();
        let ctx = context(archive.clone(), Some(tx), AckMode::Always);
        let (mut client, session) = spawn_session(ctx, CancellationToken::new());

        client.send(BytesMut::from("PID|1|no header here")).await.unwrap();
        client.send(BytesMut::from(ADT)).await.unwrap();

        // the only response is the ACK for the good message
        let ack = client.next().await.unwrap().unwrap();
        assert!(ack.ends_with(b"MSA|CA|1817457"));
        assert_eq!(rx.recv().await.unwrap(), ADT);

        drop(client);
        assert_eq!(session.await.unwrap(), CloseReason::Disconnected);
        assert_eq!(archive.files.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn ack_suppression() {
        let archive = Arc::new(MemoryArchive::default());
        let ctx = context(archive.clone(), None, AckMode::Never);
        let (mut client, session) = spawn_session(ctx, CancellationToken::new());

        client.send(BytesMut::from(ADT)).await.unwrap();
        client.close().await.unwrap();

        assert_eq!(session.await.unwrap(), CloseReason::Disconnected);
        assert!(client.next().await.is_none(), "no ACK expected");
        assert_eq!(archive.files.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn archive_failures_are_not_fatal() {
        let ctx = context(Arc::new(FailingArchive), None, AckMode::Always);
        let (mut client, session) = spawn_session(ctx, CancellationToken::new());

        client.send(BytesMut::from(ADT)).await.unwrap();
        let ack = client.next().await.unwrap().unwrap();
        assert!(ack.ends_with(b"MSA|CA|1817457"));

        drop(client);
        assert_eq!(session.await.unwrap(), CloseReason::Disconnected);
    }

    #[tokio::test(start_paused = true)]
    async fn idle_sessions_time_out() {
        let ctx = context(Arc::new(MemoryArchive::default()), None, AckMode::Always);
        let (_client, session) = spawn_session(ctx, CancellationToken::new());

        assert_eq!(session.await.unwrap(), CloseReason::TimedOut);
    }

    #[tokio::test(start_paused = true)]
    async fn read_timeout_restarts_whenever_bytes_arrive() {
        let archive = Arc::new(MemoryArchive::default());
        let ctx = context(archive.clone(), None, AckMode::Always);
        let (client, server) = duplex(4096);
        let session = Session::new(server, peer(), ctx, CancellationToken::new());
        let session = tokio::spawn(session.run());
        let mut client = Framed::new(client, MllpCodec::new());

        // 4 pieces 2s apart: longer than the 5s read timeout overall, never idle for that long
        let framed = crate::mllp::frame(ADT.as_bytes());
        for piece in framed.chunks(framed.len() / 4 + 1) {
            tokio::time::sleep(Duration::from_secs(2)).await;
            client.get_mut().write_all(piece).await.unwrap();
        }

        let ack = client.next().await.unwrap().unwrap();
        assert!(ack.ends_with(b"MSA|CA|1817457"));

        drop(client);
        assert_eq!(session.await.unwrap(), CloseReason::Disconnected);
        assert_eq!(archive.files.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn cancellation_unblocks_a_pending_read() {
        let cancel = CancellationToken::new();
        let ctx = context(Arc::new(MemoryArchive::default()), None, AckMode::Always);
        let (_client, session) = spawn_session(ctx, cancel.clone());

        tokio::task::yield_now().await;
        cancel.cancel();
        assert_eq!(session.await.unwrap(), CloseReason::Cancelled);
    }
}
