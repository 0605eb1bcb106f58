//! Line transport abstraction for the network protocol backend.

use crate::error::EnvError;
use crate::types::WireLine;
use crate::SessionContext;
use std::sync::Arc;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::{TryRecvError, TrySendError};
use tracing::{debug, warn};

/// Default capacity of the inbound hand-off channel.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 1024;

/// Abstraction for the decoded-line side of a network connection.
///
/// # Implementations
///
/// - **Production**: `ChannelTransport` fed by `spawn_line_reader` over a socket
/// - **Harness**: `ChannelTransport` fed by a scripted `RemoteEnd`
///
/// # Line Flow
///
/// ```text
/// socket ──► reader task ──► [bounded channel] ──► drain() during update
/// send() ──► [channel] ──► writer task ──► socket
/// ```
///
/// All methods are non-blocking: the session drains whatever has arrived
/// since the previous tick and never waits on the network.
pub trait LineTransport: Send + 'static {
    /// Takes every line that arrived since the last call, in FIFO order.
    fn drain(&mut self) -> Vec<WireLine>;

    /// Queues a line for sending.
    ///
    /// # Returns
    /// * `Ok(())` - Line queued
    /// * `Err(EnvError::TransportClosed)` - Transport is closed
    /// * `Err(EnvError::ChannelFull)` - Outbound queue is full, line dropped
    fn send(&mut self, line: String) -> Result<(), EnvError>;

    /// Tears the transport down; later sends fail and drains are empty.
    fn close(&mut self);

    /// Returns true until the transport is closed or the remote hangs up.
    fn is_open(&self) -> bool;
}

/// Channel-backed transport.
pub struct ChannelTransport {
    /// Lines handed off by the reader side
    inbound: mpsc::Receiver<WireLine>,

    /// Lines for the writer side (None once closed)
    outbound: Option<mpsc::Sender<String>>,

    /// Cleared when closed or when the inbound side disconnects
    open: bool,
}

/// The far end of a `ChannelTransport`.
///
/// Either owned by the socket reader/writer tasks or, in the harness,
/// driven directly by a scripted peer.
pub struct RemoteEnd {
    /// Sender into the transport's inbound channel
    pub inbound_tx: mpsc::Sender<WireLine>,

    /// Receiver of everything the session sent
    pub outbound_rx: mpsc::Receiver<String>,
}

impl ChannelTransport {
    /// Creates a connected transport/remote pair with bounded channels.
    pub fn pair(capacity: usize) -> (Self, RemoteEnd) {
        let (inbound_tx, inbound) = mpsc::channel(capacity);
        let (outbound_tx, outbound_rx) = mpsc::channel(capacity);

        let transport = Self {
            inbound,
            outbound: Some(outbound_tx),
            open: true,
        };
        let remote = RemoteEnd {
            inbound_tx,
            outbound_rx,
        };
        (transport, remote)
    }

    /// Connects a transport to an async stream pair.
    ///
    /// Spawns a reader task that splits `reader` into lines and a writer
    /// task that writes each sent line followed by `\r\n`.
    pub fn connect<C, R, W>(ctx: Arc<C>, reader: R, writer: W, capacity: usize) -> Self
    where
        C: SessionContext,
        R: AsyncBufRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let (transport, remote) = Self::pair(capacity);
        spawn_line_reader(Arc::clone(&ctx), reader, remote.inbound_tx);
        spawn_line_writer(ctx, writer, remote.outbound_rx);
        transport
    }
}

impl LineTransport for ChannelTransport {
    fn drain(&mut self) -> Vec<WireLine> {
        let mut lines = Vec::new();
        if !self.open {
            return lines;
        }

        loop {
            match self.inbound.try_recv() {
                Ok(line) => lines.push(line),
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    self.open = false;
                    break;
                }
            }
        }
        lines
    }

    fn send(&mut self, line: String) -> Result<(), EnvError> {
        let tx = match (&self.outbound, self.open) {
            (Some(tx), true) => tx,
            _ => return Err(EnvError::TransportClosed),
        };

        tx.try_send(line).map_err(|err| match err {
            TrySendError::Full(line) => EnvError::channel_full(line),
            TrySendError::Closed(_) => EnvError::TransportClosed,
        })
    }

    fn close(&mut self) {
        self.open = false;
        self.outbound = None;
        self.inbound.close();
    }

    fn is_open(&self) -> bool {
        self.open
    }
}

impl RemoteEnd {
    /// Delivers one line to the session, stamped with `received_at`.
    pub fn deliver(&self, contents: impl Into<String>, received_at: std::time::Duration) -> Result<(), EnvError> {
        self.inbound_tx
            .try_send(WireLine::new(contents, received_at))
            .map_err(|err| match err {
                TrySendError::Full(line) => EnvError::channel_full(line.contents),
                TrySendError::Closed(_) => EnvError::TransportClosed,
            })
    }

    /// Takes every line the session has sent so far.
    pub fn take_sent(&mut self) -> Vec<String> {
        let mut sent = Vec::new();
        while let Ok(line) = self.outbound_rx.try_recv() {
            sent.push(line);
        }
        sent
    }
}

/// Spawns a task that reads lines from `reader` into the hand-off channel.
///
/// Blocks on the bounded channel when the session falls behind, which
/// applies back-pressure to the socket rather than dropping lines.
pub fn spawn_line_reader<C, R>(ctx: Arc<C>, reader: R, tx: mpsc::Sender<WireLine>)
where
    C: SessionContext,
    R: AsyncBufRead + Unpin + Send + 'static,
{
    let clock = Arc::clone(&ctx);
    ctx.spawn("line-reader", async move {
        let mut reader = reader;
        let mut buf = Vec::new();
        loop {
            buf.clear();
            match reader.read_until(b'\n', &mut buf).await {
                Ok(0) => {
                    debug!("line reader: end of stream");
                    break;
                }
                Ok(_) => {}
                Err(err) => {
                    warn!("line reader: {}", err);
                    break;
                }
            }
            let Ok(text) = std::str::from_utf8(&buf) else {
                warn!("skipping line that is not valid UTF-8 ({} bytes)", buf.len());
                continue;
            };
            let line = WireLine::new(text.trim_end_matches(['\n', '\r']), clock.now());
            if tx.send(line).await.is_err() {
                break;
            }
        }
    });
}

/// Spawns a task that writes sent lines to `writer`.
pub fn spawn_line_writer<C, W>(ctx: Arc<C>, mut writer: W, mut rx: mpsc::Receiver<String>)
where
    C: SessionContext,
    W: AsyncWrite + Unpin + Send + 'static,
{
    ctx.spawn("line-writer", async move {
        while let Some(line) = rx.recv().await {
            let framed = format!("{}\r\n", line);
            if writer.write_all(framed.as_bytes()).await.is_err() {
                break;
            }
            if writer.flush().await.is_err() {
                break;
            }
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::TokioContext;
    use std::time::Duration;

    #[test]
    fn test_pair_delivers_in_order() {
        let (mut transport, remote) = ChannelTransport::pair(8);

        remote.deliver("#AAKSEA_APP:SERVER", Duration::ZERO).unwrap();
        remote.deliver("#TMKSEA_APP:*:hello", Duration::from_secs(1)).unwrap();

        let lines = transport.drain();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0].contents, "#AAKSEA_APP:SERVER");
        assert_eq!(lines[1].received_at, Duration::from_secs(1));
        assert!(transport.drain().is_empty());
    }

    #[test]
    fn test_bounded_channel_reports_full() {
        let (_transport, remote) = ChannelTransport::pair(1);

        remote.deliver("first", Duration::ZERO).unwrap();
        let err = remote.deliver("second", Duration::ZERO).unwrap_err();
        assert!(matches!(err, EnvError::ChannelFull(_)));
    }

    #[test]
    fn test_close_stops_sending() {
        let (mut transport, mut remote) = ChannelTransport::pair(8);

        transport.send("$HOA:B:C".to_string()).unwrap();
        assert_eq!(remote.take_sent(), vec!["$HOA:B:C".to_string()]);

        transport.close();
        assert!(!transport.is_open());
        assert!(matches!(transport.send("x".to_string()), Err(EnvError::TransportClosed)));
    }

    #[test]
    fn test_remote_hangup_closes_transport() {
        let (mut transport, remote) = ChannelTransport::pair(8);
        remote.deliver("last", Duration::ZERO).unwrap();
        drop(remote);

        let lines = transport.drain();
        assert_eq!(lines.len(), 1);
        assert!(!transport.is_open());
    }

    #[tokio::test]
    async fn test_line_reader_splits_stream() {
        let ctx = TokioContext::shared();
        let (tx, mut rx) = mpsc::channel(8);
        let input: &[u8] = b"@N:AAL1:1200:1:47.4:-122.3:3000:180\r\n#TMA:B:hi\n";

        spawn_line_reader(ctx, input, tx);

        let first = rx.recv().await.unwrap();
        let second = rx.recv().await.unwrap();
        assert_eq!(first.contents, "@N:AAL1:1200:1:47.4:-122.3:3000:180");
        assert_eq!(second.contents, "#TMA:B:hi");
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_line_reader_skips_invalid_utf8() {
        let ctx = TokioContext::shared();
        let (tx, mut rx) = mpsc::channel(8);
        let input: &[u8] = b"#TMA:*:one\n\xff\xfe\r\n#TMA:*:three";

        spawn_line_reader(ctx, input, tx);

        assert_eq!(rx.recv().await.unwrap().contents, "#TMA:*:one");
        assert_eq!(rx.recv().await.unwrap().contents, "#TMA:*:three");
        assert!(rx.recv().await.is_none());
    }
}
