//! One accepted TCP connection: a reader task that parses line-delimited
//! frames and a writer task that drains an outbound queue. Channels are
//! disposable; sessions outlive them across reconnects.

use crate::error::{Error, ErrorKind};
use crate::protocol::control::CRequest;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};

static NEXT_FREE_CHANNEL_ID: AtomicU64 = AtomicU64::new(0);

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ChannelId(pub u64);

impl std::fmt::Display for ChannelId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ch{}", self.0)
    }
}

/// What the reader task reports to the communicator.
#[derive(Debug)]
pub enum ChannelEvent {
    Startup(Arc<Channel>),
    Message(Arc<Channel>, CRequest),
    Shutdown(Arc<Channel>),
}

#[derive(Debug)]
pub struct Channel {
    id: ChannelId,
    outgoing: mpsc::UnboundedSender<String>,
    shutdown_tx: watch::Sender<bool>,
}

impl Channel {
    /// Wraps an accepted socket: spawns the reader/writer pair and
    /// announces the channel on the event queue.
    pub fn spawn(
        socket: TcpStream,
        events: mpsc::UnboundedSender<ChannelEvent>,
    ) -> Arc<Channel> {
        let id = ChannelId(NEXT_FREE_CHANNEL_ID.fetch_add(1, Ordering::Relaxed));
        let (read_half, write_half) = socket.into_split();
        let (outgoing_tx, outgoing_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let channel = Arc::new(Channel {
            id,
            outgoing: outgoing_tx,
            shutdown_tx,
        });

        tokio::spawn(reader_task(
            channel.clone(),
            read_half,
            events.clone(),
            shutdown_rx.clone(),
        ));
        tokio::spawn(writer_task(id, write_half, outgoing_rx, shutdown_rx));

        let _ = events.send(ChannelEvent::Startup(channel.clone()));
        channel
    }

    pub fn id(&self) -> ChannelId {
        self.id
    }

    /// Queues one frame (without trailing newline) for the writer.
    pub fn send(&self, frame: String) -> Result<(), Error> {
        self.outgoing
            .send(frame)
            .map_err(|_| ErrorKind::ChannelClosed.into())
    }

    /// Asks both tasks to wind down. Idempotent.
    pub fn request_shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
    }
}

async fn reader_task(
    channel: Arc<Channel>,
    read_half: OwnedReadHalf,
    events: mpsc::UnboundedSender<ChannelEvent>,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let mut lines = BufReader::new(read_half).lines();
    loop {
        tokio::select! {
            _ = shutdown_rx.changed() => break,
            line = lines.next_line() => {
                match line {
                    Ok(Some(line)) => {
                        if line.trim().is_empty() {
                            continue;
                        }
                        match serde_json::from_str::<CRequest>(&line) {
                            Ok(request) => {
                                if events
                                    .send(ChannelEvent::Message(channel.clone(), request))
                                    .is_err()
                                {
                                    break;
                                }
                            }
                            Err(e) => {
                                // Protocol error: tear down just this
                                // channel. Any session survives and awaits
                                // a reattach.
                                tracing::warn!("{}: unparseable frame, closing: {e}", channel.id());
                                break;
                            }
                        }
                    }
                    Ok(None) => break,
                    Err(e) => {
                        tracing::debug!("{}: read failed: {e}", channel.id());
                        break;
                    }
                }
            }
        }
    }
    channel.request_shutdown();
    let _ = events.send(ChannelEvent::Shutdown(channel.clone()));
    tracing::debug!("{}: reader exiting", channel.id());
}

async fn writer_task(
    id: ChannelId,
    mut write_half: OwnedWriteHalf,
    mut outgoing_rx: mpsc::UnboundedReceiver<String>,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            _ = shutdown_rx.changed() => break,
            frame = outgoing_rx.recv() => {
                let Some(mut frame) = frame else { break };
                frame.push('\n');
                if let Err(e) = write_half.write_all(frame.as_bytes()).await {
                    tracing::debug!("{id}: write failed: {e}");
                    break;
                }
            }
        }
    }
    let _ = write_half.shutdown().await;
    tracing::debug!("{id}: writer exiting");
}
