//! ForwarderActor - single writer on the streaming sink connection
//!
//! All forwarded traffic funnels through one bounded queue into this actor,
//! which is the only component allowed to hold or mutate the WebSocket
//! connection. Running the sends from a single sequential loop serializes
//! all writes; the sink protocol forbids concurrent writers.
//!
//! ## State machine
//!
//! ```text
//! Disconnected --dequeue--> connect
//!     connect ok   -> Connected, backoff reset, send the message
//!     connect fail -> requeue (non-blocking), sleep backoff, double delay
//!                     (capped), stay Disconnected
//! Connected --dequeue--> send
//!     send ok   -> stay Connected
//!     send fail -> drop connection, requeue (non-blocking), next dequeue
//!                  reconnects
//! Shutdown command (any state) -> close connection, exit loop
//! ```
//!
//! A failed message goes back to the *tail* of the queue, so strict
//! per-message ordering is not preserved across failures. The requeue is a
//! `try_send`: when the queue is already full the message is dropped with a
//! warning, trading delivery completeness for bounded memory while the sink
//! is down.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use futures::SinkExt;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::{debug, error, instrument, trace, warn};

use crate::OutboundMessage;
use crate::config::SinkConfig;

use super::messages::{ForwarderCommand, ForwarderStats};

type SinkConnection = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Reconnect delay state: doubled on every failed attempt, capped, reset on
/// a successful connect.
#[derive(Debug, Clone, Copy)]
pub struct Backoff {
    current: Duration,
    min: Duration,
    max: Duration,
}

impl Backoff {
    pub fn new(min: Duration, max: Duration) -> Self {
        Self {
            current: min,
            min,
            max,
        }
    }

    /// The delay to wait before the next attempt
    pub fn delay(&self) -> Duration {
        self.current
    }

    /// Consume the current delay and double it, capped at the maximum.
    /// Returns the delay the caller should sleep for.
    pub fn advance(&mut self) -> Duration {
        let delay = self.current;
        self.current = (self.current * 2).min(self.max);
        delay
    }

    pub fn reset(&mut self) {
        self.current = self.min;
    }
}

/// Actor owning the sink connection and the consuming end of the queue
pub struct ForwarderActor {
    /// Sink WebSocket URL
    url: String,

    /// Consuming end of the bounded message queue
    queue_rx: mpsc::Receiver<OutboundMessage>,

    /// Producer end of the same queue, used only to requeue failed messages
    /// at the tail
    requeue_tx: mpsc::Sender<OutboundMessage>,

    /// Command receiver for control messages
    command_rx: mpsc::Receiver<ForwarderCommand>,

    /// The one connection; `None` while disconnected
    connection: Option<SinkConnection>,

    backoff: Backoff,

    stats: ForwarderStats,
}

impl ForwarderActor {
    pub fn new(
        config: &SinkConfig,
        queue_rx: mpsc::Receiver<OutboundMessage>,
        requeue_tx: mpsc::Sender<OutboundMessage>,
        command_rx: mpsc::Receiver<ForwarderCommand>,
    ) -> Self {
        Self {
            url: config.url.clone(),
            queue_rx,
            requeue_tx,
            command_rx,
            connection: None,
            backoff: Backoff::new(
                Duration::from_secs(config.reconnect_min_secs),
                Duration::from_secs(config.reconnect_max_secs),
            ),
            stats: ForwarderStats::default(),
        }
    }

    /// Run the actor's main loop until a Shutdown command arrives or every
    /// producer handle is gone.
    #[instrument(skip(self), fields(sink = %self.url))]
    pub async fn run(mut self) {
        debug!("starting forwarder actor");

        loop {
            tokio::select! {
                Some(cmd) = self.command_rx.recv() => {
                    match cmd {
                        ForwarderCommand::GetStats { respond_to } => {
                            let _ = respond_to.send(self.stats.clone());
                        }

                        ForwarderCommand::Shutdown => {
                            debug!("received shutdown command");
                            break;
                        }
                    }
                }

                Some(message) = self.queue_rx.recv() => {
                    self.forward(message).await;
                }

                else => {
                    warn!("all channels closed, shutting down");
                    break;
                }
            }
        }

        if let Some(mut connection) = self.connection.take() {
            let _ = connection.close(None).await;
        }

        debug!("forwarder actor stopped");
    }

    /// Deliver one dequeued message, driving the connection state machine.
    async fn forward(&mut self, message: OutboundMessage) {
        if self.connection.is_none() {
            match connect_async(self.url.as_str()).await {
                Ok((stream, _)) => {
                    debug!("connected to sink");
                    self.connection = Some(stream);
                    self.backoff.reset();
                    self.stats.connects += 1;
                }
                Err(e) => {
                    self.stats.failures += 1;
                    let delay = self.backoff.advance();
                    warn!("sink connection failed: {e}, retrying in {delay:?}");
                    self.requeue(message);
                    tokio::time::sleep(delay).await;
                    return;
                }
            }
        }

        let frame = match serde_json::to_string(&message) {
            Ok(frame) => frame,
            Err(e) => {
                error!("could not serialize outbound message: {e}");
                return;
            }
        };

        if let Some(connection) = self.connection.as_mut() {
            match connection.send(Message::Text(frame)).await {
                Ok(()) => {
                    self.stats.sent += 1;
                    trace!(
                        "forwarded {} frame for pid {}",
                        message.metric_type, message.pid
                    );
                }
                Err(e) => {
                    self.stats.failures += 1;
                    warn!("sink write failed: {e}, reconnecting on next message");
                    self.connection = None;
                    self.requeue(message);
                }
            }
        }
    }

    /// Put a failed message back at the tail of the queue without blocking;
    /// drop it when the queue is full.
    fn requeue(&mut self, message: OutboundMessage) {
        if self.requeue_tx.try_send(message).is_err() {
            self.stats.dropped += 1;
            warn!("forwarder queue full, dropping message");
        }
    }
}

/// Handle for enqueuing messages to and controlling a ForwarderActor
///
/// Cloneable; every per-process unit of work holds one. Producers only ever
/// touch the queue sender, never the connection.
#[derive(Clone)]
pub struct ForwarderHandle {
    queue_tx: mpsc::Sender<OutboundMessage>,
    command_tx: mpsc::Sender<ForwarderCommand>,

    /// Messages shed at the producer side because the queue was full.
    /// Tracked here rather than in the actor so the drop signal stays
    /// observable even while the actor sleeps through a backoff.
    enqueue_drops: Arc<AtomicU64>,
}

impl ForwarderHandle {
    /// Spawn a new forwarder actor with its bounded queue and return the
    /// handle.
    pub fn spawn(config: &SinkConfig) -> Self {
        let (queue_tx, queue_rx) = mpsc::channel(config.queue_capacity);
        let (command_tx, command_rx) = mpsc::channel(8);

        let actor = ForwarderActor::new(config, queue_rx, queue_tx.clone(), command_rx);

        tokio::spawn(actor.run());

        Self {
            queue_tx,
            command_tx,
            enqueue_drops: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Non-blocking enqueue. Returns whether the message was accepted; a
    /// full (or closed) queue drops the message with a warning and never
    /// blocks the caller.
    pub fn try_enqueue(&self, message: OutboundMessage) -> bool {
        match self.queue_tx.try_send(message) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(message)) => {
                self.enqueue_drops.fetch_add(1, Ordering::Relaxed);
                warn!(
                    "forwarder queue full, dropping {} message for pid {}",
                    message.metric_type, message.pid
                );
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                self.enqueue_drops.fetch_add(1, Ordering::Relaxed);
                warn!("forwarder is gone, dropping message");
                false
            }
        }
    }

    /// Messages this handle family has shed on enqueue so far
    pub fn dropped_enqueues(&self) -> u64 {
        self.enqueue_drops.load(Ordering::Relaxed)
    }

    /// Fetch the forwarder's delivery counters. Producer-side enqueue drops
    /// are folded into `dropped` alongside the actor's requeue drops.
    pub async fn get_stats(&self) -> anyhow::Result<ForwarderStats> {
        let (tx, rx) = oneshot::channel();
        self.command_tx
            .send(ForwarderCommand::GetStats { respond_to: tx })
            .await
            .map_err(|_| anyhow::anyhow!("failed to send GetStats command"))?;

        let mut stats = rx
            .await
            .map_err(|_| anyhow::anyhow!("failed to receive stats"))?;
        stats.dropped += self.enqueue_drops.load(Ordering::Relaxed);
        Ok(stats)
    }

    /// Gracefully shut down the forwarder
    pub async fn shutdown(&self) -> anyhow::Result<()> {
        self.command_tx
            .send(ForwarderCommand::Shutdown)
            .await
            .map_err(|_| anyhow::anyhow!("failed to send Shutdown command"))?;
        Ok(())
    }
}
