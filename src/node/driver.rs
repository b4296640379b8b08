//! Async driver around the synchronous engine.
//!
//! One tokio task owns the [`Network`] and serializes everything that
//! touches it: frames pumped off link receivers, commands from
//! [`NetworkHandle`]s, and a periodic timer tick. Application events
//! stream out over an unbounded channel.

use super::{Network, NetworkEvent};
use crate::identity::NodeId;
use crate::messaging::{SendError, SendReceipt};
use crate::protocol::Frame;
use crate::transport::{Link, LinkId};
use crate::util::unix_now_ms;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info};

/// Timer granularity of the driver loop.
const TICK_INTERVAL: Duration = Duration::from_millis(25);

/// Errors surfaced by [`NetworkHandle`] operations.
#[derive(Debug, Error)]
pub enum DriverError {
    #[error("network driver stopped")]
    Stopped,

    #[error(transparent)]
    Send(#[from] SendError),
}

/// Command sent from a handle to the driver task.
#[derive(Debug)]
pub enum NetworkCommand {
    /// Attach a transport link.
    Attach {
        link: Link,
        done: oneshot::Sender<LinkId>,
    },
    /// Send a payload; the receipt channel is handed back.
    Send {
        target: NodeId,
        kind: String,
        payload: Vec<u8>,
        done: oneshot::Sender<SendReceipt>,
    },
    /// Disconnect a peer link.
    Disconnect { link: LinkId },
    /// Stop the driver loop.
    Shutdown,
}

/// Cheap clonable handle for talking to a running driver.
#[derive(Clone, Debug)]
pub struct NetworkHandle {
    commands: mpsc::UnboundedSender<NetworkCommand>,
}

impl NetworkHandle {
    /// Attach a link and wait for its id.
    pub async fn attach(&self, link: Link) -> Result<LinkId, DriverError> {
        let (done, wait) = oneshot::channel();
        self.commands
            .send(NetworkCommand::Attach { link, done })
            .map_err(|_| DriverError::Stopped)?;
        wait.await.map_err(|_| DriverError::Stopped)
    }

    /// Send a payload and wait for the delivery outcome.
    pub async fn send(
        &self,
        target: NodeId,
        kind: &str,
        payload: Vec<u8>,
    ) -> Result<(), DriverError> {
        let (done, wait) = oneshot::channel();
        self.commands
            .send(NetworkCommand::Send {
                target,
                kind: kind.to_string(),
                payload,
                done,
            })
            .map_err(|_| DriverError::Stopped)?;
        let receipt = wait.await.map_err(|_| DriverError::Stopped)?;
        let result = receipt.await.map_err(|_| DriverError::Stopped)?;
        Ok(result?)
    }

    /// Ask the driver to disconnect a link.
    pub fn disconnect(&self, link: LinkId) -> Result<(), DriverError> {
        self.commands
            .send(NetworkCommand::Disconnect { link })
            .map_err(|_| DriverError::Stopped)
    }

    /// Stop the driver.
    pub fn shutdown(&self) {
        let _ = self.commands.send(NetworkCommand::Shutdown);
    }
}

enum InboxItem {
    Frame(Frame),
    Closed,
}

/// The tokio task that owns and drives a [`Network`].
pub struct NetworkDriver {
    network: Network,
    commands_rx: mpsc::UnboundedReceiver<NetworkCommand>,
    inbox_tx: mpsc::UnboundedSender<(LinkId, InboxItem)>,
    inbox_rx: mpsc::UnboundedReceiver<(LinkId, InboxItem)>,
    events_tx: mpsc::UnboundedSender<NetworkEvent>,
}

impl NetworkDriver {
    /// Wrap an engine. Returns the driver, a command handle, and the
    /// application event stream.
    pub fn new(
        network: Network,
    ) -> (
        Self,
        NetworkHandle,
        mpsc::UnboundedReceiver<NetworkEvent>,
    ) {
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let (inbox_tx, inbox_rx) = mpsc::unbounded_channel();
        let (events_tx, events_rx) = mpsc::unbounded_channel();

        (
            Self {
                network,
                commands_rx,
                inbox_tx,
                inbox_rx,
                events_tx,
            },
            NetworkHandle {
                commands: commands_tx,
            },
            events_rx,
        )
    }

    /// Run until shutdown or the last handle is dropped.
    pub async fn run(mut self) {
        let mut tick = tokio::time::interval(TICK_INTERVAL);
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        info!(node = %self.network.local_id(), "Network driver started");

        loop {
            tokio::select! {
                command = self.commands_rx.recv() => {
                    match command {
                        Some(NetworkCommand::Attach { link, done }) => {
                            let (link_id, rx, events) = self.network.attach(link, unix_now_ms());
                            self.pump_link(link_id, rx);
                            self.emit(events);
                            let _ = done.send(link_id);
                        }
                        Some(NetworkCommand::Send { target, kind, payload, done }) => {
                            let (receipt, events) =
                                self.network.send(target, &kind, payload, unix_now_ms());
                            self.emit(events);
                            let _ = done.send(receipt);
                        }
                        Some(NetworkCommand::Disconnect { link }) => {
                            let events = self.network.disconnect(link, unix_now_ms());
                            self.emit(events);
                        }
                        Some(NetworkCommand::Shutdown) | None => break,
                    }
                }
                item = self.inbox_rx.recv() => {
                    if let Some((link, item)) = item {
                        let events = match item {
                            InboxItem::Frame(frame) => {
                                self.network.handle_frame(link, frame, unix_now_ms())
                            }
                            InboxItem::Closed => {
                                self.network.handle_link_closed(link, unix_now_ms())
                            }
                        };
                        self.emit(events);
                    }
                }
                _ = tick.tick() => {
                    let events = self.network.tick(unix_now_ms());
                    self.emit(events);
                }
            }
        }

        info!(node = %self.network.local_id(), "Network driver stopped");
    }

    /// Forward a link's frames into the driver inbox; a closed link
    /// becomes a close notification.
    fn pump_link(&self, link: LinkId, mut rx: crate::transport::FrameReceiver) {
        let inbox = self.inbox_tx.clone();
        tokio::spawn(async move {
            while let Some(frame) = rx.recv().await {
                if inbox.send((link, InboxItem::Frame(frame))).is_err() {
                    return;
                }
            }
            debug!(link = %link, "Link receive half closed");
            let _ = inbox.send((link, InboxItem::Closed));
        });
    }

    fn emit(&self, events: Vec<NetworkEvent>) {
        for event in events {
            // Receiver gone means the embedder stopped listening.
            let _ = self.events_tx.send(event);
        }
    }
}
