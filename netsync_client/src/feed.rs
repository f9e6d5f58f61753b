//! Inbound message feed.
//!
//! The network side runs as its own task and hands decoded messages to the
//! tick loop through a bounded queue. Anything that yields [`SyncMessage`]s
//! can be a source; [`UdpSnapshotSource`] is the default.

use std::net::SocketAddr;
use std::time::Duration;

use async_trait::async_trait;
use netsync_shared::net::{DatagramChannel, SyncMessage};
use tokio::{sync::mpsc, task::JoinHandle};
use tracing::{debug, info, warn};

/// Producer of inbound sync messages.
#[async_trait]
pub trait SnapshotSource: Send {
    /// Next message, `Ok(None)` when the source is exhausted.
    ///
    /// A malformed message is an `Err`; the feed logs it and keeps reading.
    async fn next_message(&mut self) -> anyhow::Result<Option<SyncMessage>>;
}

/// Messages from an unconnected UDP socket.
pub struct UdpSnapshotSource {
    channel: DatagramChannel,
    /// Receive wait before checking whether the queue is still wanted.
    poll: Duration,
}

impl UdpSnapshotSource {
    pub async fn bind(addr: SocketAddr) -> anyhow::Result<Self> {
        let channel = DatagramChannel::bind(addr).await?;
        info!(addr = %channel.local_addr()?, "snapshot feed listening");
        Ok(Self {
            channel,
            poll: Duration::from_millis(250),
        })
    }

    pub fn local_addr(&self) -> anyhow::Result<SocketAddr> {
        self.channel.local_addr()
    }
}

#[async_trait]
impl SnapshotSource for UdpSnapshotSource {
    async fn next_message(&mut self) -> anyhow::Result<Option<SyncMessage>> {
        loop {
            if let Some((msg, from)) = self.channel.recv_timeout(self.poll).await? {
                debug!(%from, "datagram received");
                return Ok(Some(msg));
            }
        }
    }
}

/// Fixed list of messages, handy for replays.
pub struct ReplaySource {
    messages: std::vec::IntoIter<SyncMessage>,
}

impl ReplaySource {
    pub fn new(messages: Vec<SyncMessage>) -> Self {
        Self {
            messages: messages.into_iter(),
        }
    }
}

#[async_trait]
impl SnapshotSource for ReplaySource {
    async fn next_message(&mut self) -> anyhow::Result<Option<SyncMessage>> {
        Ok(self.messages.next())
    }
}

/// Pumps `source` into `tx` until the source ends or the receiver is gone.
pub fn spawn_feed<S>(mut source: S, tx: mpsc::Sender<SyncMessage>) -> JoinHandle<()>
where
    S: SnapshotSource + 'static,
{
    tokio::spawn(async move {
        loop {
            let msg = match source.next_message().await {
                Ok(Some(msg)) => msg,
                Ok(None) => {
                    debug!("snapshot source exhausted");
                    break;
                }
                Err(e) => {
                    warn!(error = %e, "dropping malformed message");
                    continue;
                }
            };
            if tx.send(msg).await.is_err() {
                debug!("inbound queue closed; feed stopping");
                break;
            }
        }
    })
}
