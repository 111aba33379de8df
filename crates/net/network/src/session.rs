//! Drives a [`Peer`] over a TCP stream and hands its events to the listener.

use crate::{
    error::PeerError,
    listener::ListenerEvent,
    peer::{Direction, Peer, PeerEvent},
    protocol::{CapabilitySender, PeerCommand},
};
use bytes::{Bytes, BytesMut};
use relay_ecies::PeerId;
use relay_eth_wire::{block::FeedBlock, eth::EthMessageID, DisconnectReason};
use std::{net::SocketAddr, sync::Arc};
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::TcpStream,
    sync::mpsc,
    time::{sleep_until, Instant},
};
use tracing::{debug, trace};

/// Initial capacity of the per session read buffer.
const READ_BUFFER_CAPACITY: usize = 8 * 1024;

/// A handle to an established session.
///
/// Cloning is cheap. All clones talk to the same session; once it ends every send returns
/// `Ok(false)`.
#[derive(Debug, Clone)]
pub struct PeerHandle {
    peer_id: PeerId,
    remote_addr: SocketAddr,
    direction: Direction,
    client_version: Arc<str>,
    capabilities: Vec<CapabilitySender>,
    commands: mpsc::UnboundedSender<PeerCommand>,
}

// === impl PeerHandle ===

impl PeerHandle {
    /// The remote node id.
    pub const fn peer_id(&self) -> PeerId {
        self.peer_id
    }

    /// Address of the remote end.
    pub const fn remote_addr(&self) -> SocketAddr {
        self.remote_addr
    }

    /// Which side opened the connection.
    pub const fn direction(&self) -> Direction {
        self.direction
    }

    /// Client version from the remote hello.
    pub fn client_version(&self) -> &str {
        &self.client_version
    }

    /// Senders for all negotiated capabilities, ordered by offset.
    pub fn capabilities(&self) -> &[CapabilitySender] {
        &self.capabilities
    }

    /// The sender of the negotiated capability with the given name.
    pub fn capability(&self, name: &str) -> Option<&CapabilitySender> {
        self.capabilities.iter().find(|sender| sender.capability().name() == name)
    }

    /// Announces a block from the feed with `NewBlock`.
    ///
    /// Blocks that spend blob gas are not announced, they yield `Ok(false)`.
    pub fn send_new_block(&self, block: &FeedBlock) -> Result<bool, PeerError> {
        if block.header.has_blob_gas() {
            trace!(target: "net::session", peer_id = ?self.peer_id, "skipping block with blob gas");
            return Ok(false)
        }
        self.send_raw("eth", EthMessageID::NewBlock.into(), block.encode_new_block().into())
    }

    /// Sends an RLP payload with an id relative to the named capability.
    pub fn send_raw(&self, capability: &str, id: u8, payload: Bytes) -> Result<bool, PeerError> {
        let sender = self
            .capability(capability)
            .ok_or_else(|| PeerError::CapabilityNotShared(capability.to_string()))?;
        Ok(sender.send(id, payload)?)
    }

    /// Asks the session to disconnect. Returns `false` if the session already ended.
    pub fn disconnect(&self, reason: DisconnectReason) -> bool {
        self.commands.send(PeerCommand::Disconnect(reason)).is_ok()
    }
}

/// Runs the session until the transport closes.
pub(crate) async fn run_session(
    stream: TcpStream,
    mut peer: Peer,
    events: mpsc::UnboundedSender<ListenerEvent>,
) {
    let remote_addr = peer.remote_addr();
    let (commands_tx, mut commands_rx) = mpsc::unbounded_channel();
    let (mut reader, mut writer) = stream.into_split();
    let mut buf = BytesMut::with_capacity(READ_BUFFER_CAPACITY);

    trace!(target: "net::session", %remote_addr, direction = ?peer.direction(), "session started");

    loop {
        if let Some(outgoing) = peer.take_outgoing() {
            if let Err(err) = writer.write_all(&outgoing).await {
                debug!(target: "net::session", %remote_addr, %err, "failed to write");
                break
            }
        }
        forward_events(&mut peer, &commands_tx, &events);

        let now = Instant::now();
        if peer.should_close_transport(now) {
            break
        }
        let deadline = peer.next_deadline();

        tokio::select! {
            read = reader.read_buf(&mut buf) => match read {
                Ok(0) => {
                    trace!(target: "net::session", %remote_addr, "remote closed the connection");
                    break
                }
                Ok(_) => {
                    peer.on_bytes(&buf, Instant::now());
                    buf.clear();
                }
                Err(err) => {
                    debug!(target: "net::session", %remote_addr, %err, "failed to read");
                    break
                }
            },
            _ = sleep_until(deadline.unwrap_or(now)), if deadline.is_some() => {
                peer.poll_timers(Instant::now());
            }
            Some(command) = commands_rx.recv() => {
                peer.on_command(command, Instant::now());
            }
        }
    }

    if let Err(err) = writer.shutdown().await {
        trace!(target: "net::session", %remote_addr, %err, "failed to shut down transport");
    }
    // handles observe the closed session before the final events arrive
    drop(commands_rx);
    peer.on_transport_closed();
    forward_events(&mut peer, &commands_tx, &events);
    trace!(target: "net::session", %remote_addr, reason = ?peer.disconnect_reason(), "session ended");
}

/// Translates peer events into listener events.
fn forward_events(
    peer: &mut Peer,
    commands: &mpsc::UnboundedSender<PeerCommand>,
    events: &mpsc::UnboundedSender<ListenerEvent>,
) {
    while let Some(event) = peer.poll_event() {
        let event = match event {
            PeerEvent::Established { peer_id, client_version, capabilities } => {
                let capabilities = capabilities
                    .into_iter()
                    .map(|capability| CapabilitySender::new(capability, commands.clone()))
                    .collect();
                ListenerEvent::PeerConnected(PeerHandle {
                    peer_id,
                    remote_addr: peer.remote_addr(),
                    direction: peer.direction(),
                    client_version: client_version.into(),
                    capabilities,
                    commands: commands.clone(),
                })
            }
            PeerEvent::Message(message) => {
                let Some(peer_id) = peer.remote_id() else { continue };
                ListenerEvent::PeerMessage { peer_id, message }
            }
            PeerEvent::Error(error) => ListenerEvent::PeerError {
                peer: peer.remote_id(),
                remote_addr: peer.remote_addr(),
                error,
            },
            PeerEvent::Closed { reason, we_initiated } => {
                let Some(peer_id) = peer.remote_id() else { continue };
                debug!(target: "net::session", ?peer_id, ?reason, we_initiated, "session closed");
                ListenerEvent::PeerClosed { peer: peer_id, reason, we_initiated }
            }
        };
        // the application may have dropped the stream, the session keeps running regardless
        let _ = events.send(event);
    }
}
