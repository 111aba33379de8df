//! Accepts and dials RLPx connections and spawns a session task for each.

use crate::{
    config::NetworkConfig,
    error::{NetworkError, PeerError},
    node_record::NodeRecord,
    peer::Peer,
    protocol::PeerMessage,
    session::{run_session, PeerHandle},
};
use relay_ecies::PeerId;
use relay_eth_wire::DisconnectReason;
use std::{net::SocketAddr, sync::Arc};
use tokio::{
    net::{TcpListener, TcpStream},
    sync::mpsc,
    task::JoinHandle,
    time::Instant,
};
use tokio_stream::wrappers::UnboundedReceiverStream;
use tracing::{debug, info, trace};

/// Events of all sessions run by a [`RlpxListener`].
#[derive(Debug)]
pub enum ListenerEvent {
    /// A session is established.
    PeerConnected(PeerHandle),
    /// A sub-protocol message arrived on an established session.
    PeerMessage {
        /// The sending peer.
        peer_id: PeerId,
        /// The message.
        message: PeerMessage,
    },
    /// An established session ended.
    PeerClosed {
        /// The remote node id.
        peer: PeerId,
        /// The disconnect reason, if either side sent one.
        reason: Option<DisconnectReason>,
        /// Whether the reason was sent by us.
        we_initiated: bool,
    },
    /// A session failed, possibly before the remote id was known.
    PeerError {
        /// The remote node id, if known.
        peer: Option<PeerId>,
        /// Address of the remote end.
        remote_addr: SocketAddr,
        /// What went wrong.
        error: PeerError,
    },
}

/// Listens for RLPx connections and runs one session task per connection.
///
/// Dropping the listener stops accepting. Running sessions continue until they close.
#[derive(Debug)]
pub struct RlpxListener {
    config: Arc<NetworkConfig>,
    local_addr: SocketAddr,
    events_tx: mpsc::UnboundedSender<ListenerEvent>,
    events_rx: Option<mpsc::UnboundedReceiver<ListenerEvent>>,
    accept_task: JoinHandle<()>,
}

// === impl RlpxListener ===

impl RlpxListener {
    /// Binds to the configured address and starts accepting connections.
    ///
    /// The port announced in the hello is set to the bound port.
    pub async fn bind(mut config: NetworkConfig) -> Result<Self, NetworkError> {
        let listener = TcpListener::bind(config.listener_addr).await?;
        let local_addr = listener.local_addr()?;
        config.hello_message.port = local_addr.port();
        let config = Arc::new(config);

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let accept_task = tokio::spawn(accept_loop(listener, config.clone(), events_tx.clone()));

        let enode = NodeRecord::new(local_addr, config.local_id());
        info!(target: "net::session", %local_addr, %enode, "listening for RLPx connections");

        Ok(Self { config, local_addr, events_tx, events_rx: Some(events_rx), accept_task })
    }

    /// The bound listen address.
    pub const fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// This node's id.
    pub fn local_id(&self) -> PeerId {
        self.config.local_id()
    }

    /// This node as an `enode://` record.
    pub fn enode(&self) -> NodeRecord {
        NodeRecord::new(self.local_addr, self.local_id())
    }

    /// The client version sent in the hello.
    pub fn client_version(&self) -> &str {
        &self.config.hello_message.client_version
    }

    /// The active configuration.
    pub fn config(&self) -> &NetworkConfig {
        &self.config
    }

    /// The stream of session events.
    ///
    /// There is a single consumer: only the first call yields events, later calls get a stream
    /// that ends right away.
    pub fn events(&mut self) -> UnboundedReceiverStream<ListenerEvent> {
        let rx = self.events_rx.take().unwrap_or_else(|| mpsc::unbounded_channel().1);
        UnboundedReceiverStream::new(rx)
    }

    /// Dials `node` and runs an outgoing session with it.
    ///
    /// Returns once the TCP connection is up. The handshake result arrives as an event.
    pub async fn connect(&self, node: NodeRecord) -> Result<(), NetworkError> {
        trace!(target: "net::session", %node, "dialing");
        let stream = TcpStream::connect(node.tcp_addr()).await?;
        let peer = Peer::outgoing(self.config.clone(), node, Instant::now())?;
        tokio::spawn(run_session(stream, peer, self.events_tx.clone()));
        Ok(())
    }

    /// Dials all configured boot nodes. Returns the number of successful dials.
    pub async fn connect_boot_nodes(&self) -> usize {
        let mut dialed = 0;
        for node in &self.config.boot_nodes {
            match self.connect(*node).await {
                Ok(()) => dialed += 1,
                Err(err) => debug!(target: "net::session", %node, %err, "failed to dial boot node"),
            }
        }
        dialed
    }
}

impl Drop for RlpxListener {
    fn drop(&mut self) {
        self.accept_task.abort();
    }
}

async fn accept_loop(
    listener: TcpListener,
    config: Arc<NetworkConfig>,
    events: mpsc::UnboundedSender<ListenerEvent>,
) {
    loop {
        match listener.accept().await {
            Ok((stream, remote_addr)) => {
                trace!(target: "net::session", %remote_addr, "incoming connection");
                let peer = Peer::incoming(config.clone(), remote_addr, Instant::now());
                tokio::spawn(run_session(stream, peer, events.clone()));
            }
            Err(err) => {
                debug!(target: "net::session", %err, "failed to accept connection");
            }
        }
    }
}
