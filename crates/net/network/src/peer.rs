//! Connection state machine of a single RLPx peer.
//!
//! [`Peer`] does no IO. The session feeds it transport bytes, timer ticks and application
//! commands, and drains outbound bytes and [`PeerEvent`]s from it.

use crate::{
    config::NetworkConfig,
    error::PeerError,
    node_record::NodeRecord,
    pinger::{Pinger, PingerEvent},
    protocol::{absolute_id, PeerCommand, PeerMessage, SubProtocol},
};
use alloy_rlp::Encodable;
use bytes::{Bytes, BytesMut};
use relay_ecies::{
    algorithm::ECIES, ECIESCodec, ECIESError, ECIESState, EgressECIESValue, IngressECIESValue,
    PeerId,
};
use relay_eth_wire::{
    capability::shared_capabilities,
    compress, decode_message_id, decompress,
    errors::{P2PHandshakeError, P2PStreamError},
    DisconnectReason, HelloMessage, P2PMessage, P2PMessageID, SharedCapability,
    MAX_RESERVED_MESSAGE_ID,
};
use std::{collections::VecDeque, net::SocketAddr, sync::Arc};
use tokio::time::Instant;
use tokio_util::codec::{Decoder, Encoder};
use tracing::{debug, trace};

/// Which side opened the connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// The remote dialed us.
    Incoming,
    /// We dialed the remote with the given id.
    Outgoing(PeerId),
}

impl Direction {
    /// Returns `true` if this is an incoming connection.
    pub const fn is_incoming(&self) -> bool {
        matches!(self, Self::Incoming)
    }
}

/// Lifecycle events of a [`Peer`].
#[derive(Debug)]
pub enum PeerEvent {
    /// Both hellos were exchanged and at least one capability is shared.
    Established {
        /// The remote node id.
        peer_id: PeerId,
        /// Client version from the remote hello.
        client_version: String,
        /// Negotiated capabilities and their offsets.
        capabilities: Vec<SharedCapability>,
    },
    /// A sub-protocol message for the application.
    Message(PeerMessage),
    /// Something went wrong. A disconnect follows unless the transport is already gone.
    Error(PeerError),
    /// The transport closed on an established session.
    Closed {
        /// The disconnect reason, if either side sent one.
        reason: Option<DisconnectReason>,
        /// Whether the reason was sent by us.
        we_initiated: bool,
    },
}

/// When the transport should be shut down.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Shutdown {
    Open,
    Now,
    At(Instant),
}

/// The state of one RLPx connection.
#[derive(Debug)]
pub struct Peer {
    config: Arc<NetworkConfig>,
    direction: Direction,
    remote_addr: SocketAddr,
    codec: ECIESCodec,
    /// Bytes received but not consumed by the codec yet.
    ingress: BytesMut,
    /// Bytes ready to be written to the transport.
    egress: BytesMut,
    remote_id: Option<PeerId>,
    remote_hello: Option<HelloMessage>,
    hello_sent: bool,
    /// Set once both hellos announce `p2p` v5.
    compression: bool,
    connected: bool,
    closed: bool,
    transport_closed: bool,
    shutdown: Shutdown,
    disconnect_reason: Option<DisconnectReason>,
    we_disconnected: bool,
    handshake_deadline: Option<Instant>,
    pinger: Pinger,
    protocols: Vec<SubProtocol>,
    events: VecDeque<PeerEvent>,
}

impl Peer {
    fn new(
        config: Arc<NetworkConfig>,
        direction: Direction,
        remote_addr: SocketAddr,
        codec: ECIESCodec,
        now: Instant,
    ) -> Self {
        let timeouts = config.timeouts;
        Self {
            direction,
            remote_addr,
            codec,
            ingress: BytesMut::new(),
            egress: BytesMut::new(),
            remote_id: match direction {
                Direction::Incoming => None,
                Direction::Outgoing(id) => Some(id),
            },
            remote_hello: None,
            hello_sent: false,
            compression: false,
            connected: false,
            closed: false,
            transport_closed: false,
            shutdown: Shutdown::Open,
            disconnect_reason: None,
            we_disconnected: false,
            handshake_deadline: Some(now + timeouts.handshake_timeout),
            pinger: Pinger::new(timeouts.ping_interval, timeouts.ping_timeout),
            protocols: Vec::new(),
            events: VecDeque::new(),
            config,
        }
    }

    /// A connection accepted by the listener. The remote id is learned from its auth.
    pub fn incoming(config: Arc<NetworkConfig>, remote_addr: SocketAddr, now: Instant) -> Self {
        let codec = ECIESCodec::new_server(config.secret_key);
        Self::new(config, Direction::Incoming, remote_addr, codec, now)
    }

    /// A connection to `remote`. The auth message is queued right away.
    pub fn outgoing(
        config: Arc<NetworkConfig>,
        remote: NodeRecord,
        now: Instant,
    ) -> Result<Self, ECIESError> {
        let ecies = ECIES::new_client(config.secret_key, remote.id)?;
        let codec = ECIESCodec::client(ecies, config.handshake_variant);
        let mut peer = Self::new(config, Direction::Outgoing(remote.id), remote.tcp_addr(), codec, now);
        peer.codec.encode(EgressECIESValue::Auth, &mut peer.egress)?;
        Ok(peer)
    }

    /// Which side opened the connection.
    pub const fn direction(&self) -> Direction {
        self.direction
    }

    /// Address of the remote end.
    pub const fn remote_addr(&self) -> SocketAddr {
        self.remote_addr
    }

    /// The remote node id, once known.
    pub const fn remote_id(&self) -> Option<PeerId> {
        self.remote_id
    }

    /// The remote hello, once received.
    pub const fn remote_hello(&self) -> Option<&HelloMessage> {
        self.remote_hello.as_ref()
    }

    /// Whether the session is established.
    pub const fn is_connected(&self) -> bool {
        self.connected
    }

    /// Whether the session is closing or closed. No more messages are accepted or sent.
    pub const fn is_closed(&self) -> bool {
        self.closed
    }

    /// The first disconnect reason sent or received.
    pub const fn disconnect_reason(&self) -> Option<DisconnectReason> {
        self.disconnect_reason
    }

    /// The byte-stream phase of the handshake codec.
    pub const fn ecies_state(&self) -> ECIESState {
        self.codec.state()
    }

    /// Number of bytes the current phase waits for.
    pub fn next_expected_len(&self) -> usize {
        self.codec.next_expected_len(&self.ingress)
    }

    /// Takes the bytes that should be written to the transport.
    pub fn take_outgoing(&mut self) -> Option<Bytes> {
        (!self.egress.is_empty()).then(|| self.egress.split().freeze())
    }

    /// Next pending event.
    pub fn poll_event(&mut self) -> Option<PeerEvent> {
        self.events.pop_front()
    }

    /// Whether the transport should be shut down at `now`.
    pub fn should_close_transport(&self, now: Instant) -> bool {
        match self.shutdown {
            Shutdown::Open => false,
            Shutdown::Now => true,
            Shutdown::At(at) => now >= at,
        }
    }

    /// The earliest instant at which [`Self::poll_timers`] or [`Self::should_close_transport`]
    /// change something.
    pub fn next_deadline(&self) -> Option<Instant> {
        if self.transport_closed {
            return None
        }
        let shutdown = match self.shutdown {
            Shutdown::At(at) => Some(at),
            Shutdown::Open | Shutdown::Now => None,
        };
        if self.closed {
            return shutdown
        }
        self.handshake_deadline
            .into_iter()
            .chain(self.connected.then(|| self.pinger.next_deadline()).flatten())
            .chain(self.protocols.iter().filter_map(SubProtocol::next_deadline))
            .chain(shutdown)
            .min()
    }

    /// Consumes bytes read from the transport.
    pub fn on_bytes(&mut self, data: &[u8], now: Instant) {
        if self.closed {
            return
        }
        self.ingress.extend_from_slice(data);

        while !self.closed {
            match self.codec.decode(&mut self.ingress) {
                Ok(Some(value)) => self.on_ecies_value(value, now),
                Ok(None) => break,
                Err(err) => {
                    debug!(target: "net::peer", remote_addr = %self.remote_addr, %err, "ecies failure");
                    self.fail(err.into(), DisconnectReason::ProtocolBreach, now);
                }
            }
        }
    }

    /// Fires expired timers.
    pub fn poll_timers(&mut self, now: Instant) {
        if self.closed {
            return
        }

        if self.handshake_deadline.is_some_and(|deadline| now >= deadline) {
            self.handshake_deadline = None;
            debug!(target: "net::peer", remote_addr = %self.remote_addr, "handshake timed out");
            self.fail(PeerError::HandshakeTimeout, DisconnectReason::Timeout, now);
            return
        }

        if !self.connected {
            return
        }

        match self.pinger.poll(now) {
            Some(PingerEvent::Ping) => self.send_p2p(&P2PMessage::Ping),
            Some(PingerEvent::Timeout) => {
                debug!(target: "net::peer", peer_id = ?self.remote_id, "ping timed out");
                self.fail(P2PStreamError::PingTimeout.into(), DisconnectReason::Timeout, now);
                return
            }
            None => {}
        }

        if let Some(err) = self.protocols.iter_mut().find_map(|p| p.poll_timers(now).err()) {
            debug!(target: "net::peer", peer_id = ?self.remote_id, %err, "sub-protocol timer expired");
            self.fail(err.into(), DisconnectReason::Timeout, now);
        }
    }

    /// Applies a command from the application.
    pub fn on_command(&mut self, command: PeerCommand, now: Instant) {
        match command {
            PeerCommand::Message { id, payload } => {
                self.send_message(id, &payload);
            }
            PeerCommand::Disconnect(reason) => self.disconnect(reason, now),
        }
    }

    /// Frames `rlp(id) ‖ payload` and queues it. Returns `false` if the session is closed or the
    /// frame cannot be built.
    pub fn send_message(&mut self, id: u8, payload: &[u8]) -> bool {
        if self.closed || !self.codec.is_frame_ready() {
            return false
        }
        let frame = match self.frame(id, payload) {
            Ok(frame) => frame,
            Err(err) => {
                debug!(target: "net::peer", peer_id = ?self.remote_id, id, %err, "failed to frame message");
                return false
            }
        };
        self.write_frame(frame)
    }

    /// Sends a disconnect and closes the transport after the grace period.
    ///
    /// Without a frame cipher no disconnect can be sent and the transport closes right away.
    pub fn disconnect(&mut self, reason: DisconnectReason, now: Instant) {
        if self.closed {
            return
        }
        debug!(target: "net::peer", peer_id = ?self.remote_id, ?reason, "disconnecting");
        if self.disconnect_reason.is_none() {
            self.disconnect_reason = Some(reason);
            self.we_disconnected = true;
        }

        let sent = self.codec.is_frame_ready();
        if sent {
            self.send_p2p(&P2PMessage::Disconnect(reason));
        }
        self.close();
        self.shutdown = if sent {
            Shutdown::At(now + self.config.timeouts.disconnect_grace)
        } else {
            Shutdown::Now
        };
    }

    /// Must be called once the transport is gone.
    pub fn on_transport_closed(&mut self) {
        if self.transport_closed {
            return
        }
        self.transport_closed = true;
        self.close();
        if self.connected {
            self.events.push_back(PeerEvent::Closed {
                reason: self.disconnect_reason,
                we_initiated: self.we_disconnected,
            });
        }
    }

    fn close(&mut self) {
        self.closed = true;
        self.handshake_deadline = None;
        self.pinger.stop();
    }

    /// Reports the error and disconnects.
    fn fail(&mut self, err: PeerError, reason: DisconnectReason, now: Instant) {
        self.events.push_back(PeerEvent::Error(err));
        self.disconnect(reason, now);
    }

    fn on_ecies_value(&mut self, value: IngressECIESValue, now: Instant) {
        match value {
            IngressECIESValue::AuthReceive(id) => {
                trace!(target: "net::peer", remote_addr = %self.remote_addr, peer_id = ?id, "received auth");
                self.remote_id = Some(id);
                if let Err(err) = self.codec.encode(EgressECIESValue::Ack, &mut self.egress) {
                    self.fail(err.into(), DisconnectReason::ProtocolBreach, now);
                    return
                }
                self.send_hello();
            }
            IngressECIESValue::Ack => {
                trace!(target: "net::peer", peer_id = ?self.remote_id, "received ack");
                self.send_hello();
            }
            IngressECIESValue::Message(body) => self.on_frame(&body, now),
        }
    }

    fn send_hello(&mut self) {
        let hello = P2PMessage::Hello(self.config.hello_message.message());
        if self.write_frame(alloy_rlp::encode(&hello).into()) {
            self.hello_sent = true;
            if self.connected {
                self.on_established();
            }
        }
    }

    fn on_frame(&mut self, body: &[u8], now: Instant) {
        let (id, payload) = match decode_message_id(body) {
            Ok(split) => split,
            Err(err) => {
                let err = if body.is_empty() {
                    P2PStreamError::EmptyProtocolMessage
                } else {
                    P2PStreamError::Rlp(err)
                };
                self.fail(err.into(), DisconnectReason::ProtocolBreach, now);
                return
            }
        };

        let is_handshake_message =
            id == P2PMessageID::Hello as u8 || id == P2PMessageID::Disconnect as u8;
        if self.remote_hello.is_none() && !is_handshake_message {
            self.fail(
                P2PStreamError::MessageBeforeHello(id).into(),
                DisconnectReason::ProtocolBreach,
                now,
            );
            return
        }

        if id <= MAX_RESERVED_MESSAGE_ID {
            self.on_p2p_message(id, payload, now);
            return
        }

        let Some(index) = self.protocols.iter().position(|p| p.capability().owns(id)) else {
            self.fail(
                P2PStreamError::UnownedMessageId(id).into(),
                DisconnectReason::ProtocolBreach,
                now,
            );
            return
        };

        if let Err(err) = self.dispatch(index, id, payload) {
            debug!(target: "net::peer", peer_id = ?self.remote_id, id, %err, "failed to handle message");
            self.fail(err, DisconnectReason::SubprotocolSpecific, now);
        }
    }

    fn dispatch(&mut self, index: usize, id: u8, payload: &[u8]) -> Result<(), PeerError> {
        let decompressed;
        let payload = if self.compression {
            decompressed = decompress(payload)?;
            &decompressed[..]
        } else {
            payload
        };

        let capability = self.protocols[index].capability().clone();
        let output = self.protocols[index].on_message(id - capability.offset, payload)?;
        for (reply_id, reply) in output.replies {
            let reply_id = absolute_id(&capability, reply_id)?;
            self.send_message(reply_id, &reply);
        }
        if let Some(message) = output.message {
            self.events.push_back(PeerEvent::Message(message));
        }
        Ok(())
    }

    fn on_p2p_message(&mut self, id: u8, payload: &[u8], now: Instant) {
        let message = match P2PMessageID::try_from(id) {
            Ok(P2PMessageID::Disconnect) => self.decode_disconnect(payload),
            Ok(message_id) => P2PMessage::decode_payload(message_id, payload).map_err(Into::into),
            Err(err) => {
                self.fail(err.into(), DisconnectReason::ProtocolBreach, now);
                return
            }
        };

        match message {
            Ok(P2PMessage::Hello(hello)) => self.on_hello(hello, now),
            Ok(P2PMessage::Disconnect(reason)) => {
                debug!(target: "net::peer", peer_id = ?self.remote_id, ?reason, "received disconnect");
                if self.disconnect_reason.is_none() {
                    self.disconnect_reason = Some(reason);
                    self.we_disconnected = false;
                }
                self.close();
                self.shutdown = Shutdown::Now;
            }
            Ok(P2PMessage::Ping) => self.send_p2p(&P2PMessage::Pong),
            Ok(P2PMessage::Pong) => self.pinger.on_pong(now),
            Err(err) => {
                debug!(target: "net::peer", peer_id = ?self.remote_id, id, %err, "bad p2p message");
                self.fail(err.into(), DisconnectReason::SubprotocolSpecific, now);
            }
        }
    }

    /// Some clients compress the disconnect payload and some do not, so the other form is tried
    /// when the expected one fails.
    fn decode_disconnect(&self, payload: &[u8]) -> Result<P2PMessage, P2PStreamError> {
        let plain = || {
            P2PMessage::decode_payload(P2PMessageID::Disconnect, payload).map_err(P2PStreamError::from)
        };
        let snappy = || {
            decompress(payload).and_then(|decompressed| {
                P2PMessage::decode_payload(P2PMessageID::Disconnect, &decompressed)
                    .map_err(P2PStreamError::from)
            })
        };
        if self.compression {
            snappy().or_else(|_| plain())
        } else {
            plain().or_else(|_| snappy())
        }
    }

    fn on_hello(&mut self, hello: HelloMessage, now: Instant) {
        if self.remote_hello.is_some() {
            self.fail(
                P2PStreamError::HandshakeError(P2PHandshakeError::HelloNotInHandshake).into(),
                DisconnectReason::ProtocolBreach,
                now,
            );
            return
        }
        trace!(target: "net::peer", peer_id = ?hello.id, client = %hello.client_version, "received hello");

        if let Some(expected) = self.remote_id.filter(|expected| *expected != hello.id) {
            let err = P2PHandshakeError::UnexpectedIdentity { expected, got: hello.id };
            self.fail(P2PStreamError::from(err).into(), DisconnectReason::InvalidIdentity, now);
            return
        }
        self.remote_id = Some(hello.id);
        self.handshake_deadline = None;
        self.compression = self.config.hello_message.protocol_version.uses_compression() &&
            hello.protocol_version.uses_compression();

        let shared = shared_capabilities(&self.config.hello_message.protocols, &hello.capabilities);
        self.remote_hello = Some(hello);
        if shared.is_empty() {
            self.fail(
                P2PStreamError::from(P2PHandshakeError::NoSharedCapabilities).into(),
                DisconnectReason::UselessPeer,
                now,
            );
            return
        }

        let timeouts = self.config.timeouts;
        self.protocols =
            shared.into_iter().map(|cap| SubProtocol::new(cap, now, &timeouts)).collect();
        self.connected = true;
        self.pinger.start(now);
        if self.hello_sent {
            self.on_established();
        }
    }

    fn on_established(&mut self) {
        let Some(hello) = &self.remote_hello else { return };
        debug!(target: "net::peer", peer_id = ?hello.id, client = %hello.client_version, "session established");
        self.events.push_back(PeerEvent::Established {
            peer_id: hello.id,
            client_version: hello.client_version.clone(),
            capabilities: self.protocols.iter().map(|p| p.capability().clone()).collect(),
        });
    }

    /// Sends a base protocol message, compressed if negotiated.
    fn send_p2p(&mut self, message: &P2PMessage) {
        let mut payload = Vec::new();
        message.encode_payload(&mut payload);
        self.send_message(message.message_id().into(), &payload);
    }

    fn frame(&self, id: u8, payload: &[u8]) -> Result<Bytes, P2PStreamError> {
        let mut frame = BytesMut::with_capacity(payload.len() + 1);
        id.encode(&mut frame);
        if self.compression {
            frame.extend_from_slice(&compress(payload)?);
        } else {
            frame.extend_from_slice(payload);
        }
        Ok(frame.freeze())
    }

    fn write_frame(&mut self, frame: Bytes) -> bool {
        trace!(target: "net::peer", peer_id = ?self.remote_id, len = frame.len(), "writing frame");
        match self.codec.encode(EgressECIESValue::Message(frame), &mut self.egress) {
            Ok(()) => true,
            Err(err) => {
                debug!(target: "net::peer", peer_id = ?self.remote_id, %err, "failed to write frame");
                self.events.push_back(PeerEvent::Error(err.into()));
                self.close();
                self.shutdown = Shutdown::Now;
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{rng_secret_key, SessionTimeouts};
    use relay_ecies::{algorithm::HandshakeVariant, util::pk2id};
    use relay_eth_wire::{Capability, HelloMessageWithProtocols, Protocol, ProtocolVersion, RlpItem};
    use secp256k1::SECP256K1;
    use std::time::Duration;

    fn config() -> Arc<NetworkConfig> {
        Arc::new(NetworkConfig::new(rng_secret_key()))
    }

    fn addr() -> SocketAddr {
        "127.0.0.1:30303".parse().unwrap()
    }

    fn record(config: &NetworkConfig) -> NodeRecord {
        NodeRecord::new(addr(), config.local_id())
    }

    /// Moves all pending bytes from `from` to `to`.
    fn pump(from: &mut Peer, to: &mut Peer, now: Instant) -> bool {
        match from.take_outgoing() {
            Some(bytes) => {
                to.on_bytes(&bytes, now);
                true
            }
            None => false,
        }
    }

    fn exchange(a: &mut Peer, b: &mut Peer, now: Instant) {
        while pump(a, b, now) | pump(b, a, now) {}
    }

    fn events(peer: &mut Peer) -> Vec<PeerEvent> {
        std::iter::from_fn(|| peer.poll_event()).collect()
    }

    fn connected_pair(
        client_config: Arc<NetworkConfig>,
        server_config: Arc<NetworkConfig>,
        now: Instant,
    ) -> (Peer, Peer) {
        let mut client = Peer::outgoing(client_config, record(&server_config), now).unwrap();
        let mut server = Peer::incoming(server_config, addr(), now);
        exchange(&mut client, &mut server, now);
        (client, server)
    }

    #[test]
    fn sessions_establish() {
        let now = Instant::now();
        let (client_config, server_config) = (config(), config());
        let (mut client, mut server) =
            connected_pair(client_config.clone(), server_config.clone(), now);

        assert!(client.is_connected());
        assert!(server.is_connected());
        assert_eq!(server.remote_id(), Some(client_config.local_id()));
        assert!(server.direction().is_incoming());

        let server_events = events(&mut server);
        assert_eq!(server_events.len(), 1);
        let PeerEvent::Established { peer_id, capabilities, .. } = &server_events[0] else {
            panic!("expected established, got {server_events:?}")
        };
        assert_eq!(*peer_id, client_config.local_id());
        assert_eq!(capabilities[0].name(), "eth");
        assert_eq!(capabilities[0].offset, 16);
        assert!(matches!(&events(&mut client)[..], [PeerEvent::Established { .. }]));

        // handshake deadline is gone, ping and status deadlines remain
        assert_eq!(client.next_deadline(), Some(now + Duration::from_secs(5)));
    }

    #[test]
    fn legacy_auth_moves_to_header_phase() {
        let now = Instant::now();
        let server_config = config();
        let client_config =
            Arc::new(NetworkConfig::builder(rng_secret_key()).handshake_variant(HandshakeVariant::Legacy).build());

        let mut client = Peer::outgoing(client_config, record(&server_config), now).unwrap();
        let mut server = Peer::incoming(server_config, addr(), now);
        assert_eq!(server.ecies_state(), ECIESState::Auth);
        assert_eq!(server.next_expected_len(), 307);

        assert!(pump(&mut client, &mut server, now));
        assert_eq!(server.ecies_state(), ECIESState::Header);
        assert_eq!(server.next_expected_len(), 32);

        exchange(&mut client, &mut server, now);
        assert!(client.is_connected());
        assert!(server.is_connected());
    }

    #[test]
    fn useless_peer_is_disconnected() {
        let now = Instant::now();
        let other = Protocol::raw(Capability::new_static("other", 1), 2);
        let client_config =
            Arc::new(NetworkConfig::builder(rng_secret_key()).protocols([other]).build());
        let server_config = config();
        let (mut client, mut server) = connected_pair(client_config, server_config, now);

        assert!(!client.is_connected());
        assert!(!server.is_connected());
        assert_eq!(client.disconnect_reason(), Some(DisconnectReason::UselessPeer));
        assert!(client.is_closed());
        assert!(!client.should_close_transport(now));
        assert!(client.should_close_transport(now + Duration::from_secs(2)));

        // the remote side saw our disconnect, or sent its own first
        assert!(server.is_closed());
        assert_eq!(server.disconnect_reason(), Some(DisconnectReason::UselessPeer));

        client.on_transport_closed();
        assert!(events(&mut client)
            .iter()
            .all(|event| !matches!(event, PeerEvent::Closed { .. })));
    }

    #[test]
    fn handshake_times_out() {
        let now = Instant::now();
        let mut server = Peer::incoming(config(), addr(), now);
        assert_eq!(server.next_deadline(), Some(now + Duration::from_secs(10)));

        server.poll_timers(now + Duration::from_secs(9));
        assert!(!server.is_closed());

        server.poll_timers(now + Duration::from_secs(10));
        assert!(server.is_closed());
        assert_eq!(server.disconnect_reason(), Some(DisconnectReason::Timeout));
        // no cipher yet, nothing can be sent
        assert!(server.take_outgoing().is_none());
        assert!(server.should_close_transport(now + Duration::from_secs(10)));
        assert!(matches!(&events(&mut server)[..], [PeerEvent::Error(PeerError::HandshakeTimeout)]));
    }

    #[test]
    fn status_is_echoed() {
        let now = Instant::now();
        let (mut client, mut server) = connected_pair(config(), config(), now);
        events(&mut client);
        events(&mut server);

        let status = alloy_rlp::encode(&RlpItem::list([RlpItem::from(68u64), RlpItem::from(1u64)]));
        assert!(client.send_message(16, &status));
        exchange(&mut client, &mut server, now);

        // our status, later the echo of its echo, which is not answered again
        let server_events = events(&mut server);
        assert!(matches!(server_events[0], PeerEvent::Message(PeerMessage::EthStatus(_))));
        assert_eq!(server_events.len(), 3);
        // echoed status plus the upgrade status extension
        let client_events = events(&mut client);
        assert_eq!(client_events.len(), 2);
        assert!(matches!(client_events[0], PeerEvent::Message(PeerMessage::EthStatus(_))));
        assert!(matches!(
            &client_events[1],
            PeerEvent::Message(PeerMessage::Eth { id: relay_eth_wire::eth::EthMessageID::UpgradeStatus, .. })
        ));

        // both status deadlines are cleared
        assert_eq!(server.next_deadline(), Some(now + Duration::from_secs(15)));
        assert_eq!(client.next_deadline(), Some(now + Duration::from_secs(15)));
    }

    #[test]
    fn ping_pong_keeps_session_alive() {
        let now = Instant::now();
        let timeouts = SessionTimeouts { status_timeout: Duration::from_secs(60), ..Default::default() };
        let client_config = Arc::new(NetworkConfig::builder(rng_secret_key()).timeouts(timeouts).build());
        let server_config = Arc::new(NetworkConfig::builder(rng_secret_key()).timeouts(timeouts).build());
        let (mut client, mut server) = connected_pair(client_config, server_config, now);

        let ping_at = now + Duration::from_secs(15);
        client.poll_timers(ping_at);
        server.poll_timers(ping_at);
        exchange(&mut client, &mut server, ping_at);

        let later = ping_at + Duration::from_secs(10);
        client.poll_timers(later);
        assert!(!client.is_closed());
        assert!(client.is_connected());
    }

    #[test]
    fn missing_pong_times_out() {
        let now = Instant::now();
        let timeouts = SessionTimeouts { status_timeout: Duration::from_secs(60), ..Default::default() };
        let client_config = Arc::new(NetworkConfig::builder(rng_secret_key()).timeouts(timeouts).build());
        let (mut client, _server) = connected_pair(client_config, config(), now);
        events(&mut client);

        client.poll_timers(now + Duration::from_secs(15));
        // the ping is never delivered
        assert!(client.take_outgoing().is_some());

        client.poll_timers(now + Duration::from_secs(24));
        assert!(!client.is_closed());
        client.poll_timers(now + Duration::from_secs(25));
        assert!(client.is_closed());
        assert_eq!(client.disconnect_reason(), Some(DisconnectReason::Timeout));
        assert!(matches!(
            &events(&mut client)[..],
            [PeerEvent::Error(PeerError::P2P(P2PStreamError::PingTimeout))]
        ));
    }

    #[test]
    fn remote_disconnect_closes_immediately() {
        let now = Instant::now();
        let (mut client, mut server) = connected_pair(config(), config(), now);

        client.disconnect(DisconnectReason::ClientQuitting, now);
        assert!(!client.send_message(16, &[0xc0]));
        exchange(&mut client, &mut server, now);

        assert_eq!(server.disconnect_reason(), Some(DisconnectReason::ClientQuitting));
        assert!(server.should_close_transport(now));

        server.on_transport_closed();
        client.on_transport_closed();
        assert!(events(&mut server).iter().any(|event| matches!(
            event,
            PeerEvent::Closed { reason: Some(DisconnectReason::ClientQuitting), we_initiated: false }
        )));
        assert!(events(&mut client).iter().any(|event| matches!(
            event,
            PeerEvent::Closed { reason: Some(DisconnectReason::ClientQuitting), we_initiated: true }
        )));
    }

    #[test]
    fn unowned_message_is_a_protocol_breach() {
        let now = Instant::now();
        let (mut client, mut server) = connected_pair(config(), config(), now);

        assert!(client.send_message(16 + 17, &[0xc0]));
        exchange(&mut client, &mut server, now);
        assert_eq!(server.disconnect_reason(), Some(DisconnectReason::ProtocolBreach));
        assert_eq!(client.disconnect_reason(), Some(DisconnectReason::ProtocolBreach));
    }

    #[test]
    fn unassigned_eth_message_keeps_session() {
        let now = Instant::now();
        let (mut client, mut server) = connected_pair(config(), config(), now);
        events(&mut server);

        assert!(client.send_message(16 + 0x0c, &[0xc0]));
        exchange(&mut client, &mut server, now);
        assert!(server.is_connected());
        assert_eq!(server.disconnect_reason(), None);
        assert!(events(&mut server).is_empty());
    }

    #[test]
    fn bad_eth_payload_is_subprotocol_error() {
        let now = Instant::now();
        let (mut client, mut server) = connected_pair(config(), config(), now);

        // status that is not a list
        assert!(client.send_message(16, &[0x80]));
        exchange(&mut client, &mut server, now);
        assert_eq!(server.disconnect_reason(), Some(DisconnectReason::SubprotocolSpecific));
        assert!(events(&mut server).iter().any(|event| matches!(event, PeerEvent::Error(PeerError::Eth(_)))));
    }

    #[test]
    fn hello_with_wrong_identity() {
        let now = Instant::now();
        let base = NetworkConfig::new(rng_secret_key());
        let server_id = base.local_id();
        // the hello names a node other than the one whose key answered the handshake
        let imposter = pk2id(&rng_secret_key().public_key(SECP256K1));
        let spoofed = Arc::new(NetworkConfig {
            hello_message: HelloMessageWithProtocols::builder(imposter).build(),
            ..base
        });

        let mut client = Peer::outgoing(config(), NodeRecord::new(addr(), server_id), now).unwrap();
        let mut server = Peer::incoming(spoofed, addr(), now);
        exchange(&mut client, &mut server, now);

        assert!(!client.is_connected());
        assert_eq!(client.disconnect_reason(), Some(DisconnectReason::InvalidIdentity));
        assert!(server.is_closed());
    }

    #[test]
    fn inbound_hello_must_match_auth_key() {
        let now = Instant::now();
        let base = NetworkConfig::new(rng_secret_key());
        let imposter = pk2id(&rng_secret_key().public_key(SECP256K1));
        let spoofed = Arc::new(NetworkConfig {
            hello_message: HelloMessageWithProtocols::builder(imposter).build(),
            ..base
        });
        let server_config = config();

        let mut client = Peer::outgoing(spoofed, record(&server_config), now).unwrap();
        let mut server = Peer::incoming(server_config, addr(), now);
        exchange(&mut client, &mut server, now);

        assert!(!server.is_connected());
        assert_eq!(server.disconnect_reason(), Some(DisconnectReason::InvalidIdentity));
        assert!(events(&mut server).iter().any(|event| matches!(
            event,
            PeerEvent::Error(PeerError::P2P(P2PStreamError::HandshakeError(
                P2PHandshakeError::UnexpectedIdentity { .. }
            )))
        )));
    }

    #[test]
    fn newer_p2p_version_connects() {
        let now = Instant::now();
        let base = NetworkConfig::new(rng_secret_key());
        let v6 = Arc::new(NetworkConfig {
            hello_message: HelloMessageWithProtocols::builder(base.local_id())
                .protocol_version(ProtocolVersion(6))
                .build(),
            ..base
        });
        let (mut client, mut server) = connected_pair(config(), v6, now);
        assert!(client.is_connected());
        assert!(server.is_connected());
        assert!(client.compression);
        assert!(server.compression);

        let status = alloy_rlp::encode(&RlpItem::list([RlpItem::from(68u64), RlpItem::from(1u64)]));
        assert!(client.send_message(16, &status));
        exchange(&mut client, &mut server, now);
        assert!(client.is_connected());
        assert!(server.is_connected());
    }
}
