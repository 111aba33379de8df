//! Sub-protocols served over a session once capabilities are negotiated.

use bytes::Bytes;
use relay_eth_wire::{
    errors::{EthStreamError, P2PStreamError},
    eth::EthMessageID,
    Capability, DisconnectReason, ProtocolKind, RlpItem, SharedCapability,
};
use tokio::{sync::mpsc, time::Instant};
use tracing::{debug, trace};

use crate::config::SessionTimeouts;

/// Lowest `eth` version that expects the `UpgradeStatus` extension after the status exchange.
const UPGRADE_STATUS_MIN_VERSION: u64 = 67;

/// Commands the application sends to a running session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PeerCommand {
    /// Send a message. The id is absolute, the payload is uncompressed RLP.
    Message {
        /// Absolute message id.
        id: u8,
        /// RLP payload without the message id.
        payload: Bytes,
    },
    /// Disconnect with the given reason.
    Disconnect(DisconnectReason),
}

/// A message a sub-protocol hands to the application.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PeerMessage {
    /// The remote `eth` status. It has already been echoed back.
    EthStatus(RlpItem),
    /// Any other `eth` message this node does not answer itself.
    Eth {
        /// Message id relative to the `eth` offset.
        id: EthMessageID,
        /// Decompressed RLP payload.
        payload: Bytes,
    },
    /// A message of a [`ProtocolKind::Raw`] capability.
    Capability {
        /// The capability the message belongs to.
        capability: Capability,
        /// Message id relative to the capability offset.
        id: u8,
        /// Decompressed RLP payload.
        payload: Bytes,
    },
}

/// Sends messages of one negotiated capability to a session.
///
/// Message ids are relative to the capability and must be below its message count.
#[derive(Debug, Clone)]
pub struct CapabilitySender {
    capability: SharedCapability,
    commands: mpsc::UnboundedSender<PeerCommand>,
}

impl CapabilitySender {
    pub(crate) const fn new(
        capability: SharedCapability,
        commands: mpsc::UnboundedSender<PeerCommand>,
    ) -> Self {
        Self { capability, commands }
    }

    /// The capability this sender is scoped to.
    pub const fn capability(&self) -> &SharedCapability {
        &self.capability
    }

    /// Queues a message. Returns `Ok(false)` if the session is gone.
    pub fn send(&self, id: u8, payload: Bytes) -> Result<bool, P2PStreamError> {
        let id = absolute_id(&self.capability, id)?;
        Ok(self.commands.send(PeerCommand::Message { id, payload }).is_ok())
    }

    /// Asks the session to disconnect. Returns `false` if the session is gone.
    pub fn disconnect(&self, reason: DisconnectReason) -> bool {
        self.commands.send(PeerCommand::Disconnect(reason)).is_ok()
    }
}

/// Maps an id relative to `capability` to the absolute id on the wire.
pub(crate) fn absolute_id(capability: &SharedCapability, id: u8) -> Result<u8, P2PStreamError> {
    if id >= capability.messages() {
        return Err(P2PStreamError::MessageIdOutOfRange {
            cap: capability.protocol.cap.clone(),
            id,
            messages: capability.messages(),
        })
    }
    Ok(capability.offset + id)
}

/// Result of handling one sub-protocol message.
#[derive(Debug, Default)]
pub(crate) struct ProtocolOutput {
    /// Replies as `(relative id, payload)`.
    pub(crate) replies: Vec<(u8, Bytes)>,
    /// Message for the application.
    pub(crate) message: Option<PeerMessage>,
}

/// The closed set of sub-protocol implementations.
#[derive(Debug)]
pub(crate) enum SubProtocol {
    Eth(EthProtocol),
    Raw(RawProtocol),
}

impl SubProtocol {
    /// Instantiates the implementation selected by the capability's [`ProtocolKind`].
    pub(crate) fn new(capability: SharedCapability, now: Instant, timeouts: &SessionTimeouts) -> Self {
        match capability.protocol.kind {
            ProtocolKind::Eth => Self::Eth(EthProtocol::new(capability, now + timeouts.status_timeout)),
            ProtocolKind::Raw => Self::Raw(RawProtocol { capability }),
        }
    }

    pub(crate) const fn capability(&self) -> &SharedCapability {
        match self {
            Self::Eth(eth) => &eth.capability,
            Self::Raw(raw) => &raw.capability,
        }
    }

    /// Handles a decompressed message with an id relative to the capability offset.
    pub(crate) fn on_message(
        &mut self,
        id: u8,
        payload: &[u8],
    ) -> Result<ProtocolOutput, EthStreamError> {
        match self {
            Self::Eth(eth) => eth.on_message(id, payload),
            Self::Raw(raw) => Ok(raw.on_message(id, payload)),
        }
    }

    pub(crate) fn poll_timers(&mut self, now: Instant) -> Result<(), EthStreamError> {
        match self {
            Self::Eth(eth) => eth.poll_timers(now),
            Self::Raw(_) => Ok(()),
        }
    }

    pub(crate) const fn next_deadline(&self) -> Option<Instant> {
        match self {
            Self::Eth(eth) => eth.status_deadline,
            Self::Raw(_) => None,
        }
    }
}

/// The `eth` side of a relay session.
///
/// Echoes the first remote status, answers header and body requests with empty results and hands
/// everything else to the application.
#[derive(Debug)]
pub(crate) struct EthProtocol {
    capability: SharedCapability,
    /// Cleared once the remote status arrived.
    status_deadline: Option<Instant>,
    status_received: bool,
}

impl EthProtocol {
    const fn new(capability: SharedCapability, status_deadline: Instant) -> Self {
        Self { capability, status_deadline: Some(status_deadline), status_received: false }
    }

    fn on_message(&mut self, id: u8, payload: &[u8]) -> Result<ProtocolOutput, EthStreamError> {
        let mut output = ProtocolOutput::default();
        let Ok(message_id) = EthMessageID::try_from(id) else {
            // in range of the capability but not assigned by eth/68
            debug!(target: "net::eth", id, len = payload.len(), "dropping unknown eth message");
            return Ok(output)
        };
        match message_id {
            EthMessageID::Status => {
                let status: RlpItem = alloy_rlp::decode_exact(payload)?;
                let version = status
                    .get(0)
                    .ok_or(EthStreamError::MalformedMessage("Status"))?
                    .as_u64()?;
                debug!(target: "net::eth", version, "received status");

                // only the first status is answered, an echoed status must not be echoed again
                if !self.status_received {
                    self.status_received = true;
                    self.status_deadline = None;
                    output
                        .replies
                        .push((EthMessageID::Status.into(), Bytes::copy_from_slice(payload)));
                    if version >= UPGRADE_STATUS_MIN_VERSION {
                        output.replies.push((EthMessageID::UpgradeStatus.into(), upgrade_status()));
                    }
                }
                output.message = Some(PeerMessage::EthStatus(status));
            }
            _ if message_id.is_data_request() => {
                let request: RlpItem = alloy_rlp::decode_exact(payload)?;
                let request_id = request
                    .get(0)
                    .cloned()
                    .ok_or(EthStreamError::MalformedMessage("block data request"))?;
                trace!(target: "net::eth", %message_id, "answering with empty response");

                let response = RlpItem::list([request_id, RlpItem::empty_list()]);
                output.replies.push((id + 1, alloy_rlp::encode(&response).into()));
            }
            _ => {
                trace!(target: "net::eth", %message_id, len = payload.len(), "received eth message");
                output.message =
                    Some(PeerMessage::Eth { id: message_id, payload: Bytes::copy_from_slice(payload) });
            }
        }
        Ok(output)
    }

    fn poll_timers(&mut self, now: Instant) -> Result<(), EthStreamError> {
        match self.status_deadline {
            Some(deadline) if now >= deadline => {
                self.status_deadline = None;
                Err(EthStreamError::StatusTimeout)
            }
            _ => Ok(()),
        }
    }
}

/// `UpgradeStatus` payload `[[1]]`: the node does not want transaction broadcasts.
fn upgrade_status() -> Bytes {
    let extension = RlpItem::list([RlpItem::list([RlpItem::from(1u64)])]);
    alloy_rlp::encode(&extension).into()
}

/// Forwards every message to the application untouched.
#[derive(Debug)]
pub(crate) struct RawProtocol {
    capability: SharedCapability,
}

impl RawProtocol {
    fn on_message(&self, id: u8, payload: &[u8]) -> ProtocolOutput {
        ProtocolOutput {
            replies: Vec::new(),
            message: Some(PeerMessage::Capability {
                capability: self.capability.protocol.cap.clone(),
                id,
                payload: Bytes::copy_from_slice(payload),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use relay_eth_wire::{capability::shared_capabilities, Protocol};
    use std::time::Duration;

    fn eth_capability() -> SharedCapability {
        shared_capabilities(&[Protocol::eth_68()], &[Capability::eth_68()]).remove(0)
    }

    fn status(version: u64) -> Vec<u8> {
        alloy_rlp::encode(&RlpItem::list([
            RlpItem::from(version),
            RlpItem::from(56u64),
            RlpItem::from(1u64),
        ]))
    }

    fn eth(now: Instant) -> SubProtocol {
        SubProtocol::new(eth_capability(), now, &SessionTimeouts::default())
    }

    #[test]
    fn first_status_is_echoed_with_upgrade() {
        let now = Instant::now();
        let mut eth = eth(now);
        assert_eq!(eth.next_deadline(), Some(now + Duration::from_secs(5)));

        let payload = status(68);
        let output = eth.on_message(0, &payload).unwrap();
        assert_eq!(output.replies.len(), 2);
        assert_eq!(output.replies[0], (0, Bytes::from(payload)));
        assert_eq!(output.replies[1], (0x0b, Bytes::from_static(&[0xc2, 0xc1, 0x01])));
        assert!(matches!(output.message, Some(PeerMessage::EthStatus(_))));
        assert_eq!(eth.next_deadline(), None);

        // a later status is reported but not answered
        let output = eth.on_message(0, &status(66)).unwrap();
        assert!(output.replies.is_empty());
        assert!(matches!(output.message, Some(PeerMessage::EthStatus(_))));
    }

    #[test]
    fn status_timeout() {
        let now = Instant::now();
        let mut eth = eth(now);
        assert!(eth.poll_timers(now + Duration::from_secs(4)).is_ok());
        assert!(matches!(
            eth.poll_timers(now + Duration::from_secs(5)),
            Err(EthStreamError::StatusTimeout)
        ));
        assert!(eth.poll_timers(now + Duration::from_secs(10)).is_ok());
    }

    #[test]
    fn block_requests_get_empty_responses() {
        let mut eth = eth(Instant::now());
        let request = alloy_rlp::encode(&RlpItem::list([
            RlpItem::from(7u64),
            RlpItem::list([RlpItem::from(100u64), RlpItem::from(1u64)]),
        ]));

        let output = eth.on_message(EthMessageID::GetBlockHeaders.into(), &request).unwrap();
        assert_eq!(output.replies, vec![(4, Bytes::from_static(&[0xc2, 0x07, 0xc0]))]);
        assert!(output.message.is_none());

        let output = eth.on_message(EthMessageID::GetBlockBodies.into(), &request).unwrap();
        assert_eq!(output.replies[0].0, 6);

        let err = eth.on_message(EthMessageID::GetBlockBodies.into(), &[0xc0]).unwrap_err();
        assert!(matches!(err, EthStreamError::MalformedMessage(_)));
    }

    #[test]
    fn other_eth_messages_reach_the_application() {
        let mut eth = eth(Instant::now());
        let output = eth.on_message(EthMessageID::NewBlockHashes.into(), &[0xc0]).unwrap();
        assert!(output.replies.is_empty());
        assert_eq!(
            output.message,
            Some(PeerMessage::Eth {
                id: EthMessageID::NewBlockHashes,
                payload: Bytes::from_static(&[0xc0])
            })
        );
    }

    #[test]
    fn unassigned_eth_id_is_dropped() {
        let mut eth = eth(Instant::now());
        assert_eq!(eth_capability().messages(), 17);

        let output = eth.on_message(0x0c, &[0xc0]).unwrap();
        assert!(output.replies.is_empty());
        assert!(output.message.is_none());

        // the session keeps serving afterwards
        let output = eth.on_message(0, &status(68)).unwrap();
        assert_eq!(output.replies.len(), 2);
    }

    /// A status that is `levels` lists nested in each other.
    fn nested_status(levels: usize) -> Vec<u8> {
        let mut payload_lengths = vec![0usize];
        for _ in 1..levels {
            let inner = payload_lengths[payload_lengths.len() - 1];
            payload_lengths.push(alloy_rlp::Header { list: true, payload_length: inner }.length() + inner);
        }
        let mut encoded = Vec::new();
        for payload_length in payload_lengths.into_iter().rev() {
            alloy_rlp::Header { list: true, payload_length }.encode(&mut encoded);
        }
        encoded
    }

    #[test]
    fn deeply_nested_status_is_rejected() {
        let mut eth = eth(Instant::now());
        let payload = nested_status(50_000);
        assert!(payload.len() > 200_000);

        let err = eth.on_message(0, &payload).unwrap_err();
        assert!(matches!(err, EthStreamError::Rlp(_)));
        assert!(eth.next_deadline().is_some());

        let err = eth.on_message(EthMessageID::GetBlockHeaders.into(), &payload).unwrap_err();
        assert!(matches!(err, EthStreamError::Rlp(_)));
    }

    #[test]
    fn raw_protocol_forwards() {
        let cap = Capability::new_static("relay", 1);
        let shared = shared_capabilities(&[Protocol::raw(cap.clone(), 3)], &[cap.clone()]).remove(0);
        let mut raw = SubProtocol::new(shared, Instant::now(), &SessionTimeouts::default());
        assert_eq!(raw.next_deadline(), None);

        let output = raw.on_message(2, &[0x80]).unwrap();
        assert_eq!(
            output.message,
            Some(PeerMessage::Capability { capability: cap, id: 2, payload: Bytes::from_static(&[0x80]) })
        );
    }

    #[test]
    fn sender_checks_message_range() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let sender = CapabilitySender::new(eth_capability(), tx);

        assert!(sender.send(7, Bytes::from_static(&[0xc0])).unwrap());
        assert_eq!(
            rx.try_recv().unwrap(),
            PeerCommand::Message { id: 16 + 7, payload: Bytes::from_static(&[0xc0]) }
        );

        let err = sender.send(17, Bytes::new()).unwrap_err();
        assert!(matches!(err, P2PStreamError::MessageIdOutOfRange { id: 17, messages: 17, .. }));
        assert!(rx.try_recv().is_err());

        drop(rx);
        assert!(!sender.disconnect(DisconnectReason::ClientQuitting));
    }
}
