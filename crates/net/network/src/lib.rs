//! RLPx networking of the relay node.
//!
//! ## Overview
//!
//! The [`RlpxListener`] accepts connections and dials other nodes. Each connection is run by a
//! session task that owns a [`Peer`], the sans-IO state machine of one connection:
//!
//!  - the ECIES handshake and frame codec of `relay-ecies`,
//!  - the `p2p` hello exchange and capability negotiation,
//!  - keepalive pings, timeouts and the disconnect grace period,
//!  - dispatch of capability messages to the negotiated sub-protocols.
//!
//! Established sessions surface as [`ListenerEvent::PeerConnected`] with a [`PeerHandle`] that
//! sends messages to the peer, for example [`PeerHandle::send_new_block`].
//!
//! ## Usage
//!
//! ```no_run
//! use relay_network::{config::rng_secret_key, NetworkConfig, RlpxListener};
//!
//! async fn launch() -> eyre::Result<()> {
//!     let config = NetworkConfig::builder(rng_secret_key()).build();
//!     let mut listener = RlpxListener::bind(config).await?;
//!     println!("{}", listener.enode());
//!     let _events = listener.events();
//!     Ok(())
//! }
//! ```

#![doc(issue_tracker_base_url = "https://github.com/blxr-relay/relay/issues/")]
#![cfg_attr(not(test), warn(unused_crate_dependencies))]

pub mod config;
pub mod error;
mod listener;
pub mod node_record;
mod peer;
mod pinger;
mod protocol;
mod session;

pub use config::{NetworkConfig, NetworkConfigBuilder, SessionTimeouts};
pub use error::{NetworkError, PeerError};
pub use listener::{ListenerEvent, RlpxListener};
pub use node_record::NodeRecord;
pub use peer::{Direction, Peer, PeerEvent};
pub use protocol::{CapabilitySender, PeerCommand, PeerMessage};
pub use session::PeerHandle;

pub use relay_ecies::PeerId;
