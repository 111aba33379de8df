//! Error types for the `p2p` and `eth` message layers

mod eth;
mod p2p;

pub use eth::*;
pub use p2p::*;
