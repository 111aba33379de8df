//! Block payloads received from the upstream block feed and relayed to peers as `NewBlock`.

use crate::RlpItem;
use alloy_primitives::hex;
use alloy_rlp::RlpEncodable;
use bytes::Bytes;
use serde::{de, Deserialize, Deserializer};

/// Decodes the feed's hex quantities: `0x` prefixed, odd lengths are left-padded with a zero
/// nibble and `0x0` means the empty byte string.
fn feed_hex<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Bytes, D::Error> {
    let s = String::deserialize(deserializer)?;
    parse_feed_hex(&s).map_err(de::Error::custom)
}

fn parse_feed_hex(s: &str) -> Result<Bytes, hex::FromHexError> {
    let digits = s.strip_prefix("0x").unwrap_or(s);
    if digits.is_empty() || digits == "0" {
        return Ok(Bytes::new())
    }
    let decoded = if digits.len() % 2 == 1 {
        hex::decode(format!("0{digits}"))?
    } else {
        hex::decode(digits)?
    };
    Ok(decoded.into())
}

/// A block header in the positional layout of the `eth` wire protocol.
///
/// All fields are raw byte strings as delivered by the feed except `base_fee_per_gas`, which the
/// feed sends as a JSON number and is encoded as a minimal big-endian integer.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, RlpEncodable)]
#[serde(rename_all = "camelCase")]
pub struct FeedHeader {
    /// Hash of the parent block.
    #[serde(deserialize_with = "feed_hex")]
    pub parent_hash: Bytes,
    /// Hash of the uncles list.
    #[serde(deserialize_with = "feed_hex")]
    pub sha3_uncles: Bytes,
    /// Beneficiary address.
    #[serde(deserialize_with = "feed_hex")]
    pub miner: Bytes,
    /// State trie root.
    #[serde(deserialize_with = "feed_hex")]
    pub state_root: Bytes,
    /// Transactions trie root.
    #[serde(deserialize_with = "feed_hex")]
    pub transactions_root: Bytes,
    /// Receipts trie root.
    #[serde(deserialize_with = "feed_hex")]
    pub receipts_root: Bytes,
    /// Bloom filter of the logs.
    #[serde(deserialize_with = "feed_hex")]
    pub logs_bloom: Bytes,
    /// Block difficulty.
    #[serde(deserialize_with = "feed_hex")]
    pub difficulty: Bytes,
    /// Block number.
    #[serde(deserialize_with = "feed_hex")]
    pub number: Bytes,
    /// Gas limit.
    #[serde(deserialize_with = "feed_hex")]
    pub gas_limit: Bytes,
    /// Gas used.
    #[serde(deserialize_with = "feed_hex")]
    pub gas_used: Bytes,
    /// Block timestamp.
    #[serde(deserialize_with = "feed_hex")]
    pub timestamp: Bytes,
    /// Extra data.
    #[serde(deserialize_with = "feed_hex")]
    pub extra_data: Bytes,
    /// Mix hash.
    #[serde(deserialize_with = "feed_hex")]
    pub mix_hash: Bytes,
    /// Block nonce.
    #[serde(deserialize_with = "feed_hex")]
    pub nonce: Bytes,
    /// EIP-1559 base fee, zero encodes as the empty string.
    pub base_fee_per_gas: u64,
    /// Withdrawals trie root.
    #[serde(deserialize_with = "feed_hex")]
    pub withdrawals_root: Bytes,
    /// Blob gas used.
    #[serde(deserialize_with = "feed_hex")]
    pub blob_gas_used: Bytes,
    /// Excess blob gas.
    #[serde(deserialize_with = "feed_hex")]
    pub excess_blob_gas: Bytes,
}

impl FeedHeader {
    /// Whether the block spends blob gas. Such blocks need sidecars this node does not carry.
    pub fn has_blob_gas(&self) -> bool {
        !self.blob_gas_used.is_empty()
    }
}

/// A block from the feed, ready to be announced.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct FeedBlock {
    /// The block header.
    pub header: FeedHeader,
    /// Transactions in their wire form: a list for legacy transactions, the typed envelope as a
    /// byte string otherwise.
    pub transactions: Vec<RlpItem>,
}

impl FeedBlock {
    /// Creates a block from a header and its already encoded transactions.
    pub const fn new(header: FeedHeader, transactions: Vec<RlpItem>) -> Self {
        Self { header, transactions }
    }

    /// The `NewBlock` message payload: `[[header, txs, uncles, withdrawals], td, []]`.
    ///
    /// Uncles and withdrawals are always empty and the total difficulty is zero.
    pub fn encode_new_block(&self) -> Vec<u8> {
        alloy_rlp::encode(NewBlock {
            block: Block {
                header: &self.header,
                transactions: &self.transactions,
                uncles: &Vec::new(),
                withdrawals: &Vec::new(),
            },
            td: 0,
            trailing: &Vec::new(),
        })
    }
}

#[derive(RlpEncodable)]
struct Block<'a> {
    header: &'a FeedHeader,
    transactions: &'a Vec<RlpItem>,
    uncles: &'a Vec<RlpItem>,
    withdrawals: &'a Vec<RlpItem>,
}

#[derive(RlpEncodable)]
struct NewBlock<'a> {
    block: Block<'a>,
    td: u64,
    trailing: &'a Vec<RlpItem>,
}
