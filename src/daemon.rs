use std::time::Duration;

use bitcoin::blockdata::block::Block;
use bitcoin::blockdata::transaction::{OutPoint, Transaction};
use bitcoin::hash_types::{BlockHash, Txid};
use serde_json::Value;

use crate::errors::*;

pub const TOPIC_RAW_BLOCK: &str = "rawblock";
pub const TOPIC_RAW_TX: &str = "rawtx";

/// The slice of the full-node RPC surface this crate consumes. The
/// transport behind it (HTTP, unix socket, test double) belongs to the
/// host application.
pub trait DaemonRpc: Send + Sync {
    /// Raw `getnetworkinfo` response. The `version` field encodes the
    /// backend version as 10000*major + 100*minor + patch.
    fn get_network_info(&self) -> Result<Value>;

    fn get_raw_mempool(&self) -> Result<Vec<Txid>>;

    fn get_raw_transaction(&self, txid: &Txid) -> Result<Transaction>;

    fn get_best_block_hash(&self) -> Result<BlockHash>;

    fn get_block_hash(&self, height: u64) -> Result<BlockHash>;

    /// The verbose `getblockheader` form, reduced to the fields a chain
    /// walk needs.
    fn get_block_header_info(&self, hash: &BlockHash) -> Result<BlockHeaderInfo>;

    fn get_block(&self, hash: &BlockHash) -> Result<Block>;

    /// Mempool spend lookup, served by backends 24.0.0 and newer. Callers
    /// gate on `chain::has_spending_prevout_rpc`.
    fn get_tx_spending_prevout(&self, outpoints: &[OutPoint]) -> Result<Vec<SpendingPrevout>>;
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BlockHeaderInfo {
    pub hash: BlockHash,
    pub height: u64,
    /// None only at the genesis block.
    pub prev: Option<BlockHash>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SpendingPrevout {
    pub outpoint: OutPoint,
    pub spending_txid: Option<Txid>,
}

/// One message from a notification endpoint: the topic, the canonical
/// encoding of the announced entity, and the monotonic sequence number the
/// backend attaches per topic.
#[derive(Clone, Debug)]
pub struct RawNotification {
    pub topic: String,
    pub payload: Vec<u8>,
    pub sequence: u32,
}

/// Factory for notification subscriptions. Socket management is the
/// host's concern; the event source only drains messages.
pub trait Subscriber: Send {
    fn subscribe(&self, endpoint: &str, topic: &str) -> Result<Box<dyn Subscription>>;
}

/// A single-topic subscription.
pub trait Subscription: Send {
    /// Block up to `timeout` for the next message. Ok(None) means a quiet
    /// interval, not end of stream.
    fn poll(&mut self, timeout: Duration) -> Result<Option<RawNotification>>;
}
