//! Test doubles for the backend surface.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread;
use std::time::Duration;

use bitcoin::blockdata::block::{Block, BlockHeader};
use bitcoin::blockdata::script::Script;
use bitcoin::blockdata::transaction::{OutPoint, Transaction, TxIn, TxOut};
use bitcoin::blockdata::witness::Witness;
use bitcoin::hash_types::{BlockHash, Txid};
use serde_json::Value;

use crate::daemon::{
    BlockHeaderInfo, DaemonRpc, RawNotification, SpendingPrevout, Subscriber, Subscription,
    TOPIC_RAW_BLOCK, TOPIC_RAW_TX,
};
use crate::errors::*;

#[derive(Default)]
pub struct MockState {
    pub version: i64,
    pub mempool: Vec<Txid>,
    pub transactions: HashMap<Txid, Transaction>,
    pub best_block: Option<BlockHash>,
    pub headers: HashMap<BlockHash, BlockHeaderInfo>,
    pub blocks: HashMap<BlockHash, Block>,
    pub by_height: HashMap<u64, BlockHash>,
    pub spending: HashMap<OutPoint, Txid>,
    /// Forces every call to fail, as if the backend went away.
    pub unreachable: bool,
}

impl MockState {
    /// Register a block with the given height and make it the best block.
    pub fn extend_chain(&mut self, block: &Block, height: u64) {
        let hash = block.block_hash();
        let prev = if height == 0 {
            None
        } else {
            Some(block.header.prev_blockhash)
        };
        self.headers.insert(
            hash,
            BlockHeaderInfo {
                hash,
                height,
                prev,
            },
        );
        self.blocks.insert(hash, block.clone());
        self.by_height.insert(height, hash);
        self.best_block = Some(hash);
    }

    pub fn add_mempool_tx(&mut self, tx: &Transaction) {
        self.mempool.push(tx.txid());
        self.transactions.insert(tx.txid(), tx.clone());
    }
}

/// Scripted in-memory backend.
pub struct MockRpc {
    pub state: Mutex<MockState>,
}

impl MockRpc {
    pub fn new(version: i64) -> MockRpc {
        let state = MockState {
            version,
            ..MockState::default()
        };
        MockRpc {
            state: Mutex::new(state),
        }
    }

    fn guard(&self) -> Result<MutexGuard<MockState>> {
        let state = self.state.lock().unwrap();
        if state.unreachable {
            bail!(ErrorKind::Connection("backend unreachable".to_string()));
        }
        Ok(state)
    }
}

impl DaemonRpc for MockRpc {
    fn get_network_info(&self) -> Result<Value> {
        let state = self.guard()?;
        Ok(json!({ "version": state.version, "subversion": "/MockDaemon:0.1.0/" }))
    }

    fn get_raw_mempool(&self) -> Result<Vec<Txid>> {
        Ok(self.guard()?.mempool.clone())
    }

    fn get_raw_transaction(&self, txid: &Txid) -> Result<Transaction> {
        self.guard()?
            .transactions
            .get(txid)
            .cloned()
            .chain_err(|| format!("no such transaction {}", txid))
    }

    fn get_best_block_hash(&self) -> Result<BlockHash> {
        self.guard()?.best_block.chain_err(|| "no best block")
    }

    fn get_block_hash(&self, height: u64) -> Result<BlockHash> {
        self.guard()?
            .by_height
            .get(&height)
            .copied()
            .chain_err(|| format!("no block at height {}", height))
    }

    fn get_block_header_info(&self, hash: &BlockHash) -> Result<BlockHeaderInfo> {
        self.guard()?
            .headers
            .get(hash)
            .cloned()
            .chain_err(|| format!("no header {}", hash))
    }

    fn get_block(&self, hash: &BlockHash) -> Result<Block> {
        self.guard()?
            .blocks
            .get(hash)
            .cloned()
            .chain_err(|| format!("no block {}", hash))
    }

    fn get_tx_spending_prevout(&self, outpoints: &[OutPoint]) -> Result<Vec<SpendingPrevout>> {
        let state = self.guard()?;
        Ok(outpoints
            .iter()
            .map(|outpoint| SpendingPrevout {
                outpoint: *outpoint,
                spending_txid: state.spending.get(outpoint).copied(),
            })
            .collect())
    }
}

pub enum FeedItem {
    Message(RawNotification),
    Error(String),
}

pub type Feed = Arc<Mutex<VecDeque<FeedItem>>>;

pub fn push_message(feed: &Feed, topic: &str, payload: Vec<u8>, sequence: u32) {
    feed.lock().unwrap().push_back(FeedItem::Message(RawNotification {
        topic: topic.to_owned(),
        payload,
        sequence,
    }));
}

pub fn push_error(feed: &Feed, message: &str) {
    feed.lock()
        .unwrap()
        .push_back(FeedItem::Error(message.to_owned()));
}

/// Subscriber whose per-topic feeds stay scriptable after subscription.
pub struct MockSubscriber {
    feeds: HashMap<String, Feed>,
}

impl MockSubscriber {
    pub fn new() -> (MockSubscriber, Feed, Feed) {
        let block_feed: Feed = Arc::new(Mutex::new(VecDeque::new()));
        let tx_feed: Feed = Arc::new(Mutex::new(VecDeque::new()));
        let mut feeds = HashMap::new();
        feeds.insert(TOPIC_RAW_BLOCK.to_owned(), Arc::clone(&block_feed));
        feeds.insert(TOPIC_RAW_TX.to_owned(), Arc::clone(&tx_feed));
        (MockSubscriber { feeds }, block_feed, tx_feed)
    }
}

impl Subscriber for MockSubscriber {
    fn subscribe(&self, _endpoint: &str, topic: &str) -> Result<Box<dyn Subscription>> {
        let feed = self
            .feeds
            .get(topic)
            .cloned()
            .chain_err(|| format!("unexpected topic {}", topic))?;
        Ok(Box::new(MockSubscription { feed }))
    }
}

struct MockSubscription {
    feed: Feed,
}

impl Subscription for MockSubscription {
    fn poll(&mut self, timeout: Duration) -> Result<Option<RawNotification>> {
        let item = self.feed.lock().unwrap().pop_front();
        match item {
            Some(FeedItem::Message(msg)) => Ok(Some(msg)),
            Some(FeedItem::Error(msg)) => Err(ErrorKind::Connection(msg).into()),
            None => {
                thread::sleep(timeout.min(Duration::from_millis(5)));
                Ok(None)
            }
        }
    }
}

pub fn dummy_outpoint(vout: u32) -> OutPoint {
    OutPoint::new(Txid::default(), vout)
}

/// A minimal transaction spending exactly `outpoints`. Distinct `variant`
/// values give distinct txids for otherwise identical spends.
pub fn spending_tx(outpoints: &[OutPoint], variant: u64) -> Transaction {
    Transaction {
        version: 1,
        lock_time: 0,
        input: outpoints
            .iter()
            .map(|outpoint| TxIn {
                previous_output: *outpoint,
                script_sig: Script::new(),
                sequence: 0xffff_ffff,
                witness: Witness::default(),
            })
            .collect(),
        output: vec![TxOut {
            value: 50_000 + variant,
            script_pubkey: Script::new(),
        }],
    }
}

pub fn block_with(prev: BlockHash, txdata: Vec<Transaction>, nonce: u32) -> Block {
    Block {
        header: BlockHeader {
            version: 1,
            prev_blockhash: prev,
            merkle_root: Default::default(),
            time: 1_700_000_000,
            bits: 0x1d00_ffff,
            nonce,
        },
        txdata,
    }
}
