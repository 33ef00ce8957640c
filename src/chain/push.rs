use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use bitcoin::blockdata::block::Block;
use bitcoin::blockdata::transaction::{OutPoint, Transaction};
use bitcoin::consensus::encode::deserialize;
use bitcoin::hash_types::Txid;
use crossbeam_channel::{bounded, Receiver, Sender};

use crate::chain::mempool::MempoolIndex;
use crate::chain::{forward, stop_workers, ChainEvents, EventStats, PushConfig};
use crate::daemon::{DaemonRpc, Subscriber, Subscription, TOPIC_RAW_BLOCK, TOPIC_RAW_TX};
use crate::def::{BLOCK_STREAM_CAPACITY, POLL_QUANTUM, RETRY_BACKOFF_BASE, TX_STREAM_CAPACITY};
use crate::errors::*;
use crate::metrics::Metrics;
use crate::signal::Waiter;
use crate::util::{spawn_worker, WorkerHandle};

/// Event source fed by the backend's notification endpoints.
///
/// One worker per subscription decodes payloads and forwards them on the
/// bounded streams. When the backend is too old to answer spend lookups
/// over RPC, the transaction worker additionally mirrors the mempool into
/// a local spend index which the block worker prunes as spends confirm.
pub struct PushEvents {
    shared: Arc<Shared>,
    config: PushConfig,
    subscriber: Mutex<Option<Box<dyn Subscriber>>>,
    outputs: Mutex<Option<(Sender<Block>, Sender<Transaction>)>>,
    block_rx: Receiver<Block>,
    tx_rx: Receiver<Transaction>,
    workers: Mutex<Vec<WorkerHandle>>,
    started: AtomicBool,
    stopped: AtomicBool,
}

struct Shared {
    client: Arc<dyn DaemonRpc>,
    mempool: RwLock<MempoolIndex>,
    has_prevout_rpc: bool,
    exit: Waiter,
    stats: EventStats,
    retry_ceiling: Duration,
}

impl PushEvents {
    pub fn new(
        config: PushConfig,
        client: Arc<dyn DaemonRpc>,
        subscriber: Box<dyn Subscriber>,
        has_prevout_rpc: bool,
        metrics: &Metrics,
    ) -> PushEvents {
        let (block_tx, block_rx) = bounded(BLOCK_STREAM_CAPACITY);
        let (tx_tx, tx_rx) = bounded(TX_STREAM_CAPACITY);
        let shared = Arc::new(Shared {
            client,
            mempool: RwLock::new(MempoolIndex::new()),
            has_prevout_rpc,
            exit: Waiter::new(),
            stats: EventStats::new(metrics),
            retry_ceiling: config.retry_ceiling,
        });
        PushEvents {
            shared,
            config,
            subscriber: Mutex::new(Some(subscriber)),
            outputs: Mutex::new(Some((block_tx, tx_tx))),
            block_rx,
            tx_rx,
            workers: Mutex::new(Vec::new()),
            started: AtomicBool::new(false),
            stopped: AtomicBool::new(false),
        }
    }
}

impl ChainEvents for PushEvents {
    fn tx_notifications(&self) -> Receiver<Transaction> {
        self.tx_rx.clone()
    }

    fn block_notifications(&self) -> Receiver<Block> {
        self.block_rx.clone()
    }

    fn lookup_input_spend(&self, outpoint: OutPoint) -> Option<Txid> {
        if self.stopped.load(Ordering::SeqCst) {
            return None;
        }
        if self.shared.has_prevout_rpc {
            return lookup_via_rpc(&self.shared, outpoint);
        }
        self.shared.mempool.read().unwrap().lookup(&outpoint)
    }

    fn start(&self) -> Result<()> {
        if self.started.swap(true, Ordering::SeqCst) {
            return Err(config_error("push event source already started"));
        }
        let subscriber = self
            .subscriber
            .lock()
            .unwrap()
            .take()
            .ok_or_else(|| config_error("push event source has no subscriber"))?;
        let block_sub = subscriber.subscribe(&self.config.block_endpoint, TOPIC_RAW_BLOCK)?;
        let tx_sub = subscriber.subscribe(&self.config.tx_endpoint, TOPIC_RAW_TX)?;
        let (block_out, tx_out) = self
            .outputs
            .lock()
            .unwrap()
            .take()
            .ok_or_else(|| config_error("push event source streams already taken"))?;

        let mut workers = self.workers.lock().unwrap();
        let shared = Arc::clone(&self.shared);
        workers.push(spawn_worker("blocksub", move || {
            block_loop(shared, block_sub, block_out)
        }));
        let shared = Arc::clone(&self.shared);
        workers.push(spawn_worker("txsub", move || {
            tx_loop(shared, tx_sub, tx_out)
        }));
        info!(
            "push chain events started (native spend lookup: {})",
            self.shared.has_prevout_rpc
        );
        Ok(())
    }

    fn stop(&self) -> Result<()> {
        if self.stopped.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        self.shared.exit.signal();
        stop_workers(&self.workers, self.config.stop_grace);
        let mut mempool = self.shared.mempool.write().unwrap();
        mempool.clear();
        self.shared.stats.mempool_entries.set(0);
        trace!("push chain events stopped");
        Ok(())
    }
}

impl Drop for PushEvents {
    fn drop(&mut self) {
        let _ = self.stop();
    }
}

fn lookup_via_rpc(shared: &Shared, outpoint: OutPoint) -> Option<Txid> {
    match shared.client.get_tx_spending_prevout(&[outpoint]) {
        Ok(results) => results
            .into_iter()
            .find(|result| result.outpoint == outpoint)
            .and_then(|result| result.spending_txid),
        Err(e) => {
            warn!("gettxspendingprevout failed: {}", e);
            shared.stats.errors.with_label_values(&["rpc"]).inc();
            None
        }
    }
}

/// Warn about any jump in a subscription's sequence numbering. The backend
/// remains the source of truth: a missed mempool transaction is re-learned
/// when a descendant shows up or when it confirms, so no resync is tried.
fn check_sequence(stats: &EventStats, topic: &str, last: &mut Option<u32>, sequence: u32) {
    if let Some(prev) = *last {
        let expected = prev.wrapping_add(1);
        if sequence != expected {
            warn!(
                "{} notifications jumped from {} to {} (expected {})",
                topic, prev, sequence, expected
            );
            stats.sequence_gaps.with_label_values(&[topic]).inc();
        }
    }
    *last = Some(sequence);
}

/// Pull the next message, absorbing quiet intervals and transport errors.
/// Returns None when the worker should exit instead.
fn next_message(
    shared: &Shared,
    sub: &mut dyn Subscription,
    topic: &str,
    backoff: &mut Duration,
) -> Option<crate::daemon::RawNotification> {
    loop {
        if shared.exit.poll().is_err() {
            return None;
        }
        match sub.poll(POLL_QUANTUM) {
            Ok(Some(msg)) => {
                *backoff = RETRY_BACKOFF_BASE;
                return Some(msg);
            }
            Ok(None) => continue,
            Err(e) => {
                warn!("{} subscription error: {}", topic, e);
                shared.stats.errors.with_label_values(&["rpc"]).inc();
                if shared.exit.wait(*backoff) {
                    return None;
                }
                *backoff = (*backoff * 2).min(shared.retry_ceiling);
            }
        }
    }
}

fn block_loop(shared: Arc<Shared>, mut sub: Box<dyn Subscription>, out: Sender<Block>) {
    let mut last_seq: Option<u32> = None;
    let mut backoff = RETRY_BACKOFF_BASE;
    while let Some(msg) = next_message(&shared, &mut *sub, TOPIC_RAW_BLOCK, &mut backoff) {
        check_sequence(&shared.stats, TOPIC_RAW_BLOCK, &mut last_seq, msg.sequence);
        let block: Block = match deserialize(&msg.payload) {
            Ok(block) => block,
            Err(e) => {
                warn!("skipping undecodable block payload: {}", e);
                shared.stats.errors.with_label_values(&["decode"]).inc();
                continue;
            }
        };
        if !shared.has_prevout_rpc {
            // Confirmed spends leave the index before a consumer can see
            // the block that confirmed them.
            let mut mempool = shared.mempool.write().unwrap();
            for tx in &block.txdata {
                mempool.remove_spends_of(tx);
            }
            shared.stats.mempool_entries.set(mempool.len() as i64);
        }
        shared.stats.blocks.inc();
        if !forward(&out, &shared.exit, block) {
            break;
        }
    }
    trace!("block subscription worker exiting");
}

fn tx_loop(shared: Arc<Shared>, mut sub: Box<dyn Subscription>, out: Sender<Transaction>) {
    let mut last_seq: Option<u32> = None;
    let mut backoff = RETRY_BACKOFF_BASE;
    while let Some(msg) = next_message(&shared, &mut *sub, TOPIC_RAW_TX, &mut backoff) {
        check_sequence(&shared.stats, TOPIC_RAW_TX, &mut last_seq, msg.sequence);
        let tx: Transaction = match deserialize(&msg.payload) {
            Ok(tx) => tx,
            Err(e) => {
                warn!("skipping undecodable transaction payload: {}", e);
                shared.stats.errors.with_label_values(&["decode"]).inc();
                continue;
            }
        };
        if !shared.has_prevout_rpc {
            let mut mempool = shared.mempool.write().unwrap();
            mempool.insert(&tx);
            shared.stats.mempool_entries.set(mempool.len() as i64);
        }
        shared.stats.txs.inc();
        if !forward(&out, &shared.exit, tx) {
            break;
        }
    }
    trace!("transaction subscription worker exiting");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::mocks::{
        block_with, dummy_outpoint, push_error, push_message, spending_tx, Feed, MockRpc,
        MockSubscriber,
    };
    use bitcoin::consensus::encode::serialize;
    use bitcoin::hash_types::BlockHash;

    const RECV_TIMEOUT: Duration = Duration::from_secs(10);

    fn push_events(client: Arc<MockRpc>, has_prevout_rpc: bool) -> (PushEvents, Feed, Feed) {
        let (subscriber, block_feed, tx_feed) = MockSubscriber::new();
        let events = PushEvents::new(
            PushConfig::new("inproc://blocks", "inproc://txs"),
            client,
            Box::new(subscriber),
            has_prevout_rpc,
            &Metrics::dummy(),
        );
        (events, block_feed, tx_feed)
    }

    #[test]
    fn test_lookup_tracks_mempool_then_block() {
        let client = Arc::new(MockRpc::new(230_000));
        let (events, block_feed, tx_feed) = push_events(client, false);
        let txs = events.tx_notifications();
        let blocks = events.block_notifications();
        events.start().unwrap();

        let outpoint = dummy_outpoint(7);
        let tx = spending_tx(&[outpoint], 0);
        push_message(&tx_feed, TOPIC_RAW_TX, serialize(&tx), 1);

        let received = txs.recv_timeout(RECV_TIMEOUT).unwrap();
        assert_eq!(received.txid(), tx.txid());
        assert_eq!(events.lookup_input_spend(outpoint), Some(tx.txid()));

        let block = block_with(BlockHash::default(), vec![tx.clone()], 1);
        push_message(&block_feed, TOPIC_RAW_BLOCK, serialize(&block), 1);
        let received = blocks.recv_timeout(RECV_TIMEOUT).unwrap();
        assert_eq!(received.block_hash(), block.block_hash());
        assert_eq!(events.lookup_input_spend(outpoint), None);

        events.stop().unwrap();
    }

    #[test]
    fn test_undecodable_payload_skipped() {
        let client = Arc::new(MockRpc::new(230_000));
        let (events, _block_feed, tx_feed) = push_events(client, false);
        let txs = events.tx_notifications();
        events.start().unwrap();

        push_message(&tx_feed, TOPIC_RAW_TX, vec![0xde, 0xad, 0xbe, 0xef], 1);
        let tx = spending_tx(&[dummy_outpoint(1)], 0);
        push_message(&tx_feed, TOPIC_RAW_TX, serialize(&tx), 2);

        let received = txs.recv_timeout(RECV_TIMEOUT).unwrap();
        assert_eq!(received.txid(), tx.txid());
        events.stop().unwrap();
    }

    #[test]
    fn test_sequence_gap_does_not_interrupt_stream() {
        let client = Arc::new(MockRpc::new(230_000));
        let (events, _block_feed, tx_feed) = push_events(client, false);
        let txs = events.tx_notifications();
        events.start().unwrap();

        let first = spending_tx(&[dummy_outpoint(1)], 0);
        let second = spending_tx(&[dummy_outpoint(2)], 0);
        push_message(&tx_feed, TOPIC_RAW_TX, serialize(&first), 1);
        push_message(&tx_feed, TOPIC_RAW_TX, serialize(&second), 9);

        assert_eq!(txs.recv_timeout(RECV_TIMEOUT).unwrap().txid(), first.txid());
        assert_eq!(
            txs.recv_timeout(RECV_TIMEOUT).unwrap().txid(),
            second.txid()
        );
        events.stop().unwrap();
    }

    #[test]
    fn test_transport_error_retries() {
        let client = Arc::new(MockRpc::new(230_000));
        let (events, _block_feed, tx_feed) = push_events(client, false);
        let txs = events.tx_notifications();
        events.start().unwrap();

        push_error(&tx_feed, "socket reset");
        let tx = spending_tx(&[dummy_outpoint(1)], 0);
        push_message(&tx_feed, TOPIC_RAW_TX, serialize(&tx), 1);

        let received = txs.recv_timeout(RECV_TIMEOUT).unwrap();
        assert_eq!(received.txid(), tx.txid());
        events.stop().unwrap();
    }

    #[test]
    fn test_native_rpc_lookup_skips_local_index() {
        let client = Arc::new(MockRpc::new(250_000));
        let outpoint = dummy_outpoint(3);
        let spender = spending_tx(&[outpoint], 0);
        client
            .state
            .lock()
            .unwrap()
            .spending
            .insert(outpoint, spender.txid());

        let (events, _block_feed, tx_feed) = push_events(Arc::clone(&client), true);
        let txs = events.tx_notifications();
        events.start().unwrap();

        // Transactions still stream, but the local index stays empty.
        push_message(&tx_feed, TOPIC_RAW_TX, serialize(&spender), 1);
        txs.recv_timeout(RECV_TIMEOUT).unwrap();
        assert!(events.shared.mempool.read().unwrap().is_empty());

        assert_eq!(events.lookup_input_spend(outpoint), Some(spender.txid()));
        assert_eq!(events.lookup_input_spend(dummy_outpoint(4)), None);
        events.stop().unwrap();
    }

    #[test]
    fn test_stop_is_idempotent_and_clears_lookups() {
        let client = Arc::new(MockRpc::new(230_000));
        let (events, _block_feed, tx_feed) = push_events(client, false);
        let txs = events.tx_notifications();
        events.start().unwrap();

        let outpoint = dummy_outpoint(1);
        let tx = spending_tx(&[outpoint], 0);
        push_message(&tx_feed, TOPIC_RAW_TX, serialize(&tx), 1);
        txs.recv_timeout(RECV_TIMEOUT).unwrap();
        assert!(events.lookup_input_spend(outpoint).is_some());

        events.stop().unwrap();
        assert_eq!(events.lookup_input_spend(outpoint), None);
        events.stop().unwrap();

        // Both streams are closed once the workers are gone.
        assert!(txs.recv_timeout(Duration::from_secs(1)).is_err());
    }

    #[test]
    fn test_start_is_single_shot() {
        let client = Arc::new(MockRpc::new(230_000));
        let (events, _block_feed, _tx_feed) = push_events(client, false);
        events.start().unwrap();
        assert!(events.start().is_err());
        events.stop().unwrap();
    }
}
