use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use bitcoin::blockdata::block::Block;
use bitcoin::blockdata::transaction::{OutPoint, Transaction};
use bitcoin::hash_types::{BlockHash, Txid};
use crossbeam_channel::{bounded, Receiver, Sender};
use prometheus::HistogramOpts;

use crate::chain::mempool::MempoolIndex;
use crate::chain::{forward, stop_workers, ChainEvents, EventStats, PollingConfig};
use crate::daemon::DaemonRpc;
use crate::def::{
    BLOCK_STREAM_CAPACITY, REORG_MEMORY_BLOCKS, RETRY_BACKOFF_BASE, TX_STREAM_CAPACITY,
};
use crate::errors::*;
use crate::metrics::Metrics;
use crate::signal::Waiter;
use crate::util::{spawn_worker, WorkerHandle};

/// Event source that derives notifications by polling the backend.
///
/// Each tick diffs the raw mempool against the local index (newcomers are
/// fetched and streamed, absentees dropped) and compares the best block
/// hash against the last delivered tip, walking any difference back to a
/// common ancestor and forward again in order. The mempool mirror is always
/// maintained in this mode.
pub struct PollingEvents {
    shared: Arc<PollShared>,
    config: PollingConfig,
    outputs: Mutex<Option<(Sender<Block>, Sender<Transaction>)>>,
    block_rx: Receiver<Block>,
    tx_rx: Receiver<Transaction>,
    workers: Mutex<Vec<WorkerHandle>>,
    started: AtomicBool,
    stopped: AtomicBool,
}

struct PollShared {
    client: Arc<dyn DaemonRpc>,
    mempool: RwLock<MempoolIndex>,
    exit: Waiter,
    stats: EventStats,
    tick_duration: prometheus::Histogram,
    state: Mutex<ChainPointer>,
}

/// Writer-side view of where the stream stands on the chain.
struct ChainPointer {
    tip: Option<(BlockHash, u64)>,
    /// Recently delivered block hash per height, for ancestor search.
    recent: HashMap<u64, BlockHash>,
}

impl PollingEvents {
    pub fn new(
        config: PollingConfig,
        client: Arc<dyn DaemonRpc>,
        metrics: &Metrics,
    ) -> PollingEvents {
        let (block_tx, block_rx) = bounded(BLOCK_STREAM_CAPACITY);
        let (tx_tx, tx_rx) = bounded(TX_STREAM_CAPACITY);
        let shared = Arc::new(PollShared {
            client,
            mempool: RwLock::new(MempoolIndex::new()),
            exit: Waiter::new(),
            stats: EventStats::new(metrics),
            tick_duration: metrics.histogram(HistogramOpts::new(
                "ltcwallet_chain_tick_duration_seconds",
                "Duration of chain poll ticks (seconds)",
            )),
            state: Mutex::new(ChainPointer {
                tip: None,
                recent: HashMap::new(),
            }),
        });
        PollingEvents {
            shared,
            config,
            outputs: Mutex::new(Some((block_tx, tx_tx))),
            block_rx,
            tx_rx,
            workers: Mutex::new(Vec::new()),
            started: AtomicBool::new(false),
            stopped: AtomicBool::new(false),
        }
    }
}

impl ChainEvents for PollingEvents {
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
        self.shared.mempool.read().unwrap().lookup(&outpoint)
    }

    fn start(&self) -> Result<()> {
        if self.started.swap(true, Ordering::SeqCst) {
            return Err(config_error("polling event source already started"));
        }
        let (block_out, tx_out) = self
            .outputs
            .lock()
            .unwrap()
            .take()
            .ok_or_else(|| config_error("polling event source streams already taken"))?;
        let shared = Arc::clone(&self.shared);
        let interval = self.config.poll_interval;
        self.workers.lock().unwrap().push(spawn_worker("poller", move || {
            poll_loop(shared, interval, block_out, tx_out)
        }));
        info!("polling chain events started, interval {:?}", interval);
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
        trace!("polling chain events stopped");
        Ok(())
    }
}

impl Drop for PollingEvents {
    fn drop(&mut self) {
        let _ = self.stop();
    }
}

fn poll_loop(
    shared: Arc<PollShared>,
    interval: Duration,
    block_out: Sender<Block>,
    tx_out: Sender<Transaction>,
) {
    let mut failures: u32 = 0;
    loop {
        if shared.exit.poll().is_err() {
            break;
        }
        match shared.tick(&block_out, &tx_out) {
            Ok(()) => failures = 0,
            Err(e) => {
                if let ErrorKind::Interrupted = e.kind() {
                    break;
                }
                failures = failures.saturating_add(1);
                warn!("poll tick abandoned: {}", e);
                shared.stats.errors.with_label_values(&["rpc"]).inc();
            }
        }
        let sleep = if failures == 0 {
            interval
        } else {
            // Exponential backoff, capped at the regular cadence.
            (RETRY_BACKOFF_BASE * 2u32.saturating_pow(failures.saturating_sub(1).min(16)))
                .min(interval)
        };
        if shared.exit.wait(sleep) {
            break;
        }
    }
    trace!("chain poller exiting");
}

impl PollShared {
    fn tick(&self, block_out: &Sender<Block>, tx_out: &Sender<Transaction>) -> Result<()> {
        self.exit.poll()?;
        let timer = self.tick_duration.start_timer();
        let result = self
            .poll_mempool(tx_out)
            .and_then(|_| self.poll_blocks(block_out));
        timer.observe_duration();
        result
    }

    fn poll_mempool(&self, tx_out: &Sender<Transaction>) -> Result<()> {
        let hashes = self.client.get_raw_mempool()?;
        let current: HashSet<Txid> = hashes.iter().copied().collect();

        // Conservative GC: whatever left the mempool since the previous
        // tick has either confirmed or been evicted.
        let gone: Vec<Txid> = {
            let mempool = self.mempool.read().unwrap();
            mempool
                .txids()
                .into_iter()
                .filter(|txid| !current.contains(txid))
                .collect()
        };
        if !gone.is_empty() {
            let mut mempool = self.mempool.write().unwrap();
            for txid in &gone {
                mempool.remove_tx(txid);
            }
            trace!("dropped {} transactions that left the mempool", gone.len());
        }

        for txid in hashes {
            self.exit.poll()?;
            if self.mempool.read().unwrap().contains_tx(&txid) {
                continue;
            }
            let tx = match self.client.get_raw_transaction(&txid) {
                Ok(tx) => tx,
                Err(e) => {
                    // Usually raced out of the mempool between the two
                    // calls; anything else is retried next tick.
                    debug!("getrawtransaction {} failed: {}", txid, e);
                    self.stats.errors.with_label_values(&["rpc"]).inc();
                    continue;
                }
            };
            self.mempool.write().unwrap().insert(&tx);
            self.stats.txs.inc();
            if !forward(tx_out, &self.exit, tx) {
                bail!(ErrorKind::Interrupted);
            }
        }
        self.stats
            .mempool_entries
            .set(self.mempool.read().unwrap().len() as i64);
        Ok(())
    }

    fn poll_blocks(&self, block_out: &Sender<Block>) -> Result<()> {
        let best = self.client.get_best_block_hash()?;
        let tip = self.state.lock().unwrap().tip;
        let tip = match tip {
            None => {
                // First contact pins the starting point; history before it
                // is not replayed.
                let info = self.client.get_block_header_info(&best)?;
                let mut state = self.state.lock().unwrap();
                state.tip = Some((info.hash, info.height));
                state.recent.insert(info.height, info.hash);
                debug!("chain poller starting at {} (height {})", info.hash, info.height);
                return Ok(());
            }
            Some(tip) => tip,
        };
        if tip.0 == best {
            return Ok(());
        }

        // Walk the new chain backwards to the last block we delivered,
        // then deliver forward from there in order.
        let mut cursor = self.client.get_block_header_info(&best)?;
        let new_height = cursor.height;
        let floor = {
            let state = self.state.lock().unwrap();
            state.recent.keys().copied().min().unwrap_or(0)
        };
        let ancestor_height = loop {
            let known = {
                let state = self.state.lock().unwrap();
                state.recent.get(&cursor.height).copied()
            };
            if known == Some(cursor.hash) {
                break cursor.height;
            }
            if cursor.height == 0 || cursor.height <= floor {
                warn!(
                    "reorg reaches below remembered height {}; resuming stream from height {}",
                    floor, cursor.height
                );
                break cursor.height.saturating_sub(1);
            }
            let prev = cursor.prev.chain_err(|| {
                ErrorKind::Decode(format!("header {} has no previous block", cursor.hash))
            })?;
            cursor = self.client.get_block_header_info(&prev)?;
        };

        for height in (ancestor_height + 1)..=new_height {
            self.exit.poll()?;
            let hash = self.client.get_block_hash(height)?;
            let block = self.client.get_block(&hash)?;
            self.deliver_block(block, hash, height, block_out)?;
        }
        Ok(())
    }

    fn deliver_block(
        &self,
        block: Block,
        hash: BlockHash,
        height: u64,
        block_out: &Sender<Block>,
    ) -> Result<()> {
        {
            let mut mempool = self.mempool.write().unwrap();
            for tx in &block.txdata {
                mempool.remove_spends_of(tx);
            }
            self.stats.mempool_entries.set(mempool.len() as i64);
        }
        self.stats.blocks.inc();
        if !forward(block_out, &self.exit, block) {
            bail!(ErrorKind::Interrupted);
        }
        // Advance the pointer per block, so an abandoned walk resumes
        // where it stopped instead of re-delivering the whole segment.
        let mut state = self.state.lock().unwrap();
        state.tip = Some((hash, height));
        state.recent.insert(height, hash);
        let cutoff = height.saturating_sub(REORG_MEMORY_BLOCKS);
        state.recent.retain(|h, _| *h >= cutoff);
        Ok(())
    }
}
