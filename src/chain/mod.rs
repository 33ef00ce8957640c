use std::sync::{Arc, Mutex};
use std::time::Duration;

use bitcoin::blockdata::block::Block;
use bitcoin::blockdata::transaction::{OutPoint, Transaction};
use bitcoin::hash_types::Txid;
use crossbeam_channel::{Receiver, SendTimeoutError, Sender};
use prometheus::Opts;
use serde::Deserialize;

use crate::daemon::{DaemonRpc, Subscriber};
use crate::def::{
    DEFAULT_POLL_INTERVAL, DEFAULT_PUSH_RETRY_CEILING, DEFAULT_STOP_GRACE, MIN_POLL_INTERVAL,
    POLL_QUANTUM, SPENDING_PREVOUT_RPC_VERSION,
};
use crate::errors::*;
use crate::metrics::Metrics;
use crate::signal::Waiter;
use crate::timeout::TimeoutTrigger;
use crate::util::WorkerHandle;

pub mod mempool;
pub mod poll;
pub mod push;

#[cfg(test)]
pub mod mocks;

/// Uniform interface over the two ways of learning about new blocks and
/// mempool transactions from a full node.
///
/// Both streams are single-consumer: the `Receiver` handles may be moved to
/// (or cloned onto) any thread, but competing receivers steal from each
/// other. Streams disconnect after `stop`.
pub trait ChainEvents: Send + Sync {
    /// Transactions as they enter the backend mempool. Delivered
    /// at-least-once, with no ordering relative to `block_notifications`.
    fn tx_notifications(&self) -> Receiver<Transaction>;

    /// Blocks in backend-observed order.
    fn block_notifications(&self) -> Receiver<Block>;

    /// The mempool transaction spending `outpoint`, if one is known.
    /// Always None once the source is stopped.
    fn lookup_input_spend(&self, outpoint: OutPoint) -> Option<Txid>;

    /// Kick off the worker threads. Single-shot.
    fn start(&self) -> Result<()>;

    /// Stop workers (bounded by the configured grace period), close both
    /// streams and drop the mempool view. Idempotent.
    fn stop(&self) -> Result<()>;
}

#[derive(Clone, Debug)]
pub struct PollingConfig {
    /// How often the backend mempool and best block are compared against
    /// the previous tick. Must be at least one second.
    pub poll_interval: Duration,
    pub stop_grace: Duration,
}

impl Default for PollingConfig {
    fn default() -> PollingConfig {
        PollingConfig {
            poll_interval: DEFAULT_POLL_INTERVAL,
            stop_grace: DEFAULT_STOP_GRACE,
        }
    }
}

#[derive(Clone, Debug)]
pub struct PushConfig {
    pub block_endpoint: String,
    pub tx_endpoint: String,
    pub stop_grace: Duration,
    /// Backoff ceiling for a failing subscription.
    pub retry_ceiling: Duration,
}

impl PushConfig {
    pub fn new(block_endpoint: &str, tx_endpoint: &str) -> PushConfig {
        PushConfig {
            block_endpoint: block_endpoint.to_owned(),
            tx_endpoint: tx_endpoint.to_owned(),
            stop_grace: DEFAULT_STOP_GRACE,
            retry_ceiling: DEFAULT_PUSH_RETRY_CEILING,
        }
    }
}

/// Selects the event delivery mechanism. Exactly one of the two options
/// must be set.
#[derive(Clone, Debug, Default)]
pub struct EventSourceConfig {
    pub polling: Option<PollingConfig>,
    pub push: Option<PushConfig>,
}

/// Build the event source matching `config`.
///
/// Push mode needs `subscriber` for its two topic subscriptions and probes
/// the backend version once: new enough backends answer spend lookups over
/// RPC directly, older ones get a local mempool mirror.
pub fn new_event_source(
    config: EventSourceConfig,
    client: Arc<dyn DaemonRpc>,
    subscriber: Option<Box<dyn Subscriber>>,
    metrics: &Metrics,
) -> Result<Box<dyn ChainEvents>> {
    match (config.polling, config.push) {
        (Some(_), Some(_)) => Err(config_error(
            "either polling or push events should be specified, not both",
        )),
        (None, None) => Err(config_error(
            "one of polling or push events must be specified",
        )),
        (Some(polling), None) => {
            if polling.poll_interval < MIN_POLL_INTERVAL {
                return Err(config_error("poll interval below one second"));
            }
            Ok(Box::new(poll::PollingEvents::new(polling, client, metrics)))
        }
        (None, Some(push)) => {
            let subscriber = subscriber.ok_or_else(|| {
                config_error("a notification subscriber must be given for push events")
            })?;
            let has_prevout_rpc = has_spending_prevout_rpc(&*client)?;
            Ok(Box::new(push::PushEvents::new(
                push,
                client,
                subscriber,
                has_prevout_rpc,
                metrics,
            )))
        }
    }
}

#[derive(Deserialize)]
struct NetworkInfo {
    version: i64,
}

/// Whether the backend serves gettxspendingprevout (24.0.0 or newer).
pub fn has_spending_prevout_rpc(client: &dyn DaemonRpc) -> Result<bool> {
    let raw = client.get_network_info()?;
    let info: NetworkInfo = serde_json::from_value(raw)
        .chain_err(|| ErrorKind::Decode("unexpected getnetworkinfo response".to_string()))?;
    Ok(info.version >= SPENDING_PREVOUT_RPC_VERSION)
}

pub(crate) struct EventStats {
    pub blocks: prometheus::IntCounter,
    pub txs: prometheus::IntCounter,
    pub sequence_gaps: prometheus::IntCounterVec,
    pub errors: prometheus::IntCounterVec,
    pub mempool_entries: prometheus::IntGauge,
}

impl EventStats {
    pub fn new(metrics: &Metrics) -> EventStats {
        EventStats {
            blocks: metrics.counter_int(Opts::new(
                "ltcwallet_chain_blocks_total",
                "# of blocks delivered on the block stream",
            )),
            txs: metrics.counter_int(Opts::new(
                "ltcwallet_chain_txs_total",
                "# of transactions delivered on the tx stream",
            )),
            sequence_gaps: metrics.counter_int_vec(
                Opts::new(
                    "ltcwallet_chain_sequence_gaps",
                    "# of gaps observed in notification sequence numbers",
                ),
                &["topic"],
            ),
            errors: metrics.counter_int_vec(
                Opts::new(
                    "ltcwallet_chain_errors",
                    "# of operational errors swallowed by the event source",
                ),
                &["kind"],
            ),
            mempool_entries: metrics.gauge_int(Opts::new(
                "ltcwallet_mempool_entries",
                "# of mempool transactions in the local spend index",
            )),
        }
    }
}

/// Deliver `value` on a bounded stream. Blocks while the consumer lags
/// (that is the backpressure) but keeps honoring the cancellation signal.
/// Returns false when delivery is no longer possible or wanted.
pub(crate) fn forward<T>(out: &Sender<T>, exit: &Waiter, value: T) -> bool {
    let mut value = value;
    loop {
        if exit.poll().is_err() {
            return false;
        }
        match out.send_timeout(value, POLL_QUANTUM) {
            Ok(()) => return true,
            Err(SendTimeoutError::Timeout(v)) => value = v,
            Err(SendTimeoutError::Disconnected(_)) => return false,
        }
    }
}

/// Wait for each worker to finish, spending at most `grace` in total.
pub(crate) fn stop_workers(workers: &Mutex<Vec<WorkerHandle>>, grace: Duration) {
    let deadline = TimeoutTrigger::new(grace);
    let drained: Vec<WorkerHandle> = workers.lock().unwrap().drain(..).collect();
    for worker in drained {
        let name = worker.name().to_owned();
        if !worker.join_within(deadline.remaining()) {
            warn!("worker {} did not stop within the grace period", name);
        }
    }
}
