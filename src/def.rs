use std::time::Duration;

pub const LTCWALLET_CORE_VERSION: &str = env!("CARGO_PKG_VERSION");

/// One litecoin, in satoshi.
pub const COIN: i64 = 100_000_000;

/// Total litecoin supply cap, in satoshi.
pub const MAX_MONEY: i64 = 84_000_000 * COIN;

/// Transaction version used for freshly authored transactions.
pub const TX_VERSION: i32 = 1;

/// Backends encode their version as 10000*major + 100*minor + patch. The
/// gettxspendingprevout call shipped in 24.0.0.
pub const SPENDING_PREVOUT_RPC_VERSION: i64 = 240_000;

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(10);
pub const MIN_POLL_INTERVAL: Duration = Duration::from_secs(1);
pub const DEFAULT_STOP_GRACE: Duration = Duration::from_secs(5);

/// Ceiling for the exponential backoff applied to failing push
/// subscriptions. Polling backoff is capped at the poll interval instead.
pub const DEFAULT_PUSH_RETRY_CEILING: Duration = Duration::from_secs(30);
pub const RETRY_BACKOFF_BASE: Duration = Duration::from_secs(1);

/// How long workers block on a subscription or a full stream before
/// re-checking the cancellation signal.
pub const POLL_QUANTUM: Duration = Duration::from_millis(250);

/// Bounded capacities of the notification streams. A full stream blocks the
/// producing worker rather than dropping events.
pub const BLOCK_STREAM_CAPACITY: usize = 64;
pub const TX_STREAM_CAPACITY: usize = 1024;

/// How many recently delivered block heights the poller remembers for
/// finding the common ancestor of a reorg.
pub const REORG_MEMORY_BLOCKS: u64 = 144;

/// The fee/size fixpoint converges in two passes for cumulative input
/// sources; anything past this bound is a broken source.
pub const MAX_FEE_ESTIMATE_PASSES: usize = 4;
