/*!
Core types for settlement routing

Trades, settlement results, and the accumulate-only statistics ledger shared
between the router and the batch aggregator.
*/

use crate::chains::ChainKey;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

// Re-export commonly used types
pub use chrono::{DateTime, Utc};
pub use uuid::Uuid;

/// Side of a trade
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TradeSide {
    Buy,
    Sell,
}

/// A trade to be settled. Created by the caller, immutable, consumed once.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Trade {
    pub user_id: String,
    pub pair: String,
    pub side: TradeSide,
    pub size_usd: f64,
    pub price: f64,
    pub is_maker: bool,
    pub timestamp: DateTime<Utc>,
}

impl Trade {
    /// Create a taker trade stamped with the current time
    pub fn new(
        user_id: impl Into<String>,
        pair: impl Into<String>,
        side: TradeSide,
        size_usd: f64,
        price: f64,
    ) -> Self {
        Self {
            user_id: user_id.into(),
            pair: pair.into(),
            side,
            size_usd,
            price,
            is_maker: false,
            timestamp: Utc::now(),
        }
    }

    /// Mark the trade as a maker order (eligible for rebates)
    pub fn as_maker(mut self) -> Self {
        self.is_maker = true;
        self
    }
}

/// Execution destination for a trade
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Venue {
    /// In-memory matching pool
    Internal,
    /// On-chain settlement
    Blockchain,
}

/// Terminal state of the per-trade settlement state machine.
///
/// `Pending → InternalDone` or `Pending → RealAttempt → {RealDone |
/// SimulatedDone}`; batched trades resolve together as `Batched`. The
/// real→simulated fallback is a visible transition here, not a swallowed
/// exception.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SettlementPath {
    /// Filled against the internal pool
    Internal,
    /// Settled by a real chain executor
    Real,
    /// Settled by the chain simulator after a real attempt failed or no
    /// executor was configured
    Simulated,
    /// Settled as a member of an aggregate batch
    Batched,
}

/// Outcome of settling one trade. Produced exactly once per trade.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SettlementResult {
    pub success: bool,
    pub tx_hash: Option<String>,
    pub gas_cost_usd: f64,
    pub latency_ms: u64,
    pub chain_key: Option<ChainKey>,
    pub venue: Venue,
    pub path: SettlementPath,
    pub explorer_url: Option<String>,
    /// Set for batched settlements: number of trades sharing the batch
    pub batch_size: Option<usize>,
    pub error: Option<String>,
}

impl SettlementResult {
    /// Synthetic instantaneous internal-pool fill
    pub fn internal_fill() -> Self {
        Self {
            success: true,
            tx_hash: Some(format!("INT-{}", Uuid::new_v4())),
            gas_cost_usd: 0.0,
            latency_ms: 0,
            chain_key: None,
            venue: Venue::Internal,
            path: SettlementPath::Internal,
            explorer_url: None,
            batch_size: None,
            error: None,
        }
    }
}

/// Per-chain accumulate-only counters
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChainStats {
    pub settlements: u64,
    pub trades: u64,
    pub gas_cost_usd: f64,
    pub avg_latency_ms: f64,
    pub errors: u64,
}

/// Global and per-chain settlement counters. Accumulate-only, never reset.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AggregateStats {
    pub total_settlements: u64,
    pub total_trades: u64,
    pub total_gas_cost_usd: f64,
    pub internal_trades: u64,
    pub blockchain_trades: u64,
    pub by_chain: BTreeMap<ChainKey, ChainStats>,
}

/// Shared, thread-safe stats ledger.
///
/// The router records direct settlements; the batch aggregator records batch
/// executions. Snapshots are consistent copies, so two consecutive snapshots
/// with no intervening trades are identical.
#[derive(Debug, Default)]
pub struct StatsLedger {
    inner: Mutex<AggregateStats>,
}

impl StatsLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a single-trade settlement (internal or blockchain)
    pub fn record_settlement(&self, chain: Option<&ChainKey>, result: &SettlementResult) {
        let mut stats = self.inner.lock();
        stats.total_settlements += 1;
        stats.total_trades += 1;
        stats.total_gas_cost_usd += result.gas_cost_usd;

        match chain {
            Some(key) => {
                stats.blockchain_trades += 1;
                let entry = stats.by_chain.entry(key.clone()).or_default();
                entry.settlements += 1;
                entry.trades += 1;
                entry.gas_cost_usd += result.gas_cost_usd;
                entry.avg_latency_ms = incremental_avg(
                    entry.avg_latency_ms,
                    entry.settlements,
                    result.latency_ms as f64,
                );
            }
            None => stats.internal_trades += 1,
        }
    }

    /// Record one aggregate batch settlement of `trades` member trades
    pub fn record_batch(&self, chain: &ChainKey, trades: u64, gas_cost_usd: f64, latency_ms: u64) {
        let mut stats = self.inner.lock();
        stats.total_settlements += 1;
        stats.total_trades += trades;
        stats.total_gas_cost_usd += gas_cost_usd;
        stats.blockchain_trades += trades;

        let entry = stats.by_chain.entry(chain.clone()).or_default();
        entry.settlements += 1;
        entry.trades += trades;
        entry.gas_cost_usd += gas_cost_usd;
        entry.avg_latency_ms =
            incremental_avg(entry.avg_latency_ms, entry.settlements, latency_ms as f64);
    }

    /// Record a failed real attempt or batch failure against a chain
    pub fn record_error(&self, chain: &ChainKey) {
        let mut stats = self.inner.lock();
        stats.by_chain.entry(chain.clone()).or_default().errors += 1;
    }

    /// Consistent copy of the current counters
    pub fn snapshot(&self) -> AggregateStats {
        self.inner.lock().clone()
    }
}

fn incremental_avg(current: f64, count: u64, sample: f64) -> f64 {
    if count == 0 {
        return sample;
    }
    (current * (count - 1) as f64 + sample) / count as f64
}
