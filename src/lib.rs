/*!
# Obelisk Settlement - Routing & Batch Execution Engine

Routes financial trades to one of several execution venues, an in-memory
matching pool or one of many heterogeneous blockchain back-ends, and batches
venue-bound trades to amortize fixed settlement overhead.

## Architecture

```text
          ┌──────────────┐
 Trade ──▶│ FeeTierEngine │ tier + fees
          └──────┬───────┘
                 ▼
        ┌─────────────────┐   size < threshold   ┌───────────────┐
        │ SettlementRouter│ ───────────────────▶ │ internal pool │
        └──────┬──────────┘                      └───────────────┘
               │ size ≥ threshold
               ▼
        ┌──────────────┐   ┌─────────────────┐   ┌───────────────────────┐
        │ ChainSelector│──▶│ BatchAggregator │──▶│ ConcurrencyController │
        └──────────────┘   └─────────────────┘   └───────────┬───────────┘
                                                             ▼
                                                   ┌──────────────────┐
                                                   │ ChainExecutor or │
                                                   │ ChainSimulator   │
                                                   └──────────────────┘
```

## Features

- **Venue routing**: sub-threshold trades fill instantly on the internal
  pool; the rest settle on-chain
- **Chain selection**: cheapest-first, fastest-first, balanced, or priority
  strategies over an extensible chain registry
- **Batch aggregation**: per-chain FIFO queues with size and time triggers,
  90% gas amortization, strict fate-sharing
- **Real→simulated fallback**: a failed real settlement attempt becomes a
  structurally identical simulated one on the same chain, never an error
- **Throughput-tiered fees**: rolling 60 s per-user TPS windows drive fee,
  gas-subsidy, and maker-rebate rates
- **Bounded concurrency**: soft spin-wait gate and hard chunk barrier as
  distinct dispatch modes, with a sliding-window TPS sampler

## Quick Start

```rust,no_run
use obelisk_settlement::{
    ChainRegistry, RouterConfig, SettleOptions, SettlementRouter, Trade, TradeSide,
};

#[tokio::main]
async fn main() -> obelisk_settlement::Result<()> {
    obelisk_settlement::init();

    let router = SettlementRouter::new(RouterConfig::default(), ChainRegistry::builtin())?;

    let trade = Trade::new("user-1", "SOL/USDC", TradeSide::Buy, 250.0, 151.25);
    let result = router.settle_trade(trade, SettleOptions::default()).await?;
    println!("settled via {:?}: {:?}", result.path, result.tx_hash);

    router.flush_all().await;
    Ok(())
}
```
*/

#![warn(missing_docs, rust_2018_idioms)]

// Re-export key types and functions for convenience
pub use chains::{
    ChainExecutor, ChainId, ChainKey, ChainRegistry, ChainSimulator, ChainSpec, ExecutionReceipt,
    ExecutorStats, Finality, FixedSimulator, SimReceipt, StochasticSimulator, TxHashFormat,
};
pub use config::{BatchConfig, ConcurrencyConfig, RouterConfig};
pub use error::{
    BatchError, ConfigError, Error, ExecutorError, Result, SelectorError, ValidationError,
};
pub use fees::{FeeBreakdown, FeeTier, FeeTierEngine, RevenueReport, TierRevenue};
pub use routing::{
    BatchAggregator, BatchRun, BatchStats, ChainSelector, ConcurrencyController, ControllerStats,
    DispatchMode, SelectionStrategy, SettleOptions, SettlementRouter,
};
pub use types::{
    AggregateStats, ChainStats, SettlementPath, SettlementResult, StatsLedger, Trade, TradeSide,
    Venue,
};

// Core modules
pub mod chains;
pub mod config;
pub mod error;
pub mod fees;
pub mod routing;
pub mod types;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Initialize the engine with default tracing configuration
pub fn init() {
    init_with_tracing("info")
}

/// Initialize the engine with a custom tracing filter
pub fn init_with_tracing(filter: &str) {
    let _ = tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| filter.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .try_init();

    tracing::info!("obelisk-settlement initialized with tracing filter: {}", filter);
}

/// Get the library version
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

/// Get the library name
pub fn name() -> &'static str {
    env!("CARGO_PKG_NAME")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!version().is_empty());
    }

    #[test]
    fn test_name() {
        assert_eq!(name(), "obelisk-settlement");
    }

    #[test]
    fn test_init() {
        // Should not panic, even when called repeatedly
        init();
        init();
    }
}
