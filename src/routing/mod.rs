/*!
Settlement routing

Orchestrates the whole settlement flow: venue decision (internal pool vs
blockchain), chain selection, batch aggregation, real executor invocation
with simulated fallback, and stats accumulation.

Per-trade state machine: `Pending → InternalDone` or `Pending → RealAttempt →
{RealDone | SimulatedDone}`. Both terminal states carry `success = true`; the
fallback transition surfaces in `SettlementResult::path` instead of an
exception. Only selector, configuration, and validation failures propagate to
the caller.
*/

use crate::chains::{ChainExecutor, ChainKey, ChainRegistry, ChainSimulator, ChainSpec, StochasticSimulator};
use crate::config::RouterConfig;
use crate::error::{ConfigError, Error, Result, ValidationError};
use crate::fees::FeeTierEngine;
use crate::types::{AggregateStats, SettlementPath, SettlementResult, StatsLedger, Trade, Venue};
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, instrument, warn};

pub mod batch;
pub mod concurrency;
pub mod selector;

pub use batch::{BatchAggregator, BatchStats};
pub use concurrency::{BatchRun, ConcurrencyController, ControllerStats, DispatchMode};
pub use selector::{ChainSelector, SelectionStrategy};

/// Per-call options for settlement
#[derive(Debug, Clone, Default)]
pub struct SettleOptions {
    /// Settle on this chain instead of running selection
    pub chain: Option<ChainKey>,
}

impl SettleOptions {
    pub fn on_chain(key: ChainKey) -> Self {
        Self { chain: Some(key) }
    }
}

/// Routes trades to the internal pool or a blockchain venue.
pub struct SettlementRouter {
    config: RouterConfig,
    registry: Arc<ChainRegistry>,
    fees: Arc<FeeTierEngine>,
    aggregator: BatchAggregator,
    executors: HashMap<ChainKey, Arc<dyn ChainExecutor>>,
    simulator: Arc<dyn ChainSimulator>,
    ledger: Arc<StatsLedger>,
}

impl SettlementRouter {
    /// Create a router with the production stochastic simulator
    pub fn new(config: RouterConfig, registry: ChainRegistry) -> Result<Self> {
        Self::with_simulator(config, registry, Arc::new(StochasticSimulator::new()))
    }

    /// Create a router with an injected simulator (deterministic in tests)
    pub fn with_simulator(
        config: RouterConfig,
        registry: ChainRegistry,
        simulator: Arc<dyn ChainSimulator>,
    ) -> Result<Self> {
        config.validate()?;
        let registry = Arc::new(registry);
        let ledger = Arc::new(StatsLedger::new());
        let aggregator = BatchAggregator::new(
            config.batch.clone(),
            config.default_chain.clone(),
            registry.clone(),
            simulator.clone(),
            ledger.clone(),
        );

        Ok(Self {
            config,
            registry,
            fees: Arc::new(FeeTierEngine::default()),
            aggregator,
            executors: HashMap::new(),
            simulator,
            ledger,
        })
    }

    /// Register a real executor for a chain. Without one, settlements on
    /// that chain go straight to simulation.
    pub fn register_executor(&mut self, key: ChainKey, executor: Arc<dyn ChainExecutor>) {
        self.executors.insert(key, executor);
    }

    /// Replace the fee engine (custom tier tables)
    pub fn with_fee_engine(mut self, fees: FeeTierEngine) -> Self {
        self.fees = Arc::new(fees);
        self
    }

    pub fn config(&self) -> &RouterConfig {
        &self.config
    }

    pub fn registry(&self) -> &ChainRegistry {
        &self.registry
    }

    pub fn fees(&self) -> &FeeTierEngine {
        &self.fees
    }

    /// Select the best enabled chain under the given (or configured)
    /// strategy
    pub fn select_chain(&self, strategy: Option<SelectionStrategy>) -> Result<ChainSpec> {
        let strategy = strategy.unwrap_or(self.config.strategy);
        let enabled = self.registry.enabled();
        Ok(ChainSelector::select(strategy, &enabled)?.clone())
    }

    /// Settle one trade.
    ///
    /// Always resolves with a `SettlementResult` for any blockchain-level
    /// problem; real failures are hidden behind the simulated fallback.
    /// Only selector, configuration, and validation errors reject.
    #[instrument(skip(self, trade), fields(user = %trade.user_id, pair = %trade.pair, size = trade.size_usd))]
    pub async fn settle_trade(&self, trade: Trade, options: SettleOptions) -> Result<SettlementResult> {
        self.validate_trade(&trade)?;

        // Venue decision is a pure function of notional vs threshold
        if trade.size_usd < self.config.internal_threshold_usd {
            let result = SettlementResult::internal_fill();
            self.fees
                .process_trade(&trade.user_id, trade.size_usd, trade.is_maker, 0.0);
            self.ledger.record_settlement(None, &result);
            debug!(tx = ?result.tx_hash, "internal pool fill");
            return Ok(result);
        }

        let chain = self.resolve_chain(&options)?;
        let result = self.settle_on_chain(&chain, &trade).await;
        self.fees.process_trade(
            &trade.user_id,
            trade.size_usd,
            trade.is_maker,
            result.gas_cost_usd,
        );
        self.ledger.record_settlement(Some(&chain.key), &result);
        Ok(result)
    }

    /// Settle a list of trades as one immediate aggregate batch on a single
    /// chain, fanning the per-trade results out.
    #[instrument(skip(self, trades), fields(trades = trades.len()))]
    pub async fn batch_settle(
        &self,
        trades: Vec<Trade>,
        options: SettleOptions,
    ) -> Result<Vec<SettlementResult>> {
        if trades.is_empty() {
            return Ok(Vec::new());
        }
        for trade in &trades {
            self.validate_trade(trade)?;
        }

        let chain = self.resolve_chain(&options)?;
        let results = self.aggregator.execute_now(&chain.key, &trades).await?;

        for (trade, result) in trades.iter().zip(&results) {
            self.fees.process_trade(
                &trade.user_id,
                trade.size_usd,
                trade.is_maker,
                result.gas_cost_usd,
            );
        }
        Ok(results)
    }

    /// Enqueue a trade for batched settlement on `chain_key` (unknown keys
    /// remap to the default chain). The returned future resolves when the
    /// batch executes: on size threshold, timer expiry, or `flush_all`.
    pub fn add_trade(
        &self,
        trade: Trade,
        chain_key: ChainKey,
    ) -> Result<impl Future<Output = Result<SettlementResult>> + 'static> {
        self.validate_trade(&trade)?;

        let fees = self.fees.clone();
        let user_id = trade.user_id.clone();
        let size_usd = trade.size_usd;
        let is_maker = trade.is_maker;
        let pending = self.aggregator.add_trade(trade, chain_key);

        Ok(async move {
            match pending.await {
                Ok(result) => {
                    fees.process_trade(&user_id, size_usd, is_maker, result.gas_cost_usd);
                    Ok(result)
                }
                Err(err) => Err(Error::Batch(err)),
            }
        })
    }

    /// Force-execute every pending batch. Idempotent; used at shutdown.
    pub async fn flush_all(&self) {
        self.aggregator.flush_all().await;
    }

    /// Snapshot of global and per-chain settlement counters
    pub fn stats(&self) -> AggregateStats {
        self.ledger.snapshot()
    }

    /// Snapshot of batching counters
    pub fn batch_stats(&self) -> BatchStats {
        self.aggregator.stats()
    }

    fn validate_trade(&self, trade: &Trade) -> Result<()> {
        if trade.user_id.is_empty() {
            return Err(ValidationError::MalformedField {
                field: "user_id",
                reason: "must not be empty".to_string(),
            }
            .into());
        }
        if trade.pair.is_empty() {
            return Err(ValidationError::MalformedField {
                field: "pair",
                reason: "must not be empty".to_string(),
            }
            .into());
        }
        if !trade.size_usd.is_finite() || trade.size_usd <= 0.0 {
            return Err(ValidationError::MalformedField {
                field: "size_usd",
                reason: format!("must be a positive finite amount, got {}", trade.size_usd),
            }
            .into());
        }
        if !trade.price.is_finite() || trade.price <= 0.0 {
            return Err(ValidationError::MalformedField {
                field: "price",
                reason: format!("must be a positive finite price, got {}", trade.price),
            }
            .into());
        }
        if trade.size_usd < self.config.min_trade_size_usd {
            return Err(ValidationError::BelowMinimumSize {
                size_usd: trade.size_usd,
                min_usd: self.config.min_trade_size_usd,
            }
            .into());
        }
        Ok(())
    }

    fn resolve_chain(&self, options: &SettleOptions) -> Result<ChainSpec> {
        match &options.chain {
            Some(key) => self
                .registry
                .get(key)
                .cloned()
                .ok_or_else(|| ConfigError::UnknownChain { key: key.clone() }.into()),
            None => {
                let enabled = self.registry.enabled();
                Ok(ChainSelector::select(self.config.strategy, &enabled)?.clone())
            }
        }
    }

    /// Real attempt with simulated fallback on the same chain. Never fails:
    /// the terminal state is always a successful settlement.
    async fn settle_on_chain(&self, chain: &ChainSpec, trade: &Trade) -> SettlementResult {
        if let Some(executor) = self.executors.get(&chain.key) {
            if executor.is_ready() {
                match executor.execute_settlement(trade).await {
                    Ok(receipt) if receipt.success => {
                        return SettlementResult {
                            success: true,
                            tx_hash: Some(receipt.tx_hash),
                            gas_cost_usd: receipt.gas_cost_usd,
                            latency_ms: receipt.latency_ms,
                            chain_key: Some(chain.key.clone()),
                            venue: Venue::Blockchain,
                            path: SettlementPath::Real,
                            explorer_url: receipt.explorer_url,
                            batch_size: None,
                            error: None,
                        };
                    }
                    Ok(receipt) => {
                        warn!(
                            chain = %chain.key,
                            error = ?receipt.error,
                            "real settlement reported failure, falling back to simulation"
                        );
                        self.ledger.record_error(&chain.key);
                    }
                    Err(e) => {
                        warn!(
                            chain = %chain.key,
                            error = %e,
                            "real settlement failed, falling back to simulation"
                        );
                        self.ledger.record_error(&chain.key);
                    }
                }
            } else {
                debug!(chain = %chain.key, "executor not ready, simulating settlement");
            }
        }

        let receipt = self.simulator.simulate_settlement(chain, trade).await;
        SettlementResult {
            success: true,
            tx_hash: Some(receipt.tx_hash),
            gas_cost_usd: receipt.gas_cost_usd,
            latency_ms: receipt.latency_ms,
            chain_key: Some(chain.key.clone()),
            venue: Venue::Blockchain,
            path: SettlementPath::Simulated,
            explorer_url: None,
            batch_size: None,
            error: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chains::{ExecutionReceipt, ExecutorStats, FixedSimulator};
    use crate::error::ExecutorError;
    use crate::types::TradeSide;
    use async_trait::async_trait;

    struct AlwaysOkExecutor;

    #[async_trait]
    impl ChainExecutor for AlwaysOkExecutor {
        fn network(&self) -> &str {
            "Solana"
        }

        fn is_ready(&self) -> bool {
            true
        }

        async fn balance(&self) -> Result<Option<f64>> {
            Ok(Some(10.0))
        }

        async fn execute_settlement(&self, _trade: &Trade) -> Result<ExecutionReceipt> {
            Ok(ExecutionReceipt {
                success: true,
                tx_hash: "REAL-TX".to_string(),
                gas_cost_usd: 0.0002,
                latency_ms: 420,
                confirmed: true,
                explorer_url: Some("https://solscan.io/tx/REAL-TX".to_string()),
                error: None,
            })
        }

        fn stats(&self) -> ExecutorStats {
            ExecutorStats::default()
        }
    }

    struct AlwaysFailExecutor;

    #[async_trait]
    impl ChainExecutor for AlwaysFailExecutor {
        fn network(&self) -> &str {
            "Solana"
        }

        fn is_ready(&self) -> bool {
            true
        }

        async fn balance(&self) -> Result<Option<f64>> {
            Ok(None)
        }

        async fn execute_settlement(&self, _trade: &Trade) -> Result<ExecutionReceipt> {
            Err(ExecutorError::Broadcast {
                network: "Solana".to_string(),
                reason: "rpc unreachable".to_string(),
            }
            .into())
        }

        fn stats(&self) -> ExecutorStats {
            ExecutorStats::default()
        }
    }

    struct NotReadyExecutor;

    #[async_trait]
    impl ChainExecutor for NotReadyExecutor {
        fn network(&self) -> &str {
            "Solana"
        }

        fn is_ready(&self) -> bool {
            false
        }

        async fn balance(&self) -> Result<Option<f64>> {
            Ok(None)
        }

        async fn execute_settlement(&self, _trade: &Trade) -> Result<ExecutionReceipt> {
            Err(ExecutorError::NotReady {
                network: "Solana".to_string(),
            }
            .into())
        }

        fn stats(&self) -> ExecutorStats {
            ExecutorStats::default()
        }
    }

    fn router() -> SettlementRouter {
        SettlementRouter::with_simulator(
            RouterConfig::default(),
            ChainRegistry::builtin(),
            Arc::new(FixedSimulator::new()),
        )
        .unwrap()
    }

    fn trade(size: f64) -> Trade {
        Trade::new("u1", "SOL/USDC", TradeSide::Buy, size, 150.0)
    }

    #[tokio::test]
    async fn test_small_trades_settle_internally() {
        let router = router();
        for size in [0.5, 10.0, 49.99] {
            let result = router
                .settle_trade(trade(size), SettleOptions::default())
                .await
                .unwrap();
            assert_eq!(result.venue, Venue::Internal);
            assert_eq!(result.gas_cost_usd, 0.0);
            assert!(result.success);
        }
        assert_eq!(router.stats().internal_trades, 3);
    }

    #[tokio::test]
    async fn test_threshold_boundary_routes_to_blockchain() {
        let router = router();
        let result = router
            .settle_trade(trade(50.0), SettleOptions::default())
            .await
            .unwrap();
        assert_eq!(result.venue, Venue::Blockchain);
        // cheapest-first default lands on Solana
        assert_eq!(result.chain_key, Some(ChainKey::new("SOLANA")));
        assert_eq!(result.path, SettlementPath::Simulated);
    }

    #[tokio::test]
    async fn test_explicit_chain_override() {
        let router = router();
        let result = router
            .settle_trade(trade(100.0), SettleOptions::on_chain(ChainKey::new("BASE")))
            .await
            .unwrap();
        assert_eq!(result.chain_key, Some(ChainKey::new("BASE")));
    }

    #[tokio::test]
    async fn test_unknown_override_chain_errors() {
        let router = router();
        let err = router
            .settle_trade(trade(100.0), SettleOptions::on_chain(ChainKey::new("DOGECHAIN")))
            .await
            .unwrap_err();
        assert_eq!(err.category(), "config");
    }

    #[tokio::test]
    async fn test_real_executor_success_path() {
        let mut router = router();
        router.register_executor(ChainKey::new("SOLANA"), Arc::new(AlwaysOkExecutor));

        let result = router
            .settle_trade(trade(100.0), SettleOptions::on_chain(ChainKey::new("SOLANA")))
            .await
            .unwrap();
        assert_eq!(result.path, SettlementPath::Real);
        assert_eq!(result.tx_hash.as_deref(), Some("REAL-TX"));
        assert!(result.explorer_url.is_some());
    }

    #[tokio::test]
    async fn test_failing_executor_falls_back_to_simulation() {
        let mut router = router();
        router.register_executor(ChainKey::new("SOLANA"), Arc::new(AlwaysFailExecutor));

        let result = router
            .settle_trade(trade(100.0), SettleOptions::on_chain(ChainKey::new("SOLANA")))
            .await
            .unwrap();
        assert!(result.success);
        assert_eq!(result.path, SettlementPath::Simulated);

        // the failed real attempt is counted against the chain
        let stats = router.stats();
        assert_eq!(stats.by_chain[&ChainKey::new("SOLANA")].errors, 1);
    }

    #[tokio::test]
    async fn test_unready_executor_goes_straight_to_simulation() {
        let mut router = router();
        router.register_executor(ChainKey::new("SOLANA"), Arc::new(NotReadyExecutor));

        let result = router
            .settle_trade(trade(100.0), SettleOptions::on_chain(ChainKey::new("SOLANA")))
            .await
            .unwrap();
        assert_eq!(result.path, SettlementPath::Simulated);
        // no error recorded: the attempt never happened
        assert_eq!(router.stats().by_chain[&ChainKey::new("SOLANA")].errors, 0);
    }

    #[tokio::test]
    async fn test_no_enabled_chains_propagates() {
        let mut registry = ChainRegistry::builtin();
        for key in ["SOLANA", "AVALANCHE", "BASE", "ARBITRUM", "OPTIMISM"] {
            registry.set_enabled(&ChainKey::new(key), false);
        }
        let router = SettlementRouter::with_simulator(
            RouterConfig::default(),
            registry,
            Arc::new(FixedSimulator::new()),
        )
        .unwrap();

        let err = router
            .settle_trade(trade(100.0), SettleOptions::default())
            .await
            .unwrap_err();
        assert_eq!(err.category(), "selector");
    }

    #[tokio::test]
    async fn test_validation_rejects_malformed_trades() {
        let router = router();

        let mut bad = trade(100.0);
        bad.user_id = String::new();
        assert!(router.settle_trade(bad, SettleOptions::default()).await.is_err());

        let err = router
            .settle_trade(trade(0.001), SettleOptions::default())
            .await
            .unwrap_err();
        assert_eq!(err.category(), "validation");

        let mut nan = trade(100.0);
        nan.size_usd = f64::NAN;
        assert!(router.settle_trade(nan, SettleOptions::default()).await.is_err());
    }

    #[tokio::test]
    async fn test_batch_settle_splits_gas() {
        let router = router();
        let trades: Vec<Trade> = (0..5).map(|_| trade(100.0)).collect();

        let results = router
            .batch_settle(trades, SettleOptions::on_chain(ChainKey::new("BASE")))
            .await
            .unwrap();
        assert_eq!(results.len(), 5);
        for result in &results {
            // 0.1 * 5 * P / 5 = 0.1 * P
            assert!((result.gas_cost_usd - 0.001).abs() < 1e-12);
            assert_eq!(result.batch_size, Some(5));
        }

        let stats = router.stats();
        assert_eq!(stats.total_settlements, 1);
        assert_eq!(stats.total_trades, 5);
    }

    #[tokio::test]
    async fn test_stats_snapshot_is_idempotent() {
        let router = router();
        router
            .settle_trade(trade(10.0), SettleOptions::default())
            .await
            .unwrap();
        assert_eq!(router.stats(), router.stats());
    }

    #[tokio::test]
    async fn test_fees_accumulate_per_settlement() {
        let router = router();
        router
            .settle_trade(trade(1000.0), SettleOptions::on_chain(ChainKey::new("SOLANA")))
            .await
            .unwrap();

        let revenue = router.fees().revenue_report();
        assert_eq!(revenue.total_trades, 1);
        assert!((revenue.total_fees - 1.0).abs() < 1e-9);
    }
}
