//! End-to-end settlement flow scenarios: venue routing, batch aggregation
//! timing, the real→simulated fallback, and stats bookkeeping.

use obelisk_settlement::{
    ChainExecutor, ChainKey, ChainRegistry, ExecutionReceipt, ExecutorError, ExecutorStats,
    FixedSimulator, Result, RouterConfig, SelectionStrategy, SettleOptions, SettlementPath,
    SettlementRouter, Trade, TradeSide, Venue,
};
use std::sync::Arc;
use std::time::Duration;

fn trade(user: &str, size: f64) -> Trade {
    Trade::new(user, "SOL/USDC", TradeSide::Buy, size, 150.0)
}

fn deterministic_router(config: RouterConfig) -> SettlementRouter {
    SettlementRouter::with_simulator(
        config,
        ChainRegistry::builtin(),
        Arc::new(FixedSimulator::new()),
    )
    .unwrap()
}

struct BrokenExecutor;

#[async_trait::async_trait]
impl ChainExecutor for BrokenExecutor {
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
            reason: "signing service down".to_string(),
        }
        .into())
    }

    fn stats(&self) -> ExecutorStats {
        ExecutorStats::default()
    }
}

#[tokio::test]
async fn sub_threshold_trades_fill_internally_with_zero_gas() {
    let router = deterministic_router(RouterConfig::default());

    for size in [1.0, 25.0, 49.999] {
        let result = router
            .settle_trade(trade("alice", size), SettleOptions::default())
            .await
            .unwrap();
        assert_eq!(result.venue, Venue::Internal);
        assert_eq!(result.gas_cost_usd, 0.0);
        assert!(result.success);
    }
}

#[tokio::test]
async fn cheapest_first_selects_solana() {
    let router = deterministic_router(RouterConfig::default());
    let chain = router
        .select_chain(Some(SelectionStrategy::CheapestFirst))
        .unwrap();
    assert_eq!(chain.key, ChainKey::new("SOLANA"));
}

#[tokio::test(start_paused = true)]
async fn batch_waits_for_timer_then_resolves_together() {
    let config = RouterConfig::builder()
        .batch_size(100)
        .max_batch_wait(Duration::from_millis(1000))
        .build()
        .unwrap();
    let router = deterministic_router(config);
    let solana = ChainKey::new("SOLANA");

    let f1 = router.add_trade(trade("bob", 10.0), solana.clone()).unwrap();
    let f2 = router.add_trade(trade("bob", 10.0), solana.clone()).unwrap();
    let f3 = router.add_trade(trade("bob", 10.0), solana.clone()).unwrap();

    let (r1, r2, r3) = tokio::join!(f1, f2, f3);
    let (r1, r2, r3) = (r1.unwrap(), r2.unwrap(), r3.unwrap());

    // all three resolve together with success and equal split gas
    for r in [&r1, &r2, &r3] {
        assert!(r.success);
        assert_eq!(r.batch_size, Some(3));
        assert_eq!(r.path, SettlementPath::Batched);
        assert_eq!(r.gas_cost_usd, r1.gas_cost_usd);
    }

    // per-trade gas ≈ 0.1 × individual price (90% batch savings)
    let expected = 0.1 * 0.00025;
    assert!((r1.gas_cost_usd - expected).abs() < 1e-12);
}

#[tokio::test]
async fn size_threshold_executes_batch_immediately() {
    let config = RouterConfig::builder()
        .batch_size(3)
        .max_batch_wait(Duration::from_secs(3600))
        .build()
        .unwrap();
    let router = deterministic_router(config);
    let base = ChainKey::new("BASE");

    let futures: Vec<_> = (0..3)
        .map(|_| router.add_trade(trade("carol", 20.0), base.clone()).unwrap())
        .collect();

    // resolves without the hour-long timer ever firing
    for fut in futures {
        assert!(fut.await.unwrap().success);
    }
}

#[tokio::test]
async fn failing_real_executor_still_settles_via_fallback() {
    let mut router = deterministic_router(RouterConfig::default());
    router.register_executor(ChainKey::new("SOLANA"), Arc::new(BrokenExecutor));

    let result = router
        .settle_trade(
            trade("dave", 500.0),
            SettleOptions::on_chain(ChainKey::new("SOLANA")),
        )
        .await
        .unwrap();

    assert!(result.success);
    assert_eq!(result.path, SettlementPath::Simulated);
    assert_eq!(result.chain_key, Some(ChainKey::new("SOLANA")));
}

#[tokio::test]
async fn stats_accumulate_and_snapshot_idempotently() {
    let router = deterministic_router(RouterConfig::default());

    router
        .settle_trade(trade("erin", 10.0), SettleOptions::default())
        .await
        .unwrap();
    router
        .settle_trade(trade("erin", 100.0), SettleOptions::default())
        .await
        .unwrap();

    let first = router.stats();
    let second = router.stats();
    assert_eq!(first, second);
    assert_eq!(first.total_trades, 2);
    assert_eq!(first.internal_trades, 1);
    assert_eq!(first.blockchain_trades, 1);
}

#[tokio::test]
async fn flush_all_settles_stragglers_at_shutdown() {
    let config = RouterConfig::builder()
        .batch_size(100)
        .max_batch_wait(Duration::from_secs(3600))
        .build()
        .unwrap();
    let router = deterministic_router(config);

    let pending = router
        .add_trade(trade("frank", 30.0), ChainKey::new("ARBITRUM"))
        .unwrap();

    router.flush_all().await;
    // a second flush with empty queues is harmless
    router.flush_all().await;

    let result = pending.await.unwrap();
    assert!(result.success);
    assert_eq!(result.chain_key, Some(ChainKey::new("ARBITRUM")));
}
