/*!
Per-chain batch aggregation

Maintains one FIFO queue and one cancellable flush timer per chain key.
Trades join a queue and receive a future bound to the batch's fate: when the
queue reaches the configured batch size, or the max-wait timer fires, the
queued entries are drained as one aggregate payload, "signed" (digested), and
broadcast through the chain's broadcast path. Every member then resolves with
the shared transaction hash and an even split of the aggregate gas, or, on
failure, every member rejects with the same error. There is no partial
commit.

The push / threshold-check / trigger sequence runs under a single short mutex
hold with no suspension point in between, so two concurrent callers can never
both observe a sub-threshold queue and double-schedule a flush.
*/

use crate::chains::{ChainKey, ChainRegistry, ChainSimulator};
use crate::config::BatchConfig;
use crate::error::BatchError;
use crate::types::{SettlementPath, SettlementResult, StatsLedger, Trade, Venue};
use parking_lot::Mutex;
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::future::Future;
use std::sync::Arc;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, instrument, warn};
use uuid::Uuid;

type BatchOutcome = std::result::Result<SettlementResult, BatchError>;

/// A trade waiting in a chain's queue. Owned exclusively by that queue and
/// consumed when its batch executes.
struct PendingEntry {
    trade: Trade,
    completion: oneshot::Sender<BatchOutcome>,
    enqueued_at: Instant,
}

#[derive(Default)]
struct ChainQueue {
    entries: VecDeque<PendingEntry>,
    timer: Option<JoinHandle<()>>,
    /// Bumped whenever a new timer is started, so a stale timer that lost
    /// the race to a size-triggered drain flushes nothing.
    timer_gen: u64,
}

/// Cumulative batching counters
#[derive(Debug, Clone, Default, Serialize)]
pub struct BatchStats {
    pub total_trades: u64,
    pub total_batches: u64,
    pub avg_batch_size: f64,
    pub gas_saved_usd: f64,
    pub max_tps: f64,
    /// Queue depth per chain at snapshot time
    pub pending: BTreeMap<ChainKey, usize>,
}

#[derive(Default)]
struct BatchTotals {
    total_trades: u64,
    total_batches: u64,
    gas_saved_usd: f64,
    max_tps: f64,
}

#[derive(Serialize)]
struct BatchPayload<'a> {
    batch_id: Uuid,
    chain_key: &'a ChainKey,
    trades: &'a [Trade],
}

/// Aggregates venue-bound trades into per-chain batches.
///
/// Cheap to clone: clones share the queues, stats, and timers.
#[derive(Clone)]
pub struct BatchAggregator {
    config: BatchConfig,
    default_chain: ChainKey,
    registry: Arc<ChainRegistry>,
    simulator: Arc<dyn ChainSimulator>,
    ledger: Arc<StatsLedger>,
    queues: Arc<Mutex<HashMap<ChainKey, ChainQueue>>>,
    totals: Arc<Mutex<BatchTotals>>,
}

impl BatchAggregator {
    pub fn new(
        config: BatchConfig,
        default_chain: ChainKey,
        registry: Arc<ChainRegistry>,
        simulator: Arc<dyn ChainSimulator>,
        ledger: Arc<StatsLedger>,
    ) -> Self {
        Self {
            config,
            default_chain,
            registry,
            simulator,
            ledger,
            queues: Arc::new(Mutex::new(HashMap::new())),
            totals: Arc::new(Mutex::new(BatchTotals::default())),
        }
    }

    /// Enqueue a trade for batched settlement on `chain_key`.
    ///
    /// Returns a future bound to the eventual batch resolution. Unknown
    /// chain keys are remapped to the configured default chain rather than
    /// dropped. If the push fills the batch, the timer is cancelled and the
    /// batch is drained before this call returns; later trades start a new
    /// batch.
    pub fn add_trade(
        &self,
        trade: Trade,
        chain_key: ChainKey,
    ) -> impl Future<Output = BatchOutcome> + 'static {
        let key = if self.registry.contains(&chain_key) {
            chain_key
        } else {
            debug!(
                chain = %chain_key,
                default = %self.default_chain,
                "unknown chain key, remapping to default chain"
            );
            self.default_chain.clone()
        };

        let (completion, rx) = oneshot::channel();

        let full_batch = {
            let mut queues = self.queues.lock();
            let queue = queues.entry(key.clone()).or_default();
            queue.entries.push_back(PendingEntry {
                trade,
                completion,
                enqueued_at: Instant::now(),
            });

            if queue.entries.len() >= self.config.batch_size {
                if let Some(timer) = queue.timer.take() {
                    timer.abort();
                }
                let take = self.config.batch_size.min(queue.entries.len());
                Some(queue.entries.drain(..take).collect::<Vec<_>>())
            } else {
                if queue.timer.is_none() {
                    queue.timer_gen += 1;
                    let gen = queue.timer_gen;
                    let aggregator = self.clone();
                    let timer_key = key.clone();
                    let wait = self.config.max_batch_wait;
                    queue.timer = Some(tokio::spawn(async move {
                        tokio::time::sleep(wait).await;
                        aggregator.flush_expired(timer_key, gen).await;
                    }));
                }
                None
            }
        };

        if let Some(batch) = full_batch {
            let aggregator = self.clone();
            let batch_key = key;
            tokio::spawn(async move {
                aggregator.run_batch(batch_key, batch).await;
            });
        }

        async move {
            match rx.await {
                Ok(outcome) => outcome,
                Err(_) => Err(BatchError::Aborted),
            }
        }
    }

    /// Execute an aggregate batch immediately, bypassing the queues.
    /// Used for caller-provided trade lists that settle as one batch.
    pub async fn execute_now(
        &self,
        chain_key: &ChainKey,
        trades: &[Trade],
    ) -> std::result::Result<Vec<SettlementResult>, BatchError> {
        if trades.is_empty() {
            return Ok(Vec::new());
        }
        self.settle_aggregate(chain_key, trades).await
    }

    /// Cancel every pending timer and force-execute every non-empty queue.
    /// Idempotent; safe with empty queues. Used at shutdown.
    #[instrument(skip(self))]
    pub async fn flush_all(&self) {
        let keys: Vec<ChainKey> = self.queues.lock().keys().cloned().collect();
        for key in keys {
            while let Some(batch) = self.drain_chain(&key) {
                self.run_batch(key.clone(), batch).await;
            }
        }
    }

    /// Queue depth for one chain
    pub fn pending_len(&self, chain_key: &ChainKey) -> usize {
        self.queues
            .lock()
            .get(chain_key)
            .map(|q| q.entries.len())
            .unwrap_or(0)
    }

    /// Snapshot of batching counters and queue depths
    pub fn stats(&self) -> BatchStats {
        let totals = self.totals.lock();
        let pending = self
            .queues
            .lock()
            .iter()
            .filter(|(_, q)| !q.entries.is_empty())
            .map(|(k, q)| (k.clone(), q.entries.len()))
            .collect();

        BatchStats {
            total_trades: totals.total_trades,
            total_batches: totals.total_batches,
            avg_batch_size: if totals.total_batches > 0 {
                totals.total_trades as f64 / totals.total_batches as f64
            } else {
                0.0
            },
            gas_saved_usd: totals.gas_saved_usd,
            max_tps: totals.max_tps,
            pending,
        }
    }

    /// Timer-driven flush. A no-op if a size-triggered drain already took
    /// this timer's generation.
    async fn flush_expired(&self, key: ChainKey, gen: u64) {
        let batch = {
            let mut queues = self.queues.lock();
            match queues.get_mut(&key) {
                Some(queue) if queue.timer.is_some() && queue.timer_gen == gen => {
                    // This task owns the timer slot; drop the handle without
                    // aborting (it is our own).
                    queue.timer = None;
                    let take = self.config.batch_size.min(queue.entries.len());
                    queue.entries.drain(..take).collect::<Vec<_>>()
                }
                _ => return,
            }
        };
        self.run_batch(key, batch).await;
    }

    fn drain_chain(&self, key: &ChainKey) -> Option<Vec<PendingEntry>> {
        let mut queues = self.queues.lock();
        let queue = queues.get_mut(key)?;
        if let Some(timer) = queue.timer.take() {
            timer.abort();
        }
        if queue.entries.is_empty() {
            return None;
        }
        let take = self.config.batch_size.min(queue.entries.len());
        Some(queue.entries.drain(..take).collect())
    }

    /// Resolve or reject every member of a drained batch (fate-sharing).
    async fn run_batch(&self, key: ChainKey, batch: Vec<PendingEntry>) {
        if batch.is_empty() {
            return;
        }

        let queued_ms = batch
            .first()
            .map(|e| e.enqueued_at.elapsed().as_millis() as u64)
            .unwrap_or(0);
        debug!(chain = %key, trades = batch.len(), queued_ms, "executing batch");

        let trades: Vec<Trade> = batch.iter().map(|e| e.trade.clone()).collect();
        match self.settle_aggregate(&key, &trades).await {
            Ok(results) => {
                for (entry, result) in batch.into_iter().zip(results) {
                    let _ = entry.completion.send(Ok(result));
                }
            }
            Err(err) => {
                for entry in batch {
                    let _ = entry.completion.send(Err(err.clone()));
                }
            }
        }
    }

    /// Build, "sign", and broadcast one aggregate settlement; split the
    /// aggregate gas evenly across the member results.
    async fn settle_aggregate(
        &self,
        key: &ChainKey,
        trades: &[Trade],
    ) -> std::result::Result<Vec<SettlementResult>, BatchError> {
        let n = trades.len();
        let chain = self
            .registry
            .get(key)
            .cloned()
            .ok_or_else(|| BatchError::BroadcastFailed {
                chain: key.clone(),
                batch_size: n,
                reason: "chain not registered".to_string(),
            })?;

        let batch_id = Uuid::new_v4();
        let payload = BatchPayload {
            batch_id,
            chain_key: key,
            trades,
        };
        let payload_bytes = bincode::serialize(&payload).map_err(|e| BatchError::Encode {
            reason: e.to_string(),
        })?;
        let signature = hex::encode(Sha256::digest(&payload_bytes));
        debug!(%batch_id, chain = %key, trades = n, %signature, "broadcasting aggregate payload");

        let started = Instant::now();
        let receipt = match self.simulator.broadcast_batch(&chain, trades).await {
            Ok(receipt) => receipt,
            Err(e) => {
                warn!(chain = %key, trades = n, error = %e, "batch broadcast failed, rejecting all members");
                self.ledger.record_error(key);
                return Err(BatchError::BroadcastFailed {
                    chain: key.clone(),
                    batch_size: n,
                    reason: e.to_string(),
                });
            }
        };

        let latency_ms = started.elapsed().as_millis() as u64;
        self.ledger
            .record_batch(key, n as u64, receipt.gas_cost_usd, latency_ms);

        {
            let mut totals = self.totals.lock();
            totals.total_trades += n as u64;
            totals.total_batches += 1;
            let individual_gas = chain.avg_gas_cost_usd * n as f64;
            totals.gas_saved_usd += individual_gas - receipt.gas_cost_usd;
            let tps = n as f64 / (latency_ms as f64 / 1000.0).max(1e-3);
            totals.max_tps = totals.max_tps.max(tps);
        }

        let per_trade_gas = receipt.gas_cost_usd / n as f64;
        Ok((0..n)
            .map(|index| SettlementResult {
                success: true,
                tx_hash: Some(format!("{}-{}", receipt.tx_hash, index)),
                gas_cost_usd: per_trade_gas,
                latency_ms,
                chain_key: Some(key.clone()),
                venue: Venue::Blockchain,
                path: SettlementPath::Batched,
                explorer_url: None,
                batch_size: Some(n),
                error: None,
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chains::{ChainSpec, FixedSimulator, SimReceipt};
    use crate::error::ExecutorError;
    use crate::types::TradeSide;
    use async_trait::async_trait;
    use futures::FutureExt;
    use std::time::Duration;

    struct FailingSimulator;

    #[async_trait]
    impl ChainSimulator for FailingSimulator {
        async fn simulate_settlement(&self, chain: &ChainSpec, _trade: &Trade) -> SimReceipt {
            SimReceipt {
                tx_hash: "unused".to_string(),
                gas_cost_usd: chain.avg_gas_cost_usd,
                latency_ms: 0,
            }
        }

        async fn broadcast_batch(
            &self,
            chain: &ChainSpec,
            _trades: &[Trade],
        ) -> std::result::Result<SimReceipt, ExecutorError> {
            Err(ExecutorError::Broadcast {
                network: chain.name.clone(),
                reason: "rpc unreachable".to_string(),
            })
        }
    }

    fn trade(size: f64) -> Trade {
        Trade::new("u1", "SOL/USDC", TradeSide::Buy, size, 150.0)
    }

    fn aggregator(batch_size: usize, wait_ms: u64) -> BatchAggregator {
        aggregator_with(batch_size, wait_ms, Arc::new(FixedSimulator::new()))
    }

    fn aggregator_with(
        batch_size: usize,
        wait_ms: u64,
        simulator: Arc<dyn ChainSimulator>,
    ) -> BatchAggregator {
        BatchAggregator::new(
            BatchConfig {
                batch_size,
                max_batch_wait: Duration::from_millis(wait_ms),
            },
            ChainKey::new("BASE"),
            Arc::new(ChainRegistry::builtin()),
            simulator,
            Arc::new(StatsLedger::new()),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_size_trigger_fires_before_max_wait() {
        let agg = aggregator(3, 60_000);
        let key = ChainKey::new("SOLANA");

        let futures: Vec<_> = (0..3)
            .map(|_| agg.add_trade(trade(10.0), key.clone()))
            .collect();

        // the third push drained the batch synchronously
        assert_eq!(agg.pending_len(&key), 0);

        for fut in futures {
            let result = fut.await.unwrap();
            assert!(result.success);
            assert_eq!(result.batch_size, Some(3));
            assert_eq!(result.path, SettlementPath::Batched);
        }

        let stats = agg.stats();
        assert_eq!(stats.total_batches, 1);
        assert_eq!(stats.total_trades, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timer_flushes_after_max_wait() {
        let agg = aggregator(100, 1000);
        let key = ChainKey::new("SOLANA");

        let mut f1 = tokio_test::task::spawn(agg.add_trade(trade(10.0), key.clone()));
        let mut f2 = tokio_test::task::spawn(agg.add_trade(trade(10.0), key.clone()));
        let mut f3 = tokio_test::task::spawn(agg.add_trade(trade(10.0), key.clone()));

        assert!(f1.poll().is_pending());
        assert!(f2.poll().is_pending());
        assert!(f3.poll().is_pending());
        assert_eq!(agg.pending_len(&key), 3);

        // just before the deadline nothing fires
        tokio::time::sleep(Duration::from_millis(999)).await;
        assert!(f1.poll().is_pending());
        assert_eq!(agg.pending_len(&key), 3);

        // at the deadline the whole batch resolves together
        tokio::time::sleep(Duration::from_millis(2)).await;
        tokio::task::yield_now().await;

        let r1 = f1.await.unwrap();
        let r2 = f2.await.unwrap();
        let r3 = f3.await.unwrap();
        assert_eq!(agg.pending_len(&key), 0);

        // equal split gas: 0.1 * 3 * P / 3 = 0.1 * P
        let expected_gas = 0.1 * 0.00025;
        for r in [&r1, &r2, &r3] {
            assert!(r.success);
            assert!((r.gas_cost_usd - expected_gas).abs() < 1e-12);
        }

        // shared tx hash, suffixed per index
        let base = r1.tx_hash.as_ref().unwrap().rsplit_once('-').unwrap().0.to_string();
        assert!(r2.tx_hash.as_ref().unwrap().starts_with(&base));
        assert!(r3.tx_hash.as_ref().unwrap().starts_with(&base));
    }

    #[tokio::test(start_paused = true)]
    async fn test_unknown_chain_remaps_to_default() {
        let agg = aggregator(1, 1000);
        let result = agg
            .add_trade(trade(10.0), ChainKey::new("DOGECHAIN"))
            .await
            .unwrap();
        assert_eq!(result.chain_key, Some(ChainKey::new("BASE")));
    }

    #[tokio::test(start_paused = true)]
    async fn test_fate_shared_failure() {
        let agg = aggregator_with(2, 1000, Arc::new(FailingSimulator));
        let key = ChainKey::new("SOLANA");

        let f1 = agg.add_trade(trade(10.0), key.clone());
        let f2 = agg.add_trade(trade(10.0), key.clone());

        let e1 = f1.await.unwrap_err();
        let e2 = f2.await.unwrap_err();
        assert_eq!(e1.to_string(), e2.to_string());
        assert!(matches!(e1, BatchError::BroadcastFailed { batch_size: 2, .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_flush_all_is_idempotent_and_empty_safe() {
        let agg = aggregator(100, 60_000);
        let key = ChainKey::new("ARBITRUM");

        // empty queues: nothing to do
        agg.flush_all().await;

        let fut = agg.add_trade(trade(10.0), key.clone());
        assert_eq!(agg.pending_len(&key), 1);

        agg.flush_all().await;
        assert_eq!(agg.pending_len(&key), 0);
        assert!(fut.await.unwrap().success);

        // a second flush finds nothing
        agg.flush_all().await;
        assert_eq!(agg.stats().total_batches, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_trades_after_drain_start_new_batch() {
        let agg = aggregator(2, 60_000);
        let key = ChainKey::new("SOLANA");

        let f1 = agg.add_trade(trade(10.0), key.clone());
        let f2 = agg.add_trade(trade(10.0), key.clone());
        let f3 = agg.add_trade(trade(10.0), key.clone());

        let r1 = f1.await.unwrap();
        let r2 = f2.await.unwrap();
        assert_eq!(r1.batch_size, Some(2));
        assert_eq!(r2.batch_size, Some(2));

        // the third trade began a fresh batch still waiting on its timer
        assert!(f3.now_or_never().is_none());
        assert_eq!(agg.pending_len(&key), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_execute_now_splits_gas_evenly() {
        let agg = aggregator(100, 1000);
        let key = ChainKey::new("BASE");
        let trades: Vec<Trade> = (0..4).map(|_| trade(100.0)).collect();

        let results = agg.execute_now(&key, &trades).await.unwrap();
        assert_eq!(results.len(), 4);

        let expected = 0.1 * 0.01;
        for r in &results {
            assert!((r.gas_cost_usd - expected).abs() < 1e-12);
            assert_eq!(r.batch_size, Some(4));
        }
    }
}
