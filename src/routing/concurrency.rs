/*!
Bounded-concurrency trade execution

Caps the number of in-flight settlement operations and measures realized
throughput. Two dispatch modes exist and are deliberately distinct:

- **soft gate** (`execute_batch`): each trade spin-waits (short sleep poll)
  until the in-flight count drops below the cap, then runs; trades from
  different calls interleave freely.
- **chunk barrier** (`execute_with_control`): the input is partitioned into
  sequential chunks of `max_concurrent`; chunk *k+1* does not start until
  chunk *k* has fully settled. Completion order inside a chunk is
  unspecified.

A background sampler recomputes instantaneous TPS from a 5-second sliding
window of completion timestamps and retains a capped history for max/average
reporting.
*/

use crate::config::ConcurrencyConfig;
use crate::error::Result;
use crate::types::{SettlementResult, Trade};
use futures::future::join_all;
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::VecDeque;
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::debug;

/// How a list of trades is scheduled through the controller
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DispatchMode {
    /// Per-trade spin-wait gate; all trades launched at once
    #[default]
    SoftGate,
    /// Hard synchronization barrier between sequential chunks
    ChunkBarrier,
}

/// Outcome of one gated batch run
pub struct BatchRun {
    pub results: Vec<Result<SettlementResult>>,
    pub elapsed: Duration,
    /// Realized throughput of this call
    pub tps: f64,
    pub successful: usize,
    pub failed: usize,
}

/// Snapshot of controller metrics
#[derive(Debug, Clone, Serialize)]
pub struct ControllerStats {
    pub total_trades: u64,
    pub avg_latency_ms: f64,
    pub active: usize,
    pub peak_concurrent: usize,
    pub current_tps: f64,
    pub average_tps: f64,
    pub max_tps: f64,
}

#[derive(Default)]
struct RunTotals {
    total_trades: u64,
    total_latency_ms: u64,
}

/// Bounds in-flight settlement operations to `max_concurrent`.
pub struct ConcurrencyController {
    config: ConcurrencyConfig,
    active: Arc<AtomicUsize>,
    peak: AtomicUsize,
    completions: Arc<Mutex<VecDeque<Instant>>>,
    history: Arc<Mutex<VecDeque<f64>>>,
    totals: Mutex<RunTotals>,
    sampler: Mutex<Option<JoinHandle<()>>>,
    stopped: AtomicBool,
}

impl ConcurrencyController {
    /// Create a controller and start its TPS sampler. Must be called from
    /// within a tokio runtime.
    pub fn new(config: ConcurrencyConfig) -> Self {
        let completions: Arc<Mutex<VecDeque<Instant>>> = Arc::new(Mutex::new(VecDeque::new()));
        let history: Arc<Mutex<VecDeque<f64>>> = Arc::new(Mutex::new(VecDeque::new()));

        let sampler = {
            let completions = completions.clone();
            let history = history.clone();
            let window = config.sample_window;
            let limit = config.history_limit;
            tokio::spawn(async move {
                let mut ticker = tokio::time::interval(Duration::from_secs(1));
                ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
                loop {
                    ticker.tick().await;
                    let tps = windowed_tps(&completions, window);
                    let mut samples = history.lock();
                    samples.push_back(tps);
                    while samples.len() > limit {
                        samples.pop_front();
                    }
                }
            })
        };

        Self {
            config,
            active: Arc::new(AtomicUsize::new(0)),
            peak: AtomicUsize::new(0),
            completions,
            history,
            totals: Mutex::new(RunTotals::default()),
            sampler: Mutex::new(Some(sampler)),
            stopped: AtomicBool::new(false),
        }
    }

    /// Execute one trade under the soft gate: spin (poll with a short
    /// sleep) while at capacity, run, and decrement in a guard that fires
    /// regardless of success, failure, or cancellation.
    pub async fn execute_trade<F, Fut>(&self, trade: Trade, executor: &F) -> Result<SettlementResult>
    where
        F: Fn(Trade) -> Fut,
        Fut: Future<Output = Result<SettlementResult>>,
    {
        loop {
            let current = self.active.load(Ordering::Acquire);
            if current < self.config.max_concurrent {
                if self
                    .active
                    .compare_exchange(current, current + 1, Ordering::AcqRel, Ordering::Acquire)
                    .is_ok()
                {
                    break;
                }
            } else {
                tokio::time::sleep(self.config.poll_interval).await;
            }
        }

        self.peak
            .fetch_max(self.active.load(Ordering::Acquire), Ordering::AcqRel);
        let _guard = ActiveGuard(self.active.clone());

        let started = Instant::now();
        let result = executor(trade).await;
        let latency_ms = started.elapsed().as_millis() as u64;

        {
            let mut totals = self.totals.lock();
            totals.total_trades += 1;
            totals.total_latency_ms += latency_ms;
        }
        self.completions.lock().push_back(Instant::now());

        result
    }

    /// Run a list of trades concurrently, each gated by the soft spin-wait,
    /// and report the realized TPS for the call.
    pub async fn execute_batch<F, Fut>(&self, trades: Vec<Trade>, executor: &F) -> BatchRun
    where
        F: Fn(Trade) -> Fut,
        Fut: Future<Output = Result<SettlementResult>>,
    {
        let count = trades.len();
        let started = Instant::now();

        let results = join_all(
            trades
                .into_iter()
                .map(|trade| self.execute_trade(trade, executor)),
        )
        .await;

        let elapsed = started.elapsed();
        let tps = count as f64 / elapsed.as_secs_f64().max(1e-3);
        let successful = results
            .iter()
            .filter(|r| matches!(r, Ok(res) if res.success))
            .count();

        debug!(trades = count, elapsed_ms = elapsed.as_millis() as u64, tps, "gated batch complete");

        BatchRun {
            failed: count - successful,
            successful,
            tps,
            elapsed,
            results,
        }
    }

    /// Run trades in sequential chunks of `max_concurrent`: a hard barrier
    /// separates chunks, so chunk *k+1* starts only after chunk *k* has
    /// fully settled.
    pub async fn execute_with_control<F, Fut>(
        &self,
        trades: Vec<Trade>,
        executor: &F,
    ) -> Vec<Result<SettlementResult>>
    where
        F: Fn(Trade) -> Fut,
        Fut: Future<Output = Result<SettlementResult>>,
    {
        let total = trades.len();
        let chunk_size = self.config.max_concurrent;
        let mut results = Vec::with_capacity(total);
        let mut remaining = trades.into_iter();
        let mut chunk_index = 0usize;

        loop {
            let chunk: Vec<Trade> = remaining.by_ref().take(chunk_size).collect();
            if chunk.is_empty() {
                break;
            }
            chunk_index += 1;
            debug!(chunk = chunk_index, trades = chunk.len(), "processing chunk");
            let run = self.execute_batch(chunk, executor).await;
            results.extend(run.results);
        }

        results
    }

    /// Dispatch trades under the named mode
    pub async fn dispatch<F, Fut>(
        &self,
        trades: Vec<Trade>,
        mode: DispatchMode,
        executor: &F,
    ) -> Vec<Result<SettlementResult>>
    where
        F: Fn(Trade) -> Fut,
        Fut: Future<Output = Result<SettlementResult>>,
    {
        match mode {
            DispatchMode::SoftGate => self.execute_batch(trades, executor).await.results,
            DispatchMode::ChunkBarrier => self.execute_with_control(trades, executor).await,
        }
    }

    /// Instantaneous TPS over the sliding window
    pub fn current_tps(&self) -> f64 {
        windowed_tps(&self.completions, self.config.sample_window)
    }

    /// Average of the retained TPS samples
    pub fn average_tps(&self) -> f64 {
        let samples = self.history.lock();
        if samples.is_empty() {
            return 0.0;
        }
        samples.iter().sum::<f64>() / samples.len() as f64
    }

    /// Highest retained TPS sample
    pub fn max_tps(&self) -> f64 {
        self.history.lock().iter().copied().fold(0.0, f64::max)
    }

    /// Currently in-flight operations
    pub fn active(&self) -> usize {
        self.active.load(Ordering::Acquire)
    }

    /// Highest observed in-flight count
    pub fn peak_concurrent(&self) -> usize {
        self.peak.load(Ordering::Acquire)
    }

    /// Metrics snapshot
    pub fn stats(&self) -> ControllerStats {
        let totals = self.totals.lock();
        ControllerStats {
            total_trades: totals.total_trades,
            avg_latency_ms: if totals.total_trades > 0 {
                totals.total_latency_ms as f64 / totals.total_trades as f64
            } else {
                0.0
            },
            active: self.active(),
            peak_concurrent: self.peak_concurrent(),
            current_tps: self.current_tps(),
            average_tps: self.average_tps(),
            max_tps: self.max_tps(),
        }
    }

    /// Stop the TPS sampler. Idempotent.
    pub fn shutdown(&self) {
        if self.stopped.swap(true, Ordering::AcqRel) {
            return;
        }
        if let Some(handle) = self.sampler.lock().take() {
            handle.abort();
        }
    }
}

impl Drop for ConcurrencyController {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Decrements the in-flight counter when dropped, so the slot is released
/// even if the settlement future panics or is cancelled.
struct ActiveGuard(Arc<AtomicUsize>);

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::AcqRel);
    }
}

fn windowed_tps(completions: &Mutex<VecDeque<Instant>>, window: Duration) -> f64 {
    let now = Instant::now();
    let mut timestamps = completions.lock();
    while let Some(front) = timestamps.front() {
        if now.duration_since(*front) >= window {
            timestamps.pop_front();
        } else {
            break;
        }
    }
    timestamps.len() as f64 / window.as_secs_f64()
}
