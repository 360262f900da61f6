/*!
Chain settlement simulation

Deterministic-structure, randomized-magnitude stand-in for real on-chain
execution. The router falls back to the simulator when a real settlement
attempt fails or no executor is configured; the batch aggregator broadcasts
aggregate payloads through it. Injectable as a strategy so tests can
substitute fixed values.
*/

use crate::chains::{ChainSpec, TxHashFormat};
use crate::error::ExecutorError;
use crate::types::Trade;
use async_trait::async_trait;
use rand::Rng;
use std::time::Duration;

/// Solana's base58 alphabet (no 0, O, I, l)
const BASE58_ALPHABET: &[u8] = b"123456789ABCDEFGHJKLMNPQRSTUVWXYZabcdefghijkmnopqrstuvwxyz";
const BASE58_SIG_LEN: usize = 88;
const HEX_HASH_LEN: usize = 64;

/// Fraction of summed individual gas an aggregate batch pays (90% savings)
pub const BATCH_GAS_FACTOR: f64 = 0.1;

/// Receipt from a simulated settlement or aggregate batch broadcast
#[derive(Debug, Clone)]
pub struct SimReceipt {
    /// For batch broadcasts this hash is shared; members receive it suffixed
    /// with their index
    pub tx_hash: String,
    /// Gas in USD (the aggregate amount for batch broadcasts)
    pub gas_cost_usd: f64,
    pub latency_ms: u64,
}

/// Simulated settlement strategy for a chain.
#[async_trait]
pub trait ChainSimulator: Send + Sync {
    /// Simulate settling a single trade on `chain`. Always succeeds: the
    /// simulated path is the terminal fallback and has no failure mode.
    async fn simulate_settlement(&self, chain: &ChainSpec, trade: &Trade) -> SimReceipt;

    /// Broadcast an aggregate batch on `chain`
    async fn broadcast_batch(
        &self,
        chain: &ChainSpec,
        trades: &[Trade],
    ) -> Result<SimReceipt, ExecutorError>;
}

/// Production simulator: block-time latency, ±20% gas variance, synthetic
/// hashes in the chain's native format.
#[derive(Debug, Default, Clone)]
pub struct StochasticSimulator;

impl StochasticSimulator {
    pub fn new() -> Self {
        Self
    }

    fn synthetic_tx_hash(format: TxHashFormat) -> String {
        let mut rng = rand::thread_rng();
        match format {
            TxHashFormat::Base58 => (0..BASE58_SIG_LEN)
                .map(|_| BASE58_ALPHABET[rng.gen_range(0..BASE58_ALPHABET.len())] as char)
                .collect(),
            TxHashFormat::Hex => {
                let mut bytes = [0u8; HEX_HASH_LEN / 2];
                rng.fill(&mut bytes[..]);
                format!("0x{}", hex::encode(bytes))
            }
        }
    }
}

#[async_trait]
impl ChainSimulator for StochasticSimulator {
    async fn simulate_settlement(&self, chain: &ChainSpec, _trade: &Trade) -> SimReceipt {
        let latency_ms = chain.avg_block_time_ms();
        tokio::time::sleep(Duration::from_millis(latency_ms)).await;

        // ±20% variance around the chain's average gas cost
        let variance = rand::thread_rng().gen_range(0.8..1.2);
        SimReceipt {
            tx_hash: Self::synthetic_tx_hash(chain.hash_format),
            gas_cost_usd: chain.avg_gas_cost_usd * variance,
            latency_ms,
        }
    }

    async fn broadcast_batch(
        &self,
        chain: &ChainSpec,
        trades: &[Trade],
    ) -> Result<SimReceipt, ExecutorError> {
        let latency_ms = chain.avg_block_time_ms();
        tokio::time::sleep(Duration::from_millis(latency_ms)).await;

        let individual_gas = trades.len() as f64 * chain.avg_gas_cost_usd;
        Ok(SimReceipt {
            tx_hash: Self::synthetic_tx_hash(chain.hash_format),
            gas_cost_usd: individual_gas * BATCH_GAS_FACTOR,
            latency_ms,
        })
    }
}

/// Deterministic simulator for tests: no delays, exact average gas, counter
/// hashes.
#[derive(Debug, Default)]
pub struct FixedSimulator {
    counter: std::sync::atomic::AtomicU64,
}

impl FixedSimulator {
    pub fn new() -> Self {
        Self::default()
    }

    fn next_hash(&self, chain: &ChainSpec) -> String {
        let n = self
            .counter
            .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        format!("SIM-{}-{}", chain.key, n)
    }
}

#[async_trait]
impl ChainSimulator for FixedSimulator {
    async fn simulate_settlement(&self, chain: &ChainSpec, _trade: &Trade) -> SimReceipt {
        SimReceipt {
            tx_hash: self.next_hash(chain),
            gas_cost_usd: chain.avg_gas_cost_usd,
            latency_ms: chain.avg_block_time_ms(),
        }
    }

    async fn broadcast_batch(
        &self,
        chain: &ChainSpec,
        trades: &[Trade],
    ) -> Result<SimReceipt, ExecutorError> {
        Ok(SimReceipt {
            tx_hash: self.next_hash(chain),
            gas_cost_usd: trades.len() as f64 * chain.avg_gas_cost_usd * BATCH_GAS_FACTOR,
            latency_ms: chain.avg_block_time_ms(),
        })
    }
}
