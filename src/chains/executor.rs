/*!
External chain executor contract

One implementation per chain, owned by the host: wallet custody, RPC clients,
and transaction encoding live behind this trait. The router only asks whether
the executor is ready (wallet/session present), submits single settlements,
and reads cumulative stats. An executor without a loaded wallet stays
registered in read-only mode and reports `is_ready() == false`.
*/

use crate::error::Result;
use crate::types::Trade;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Receipt from one real settlement attempt.
///
/// `success == false` with an `error` message is treated exactly like an
/// `Err` by the router: both trigger the simulated fallback.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionReceipt {
    pub success: bool,
    pub tx_hash: String,
    pub gas_cost_usd: f64,
    pub latency_ms: u64,
    pub confirmed: bool,
    pub explorer_url: Option<String>,
    pub error: Option<String>,
}

/// Cumulative per-executor counters
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExecutorStats {
    pub network: String,
    pub wallet: Option<String>,
    pub settlements: u64,
    pub total_gas_cost_usd: f64,
    pub errors: u64,
}

impl ExecutorStats {
    /// Fraction of attempts that settled, in `[0, 1]`
    pub fn success_rate(&self) -> f64 {
        let attempts = self.settlements + self.errors;
        if attempts == 0 {
            return 0.0;
        }
        self.settlements as f64 / attempts as f64
    }
}

/// Signs and broadcasts settlements on one chain.
#[async_trait]
pub trait ChainExecutor: Send + Sync {
    /// Human-readable network name (`Solana`, `Base`, ...)
    fn network(&self) -> &str;

    /// Whether a wallet/session is loaded and the executor can sign
    fn is_ready(&self) -> bool;

    /// Native-token balance of the settlement wallet, if known
    async fn balance(&self) -> Result<Option<f64>>;

    /// Sign and broadcast a single settlement
    async fn execute_settlement(&self, trade: &Trade) -> Result<ExecutionReceipt>;

    /// Cumulative execution stats
    fn stats(&self) -> ExecutorStats;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_success_rate() {
        let stats = ExecutorStats {
            network: "Solana".to_string(),
            settlements: 9,
            errors: 1,
            ..Default::default()
        };
        assert!((stats.success_rate() - 0.9).abs() < 1e-9);
        assert_eq!(ExecutorStats::default().success_rate(), 0.0);
    }
}
