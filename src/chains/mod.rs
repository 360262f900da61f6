/*!
Chain metadata and registry

Static per-chain configuration consumed by selection, batching, and
simulation. Chains are registered once at startup and read-only afterwards;
registration order is significant because selection ties are broken in favor
of the earlier-registered chain.
*/

use crate::error::{ConfigError, Result};
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::fmt;

pub mod executor;
pub mod simulator;

pub use executor::{ChainExecutor, ExecutionReceipt, ExecutorStats};
pub use simulator::{ChainSimulator, FixedSimulator, SimReceipt, StochasticSimulator};

/// Uppercase string key identifying a chain (`SOLANA`, `BASE`, ...).
///
/// An open set: hosts may register chains beyond the built-in table.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ChainKey(String);

impl ChainKey {
    /// Create a key, normalizing to uppercase
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into().to_uppercase())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ChainKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for ChainKey {
    fn from(key: &str) -> Self {
        Self::new(key)
    }
}

/// Chain identifier as used by the network itself
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ChainId {
    /// EVM-style numeric chain id
    Evm(u64),
    /// Named cluster id (Solana's `mainnet-beta`)
    Named(String),
}

impl fmt::Display for ChainId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChainId::Evm(id) => write!(f, "{}", id),
            ChainId::Named(name) => write!(f, "{}", name),
        }
    }
}

/// Finality model of a chain
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Finality {
    /// Single-slot finality
    Instant,
    /// Optimistic rollup (days to L1 finality)
    Optimistic,
}

impl fmt::Display for Finality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Finality::Instant => write!(f, "instant"),
            Finality::Optimistic => write!(f, "optimistic"),
        }
    }
}

/// Native transaction hash encoding for a chain
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TxHashFormat {
    /// 88-character base58 signature (Solana-style)
    Base58,
    /// 0x-prefixed 64-hex-digit hash (EVM-style)
    Hex,
}

/// Static metadata for one settlement chain
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChainSpec {
    pub key: ChainKey,
    pub name: String,
    pub chain_id: ChainId,
    pub max_tps: u32,
    /// Average block time in seconds (sub-second for Solana/Arbitrum)
    pub avg_block_time_secs: f64,
    /// Average per-transaction gas cost in USD
    pub avg_gas_cost_usd: f64,
    pub finality: Finality,
    pub rpc_url: String,
    pub enabled: bool,
    /// Lower value = higher priority; used by the fallback strategy
    pub priority: u8,
    pub hash_format: TxHashFormat,
}

impl ChainSpec {
    /// Average block time expressed in milliseconds
    pub fn avg_block_time_ms(&self) -> u64 {
        (self.avg_block_time_secs * 1000.0) as u64
    }
}

static BUILTIN_CHAINS: Lazy<Vec<ChainSpec>> = Lazy::new(|| {
    vec![
        ChainSpec {
            key: ChainKey::new("SOLANA"),
            name: "Solana".to_string(),
            chain_id: ChainId::Named("mainnet-beta".to_string()),
            max_tps: 65_000,
            avg_block_time_secs: 0.4,
            avg_gas_cost_usd: 0.00025,
            finality: Finality::Instant,
            rpc_url: "https://api.mainnet-beta.solana.com".to_string(),
            enabled: true,
            priority: 1,
            hash_format: TxHashFormat::Base58,
        },
        ChainSpec {
            key: ChainKey::new("AVALANCHE"),
            name: "Avalanche C-Chain".to_string(),
            chain_id: ChainId::Evm(43114),
            max_tps: 4_500,
            avg_block_time_secs: 2.0,
            avg_gas_cost_usd: 0.001,
            finality: Finality::Instant,
            rpc_url: "https://api.avax.network/ext/bc/C/rpc".to_string(),
            enabled: true,
            priority: 2,
            hash_format: TxHashFormat::Hex,
        },
        ChainSpec {
            key: ChainKey::new("BASE"),
            name: "Base (Coinbase L2)".to_string(),
            chain_id: ChainId::Evm(8453),
            max_tps: 1_000,
            avg_block_time_secs: 2.0,
            avg_gas_cost_usd: 0.01,
            finality: Finality::Optimistic,
            rpc_url: "https://mainnet.base.org".to_string(),
            enabled: true,
            priority: 3,
            hash_format: TxHashFormat::Hex,
        },
        ChainSpec {
            key: ChainKey::new("ARBITRUM"),
            name: "Arbitrum One".to_string(),
            chain_id: ChainId::Evm(42161),
            max_tps: 40_000,
            avg_block_time_secs: 0.25,
            avg_gas_cost_usd: 0.02,
            finality: Finality::Optimistic,
            rpc_url: "https://arb1.arbitrum.io/rpc".to_string(),
            enabled: true,
            priority: 4,
            hash_format: TxHashFormat::Hex,
        },
        ChainSpec {
            key: ChainKey::new("OPTIMISM"),
            name: "Optimism".to_string(),
            chain_id: ChainId::Evm(10),
            max_tps: 2_000,
            avg_block_time_secs: 2.0,
            avg_gas_cost_usd: 0.02,
            finality: Finality::Optimistic,
            rpc_url: "https://mainnet.optimism.io".to_string(),
            enabled: true,
            priority: 5,
            hash_format: TxHashFormat::Hex,
        },
    ]
});

/// Registry of settlement chains, ordered by registration
#[derive(Debug, Clone)]
pub struct ChainRegistry {
    chains: Vec<ChainSpec>,
}

impl ChainRegistry {
    /// Empty registry
    pub fn new() -> Self {
        Self { chains: Vec::new() }
    }

    /// Registry pre-populated with the built-in chain table
    pub fn builtin() -> Self {
        Self {
            chains: BUILTIN_CHAINS.clone(),
        }
    }

    /// Register a chain. Keys must be unique.
    pub fn register(&mut self, spec: ChainSpec) -> Result<()> {
        if self.get(&spec.key).is_some() {
            return Err(ConfigError::DuplicateChain {
                key: spec.key.clone(),
            }
            .into());
        }
        self.chains.push(spec);
        Ok(())
    }

    /// Look up a chain by key
    pub fn get(&self, key: &ChainKey) -> Option<&ChainSpec> {
        self.chains.iter().find(|c| &c.key == key)
    }

    pub fn contains(&self, key: &ChainKey) -> bool {
        self.get(key).is_some()
    }

    /// Enabled chains in registration order
    pub fn enabled(&self) -> Vec<&ChainSpec> {
        self.chains.iter().filter(|c| c.enabled).collect()
    }

    /// All chains in registration order
    pub fn iter(&self) -> impl Iterator<Item = &ChainSpec> {
        self.chains.iter()
    }

    pub fn len(&self) -> usize {
        self.chains.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chains.is_empty()
    }

    /// Enable or disable a chain in place. Returns false for unknown keys.
    pub fn set_enabled(&mut self, key: &ChainKey, enabled: bool) -> bool {
        match self.chains.iter_mut().find(|c| &c.key == key) {
            Some(chain) => {
                chain.enabled = enabled;
                true
            }
            None => false,
        }
    }
}

impl Default for ChainRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}
