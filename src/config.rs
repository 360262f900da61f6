/*!
Router configuration

Nested configuration for venue routing, batch aggregation, and concurrency
control, with a builder and validation. Defaults reproduce the production
deployment: $50 internal threshold, 100-trade batches with a 1 s max wait,
1000 concurrent settlements, cheapest-first selection.
*/

use crate::chains::ChainKey;
use crate::error::{Error, Result};
use crate::routing::SelectionStrategy;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Main settlement router configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RouterConfig {
    /// Trades below this notional settle on the internal pool
    pub internal_threshold_usd: f64,

    /// Trades below this notional are rejected outright
    pub min_trade_size_usd: f64,

    /// Chain selection strategy for blockchain-routed trades
    pub strategy: SelectionStrategy,

    /// Chain that absorbs trades enqueued under an unknown chain key
    pub default_chain: ChainKey,

    /// Batch aggregation settings
    pub batch: BatchConfig,

    /// Concurrency control settings
    pub concurrency: ConcurrencyConfig,
}

/// Batch aggregation settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchConfig {
    /// Maximum trades per aggregate batch
    pub batch_size: usize,

    /// Maximum time a trade waits in the queue before the batch is forced
    pub max_batch_wait: Duration,
}

/// Concurrency control settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConcurrencyConfig {
    /// Maximum settlement operations in flight at once
    pub max_concurrent: usize,

    /// Poll interval of the soft-gate spin wait
    pub poll_interval: Duration,

    /// Sliding window over which instantaneous TPS is computed
    pub sample_window: Duration,

    /// Number of retained TPS samples for max/average reporting
    pub history_limit: usize,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            internal_threshold_usd: 50.0,
            min_trade_size_usd: 0.01,
            strategy: SelectionStrategy::CheapestFirst,
            default_chain: ChainKey::new("BASE"),
            batch: BatchConfig::default(),
            concurrency: ConcurrencyConfig::default(),
        }
    }
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            batch_size: 100,
            max_batch_wait: Duration::from_millis(1000),
        }
    }
}

impl Default for ConcurrencyConfig {
    fn default() -> Self {
        Self {
            max_concurrent: 1000,
            poll_interval: Duration::from_millis(10),
            sample_window: Duration::from_secs(5),
            history_limit: 100,
        }
    }
}

impl RouterConfig {
    /// Create a configuration builder
    pub fn builder() -> RouterConfigBuilder {
        RouterConfigBuilder::new()
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if !self.internal_threshold_usd.is_finite() || self.internal_threshold_usd < 0.0 {
            return Err(Error::config(
                "internal threshold must be a finite non-negative amount",
            ));
        }

        if !self.min_trade_size_usd.is_finite() || self.min_trade_size_usd < 0.0 {
            return Err(Error::config(
                "minimum trade size must be a finite non-negative amount",
            ));
        }

        if self.batch.batch_size == 0 {
            return Err(Error::config("batch size must be greater than 0"));
        }

        if self.batch.max_batch_wait.is_zero() {
            return Err(Error::config("max batch wait must be greater than 0"));
        }

        if self.concurrency.max_concurrent == 0 {
            return Err(Error::config("max concurrent must be greater than 0"));
        }

        if self.concurrency.history_limit == 0 {
            return Err(Error::config("TPS history limit must be greater than 0"));
        }

        Ok(())
    }
}

/// Builder for `RouterConfig`
pub struct RouterConfigBuilder {
    config: RouterConfig,
}

impl RouterConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: RouterConfig::default(),
        }
    }

    pub fn internal_threshold_usd(mut self, threshold: f64) -> Self {
        self.config.internal_threshold_usd = threshold;
        self
    }

    pub fn min_trade_size_usd(mut self, min: f64) -> Self {
        self.config.min_trade_size_usd = min;
        self
    }

    pub fn strategy(mut self, strategy: SelectionStrategy) -> Self {
        self.config.strategy = strategy;
        self
    }

    pub fn default_chain(mut self, key: ChainKey) -> Self {
        self.config.default_chain = key;
        self
    }

    pub fn batch_size(mut self, size: usize) -> Self {
        self.config.batch.batch_size = size;
        self
    }

    pub fn max_batch_wait(mut self, wait: Duration) -> Self {
        self.config.batch.max_batch_wait = wait;
        self
    }

    pub fn max_concurrent(mut self, max: usize) -> Self {
        self.config.concurrency.max_concurrent = max;
        self
    }

    pub fn build(self) -> Result<RouterConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}

impl Default for RouterConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}
