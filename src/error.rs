/*!
Error types for settlement routing operations

Taxonomy for the routing engine: configuration, chain selection, executor,
batch, and trade-validation failures. Executor errors are consumed by the
router's simulated fallback and never reach callers; selector, configuration,
and validation errors propagate.
*/

use crate::chains::ChainKey;
use thiserror::Error;

/// Result type alias for settlement engine operations
pub type Result<T> = std::result::Result<T, Error>;

/// Top-level error for the settlement routing engine
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration errors
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Chain selection errors
    #[error("chain selection error: {0}")]
    Selector(#[from] SelectorError),

    /// Executor errors (signing/broadcast failures, unready wallets)
    #[error("executor error: {0}")]
    Executor(#[from] ExecutorError),

    /// Batch execution errors (shared across every member of the batch)
    #[error("batch error: {0}")]
    Batch(#[from] BatchError),

    /// Trade validation errors
    #[error("validation error: {0}")]
    Validation(#[from] ValidationError),

    /// Internal errors that shouldn't normally occur
    #[error("internal error: {0}")]
    Internal(String),
}

/// Configuration-specific errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("invalid configuration: {0}")]
    Invalid(String),

    #[error("unknown chain: {key}")]
    UnknownChain { key: ChainKey },

    #[error("duplicate chain registration: {key}")]
    DuplicateChain { key: ChainKey },

    #[error("invalid fee tier table: {0}")]
    InvalidTierTable(String),
}

/// Chain selection errors
#[derive(Error, Debug)]
pub enum SelectorError {
    /// The enabled chain set is empty. This is the one selection-level
    /// failure the router must propagate instead of swallowing.
    #[error("no enabled chains available for settlement")]
    NoEnabledChains,
}

/// Executor-level errors from a single real-chain settlement attempt
#[derive(Error, Debug)]
pub enum ExecutorError {
    #[error("executor for {network} is not ready (no wallet/session)")]
    NotReady { network: String },

    #[error("settlement execution failed on {network}: {reason}")]
    Execution { network: String, reason: String },

    #[error("broadcast failed on {network}: {reason}")]
    Broadcast { network: String, reason: String },
}

/// Batch-level errors. Cloneable so one failure can reject every member of
/// the batch with the same error (fate-sharing, no partial commit).
#[derive(Error, Debug, Clone)]
pub enum BatchError {
    #[error("batch of {batch_size} trades failed on {chain}: {reason}")]
    BroadcastFailed {
        chain: ChainKey,
        batch_size: usize,
        reason: String,
    },

    #[error("failed to encode batch payload: {reason}")]
    Encode { reason: String },

    #[error("batch aggregator shut down before the batch executed")]
    Aborted,
}

/// Trade validation errors
#[derive(Error, Debug)]
pub enum ValidationError {
    #[error("trade size ${size_usd} below minimum ${min_usd}")]
    BelowMinimumSize { size_usd: f64, min_usd: f64 },

    #[error("malformed trade field `{field}`: {reason}")]
    MalformedField {
        field: &'static str,
        reason: String,
    },
}

impl Error {
    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(ConfigError::Invalid(msg.into()))
    }

    /// Create an internal error
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Check if this error is retryable
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Executor(ExecutorError::Broadcast { .. }) => true,
            Error::Executor(ExecutorError::NotReady { .. }) => true,
            Error::Batch(BatchError::BroadcastFailed { .. }) => true,
            _ => false,
        }
    }

    /// Get the error category for logging and stats
    pub fn category(&self) -> &'static str {
        match self {
            Error::Config(_) => "config",
            Error::Selector(_) => "selector",
            Error::Executor(_) => "executor",
            Error::Batch(_) => "batch",
            Error::Validation(_) => "validation",
            Error::Internal(_) => "internal",
        }
    }
}
