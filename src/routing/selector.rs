/*!
Chain selection strategies

Picks the best enabled chain for a blockchain-routed trade. Ties are broken
in favor of the earlier-registered chain; an empty enabled set is the one
selection failure that propagates to callers.
*/

use crate::chains::ChainSpec;
use crate::error::SelectorError;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use tracing::warn;

/// Strategy for choosing a settlement chain
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SelectionStrategy {
    /// Ascending average gas cost
    CheapestFirst,
    /// Ascending average block time
    FastestFirst,
    /// Minimize normalized cost + normalized block time
    Balanced,
    /// Ascending configured priority; also the fallback for unrecognized
    /// strategy strings
    Priority,
}

impl FromStr for SelectionStrategy {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s.to_uppercase().as_str() {
            "CHEAPEST_FIRST" => Self::CheapestFirst,
            "FASTEST_FIRST" => Self::FastestFirst,
            "BALANCED" => Self::Balanced,
            "PRIORITY" => Self::Priority,
            other => {
                warn!(strategy = other, "unrecognized selection strategy, defaulting to priority");
                Self::Priority
            }
        })
    }
}

impl std::fmt::Display for SelectionStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::CheapestFirst => "CHEAPEST_FIRST",
            Self::FastestFirst => "FASTEST_FIRST",
            Self::Balanced => "BALANCED",
            Self::Priority => "PRIORITY",
        };
        write!(f, "{}", name)
    }
}

/// Stateless chain selector
pub struct ChainSelector;

impl ChainSelector {
    /// Select the best chain from `chains` (enabled set, registration
    /// order). Returns `NoEnabledChainsError` on an empty set.
    pub fn select<'a>(
        strategy: SelectionStrategy,
        chains: &[&'a ChainSpec],
    ) -> Result<&'a ChainSpec, SelectorError> {
        if chains.is_empty() {
            return Err(SelectorError::NoEnabledChains);
        }

        let selected = match strategy {
            SelectionStrategy::CheapestFirst => min_first(chains, |c| c.avg_gas_cost_usd),
            SelectionStrategy::FastestFirst => min_first(chains, |c| c.avg_block_time_secs),
            SelectionStrategy::Balanced => {
                let max_cost = chains
                    .iter()
                    .map(|c| c.avg_gas_cost_usd)
                    .fold(f64::MIN, f64::max)
                    .max(f64::MIN_POSITIVE);
                let max_time = chains
                    .iter()
                    .map(|c| c.avg_block_time_secs)
                    .fold(f64::MIN, f64::max)
                    .max(f64::MIN_POSITIVE);
                min_first(chains, |c| {
                    c.avg_gas_cost_usd / max_cost + c.avg_block_time_secs / max_time
                })
            }
            SelectionStrategy::Priority => min_first(chains, |c| c.priority as f64),
        };

        Ok(selected)
    }
}

/// First chain with the strictly smallest score: earlier-registered chains
/// win ties.
fn min_first<'a, F>(chains: &[&'a ChainSpec], score: F) -> &'a ChainSpec
where
    F: Fn(&ChainSpec) -> f64,
{
    let mut best = chains[0];
    let mut best_score = score(best);
    for &chain in &chains[1..] {
        let s = score(chain);
        if s < best_score {
            best = chain;
            best_score = s;
        }
    }
    best
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chains::{ChainKey, ChainRegistry};

    fn builtin() -> ChainRegistry {
        ChainRegistry::builtin()
    }

    #[test]
    fn test_cheapest_first_picks_solana() {
        let registry = builtin();
        let chains = registry.enabled();
        let selected = ChainSelector::select(SelectionStrategy::CheapestFirst, &chains).unwrap();
        assert_eq!(selected.key, ChainKey::new("SOLANA"));
    }

    #[test]
    fn test_fastest_first_picks_arbitrum() {
        // Arbitrum's 250 ms blocks beat Solana's 400 ms
        let registry = builtin();
        let chains = registry.enabled();
        let selected = ChainSelector::select(SelectionStrategy::FastestFirst, &chains).unwrap();
        assert_eq!(selected.key, ChainKey::new("ARBITRUM"));
    }

    #[test]
    fn test_balanced_scores_cost_plus_speed() {
        // Solana: minimal cost and near-minimal block time dominates
        let registry = builtin();
        let chains = registry.enabled();
        let selected = ChainSelector::select(SelectionStrategy::Balanced, &chains).unwrap();
        assert_eq!(selected.key, ChainKey::new("SOLANA"));
    }

    #[test]
    fn test_priority_order() {
        let registry = builtin();
        let chains = registry.enabled();
        let selected = ChainSelector::select(SelectionStrategy::Priority, &chains).unwrap();
        assert_eq!(selected.key, ChainKey::new("SOLANA"));
    }

    #[test]
    fn test_tie_broken_by_registration_order() {
        // Arbitrum and Optimism share avg_gas_cost_usd = 0.02; with the
        // cheaper chains disabled, the earlier-registered Arbitrum wins.
        let mut registry = builtin();
        registry.set_enabled(&ChainKey::new("SOLANA"), false);
        registry.set_enabled(&ChainKey::new("AVALANCHE"), false);
        registry.set_enabled(&ChainKey::new("BASE"), false);

        let chains = registry.enabled();
        let selected = ChainSelector::select(SelectionStrategy::CheapestFirst, &chains).unwrap();
        assert_eq!(selected.key, ChainKey::new("ARBITRUM"));
    }

    #[test]
    fn test_empty_enabled_set_errors() {
        let mut registry = builtin();
        for key in ["SOLANA", "AVALANCHE", "BASE", "ARBITRUM", "OPTIMISM"] {
            registry.set_enabled(&ChainKey::new(key), false);
        }
        let chains = registry.enabled();
        let err = ChainSelector::select(SelectionStrategy::CheapestFirst, &chains);
        assert!(matches!(err, Err(SelectorError::NoEnabledChains)));
    }

    #[test]
    fn test_unrecognized_strategy_falls_back_to_priority() {
        let parsed: SelectionStrategy = "ROUND_ROBIN".parse().unwrap();
        assert_eq!(parsed, SelectionStrategy::Priority);

        let parsed: SelectionStrategy = "cheapest_first".parse().unwrap();
        assert_eq!(parsed, SelectionStrategy::CheapestFirst);
    }
}
