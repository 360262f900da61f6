/*!
Throughput-tiered fee engine

Tracks a rolling 60-second trade window per user, assigns a fee tier from the
resulting trades-per-second rate, and computes trading fee, gas subsidy, and
maker rebate for each trade. Tier boundaries are inclusive-low/exclusive-high
and must partition `[0, ∞)` without gaps or overlap.

A market-maker tier may carry a negative `maker_rebate_rate`: the rebate is
added to the trading fee, which can reduce it below zero: the platform pays
the trader. That is an allowed business outcome, recorded in the revenue
ledger rather than clamped.
*/

use crate::error::{ConfigError, Result};
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::time::Duration;
use tokio::time::Instant;

/// Length of the rolling per-user trade-rate window
const TPS_WINDOW: Duration = Duration::from_secs(60);

/// One throughput bracket of the fee schedule.
///
/// `[tps_min, tps_max)`: the lower bound is inclusive, the upper exclusive.
/// The top tier uses `f64::INFINITY` as its upper bound.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeeTier {
    pub name: String,
    pub tps_min: f64,
    pub tps_max: f64,
    /// Fraction of trade notional charged as trading fee
    pub trading_fee_rate: f64,
    /// Fraction of gas cost the platform absorbs
    pub gas_subsidy_rate: f64,
    /// Negative values rebate makers per unit of notional
    pub maker_rebate_rate: f64,
}

impl FeeTier {
    /// Whether `tps` falls inside this tier's bracket
    pub fn contains(&self, tps: f64) -> bool {
        tps >= self.tps_min && tps < self.tps_max
    }

    /// The production four-tier schedule
    pub fn defaults() -> Vec<FeeTier> {
        vec![
            FeeTier {
                name: "Retail".to_string(),
                tps_min: 0.0,
                tps_max: 1.0,
                trading_fee_rate: 0.001,
                gas_subsidy_rate: 0.0,
                maker_rebate_rate: 0.0,
            },
            FeeTier {
                name: "Active".to_string(),
                tps_min: 1.0,
                tps_max: 10.0,
                trading_fee_rate: 0.0008,
                gas_subsidy_rate: 0.25,
                maker_rebate_rate: 0.0,
            },
            FeeTier {
                name: "Pro".to_string(),
                tps_min: 10.0,
                tps_max: 100.0,
                trading_fee_rate: 0.0005,
                gas_subsidy_rate: 0.50,
                maker_rebate_rate: 0.0,
            },
            FeeTier {
                name: "Market Maker".to_string(),
                tps_min: 100.0,
                tps_max: f64::INFINITY,
                trading_fee_rate: 0.0002,
                gas_subsidy_rate: 0.75,
                maker_rebate_rate: -0.00001,
            },
        ]
    }
}

/// Tier assigned to a user together with the measured rate
#[derive(Debug, Clone)]
pub struct TierAssignment {
    pub index: usize,
    pub name: String,
    pub tps: f64,
}

/// Fee breakdown for one trade
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeeBreakdown {
    pub tier_index: usize,
    pub tier_name: String,
    pub tps: f64,
    /// May be negative when a maker rebate exceeds the base fee
    pub trading_fee: f64,
    pub trading_fee_rate: f64,
    pub gas_cost: f64,
    pub gas_subsidy: f64,
    pub user_gas_cost: f64,
    pub total_user_cost: f64,
    /// Fee collected minus subsidy paid; can go negative under rebates
    pub platform_net: f64,
    /// The applied rebate rate; zero for taker trades
    pub maker_rebate_rate: f64,
}

/// Per-tier revenue counters
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TierRevenue {
    pub trades: u64,
    pub fees: f64,
    pub gas_cost: f64,
    pub subsidy: f64,
    pub rebates: f64,
    pub net: f64,
}

/// Accumulated revenue across all tiers
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RevenueReport {
    pub total_trades: u64,
    pub total_fees: f64,
    pub total_gas_cost: f64,
    pub total_subsidy: f64,
    pub total_rebates: f64,
    pub net_revenue: f64,
    pub by_tier: Vec<TierRevenue>,
}

/// Throughput-tiered fee engine
pub struct FeeTierEngine {
    tiers: Vec<FeeTier>,
    windows: DashMap<String, VecDeque<Instant>>,
    revenue: Mutex<RevenueReport>,
}

impl FeeTierEngine {
    /// Create an engine over a custom tier table. The table must start at 0,
    /// be contiguous, and end in an unbounded tier.
    pub fn new(tiers: Vec<FeeTier>) -> Result<Self> {
        Self::validate_tiers(&tiers)?;
        let by_tier = vec![TierRevenue::default(); tiers.len()];
        Ok(Self {
            tiers,
            windows: DashMap::new(),
            revenue: Mutex::new(RevenueReport {
                by_tier,
                ..Default::default()
            }),
        })
    }

    fn validate_tiers(tiers: &[FeeTier]) -> Result<()> {
        if tiers.is_empty() {
            return Err(ConfigError::InvalidTierTable("no tiers defined".to_string()).into());
        }

        if tiers[0].tps_min != 0.0 {
            return Err(ConfigError::InvalidTierTable(format!(
                "first tier must start at 0 tps, got {}",
                tiers[0].tps_min
            ))
            .into());
        }

        for pair in tiers.windows(2) {
            if pair[0].tps_max != pair[1].tps_min {
                return Err(ConfigError::InvalidTierTable(format!(
                    "gap or overlap between `{}` and `{}`",
                    pair[0].name, pair[1].name
                ))
                .into());
            }
        }

        let last = &tiers[tiers.len() - 1];
        if last.tps_max != f64::INFINITY {
            return Err(ConfigError::InvalidTierTable(format!(
                "last tier `{}` must be unbounded",
                last.name
            ))
            .into());
        }

        Ok(())
    }

    /// Tier table in effect
    pub fn tiers(&self) -> &[FeeTier] {
        &self.tiers
    }

    /// Current trade rate for a user over the rolling window. Prunes the
    /// window as a side effect; unknown users rate 0.
    pub fn user_tps(&self, user_id: &str) -> f64 {
        let now = Instant::now();
        match self.windows.get_mut(user_id) {
            Some(mut window) => {
                prune_window(window.value_mut(), now);
                window.len() as f64 / TPS_WINDOW.as_secs_f64()
            }
            None => 0.0,
        }
    }

    /// Assign the fee tier for a user's current trade rate
    pub fn tier(&self, user_id: &str) -> TierAssignment {
        let tps = self.user_tps(user_id);
        let index = self
            .tiers
            .iter()
            .position(|t| t.contains(tps))
            .unwrap_or(0);
        TierAssignment {
            index,
            name: self.tiers[index].name.clone(),
            tps,
        }
    }

    /// Record a trade into the user's rate window
    pub fn record_trade(&self, user_id: &str) {
        let now = Instant::now();
        let mut window = self.windows.entry(user_id.to_string()).or_default();
        prune_window(window.value_mut(), now);
        window.push_back(now);
    }

    /// Compute fees for a trade without recording it
    pub fn calculate_fees(
        &self,
        user_id: &str,
        size_usd: f64,
        is_maker: bool,
        gas_cost_usd: f64,
    ) -> FeeBreakdown {
        let assignment = self.tier(user_id);
        let tier = &self.tiers[assignment.index];

        let mut trading_fee = size_usd * tier.trading_fee_rate;
        let maker_rebate_rate = if is_maker && tier.maker_rebate_rate < 0.0 {
            // Rebate is negative: this reduces, and can invert, the fee
            trading_fee += size_usd * tier.maker_rebate_rate;
            tier.maker_rebate_rate
        } else {
            0.0
        };

        let gas_subsidy = gas_cost_usd * tier.gas_subsidy_rate;
        let user_gas_cost = gas_cost_usd - gas_subsidy;

        FeeBreakdown {
            tier_index: assignment.index,
            tier_name: assignment.name,
            tps: assignment.tps,
            trading_fee,
            trading_fee_rate: tier.trading_fee_rate,
            gas_cost: gas_cost_usd,
            gas_subsidy,
            user_gas_cost,
            total_user_cost: trading_fee + user_gas_cost,
            platform_net: trading_fee - gas_subsidy,
            maker_rebate_rate,
        }
    }

    /// Record the trade into the rate window, compute its fees, and
    /// accumulate revenue counters
    pub fn process_trade(
        &self,
        user_id: &str,
        size_usd: f64,
        is_maker: bool,
        gas_cost_usd: f64,
    ) -> FeeBreakdown {
        self.record_trade(user_id);
        let fees = self.calculate_fees(user_id, size_usd, is_maker, gas_cost_usd);

        let mut revenue = self.revenue.lock();
        revenue.total_trades += 1;
        revenue.total_fees += fees.trading_fee;
        revenue.total_gas_cost += fees.gas_cost;
        revenue.total_subsidy += fees.gas_subsidy;
        revenue.net_revenue = revenue.total_fees - revenue.total_subsidy;

        let tier_index = fees.tier_index;
        {
            let tier_stats = &mut revenue.by_tier[tier_index];
            tier_stats.trades += 1;
            tier_stats.fees += fees.trading_fee;
            tier_stats.gas_cost += fees.gas_cost;
            tier_stats.subsidy += fees.gas_subsidy;
            tier_stats.net = tier_stats.fees - tier_stats.subsidy;
        }

        if fees.maker_rebate_rate < 0.0 {
            let rebate = (size_usd * fees.maker_rebate_rate).abs();
            revenue.total_rebates += rebate;
            revenue.by_tier[tier_index].rebates += rebate;
        }

        fees
    }

    /// Snapshot of accumulated revenue
    pub fn revenue_report(&self) -> RevenueReport {
        self.revenue.lock().clone()
    }
}

impl Default for FeeTierEngine {
    fn default() -> Self {
        let tiers = FeeTier::defaults();
        let by_tier = vec![TierRevenue::default(); tiers.len()];
        Self {
            tiers,
            windows: DashMap::new(),
            revenue: Mutex::new(RevenueReport {
                by_tier,
                ..Default::default()
            }),
        }
    }
}

fn prune_window(window: &mut VecDeque<Instant>, now: Instant) {
    while let Some(front) = window.front() {
        if now.duration_since(*front) >= TPS_WINDOW {
            window.pop_front();
        } else {
            break;
        }
    }
}
