/*!
Obelisk settlement CLI

Operator tooling for the settlement routing engine: inspect the chain table
and fee tiers, or run a simulated trading load against the router.
*/

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use obelisk_settlement::{
    init_with_tracing, ChainRegistry, ConcurrencyController, DispatchMode, RouterConfig,
    SettleOptions, SettlementRouter, Trade, TradeSide,
};
use rand::Rng;
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "obelisk-settlement")]
#[command(about = "Obelisk - Settlement Routing & Batch Execution Engine")]
#[command(version)]
struct Cli {
    /// Configuration file path (TOML)
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show the registered settlement chains
    Chains,
    /// Show the fee tier schedule
    Tiers,
    /// Run a simulated trading load through the router
    Simulate {
        /// Number of trades to generate
        #[arg(long, default_value_t = 200)]
        trades: usize,

        /// Mean trade size in USD
        #[arg(long, default_value_t = 40.0)]
        avg_size: f64,

        /// Use the chunk-barrier dispatch mode instead of the soft gate
        #[arg(long)]
        chunked: bool,

        /// Print the final stats as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show version information
    Version,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_level = if cli.verbose { "debug" } else { "info" };
    init_with_tracing(log_level);

    let config = match &cli.config {
        Some(path) => load_config(path)?,
        None => RouterConfig::default(),
    };
    config
        .validate()
        .context("invalid router configuration")?;

    match cli.command {
        Commands::Chains => show_chains(),
        Commands::Tiers => show_tiers(),
        Commands::Simulate {
            trades,
            avg_size,
            chunked,
            json,
        } => simulate(config, trades, avg_size, chunked, json).await?,
        Commands::Version => {
            println!(
                "{} v{}",
                obelisk_settlement::name(),
                obelisk_settlement::version()
            );
        }
    }

    Ok(())
}

fn load_config(path: &PathBuf) -> Result<RouterConfig> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read config file: {}", path.display()))?;
    toml::from_str(&raw).with_context(|| format!("failed to parse config file: {}", path.display()))
}

fn show_chains() {
    let registry = ChainRegistry::builtin();

    println!();
    println!("SUPPORTED SETTLEMENT CHAINS");
    println!("{}", "-".repeat(95));
    println!(
        "{:<20}{:<12}{:<14}{:<12}{:<14}{}",
        "Chain", "Max TPS", "Block Time", "Gas Cost", "Finality", "Priority"
    );
    println!("{}", "-".repeat(95));

    let mut chains: Vec<_> = registry.iter().filter(|c| c.enabled).collect();
    chains.sort_by_key(|c| c.priority);

    for chain in chains {
        println!(
            "{:<20}{:<12}{:<14}{:<12}{:<14}{}",
            chain.name,
            chain.max_tps,
            format!("{}s", chain.avg_block_time_secs),
            format!("${:.5}", chain.avg_gas_cost_usd),
            chain.finality.to_string(),
            chain.priority
        );
    }
    println!("{}", "-".repeat(95));
    println!();
}

fn show_tiers() {
    let engine = obelisk_settlement::FeeTierEngine::default();

    println!();
    println!("FEE TIER SCHEDULE");
    println!("{}", "-".repeat(80));
    println!(
        "{:<16}{:<16}{:<10}{:<14}{}",
        "Tier", "TPS Range", "Fee", "Gas Subsidy", "Maker Rebate"
    );
    println!("{}", "-".repeat(80));

    for tier in engine.tiers() {
        let range = if tier.tps_max.is_infinite() {
            format!("{}+", tier.tps_min)
        } else {
            format!("{}-{}", tier.tps_min, tier.tps_max)
        };
        let rebate = if tier.maker_rebate_rate < 0.0 {
            format!("{:.3}%", tier.maker_rebate_rate * 100.0)
        } else {
            "None".to_string()
        };
        println!(
            "{:<16}{:<16}{:<10}{:<14}{}",
            tier.name,
            range,
            format!("{:.2}%", tier.trading_fee_rate * 100.0),
            format!("{:.0}%", tier.gas_subsidy_rate * 100.0),
            rebate
        );
    }
    println!("{}", "-".repeat(80));
    println!();
}

async fn simulate(
    config: RouterConfig,
    trade_count: usize,
    avg_size: f64,
    chunked: bool,
    json: bool,
) -> Result<()> {
    let router = Arc::new(SettlementRouter::new(
        config.clone(),
        ChainRegistry::builtin(),
    )?);
    let controller = ConcurrencyController::new(config.concurrency.clone());

    let pairs = ["SOL/USDC", "ETH/USDC", "BTC/USDC", "AVAX/USDC"];
    let mut rng = rand::thread_rng();
    let trades: Vec<Trade> = (0..trade_count)
        .map(|i| {
            let size = (avg_size * rng.gen_range(0.2..2.0)).max(0.5);
            let side = if rng.gen_bool(0.5) {
                TradeSide::Buy
            } else {
                TradeSide::Sell
            };
            let mut trade = Trade::new(
                format!("sim-user-{}", i % 8),
                pairs[i % pairs.len()],
                side,
                size,
                rng.gen_range(10.0..200.0),
            );
            if rng.gen_bool(0.3) {
                trade = trade.as_maker();
            }
            trade
        })
        .collect();

    let mode = if chunked {
        DispatchMode::ChunkBarrier
    } else {
        DispatchMode::SoftGate
    };
    println!(
        "Simulating {} trades (mode: {:?}, strategy: {})...",
        trade_count, mode, config.strategy
    );

    let executor = |trade: Trade| router.settle_trade(trade, SettleOptions::default());
    let started = std::time::Instant::now();
    let results = controller.dispatch(trades, mode, &executor).await;
    let elapsed = started.elapsed();

    router.flush_all().await;
    controller.shutdown();

    let ok = results.iter().filter(|r| r.is_ok()).count();
    let stats = router.stats();
    let revenue = router.fees().revenue_report();
    let run_stats = controller.stats();

    if json {
        let report = serde_json::json!({
            "settlements": stats,
            "revenue": revenue,
            "controller": run_stats,
        });
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    println!();
    println!("SIMULATION REPORT");
    println!("{}", "-".repeat(60));
    println!("Trades settled:    {}/{}", ok, trade_count);
    println!("Elapsed:           {:.1}s", elapsed.as_secs_f64());
    println!(
        "Internal fills:    {} ({:.1}%)",
        stats.internal_trades,
        100.0 * stats.internal_trades as f64 / stats.total_trades.max(1) as f64
    );
    println!("Blockchain trades: {}", stats.blockchain_trades);
    println!("Total gas:         ${:.4}", stats.total_gas_cost_usd);
    println!("Fees collected:    ${:.4}", revenue.total_fees);
    println!("Net revenue:       ${:.4}", revenue.net_revenue);
    println!("Peak concurrency:  {}", run_stats.peak_concurrent);
    println!("Max TPS:           {:.1}", run_stats.max_tps);
    println!();

    if !stats.by_chain.is_empty() {
        println!("BY CHAIN");
        println!("{}", "-".repeat(60));
        for (key, chain_stats) in &stats.by_chain {
            println!(
                "{:<12} settlements={:<6} trades={:<6} gas=${:<10.4} avg_latency={:.0}ms",
                key.to_string(),
                chain_stats.settlements,
                chain_stats.trades,
                chain_stats.gas_cost_usd,
                chain_stats.avg_latency_ms
            );
        }
        println!();
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_parses() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_simulate_args() {
        let cli = Cli::parse_from(["obelisk-settlement", "simulate", "--trades", "50", "--json"]);
        match cli.command {
            Commands::Simulate { trades, json, .. } => {
                assert_eq!(trades, 50);
                assert!(json);
            }
            _ => panic!("expected simulate command"),
        }
    }
}
