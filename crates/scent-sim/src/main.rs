//! `scent-sim` command line

use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use scent_bandit::Algorithm;
use scent_core::EngineConfig;
use scent_sim::{
    run_bandit_simulation, run_cache_simulation, run_report, BanditSimConfig, CacheSimConfig,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser)]
#[command(name = "scent-sim", version, about = "Scent engine workload simulator")]
struct Cli {
    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Play the algorithm bandit against fixed success rates.
    SimulateBandit {
        /// Selections to play.
        #[arg(long, default_value = "20000")]
        rounds: u32,

        /// Random seed for reproducibility.
        #[arg(long, default_value = "42")]
        seed: u64,

        /// True rates as `arm=rate` (comma-separated).
        #[arg(long, value_delimiter = ',', value_parser = parse_rate)]
        rates: Option<Vec<(Algorithm, f64)>>,

        /// Output as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Send archetype traffic through the engine and measure caching.
    SimulateCache {
        /// Requests to send.
        #[arg(long, default_value = "500")]
        requests: u32,

        /// Random seed for reproducibility.
        #[arg(long, default_value = "42")]
        seed: u64,

        /// Distinct archetypes in the traffic.
        #[arg(long, default_value = "5")]
        archetypes: usize,

        /// Skip explanations.
        #[arg(long)]
        no_explain: bool,

        /// Engine config TOML.
        #[arg(long)]
        config: Option<PathBuf>,

        /// Output as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Run both simulations and print the combined report.
    Report {
        /// Random seed for reproducibility.
        #[arg(long, default_value = "42")]
        seed: u64,

        /// Engine config TOML.
        #[arg(long)]
        config: Option<PathBuf>,

        /// Output as JSON.
        #[arg(long)]
        json: bool,
    },
}

fn parse_rate(value: &str) -> Result<(Algorithm, f64), String> {
    let (arm, rate) = value
        .split_once('=')
        .ok_or_else(|| format!("expected arm=rate, got {value}"))?;
    let arm: Algorithm = arm.trim().parse().map_err(|err| format!("{err}"))?;
    let rate: f64 = rate
        .trim()
        .parse()
        .map_err(|err| format!("invalid rate {rate}: {err}"))?;
    Ok((arm, rate))
}

fn engine_config(path: Option<&PathBuf>) -> anyhow::Result<EngineConfig> {
    match path {
        Some(path) => EngineConfig::load(path)
            .with_context(|| format!("loading engine config from {}", path.display())),
        None => Ok(EngineConfig::default()),
    }
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("scent_sim=info,scent_core=warn"));
    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_target(false))
            .init();
    }
}

fn print<T: serde::Serialize>(report: &T, text: &str, json: bool) -> anyhow::Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(report)?);
    } else {
        println!("{text}");
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_json);

    let passed = match cli.command {
        Commands::SimulateBandit {
            rounds,
            seed,
            rates,
            json,
        } => {
            let mut config = BanditSimConfig {
                seed,
                rounds,
                ..BanditSimConfig::default()
            };
            if let Some(rates) = rates {
                config.rates = rates;
            }
            let report = run_bandit_simulation(config)?;
            print(&report, &report.generate_text(), json)?;
            report.passed()
        }
        Commands::SimulateCache {
            requests,
            seed,
            archetypes,
            no_explain,
            config,
            json,
        } => {
            let report = run_cache_simulation(CacheSimConfig {
                seed,
                requests,
                archetypes,
                explain: !no_explain,
                engine: engine_config(config.as_ref())?,
            })
            .await?;
            print(&report, &report.generate_text(), json)?;
            report.passed()
        }
        Commands::Report { seed, config, json } => {
            let report = run_report(
                BanditSimConfig {
                    seed,
                    ..BanditSimConfig::default()
                },
                CacheSimConfig {
                    seed,
                    engine: engine_config(config.as_ref())?,
                    ..CacheSimConfig::default()
                },
            )
            .await?;
            print(&report, &report.generate_text(), json)?;
            report.passed
        }
    };

    std::process::exit(if passed { 0 } else { 1 });
}
