// Solr Shield - Main Entry Point
//
// Command line front end for the admission controller:
// - Configuration checking
// - Dry-run request pricing
// - Simulated request streams against a user's quotas

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use solr_shield::config::Config;
use solr_shield::metrics;
use solr_shield::shield::{Cost, FixedCost, Shield, UserRegistry};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, Level};
use tracing_subscriber::EnvFilter;

/// Solr Shield: cost-based admission control for search backends
#[derive(Parser, Debug)]
#[command(name = "solr-shield")]
#[command(author = "Solr Shield Contributors")]
#[command(version = "0.1.0")]
#[command(about = "Cost-based admission control for search backends", long_about = None)]
struct Args {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Configuration file (defaults to the XDG config directory)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Load and validate the configuration
    CheckConfig,
    /// Price a request without charging anyone
    Peek {
        /// Endpoint ids the request touches
        #[arg(short, long = "endpoint", required = true)]
        endpoints: Vec<String>,

        /// Role ids of the caller
        #[arg(short, long = "role", required = true)]
        roles: Vec<String>,

        /// Request parameter as key=value
        #[arg(short, long = "param", value_parser = parse_param)]
        params: Vec<(String, String)>,
    },
    /// Send a stream of requests for one user through the shield
    Simulate {
        /// User to charge
        #[arg(short, long)]
        user: String,

        /// Role ids of the user
        #[arg(short, long = "role", required = true)]
        roles: Vec<String>,

        /// Fixed cost per request instead of the endpoint rules
        #[arg(long, conflicts_with_all = ["endpoints", "params"])]
        cost: Option<f64>,

        /// Endpoint ids the requests touch
        #[arg(short, long = "endpoint")]
        endpoints: Vec<String>,

        /// Request parameter as key=value
        #[arg(short, long = "param", value_parser = parse_param)]
        params: Vec<(String, String)>,

        /// Number of requests
        #[arg(short = 'n', long, default_value_t = 1)]
        count: u32,

        /// Pause between requests in milliseconds
        #[arg(long, default_value_t = 0)]
        interval_ms: u64,

        /// Print Prometheus metrics after the run
        #[arg(long)]
        metrics: bool,
    },
}

/// One simulated request and what the shield said about it
#[derive(Debug, Serialize)]
struct Verdict<'a> {
    call: u32,
    user: &'a str,
    admitted: bool,
    total: f64,
    cost: &'a Cost,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config = match &args.config {
        Some(path) => Config::load_from_path(path),
        None => Config::load(),
    }
    .context("Failed to load configuration")?;

    init_tracing(&config, args.verbose)?;

    match args.command {
        Some(Commands::CheckConfig) => check_config(&config),
        Some(Commands::Peek {
            endpoints,
            roles,
            params,
        }) => peek(&config, &endpoints, &roles, &params),
        Some(Commands::Simulate {
            user,
            roles,
            cost,
            endpoints,
            params,
            count,
            interval_ms,
            metrics: print_metrics,
        }) => {
            let shield = match cost {
                Some(cost) => Shield::new(
                    config.roles.clone(),
                    Arc::new(FixedCost(Cost::go(cost))),
                    Arc::new(UserRegistry::with_settings(
                        config.window_sizes(),
                        config.stale_after(),
                    )),
                ),
                None => Shield::from_config(&config),
            };
            let report_metrics = print_metrics || config.metrics.enabled;
            if report_metrics {
                metrics::init().context("Failed to register metrics")?;
            }

            let reaper = shield.start_reaper(config.sweep_interval());
            let result = simulate(
                &shield,
                &user,
                &roles,
                &endpoints,
                &params,
                count,
                Duration::from_millis(interval_ms),
            )
            .await;
            reaper.stop().await;
            result?;

            if report_metrics {
                print!("{}", metrics::gather_metrics()?);
            }
            Ok(())
        }
        None => {
            info!("No command specified. Use \"solr-shield --help\" for usage.");
            Ok(())
        }
    }
}

/// Initialize tracing from the logging section; `--verbose` forces DEBUG
fn init_tracing(config: &Config, verbose: bool) -> Result<()> {
    let level = if verbose {
        Level::DEBUG
    } else {
        config.log_level()?
    };
    let filter = EnvFilter::builder()
        .with_default_directive(level.into())
        .from_env_lossy();

    // Logs go to stderr so stdout stays machine readable
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    match config.logging.format.to_lowercase().as_str() {
        "json" => builder.json().init(),
        "pretty" => builder.pretty().init(),
        _ => builder.compact().init(),
    }
    Ok(())
}

fn check_config(config: &Config) -> Result<()> {
    let mut roles: Vec<&String> = config.roles.keys().collect();
    roles.sort_unstable();
    let mut endpoints: Vec<&String> = config.endpoints.keys().collect();
    endpoints.sort_unstable();

    println!(
        "Configuration OK: {} roles, {} endpoints",
        roles.len(),
        endpoints.len()
    );
    for id in roles {
        let quota = &config.roles[id];
        println!(
            "  role {}: single call {}, short window {} / {} calls, long window {} / {} calls",
            id,
            quota.single_call_max_cost,
            quota.short_window_max_cost,
            quota.short_window_max_calls,
            quota.long_window_max_cost,
            quota.long_window_max_calls
        );
    }
    for id in endpoints {
        let endpoint = &config.endpoints[id];
        let mut arguments: Vec<&String> = endpoint.arguments.keys().collect();
        arguments.sort_unstable();
        println!("  endpoint {}: base {}, arguments {:?}", id, endpoint.base, arguments);
    }
    Ok(())
}

fn peek(
    config: &Config,
    endpoints: &[String],
    roles: &[String],
    params: &[(String, String)],
) -> Result<()> {
    let shield = Shield::from_config(config);
    let cost = shield.peek_cost(endpoints, roles, params)?;
    println!("{}", serde_json::to_string(&cost)?);
    Ok(())
}

async fn simulate(
    shield: &Shield,
    user: &str,
    roles: &[String],
    endpoints: &[String],
    params: &[(String, String)],
    count: u32,
    interval: Duration,
) -> Result<()> {
    info!(user = %user, count, "Simulating requests");

    let mut admitted = 0u32;
    for call in 1..=count {
        let cost = shield.calculate_and_add_cost(endpoints, user, roles, params)?;
        if !cost.is_stop() {
            admitted += 1;
        }
        let verdict = Verdict {
            call,
            user,
            admitted: !cost.is_stop(),
            total: cost.total(),
            cost: &cost,
        };
        println!("{}", serde_json::to_string(&verdict)?);

        if call < count && !interval.is_zero() {
            tokio::time::sleep(interval).await;
        }
    }

    info!(admitted, denied = count - admitted, "Simulation finished");
    if let Some(stats) = shield.user_stats(user) {
        println!("{}", serde_json::to_string(&stats)?);
    }
    Ok(())
}

fn parse_param(raw: &str) -> Result<(String, String), String> {
    raw.split_once('=')
        .map(|(key, value)| (key.to_string(), value.to_string()))
        .ok_or_else(|| format!("expected key=value, got '{}'", raw))
}
