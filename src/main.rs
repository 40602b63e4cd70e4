//! Deal-engine entry point.
//!
//! - `run`: start the trading loop for every configured pair, with graceful
//!   shutdown on Ctrl-C.
//! - `validate-config`: load and pretty-print the parsed config without
//!   starting any engine.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use deal_engine::config::EngineConfig;
use deal_engine::coordinator::ExecutionCoordinator;
use deal_engine::deal_service::DealService;
use deal_engine::exchange::coindcx::auth::Credentials;
use deal_engine::exchange::coindcx::CoinDcxGateway;
use deal_engine::oms::store::DealStore;
use deal_engine::order_service::OrderService;
use deal_engine::orderbook::OrderBookAnalyzer;
use deal_engine::supervisors::deal_completion::DealCompletionMonitor;
use deal_engine::supervisors::filled_buy::FilledBuyHandler;
use deal_engine::supervisors::stale_buy::StaleBuyMonitor;
use deal_engine::supervisors::stop_loss::TieredStopLoss;
use deal_engine::trading_loop::{TradingLoop, TradingLoopConfig};

#[derive(Parser, Debug)]
#[command(name = "deal-engine")]
#[command(about = "Automated cryptocurrency spot-trading engine", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Start the trading loop
    Run {
        /// Path to configuration file
        #[arg(short, long, default_value = "config.json")]
        config: String,
    },

    /// Load and pretty-print the parsed config without starting any engine
    ValidateConfig {
        /// Path to configuration file
        #[arg(short, long, default_value = "config.json")]
        config: String,
    },
}

fn setup_logging(verbose: bool) {
    let level = if verbose { "debug" } else { "info" };
    let filter_str = format!("{level},hyper=warn,reqwest=warn,rustls=warn,h2=warn");
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&filter_str));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    setup_logging(cli.verbose);

    match cli.command {
        Commands::Run { config } => run(config),
        Commands::ValidateConfig { config } => validate_config(config),
    }
}

fn validate_config(config_path: String) -> Result<()> {
    let config = EngineConfig::from_file(&config_path)
        .with_context(|| format!("failed to load config from {config_path}"))?;
    let pretty = serde_json::to_string_pretty(&config).context("failed to serialize config")?;
    println!("{pretty}");
    Ok(())
}

fn run(config_path: String) -> Result<()> {
    dotenv::dotenv().ok();

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to build tokio runtime")?;

    runtime.block_on(run_async(config_path))
}

async fn run_async(config_path: String) -> Result<()> {
    let config = EngineConfig::from_file(&config_path)
        .with_context(|| format!("failed to load config from {config_path}"))?;

    info!(pairs = config.pairs.len(), "starting deal engine");

    let credentials = Credentials::from_env().context("failed to load exchange credentials")?;
    let client_config = deal_engine::exchange::coindcx::ClientConfig::default()
        .with_max_retries(config.exchange.max_retries)
        .with_rate_limit(config.exchange.max_requests_per_second as usize)
        .with_timeout(std::time::Duration::from_secs(config.exchange.timeout_secs));
    let gateway = Arc::new(CoinDcxGateway::with_config(
        credentials.api_key(),
        credentials.api_secret(),
        client_config,
    ));
    let store = Arc::new(DealStore::new());
    let orders = Arc::new(OrderService::new(store.clone(), gateway.clone()));
    let deals = Arc::new(DealService::new(store.clone(), orders.clone(), gateway.clone()));
    let coordinator = Arc::new(ExecutionCoordinator::new(orders.clone(), deals.clone(), config.execution.into()));

    let shutdown = Arc::new(AtomicBool::new(false));
    let shutdown_for_signal = shutdown.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("received Ctrl+C, initiating shutdown");
                shutdown_for_signal.store(true, Ordering::SeqCst);
            }
            Err(e) => error!(error = %e, "failed to install Ctrl+C handler"),
        }
    });

    let mut handles = Vec::new();
    for pair_config in config.pairs.iter().cloned() {
        let pair = pair_config.to_currency_pair();
        let gateway = gateway.clone();
        let store = store.clone();
        let orders = orders.clone();
        let deals = deals.clone();
        let coordinator = coordinator.clone();
        let shutdown = shutdown.clone();

        let analyzer = OrderBookAnalyzer::new(config.orderbook_analyzer.into());
        let stale_buy = Arc::new(StaleBuyMonitor::new(
            store.clone(),
            orders.clone(),
            gateway.clone(),
            config.buy_order_monitor.into(),
        ));
        let filled_buy = Arc::new(FilledBuyHandler::new(store.clone(), orders.clone()));
        let deal_completion = Arc::new(DealCompletionMonitor::new(store.clone(), deals.clone()));
        let stop_loss = Arc::new(TieredStopLoss::new(
            store.clone(),
            orders.clone(),
            deals.clone(),
            gateway.clone(),
            OrderBookAnalyzer::new(config.orderbook_analyzer.into()),
            config.risk_management.into(),
        ));

        let loop_config = TradingLoopConfig {
            orderbook_update_interval_ticks: config.loop_cadence.orderbook_update_interval_ticks,
            filled_buy_interval_ticks: config.loop_cadence.filled_buy_interval_ticks,
            deal_completion_interval_ticks: config.loop_cadence.deal_completion_interval_ticks,
            supervisor_stats_interval_ticks: config.loop_cadence.supervisor_stats_interval_ticks,
            error_backoff: std::time::Duration::from_secs(config.loop_cadence.error_backoff_secs),
        };

        let mut trading_loop = TradingLoop::new(
            pair,
            gateway,
            orders,
            deals,
            coordinator,
            analyzer,
            stale_buy,
            filled_buy,
            deal_completion,
            stop_loss,
            loop_config,
            shutdown,
        );

        handles.push(tokio::spawn(async move {
            trading_loop.run().await;
        }));
    }

    for handle in handles {
        if let Err(e) = handle.await {
            warn!(error = %e, "trading loop task panicked");
        }
    }

    info!("deal engine shut down cleanly");
    Ok(())
}
