//! Command line, environment loading and subcommand bodies.

use std::env;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio::sync::watch;
use tracing::{error, info, warn};

use borrower_node::clock::unix_now;
use borrower_node::config::{load_borrow_config, BorrowerConfig, DEFAULT_CONFIG_FILE};
use borrower_node::console::{EngineConsole, EngineConsoleConfig};
use borrower_node::participation::{self, fallback_wait};
use borrower_node::retry::RetryConfig;
use borrower_node::scheduler::Scheduler;
use borrower_node::toncenter::HttpChainClient;
use borrower_node::wallet::{load_signing_key, StandardWallet};
use borrower_node::{ChainClient, KeyConsole, Wallet};

#[derive(Parser)]
#[command(version, about = "Treasury loan borrower for staking validators")]
pub(crate) struct Cli {
    /// Path of the TOML config file
    #[arg(long, env = "BORROWER_CONFIG", default_value = DEFAULT_CONFIG_FILE)]
    pub config: PathBuf,

    /// Log filter, e.g. `info` or `borrower_node=debug`
    #[arg(long, env = "RUST_LOG", default_value = "info")]
    pub log_level: String,

    #[command(subcommand)]
    pub cmd: Option<Commands>,
}

#[derive(Subcommand, Clone, Copy)]
pub(crate) enum Commands {
    /// Run the process and request-loan tasks until interrupted (default)
    Run,
    /// Load the config file and validate the borrow intent
    CheckConfig,
    /// Print every round and the action the state machine would take, without sending
    Status,
}

/// Loads `.env` (or `BORROWER_ENV_FILE`) before arguments are parsed so
/// clap's `env` fallbacks see it. A missing file is not an error.
pub(crate) fn load_env_file() {
    let env_file = env::var("BORROWER_ENV_FILE").unwrap_or_else(|_| ".env".to_string());
    if let Err(e) = dotenvy::from_filename(&env_file) {
        if !matches!(e, dotenvy::Error::Io(_)) {
            eprintln!("⚠️  Warning: Failed to load {}: {}", env_file, e);
        }
    }
}

fn build_chain(config: &BorrowerConfig) -> Result<Arc<dyn ChainClient>> {
    let retry = RetryConfig { max_attempts: config.chain.retries, ..RetryConfig::default() };
    let client = HttpChainClient::new(
        config.chain.endpoint.clone(),
        config.chain.api_key.clone(),
        Duration::from_secs(config.chain.timeout_secs),
        retry,
    )
    .context("cannot create chain client")?;
    Ok(Arc::new(client))
}

fn build_console(config: &BorrowerConfig) -> Arc<dyn KeyConsole> {
    let engine = &config.validator_engine;
    Arc::new(EngineConsole::new(EngineConsoleConfig {
        executable: engine.executable.clone(),
        client_key: engine.client_key.clone(),
        server_key: engine.server_key.clone(),
        ip: engine.ip.clone(),
        control_port: engine.control_port,
        timeout: engine.timeout(),
    }))
}

fn build_wallet(config: &BorrowerConfig, chain: Arc<dyn ChainClient>) -> Result<Arc<dyn Wallet>> {
    let key = load_signing_key(&config.wallet.key_path).context("cannot load wallet key")?;
    Ok(Arc::new(StandardWallet::new(
        chain,
        config.wallet.address,
        config.wallet.version,
        config.wallet.subwallet_id,
        key,
    )))
}

// ════════════════════════════════════════════════════════════════════════════
// SUBCOMMANDS
// ════════════════════════════════════════════════════════════════════════════

pub(crate) async fn run(config_path: &Path) -> Result<()> {
    let config = BorrowerConfig::load(config_path)?;
    let adnl = config.validator_engine.adnl()?;
    let chain = build_chain(&config)?;
    let console = build_console(&config);
    let wallet = build_wallet(&config, chain.clone())?;

    info!("🟢 Borrower {} started", borrower_node::BORROWER_VERSION);
    info!(treasury = %config.treasury, wallet = %wallet.address(), "configuration loaded");

    let scheduler = Arc::new(Scheduler::new(
        chain,
        console,
        wallet,
        config.treasury,
        adnl,
        config_path.to_path_buf(),
        Duration::from_secs(config.wallet.send_timeout_secs),
        config.scheduler.clone(),
    ));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let handle = tokio::spawn(scheduler.run(shutdown_rx));

    wait_for_signal().await;
    info!("❗️ Shutdown requested, stopping after in-flight ticks");
    let _ = shutdown_tx.send(true);
    if let Err(e) = handle.await {
        error!("scheduler task failed: {}", e);
    }
    info!("🔴 Borrower stopped");
    Ok(())
}

async fn wait_for_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                tokio::select! {
                    result = tokio::signal::ctrl_c() => {
                        if let Err(e) = result {
                            error!("Failed to listen for Ctrl+C: {}", e);
                        }
                    }
                    _ = term.recv() => {}
                }
                return;
            }
            Err(e) => warn!("cannot listen for SIGTERM: {}", e),
        }
    }
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for Ctrl+C: {}", e);
    }
}

pub(crate) fn check_config(config_path: &Path) -> Result<()> {
    let config = BorrowerConfig::load(config_path)?;
    let borrow = load_borrow_config(config_path)?;
    borrow.validate().context("invalid [borrow] section")?;
    println!("✅ {} is valid", config_path.display());
    println!("   treasury:   {}", config.treasury);
    println!("   wallet:     {} ({:?})", config.wallet.address, config.wallet.version);
    println!("   borrowing:  {}", if borrow.active { "active" } else { "inactive" });
    println!("   stake:      {}", borrow.stake);
    println!("   loan:       {}", if borrow.loan.is_zero() { "min stake".to_string() } else { borrow.loan.to_string() });
    println!("   max_factor: {} ({})", borrow.max_factor(), borrow.max_factor_ratio);
    Ok(())
}

pub(crate) async fn status(config_path: &Path) -> Result<()> {
    let config = BorrowerConfig::load(config_path)?;
    let chain = build_chain(&config)?;
    let snapshot = participation::observe(chain.as_ref(), config.treasury, unix_now())
        .await
        .context("cannot read treasury")?;
    let plans = participation::plan(&snapshot).context("cannot decode participations")?;

    let vset = &snapshot.observation.params.vset;
    println!("block:             {}", snapshot.block);
    println!("treasury stopped:  {}", snapshot.treasury.stopped);
    println!("participate since: {}", snapshot.observation.participate_since);
    println!("vset:              {} .. {} ({})", vset.utime_since, vset.utime_until, hex::encode(vset.hash));
    println!();

    if plans.is_empty() {
        println!("no participations, next check in {}s", fallback_wait(&snapshot.observation).as_secs());
    }
    for plan in plans {
        match plan.outcome {
            Ok((state, decision)) => {
                let action = decision.action.map(|a| a.to_string()).unwrap_or_else(|| "-".to_string());
                let wait = decision.wait.map(|w| format!("{}s", w.as_secs())).unwrap_or_else(|| "-".to_string());
                println!("round {:>10}  {:<12}  action {:<24}  wait {}", plan.round_since, state, action, wait);
            }
            Err(e) => println!("round {:>10}  undecodable: {}", plan.round_since, e),
        }
    }
    Ok(())
}
