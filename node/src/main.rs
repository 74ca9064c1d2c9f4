// Copyright (c) 2026 ALAS Technology. MIT License.
// See LICENSE for details.

//! # YieldFlow Node
//!
//! Entry point for the `yieldflow-node` binary. Parses CLI arguments,
//! initializes logging and metrics, restores the ledger from disk, and
//! serves the gateway, JSON-RPC and WebSocket API.
//!
//! The binary supports four subcommands:
//!
//! - `run`    : start the node
//! - `init`   : create the data directory and a default config
//! - `status` : query a running node's status endpoint
//! - `version`: print build version information

mod api;
mod cli;
mod config;
mod gateway;
mod logging;
mod metrics;
mod processor;
mod rate_limit;
mod relay;

use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::Parser;
use tokio::signal;
use tokio::sync::broadcast::error::RecvError;

use yieldflow_contracts::{BadgeRegistry, LendingPool, PoolSnapshot, RegistrySnapshot};
use yieldflow_protocol::config::PROTOCOL_VERSION;
use yieldflow_protocol::storage::LedgerStore;
use yieldflow_protocol::zkp::{AcceptAllVerifier, Groth16Verifier, ProofVerifier};
use yieldflow_protocol::Ledger;

use cli::{Commands, Profile, YieldFlowCli};
use config::{NodeConfig, VerifierMode, ZkConfig};
use gateway::TopUpGateway;
use logging::LogFormat;
use metrics::NodeMetrics;
use processor::CirclePaymentClient;
use rate_limit::RateLimiter;
use relay::EventRelay;

/// Metadata key holding the lending pool snapshot.
const POOL_KEY: &[u8] = b"pool";

/// Metadata key holding the badge registry snapshot.
const BADGES_KEY: &[u8] = b"badges";

/// Name of the config file `init` writes and `run` looks for.
const CONFIG_FILE: &str = "config.toml";

#[tokio::main]
async fn main() -> Result<()> {
    let cli = YieldFlowCli::parse();

    match cli.command {
        Commands::Run(args) => run_node(args).await,
        Commands::Init(args) => init_node(args),
        Commands::Status(args) => query_status(args).await,
        Commands::Version => {
            print_version();
            Ok(())
        }
    }
}

/// Starts the node: ledger, gateway, API server and metrics endpoint.
async fn run_node(args: cli::RunArgs) -> Result<()> {
    logging::init_logging(&args.log_level, args.log_format);

    let data_dir = cli::expand_home(&args.data_dir);
    let config_path = args
        .config
        .as_deref()
        .map(cli::expand_home)
        .unwrap_or_else(|| data_dir.join(CONFIG_FILE));

    // --- Configuration ---
    let mut config = if args.config.is_some() {
        NodeConfig::load(&config_path)?
    } else {
        NodeConfig::load_or_default(&config_path)?
    };
    if let Some(port) = args.rpc_port {
        config.server.rpc_port = port;
    }
    if let Some(port) = args.metrics_port {
        config.server.metrics_port = port;
    }
    if args.admin_token.is_some() {
        config.admin.token = args.admin_token.clone();
    }
    if args.processor_api_key.is_some() {
        config.processor.api_key = args.processor_api_key.clone();
    }
    config.validate()?;

    tracing::info!(
        rpc_port = config.server.rpc_port,
        metrics_port = config.server.metrics_port,
        data_dir = %data_dir.display(),
        config = %config_path.display(),
        "starting yieldflow-node"
    );

    // --- Persistent storage ---
    let db_path = data_dir.join("db");
    std::fs::create_dir_all(&db_path)
        .with_context(|| format!("failed to create database directory: {}", db_path.display()))?;
    let store = Arc::new(
        LedgerStore::open(&db_path)
            .with_context(|| format!("failed to open database at {}", db_path.display()))?,
    );

    // --- Collaborators ---
    let pool = Arc::new(match store.get_meta::<PoolSnapshot>(POOL_KEY)? {
        Some(mut snapshot) => {
            snapshot.apy_bps = config.pool.apy_bps;
            LendingPool::restore(snapshot)
        }
        None => LendingPool::new(config.pool.apy_bps),
    });
    let badges = Arc::new(
        store
            .get_meta::<RegistrySnapshot>(BADGES_KEY)?
            .map(BadgeRegistry::restore)
            .unwrap_or_default(),
    );

    // --- Ledger ---
    let state = store.load_ledger().context("failed to load ledger snapshot")?;
    tracing::info!(
        accounts = state.len(),
        last_event_seq = state.last_event_seq(),
        badges = badges.total_supply(),
        "ledger restored"
    );
    let mut builder = Ledger::builder(pool.clone(), badges.clone())
        .config(config.ledger.policy.clone())
        .restore(state);
    if let Some(verifier) = select_verifier(&config.zk)? {
        builder = builder.verifier(verifier);
    }
    let (ledger, admin) = builder.build().context("invalid [ledger] configuration")?;
    let ledger = Arc::new(ledger);

    // --- Metrics ---
    let node_metrics =
        Arc::new(NodeMetrics::new().context("failed to register Prometheus metrics")?);
    node_metrics.ledger_accounts.set(ledger.account_count() as i64);

    // --- Gateway ---
    let processor = CirclePaymentClient::new(&config.processor)
        .context("failed to build card processor client")?;
    if !processor.is_configured() {
        tracing::warn!("no card processor API key; top-ups will be refused");
    }
    let gateway = Arc::new(
        TopUpGateway::new(
            &config.gateway,
            RateLimiter::from_config(&config.rate_limit),
            ledger.clone(),
            Arc::new(processor),
        )
        .with_metrics(node_metrics.clone()),
    );

    // --- Application state ---
    if config.admin.token.is_none() {
        tracing::info!("no admin token; privileged RPC methods disabled");
    }
    let app_state = api::AppState {
        version: format!("{} (protocol {})", env!("CARGO_PKG_VERSION"), PROTOCOL_VERSION),
        ledger: ledger.clone(),
        admin: Arc::new(admin),
        admin_token: config.admin.token.clone(),
        rpc_writes: config.ledger.rpc_writes,
        gateway: gateway.clone(),
        metrics: node_metrics.clone(),
        started_at: chrono::Utc::now(),
    };

    // --- API server ---
    let api_router = api::create_router(app_state);
    let api_addr = format!("{}:{}", config.server.bind, config.server.rpc_port);
    let api_listener = tokio::net::TcpListener::bind(&api_addr)
        .await
        .with_context(|| format!("failed to bind RPC listener on {}", api_addr))?;
    tracing::info!("RPC/API server listening on {}", api_addr);

    // --- Metrics server ---
    let metrics_router = axum::Router::new()
        .route("/metrics", axum::routing::get(metrics::metrics_handler))
        .with_state(node_metrics.clone());
    let metrics_addr = format!("{}:{}", config.server.bind, config.server.metrics_port);
    let metrics_listener = tokio::net::TcpListener::bind(&metrics_addr)
        .await
        .with_context(|| format!("failed to bind metrics listener on {}", metrics_addr))?;
    tracing::info!("Metrics server listening on {}", metrics_addr);

    // --- Background tasks ---
    let mut tasks = Vec::new();

    let (store_ref, ledger_ref, pool_ref, badges_ref) =
        (store.clone(), ledger.clone(), pool.clone(), badges.clone());
    let snapshot_every = Duration::from_secs(config.server.snapshot_interval_secs.max(1));
    tasks.push(tokio::spawn(async move {
        let mut interval = tokio::time::interval(snapshot_every);
        interval.tick().await;
        loop {
            interval.tick().await;
            if let Err(e) = persist(&store_ref, &ledger_ref, &pool_ref, &badges_ref) {
                tracing::error!(error = %e, "periodic snapshot failed");
            }
        }
    }));

    let pool_ref = pool.clone();
    let accrual_every = Duration::from_secs(config.server.accrual_interval_secs.max(1));
    tasks.push(tokio::spawn(async move {
        let mut interval = tokio::time::interval(accrual_every);
        interval.tick().await;
        loop {
            interval.tick().await;
            pool_ref.accrue(accrual_every);
        }
    }));

    let gateway_ref = gateway.clone();
    let window = Duration::from_secs(config.rate_limit.window_secs);
    tasks.push(tokio::spawn(async move {
        let mut interval = tokio::time::interval(window);
        loop {
            interval.tick().await;
            let pruned = gateway_ref.limiter().prune();
            if pruned > 0 {
                tracing::debug!(pruned, "rate windows pruned");
            }
        }
    }));

    let (ledger_ref, metrics_ref) = (ledger.clone(), node_metrics.clone());
    let mut events = ledger.subscribe();
    tasks.push(tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => {
                    metrics_ref
                        .ledger_events_total
                        .with_label_values(&[event.kind.name()])
                        .inc();
                    metrics_ref
                        .ledger_accounts
                        .set(ledger_ref.account_count() as i64);
                }
                Err(RecvError::Lagged(n)) => {
                    tracing::warn!(skipped = n, "metrics event counter lagged");
                }
                Err(RecvError::Closed) => break,
            }
        }
    }));

    match EventRelay::from_config(&config.relay).context("failed to build event relay")? {
        Some(relay) => {
            let relay = relay.with_metrics(node_metrics.clone());
            tasks.push(tokio::spawn(relay.run(ledger.subscribe())));
        }
        None => tracing::debug!("no relay webhook configured"),
    }

    // --- Serve ---
    tokio::select! {
        res = axum::serve(
            api_listener,
            api_router.into_make_service_with_connect_info::<SocketAddr>(),
        ) => {
            if let Err(e) = res {
                tracing::error!("API server error: {}", e);
            }
        }
        res = axum::serve(metrics_listener, metrics_router) => {
            if let Err(e) = res {
                tracing::error!("Metrics server error: {}", e);
            }
        }
        _ = shutdown_signal() => {
            tracing::info!("shutdown signal received, draining connections");
        }
    }

    for task in &tasks {
        task.abort();
    }
    persist(&store, &ledger, &pool, &badges).context("final snapshot failed")?;
    tracing::info!(accounts = ledger.account_count(), "yieldflow-node stopped");
    Ok(())
}

/// Writes the ledger, pool and registry to disk.
fn persist(
    store: &LedgerStore,
    ledger: &Ledger,
    pool: &LendingPool,
    badges: &BadgeRegistry,
) -> Result<()> {
    let (state, (pool_snapshot, badge_snapshot)) = ledger
        .snapshot_with(|_| (pool.snapshot(), badges.snapshot()))
        .context("ledger busy")?;
    store.put_meta(POOL_KEY, &pool_snapshot)?;
    store.put_meta(BADGES_KEY, &badge_snapshot)?;
    store.save_ledger(&state)?;
    tracing::debug!(
        accounts = state.len(),
        last_event_seq = state.last_event_seq(),
        "snapshot written"
    );
    Ok(())
}

/// Picks the proof verifier the ledger gets.
fn select_verifier(zk: &ZkConfig) -> Result<Option<Arc<dyn ProofVerifier>>> {
    match zk.verifier {
        VerifierMode::Disabled => {
            tracing::info!("proof verification disabled; every proof reads as invalid");
            Ok(None)
        }
        VerifierMode::AcceptAll => {
            tracing::warn!("accept-all proof verifier enabled; every proof reads as valid");
            Ok(Some(Arc::new(AcceptAllVerifier)))
        }
        VerifierMode::Groth16 => {
            let path = zk
                .verifying_key_path
                .as_deref()
                .context("[zk] verifier = \"groth16\" requires verifying_key_path")?;
            let bytes = std::fs::read(path)
                .with_context(|| format!("failed to read verifying key {}", path.display()))?;
            let verifier = Groth16Verifier::from_vk_bytes(&bytes)
                .with_context(|| format!("invalid verifying key {}", path.display()))?;
            tracing::info!(
                inputs = verifier.public_input_count(),
                key = %path.display(),
                "groth16 verifier loaded"
            );
            Ok(Some(Arc::new(verifier)))
        }
    }
}

/// Renders the config `init` writes for a profile.
fn profile_config(profile: Profile) -> NodeConfig {
    let mut config = NodeConfig::default();
    if profile == Profile::Dev {
        config.ledger.rpc_writes = true;
        config.zk.verifier = VerifierMode::AcceptAll;
        config.processor.base_url = "https://api-sandbox.circle.com/v1".into();
        config.server.bind = "127.0.0.1".into();
    }
    config
}

/// Creates the data directory and writes a default `config.toml`.
fn init_node(args: cli::InitArgs) -> Result<()> {
    logging::init_logging("yieldflow_node=info", LogFormat::Pretty);

    let data_dir = cli::expand_home(&args.data_dir);
    tracing::info!(data_dir = %data_dir.display(), profile = ?args.profile, "initializing node");

    std::fs::create_dir_all(&data_dir)
        .with_context(|| format!("failed to create data directory: {}", data_dir.display()))?;

    let config_path = data_dir.join(CONFIG_FILE);
    if config_path.exists() {
        bail!("{} already exists; remove it first", config_path.display());
    }
    let config = profile_config(args.profile);
    write_config(&config_path, &config)?;

    println!("Node initialized successfully.");
    println!("  Data directory : {}", data_dir.display());
    println!("  Config         : {}", config_path.display());
    println!("  Profile        : {:?}", args.profile);
    println!("  RPC port       : {}", config.server.rpc_port);
    println!("  RPC writes     : {}", config.ledger.rpc_writes);
    println!("  Proof verifier : {:?}", config.zk.verifier);

    Ok(())
}

fn write_config(path: &Path, config: &NodeConfig) -> Result<()> {
    std::fs::write(path, config.to_toml()?)
        .with_context(|| format!("failed to write config to {}", path.display()))
}

/// Queries a running node's status endpoint and prints the result.
async fn query_status(args: cli::StatusArgs) -> Result<()> {
    let url = format!("{}/status", args.rpc_url.trim_end_matches('/'));
    let body: serde_json::Value = reqwest::get(&url)
        .await
        .with_context(|| format!("failed to reach {}", url))?
        .error_for_status()
        .with_context(|| format!("{} returned an error", url))?
        .json()
        .await
        .context("status response was not JSON")?;
    println!("{}", serde_json::to_string_pretty(&body)?);
    Ok(())
}

/// Prints version information to stdout.
fn print_version() {
    println!("yieldflow-node {}", env!("CARGO_PKG_VERSION"));
    println!("protocol       {}", PROTOCOL_VERSION);
    println!("rustc          {}", rustc_version());
}

/// Returns the Rust compiler version used to build this binary.
fn rustc_version() -> &'static str {
    option_env!("RUSTC_VERSION").unwrap_or("unknown")
}

/// Waits for SIGINT (Ctrl+C) or SIGTERM, whichever comes first.
///
/// On non-Unix platforms, only Ctrl+C is supported. If a handler cannot be
/// installed, that signal is ignored and the other still works.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dev_profile_is_permissive_and_valid() {
        let config = profile_config(Profile::Dev);
        assert!(config.ledger.rpc_writes);
        assert_eq!(config.zk.verifier, VerifierMode::AcceptAll);
        config.validate().unwrap();
    }

    #[test]
    fn production_profile_keeps_defaults() {
        assert_eq!(profile_config(Profile::Production), NodeConfig::default());
    }

    #[test]
    fn written_config_loads_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE);
        let config = profile_config(Profile::Dev);
        write_config(&path, &config).unwrap();
        assert_eq!(NodeConfig::load(&path).unwrap(), config);
    }

    #[test]
    fn disabled_verifier_yields_none() {
        assert!(select_verifier(&ZkConfig::default()).unwrap().is_none());
    }

    #[test]
    fn groth16_verifier_needs_readable_key() {
        let zk = ZkConfig {
            verifier: VerifierMode::Groth16,
            verifying_key_path: Some("/nonexistent/vk.bin".into()),
        };
        assert!(select_verifier(&zk).is_err());
    }

    #[test]
    fn persisted_node_state_survives_restart() {
        let store = LedgerStore::open_temporary().unwrap();
        let pool = Arc::new(LendingPool::new(500));
        let badges = Arc::new(BadgeRegistry::new());
        let (ledger, _) = Ledger::builder(pool.clone(), badges.clone()).build().unwrap();
        let alice =
            yieldflow_protocol::AccountId::parse("0x00000000000000000000000000000000000a11ce")
                .unwrap();
        for _ in 0..10 {
            ledger.deposit(&alice, 100).unwrap();
        }
        persist(&store, &ledger, &pool, &badges).unwrap();

        let pool: PoolSnapshot = store.get_meta(POOL_KEY).unwrap().unwrap();
        let badges: RegistrySnapshot = store.get_meta(BADGES_KEY).unwrap().unwrap();
        let state = store.load_ledger().unwrap();
        assert_eq!(pool.cash, 1_000);
        assert_eq!(badges.badges.len(), 1);
        assert_eq!(state.account(&alice).reputation_score, 10);
    }

    #[test]
    fn persist_during_withdrawals_keeps_funds_withdrawable() {
        let store = LedgerStore::open_temporary().unwrap();
        let pool = Arc::new(LendingPool::new(0));
        let badges = Arc::new(BadgeRegistry::new());
        let (ledger, _) = Ledger::builder(pool.clone(), badges.clone()).build().unwrap();
        let alice =
            yieldflow_protocol::AccountId::parse("0x00000000000000000000000000000000000a11ce")
                .unwrap();
        ledger.deposit(&alice, 10_000).unwrap();

        std::thread::scope(|s| {
            s.spawn(|| {
                for _ in 0..2_000 {
                    ledger.withdraw(&alice, 1).unwrap();
                    ledger.deposit(&alice, 1).unwrap();
                    ledger.withdraw(&alice, 1).unwrap();
                }
            });
            for _ in 0..50 {
                persist(&store, &ledger, &pool, &badges).unwrap();
                std::thread::yield_now();
            }
        });

        let pool = Arc::new(LendingPool::restore(store.get_meta(POOL_KEY).unwrap().unwrap()));
        let badges = Arc::new(BadgeRegistry::restore(
            store.get_meta(BADGES_KEY).unwrap().unwrap(),
        ));
        let (restored, _) = Ledger::builder(pool, badges)
            .restore(store.load_ledger().unwrap())
            .build()
            .unwrap();
        let balance = restored.deposited_usdc(&alice);
        restored.withdraw(&alice, balance).unwrap();
    }
}
