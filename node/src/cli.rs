//! # CLI Interface
//!
//! Defines the command-line argument structure for `yieldflow-node` using
//! `clap` derive. Supports four subcommands: `run`, `init`, `status`,
//! and `version`. Every `run` flag can also come from a `YIELDFLOW_*`
//! environment variable and overrides the matching config file value.

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

use crate::logging::LogFormat;

/// YieldFlow ledger node.
///
/// Hosts the balance & reputation ledger, the reputation-gated top-up
/// gateway, the JSON-RPC API and a Prometheus endpoint.
#[derive(Parser, Debug)]
#[command(
    name = "yieldflow-node",
    about = "YieldFlow ledger and top-up gateway node",
    version,
    propagate_version = true
)]
pub struct YieldFlowCli {
    /// Subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,
}

/// Top-level subcommands for the node binary.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Start the node.
    Run(RunArgs),
    /// Create the data directory and write a default `config.toml`.
    Init(InitArgs),
    /// Query the status of a running node over HTTP.
    Status(StatusArgs),
    /// Print version information and exit.
    Version,
}

/// Arguments for the `run` subcommand.
#[derive(Parser, Debug)]
pub struct RunArgs {
    /// Path to the node configuration file (TOML).
    ///
    /// When omitted, the node looks for `config.toml` in the data directory
    /// and falls back to built-in defaults if there is none.
    #[arg(long, short = 'c', env = "YIELDFLOW_CONFIG")]
    pub config: Option<PathBuf>,

    /// Directory holding the ledger snapshot database.
    #[arg(long, short = 'd', env = "YIELDFLOW_DATA_DIR", default_value = "~/.yieldflow")]
    pub data_dir: PathBuf,

    /// Port for the gateway, JSON-RPC and WebSocket API.
    #[arg(long, env = "YIELDFLOW_RPC_PORT")]
    pub rpc_port: Option<u16>,

    /// Port for the Prometheus metrics endpoint.
    #[arg(long, env = "YIELDFLOW_METRICS_PORT")]
    pub metrics_port: Option<u16>,

    /// Log output format.
    #[arg(long, env = "YIELDFLOW_LOG_FORMAT", value_enum, default_value_t = LogFormat::Pretty)]
    pub log_format: LogFormat,

    /// Default log filter when `RUST_LOG` is unset.
    #[arg(long, env = "YIELDFLOW_LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    /// Bearer token that authorizes privileged RPC methods.
    ///
    /// Without one, privileged methods are disabled.
    #[arg(long, env = "YIELDFLOW_ADMIN_TOKEN", hide_env_values = true)]
    pub admin_token: Option<String>,

    /// API key for the card processor.
    #[arg(long, env = "YIELDFLOW_PROCESSOR_API_KEY", hide_env_values = true)]
    pub processor_api_key: Option<String>,
}

/// Arguments for the `init` subcommand.
#[derive(Parser, Debug)]
pub struct InitArgs {
    /// Path to the data directory to initialize.
    #[arg(long, short = 'd', env = "YIELDFLOW_DATA_DIR", default_value = "~/.yieldflow")]
    pub data_dir: PathBuf,

    /// Deployment profile the generated config is tuned for.
    #[arg(long, value_enum, default_value_t = Profile::Dev)]
    pub profile: Profile,
}

/// Deployment profiles for `init`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Profile {
    /// Accept-all proof verifier, RPC writes enabled, sandbox processor.
    Dev,
    /// No proof verifier until a key is configured, RPC writes disabled.
    Production,
}

/// Arguments for the `status` subcommand.
#[derive(Parser, Debug)]
pub struct StatusArgs {
    /// Base URL of the running node.
    #[arg(long, default_value = "http://127.0.0.1:4000")]
    pub rpc_url: String,
}

/// Expands a leading `~` to the user's home directory.
pub fn expand_home(path: &std::path::Path) -> PathBuf {
    match path.strip_prefix("~") {
        Ok(rest) => std::env::var_os("HOME")
            .map(|home| PathBuf::from(home).join(rest))
            .unwrap_or_else(|| path.to_path_buf()),
        Err(_) => path.to_path_buf(),
    }
}
