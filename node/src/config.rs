//! # Node Configuration
//!
//! Runtime configuration loaded from a TOML file. Every table and every
//! field has a default, so an empty file (or no file at all) yields a
//! working development node. CLI flags are applied on top by `main`.
//!
//! ```toml
//! [server]
//! rpc_port = 4000
//!
//! [ledger]
//! reputation_per_deposit = 1
//! rpc_writes = false
//!
//! [ledger.tiers]
//! silver = 10
//!
//! [rate_limit]
//! max_requests = 5
//! window_secs = 60
//! ```

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};

use yieldflow_protocol::config::{
    LedgerConfig, DEFAULT_METRICS_PORT, DEFAULT_MIN_CARD_REFERENCE_LEN,
    DEFAULT_MIN_TOPUP_REPUTATION, DEFAULT_RATE_LIMIT_MAX_REQUESTS,
    DEFAULT_RATE_LIMIT_WINDOW_SECS, DEFAULT_RPC_PORT, DEFAULT_TOPUP_CURRENCY,
};

/// Everything the node reads from `config.toml`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    pub server: ServerConfig,
    pub ledger: LedgerSection,
    pub pool: PoolConfig,
    pub gateway: GatewayConfig,
    pub rate_limit: RateLimitConfig,
    pub processor: ProcessorConfig,
    pub relay: RelayConfig,
    pub zk: ZkConfig,
    pub admin: AdminConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind: String,
    pub rpc_port: u16,
    pub metrics_port: u16,
    /// How often the ledger is snapshotted to disk.
    pub snapshot_interval_secs: u64,
    /// How often the pool accrues interest.
    pub accrual_interval_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0".into(),
            rpc_port: DEFAULT_RPC_PORT,
            metrics_port: DEFAULT_METRICS_PORT,
            snapshot_interval_secs: 30,
            accrual_interval_secs: 60,
        }
    }
}

/// Ledger policy plus the node-side switches around it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LedgerSection {
    /// Exposes `ledger_deposit`, `ledger_withdraw` and `ledger_spend` over RPC.
    pub rpc_writes: bool,
    #[serde(flatten)]
    pub policy: LedgerConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Annual yield in basis points.
    pub apy_bps: u32,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self { apy_bps: 500 }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    pub min_reputation: u64,
    pub supported_currency: String,
    pub min_card_reference_len: usize,
    /// Key callers by the first `X-Forwarded-For` entry. Only enable behind
    /// a proxy that overwrites the header.
    pub trust_forwarded_for: bool,
    /// Entries kept in the in-memory audit log.
    pub audit_capacity: usize,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            min_reputation: DEFAULT_MIN_TOPUP_REPUTATION,
            supported_currency: DEFAULT_TOPUP_CURRENCY.into(),
            min_card_reference_len: DEFAULT_MIN_CARD_REFERENCE_LEN,
            trust_forwarded_for: false,
            audit_capacity: 1024,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    pub max_requests: u32,
    pub window_secs: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_requests: DEFAULT_RATE_LIMIT_MAX_REQUESTS,
            window_secs: DEFAULT_RATE_LIMIT_WINDOW_SECS,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProcessorConfig {
    pub base_url: String,
    /// Usually supplied through `YIELDFLOW_PROCESSOR_API_KEY` instead.
    pub api_key: Option<String>,
    pub timeout_secs: u64,
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.circle.com/v1".into(),
            api_key: None,
            timeout_secs: 15,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    /// Spend and withdrawal events are POSTed here when set.
    pub webhook_url: Option<String>,
    pub timeout_secs: u64,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            webhook_url: None,
            timeout_secs: 5,
        }
    }
}

/// Which proof verifier the ledger gets.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VerifierMode {
    /// Every proof reads as invalid.
    #[default]
    Disabled,
    /// Every proof reads as valid. Development only.
    AcceptAll,
    /// Groth16 over BN254 with the key at `verifying_key_path`.
    Groth16,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ZkConfig {
    pub verifier: VerifierMode,
    /// Compressed arkworks verifying key.
    pub verifying_key_path: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AdminConfig {
    /// Bearer token for privileged RPC methods. Usually supplied through
    /// `YIELDFLOW_ADMIN_TOKEN` instead.
    pub token: Option<String>,
}

impl NodeConfig {
    /// Reads and validates a config file.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        let config: NodeConfig = toml::from_str(&raw)
            .with_context(|| format!("failed to parse config file {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    /// Like [`Self::load`], but a missing file yields the defaults.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if path.exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }

    pub fn validate(&self) -> Result<()> {
        self.ledger
            .policy
            .validate()
            .context("invalid [ledger] section")?;
        if self.rate_limit.max_requests == 0 || self.rate_limit.window_secs == 0 {
            bail!("[rate_limit] max_requests and window_secs must be greater than zero");
        }
        if self.gateway.supported_currency.trim().is_empty() {
            bail!("[gateway] supported_currency must not be empty");
        }
        if self.zk.verifier == VerifierMode::Groth16 && self.zk.verifying_key_path.is_none() {
            bail!("[zk] verifier = \"groth16\" requires verifying_key_path");
        }
        Ok(())
    }

    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).context("failed to render config")
    }
}
