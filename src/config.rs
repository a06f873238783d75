//! Configuration module for the exerciser
//!
//! A [`RunConfig`] is built once at startup (defaults, then an optional TOML
//! file, then command line overrides), validated, and shared read-only with
//! every worker for the rest of the run.

use crate::metrics::MetricsFormat;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Which party signs submitted transactions
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SigningMode {
    /// The node signs with an account it manages (`eth_sendTransaction`)
    #[default]
    Node,
    /// Workers sign locally with generated keys (`eth_sendRawTransaction`)
    External,
}

/// What the run does once the contract address is known
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CallMode {
    /// Worker pool submitting transactions
    #[default]
    Transact,
    /// Single `eth_call`
    Call,
    /// Single `eth_estimateGas`
    EstimateGas,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    /// statsd `host:port`; no metrics are sent when unset
    #[serde(default)]
    pub statsd: Option<String>,

    #[serde(default)]
    pub format: MetricsFormat,

    /// Extra qualifier mixed into every stat name
    #[serde(default)]
    pub qualifier: Option<String>,

    /// statsd buffer flush period in milliseconds
    #[serde(default = "default_flush_ms")]
    pub flush_ms: u64,

    /// Serve aggregate counters for Prometheus on this port
    #[serde(default)]
    pub prometheus_port: Option<u16>,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            statsd: None,
            format: MetricsFormat::default(),
            qualifier: None,
            flush_ms: default_flush_ms(),
            prometheus_port: None,
        }
    }
}

/// Immutable run configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunConfig {
    /// JSON-RPC URL of the node
    #[serde(default)]
    pub url: String,

    /// Solidity source, or a prebuilt `.json` artifact
    #[serde(default)]
    pub source: PathBuf,

    /// Contract to select when the source holds several
    #[serde(default)]
    pub contract_name: Option<String>,

    /// `--evm-version` passed to solc
    #[serde(default)]
    pub evm_version: Option<String>,

    /// Pre-deployed contract address; deployed by a worker when unset
    #[serde(default)]
    pub contract: Option<String>,

    #[serde(default)]
    pub method: String,

    /// String arguments, may contain `RANGE:<start>` / `HASH:<index>`
    #[serde(default)]
    pub args: Vec<String>,

    /// Wei transferred with each transaction
    #[serde(default)]
    pub value: u64,

    #[serde(default = "default_gas")]
    pub gas: u64,

    #[serde(default)]
    pub gas_price: u64,

    /// Loops per worker, 0 = until killed
    #[serde(default = "default_loops")]
    pub loops: u64,

    #[serde(default = "default_txns_per_loop")]
    pub txns_per_loop: u64,

    /// Seconds before the first receipt poll
    #[serde(default = "default_receipt_wait_min")]
    pub receipt_wait_min: u64,

    /// Seconds before giving up on a receipt
    #[serde(default = "default_receipt_wait_max")]
    pub receipt_wait_max: u64,

    #[serde(default = "default_workers")]
    pub workers: usize,

    #[serde(default)]
    pub signing: SigningMode,

    /// EIP-155 chain id, 0 = query `net_version`
    #[serde(default)]
    pub chain_id: u64,

    /// One node-managed account per worker
    #[serde(default)]
    pub accounts: Vec<String>,

    /// Where generated signing keys are persisted between runs
    #[serde(default)]
    pub keys_file: Option<PathBuf>,

    /// Starting nonce for every worker, otherwise queried from the node
    #[serde(default)]
    pub nonce: Option<u64>,

    #[serde(default = "default_rpc_timeout")]
    pub rpc_timeout_secs: u64,

    #[serde(default)]
    pub call_mode: CallMode,

    #[serde(default)]
    pub private_from: Option<String>,

    #[serde(default)]
    pub private_for: Vec<String>,

    #[serde(default)]
    pub metrics: MetricsConfig,
}

// Default value functions
fn default_gas() -> u64 { 1_000_000 }
fn default_loops() -> u64 { 1 }
fn default_txns_per_loop() -> u64 { 1 }
fn default_receipt_wait_min() -> u64 { 11 }
fn default_receipt_wait_max() -> u64 { 20 }
fn default_workers() -> usize { 1 }
fn default_rpc_timeout() -> u64 { 30 }
fn default_flush_ms() -> u64 { 1000 }

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            source: PathBuf::new(),
            contract_name: None,
            evm_version: None,
            contract: None,
            method: String::new(),
            args: Vec::new(),
            value: 0,
            gas: default_gas(),
            gas_price: 0,
            loops: default_loops(),
            txns_per_loop: default_txns_per_loop(),
            receipt_wait_min: default_receipt_wait_min(),
            receipt_wait_max: default_receipt_wait_max(),
            workers: default_workers(),
            signing: SigningMode::default(),
            chain_id: 0,
            accounts: Vec::new(),
            keys_file: None,
            nonce: None,
            rpc_timeout_secs: default_rpc_timeout(),
            call_mode: CallMode::default(),
            private_from: None,
            private_for: Vec::new(),
            metrics: MetricsConfig::default(),
        }
    }
}

impl RunConfig {
    /// Load configuration from a TOML file
    pub fn from_toml_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|e| {
            ConfigError::Io(format!("Failed to read config file {}: {}", path.display(), e))
        })?;

        toml::from_str(&contents)
            .map_err(|e| ConfigError::Parse(format!("Failed to parse TOML: {}", e)))
    }

    pub fn receipt_wait_min(&self) -> Duration {
        Duration::from_secs(self.receipt_wait_min)
    }

    pub fn receipt_wait_max(&self) -> Duration {
        Duration::from_secs(self.receipt_wait_max)
    }

    pub fn rpc_timeout(&self) -> Duration {
        Duration::from_secs(self.rpc_timeout_secs)
    }

    pub fn is_infinite(&self) -> bool {
        self.loops == 0
    }

    pub fn private_routing(&self) -> bool {
        self.private_from.is_some()
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.url.is_empty() {
            return Err(ConfigError::Validation("An RPC URL is required".to_string()));
        }
        if !self.url.starts_with("http://") && !self.url.starts_with("https://") {
            return Err(ConfigError::Validation(format!(
                "Invalid URL format: {}",
                self.url
            )));
        }
        if self.source.as_os_str().is_empty() {
            return Err(ConfigError::Validation(
                "A contract source file is required".to_string(),
            ));
        }
        if self.method.is_empty() {
            return Err(ConfigError::Validation("A method name is required".to_string()));
        }
        if self.workers == 0 {
            return Err(ConfigError::Validation("workers must be > 0".to_string()));
        }
        if self.txns_per_loop == 0 {
            return Err(ConfigError::Validation(
                "transactions per loop must be > 0".to_string(),
            ));
        }
        if self.receipt_wait_max < self.receipt_wait_min {
            return Err(ConfigError::Validation(format!(
                "seconds-max ({}) must be >= seconds-min ({})",
                self.receipt_wait_max, self.receipt_wait_min
            )));
        }
        if self.rpc_timeout_secs == 0 {
            return Err(ConfigError::Validation("rpc timeout must be > 0".to_string()));
        }
        if self.metrics.flush_ms == 0 {
            return Err(ConfigError::Validation(
                "statsd flush interval must be > 0".to_string(),
            ));
        }
        if self.signing == SigningMode::External && self.private_routing() {
            return Err(ConfigError::Validation(
                "External signing not currently supported with private transactions".to_string(),
            ));
        }
        if self.private_from.is_none() && !self.private_for.is_empty() {
            return Err(ConfigError::Validation(
                "private-for requires private-from".to_string(),
            ));
        }
        Ok(())
    }
}

/// Configuration-related errors
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(String),
    #[error("Parse error: {0}")]
    Parse(String),
    #[error("Validation error: {0}")]
    Validation(String),
}
