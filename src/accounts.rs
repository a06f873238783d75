//! Account provisioning
//!
//! Every worker is bound to exactly one account for the whole run. In
//! external signing mode the account comes from a locally held key, loaded
//! from the key file when one exists and generated otherwise. In node signing
//! mode the caller supplies one node-managed address per worker.

use crate::config::SigningMode;
use alloy_primitives::{Address, B256};
use alloy_signer_local::PrivateKeySigner;
use std::collections::HashSet;
use std::path::PathBuf;
use thiserror::Error;
use tracing::{debug, info};
use zeroize::Zeroizing;

#[derive(Debug, Error)]
pub enum AccountError {
    #[error("Failed to access key file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse key file {path}: {reason}")]
    Parse { path: PathBuf, reason: String },

    #[error("Invalid private key at position {index}: {reason}")]
    InvalidKey { index: usize, reason: String },

    #[error("Need at least {required} accounts for {required} workers ({supplied} supplied)")]
    InsufficientAccounts { required: usize, supplied: usize },

    #[error("Invalid account address at position {index}: {value}")]
    InvalidAddress { index: usize, value: String },

    #[error("Account {0} is assigned to more than one worker")]
    DuplicateAccount(Address),
}

/// Persisted list of hex private keys, one per worker
#[derive(Debug, Clone)]
pub struct KeyStore {
    path: PathBuf,
}

/// Keys available for a run and where they came from
#[derive(Debug)]
pub struct ProvisionedKeys {
    pub keys: Vec<PrivateKeySigner>,
    pub reused: usize,
    pub generated: usize,
}

impl KeyStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Load stored keys; a missing file is an empty store
    pub fn load(&self) -> Result<Vec<PrivateKeySigner>, AccountError> {
        let contents = match std::fs::read_to_string(&self.path) {
            Ok(contents) => Zeroizing::new(contents),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "No key file, starting empty");
                return Ok(Vec::new());
            }
            Err(source) => {
                return Err(AccountError::Io {
                    path: self.path.clone(),
                    source,
                })
            }
        };

        let encoded: Zeroizing<Vec<String>> = Zeroizing::new(
            serde_json::from_str(&contents).map_err(|e| AccountError::Parse {
                path: self.path.clone(),
                reason: e.to_string(),
            })?,
        );

        encoded
            .iter()
            .enumerate()
            .map(|(index, key)| parse_key(index, key))
            .collect()
    }

    /// Rewrite the whole store
    pub fn save(&self, keys: &[PrivateKeySigner]) -> Result<(), AccountError> {
        let encoded: Zeroizing<Vec<String>> =
            Zeroizing::new(keys.iter().map(|k| hex::encode(k.to_bytes())).collect());
        let contents = Zeroizing::new(serde_json::to_string_pretty(&*encoded).map_err(|e| {
            AccountError::Parse {
                path: self.path.clone(),
                reason: e.to_string(),
            }
        })?);

        let io_err = |source| AccountError::Io {
            path: self.path.clone(),
            source,
        };
        std::fs::write(&self.path, contents.as_bytes()).map_err(io_err)?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&self.path, std::fs::Permissions::from_mode(0o600))
                .map_err(io_err)?;
        }

        Ok(())
    }

    /// Make sure at least `count` keys exist, generating and persisting the shortfall
    pub fn ensure_keys(&self, count: usize) -> Result<ProvisionedKeys, AccountError> {
        let mut keys = self.load()?;
        let reused = keys.len().min(count);
        let generated = count.saturating_sub(keys.len());

        if generated > 0 {
            keys.extend((0..generated).map(|_| PrivateKeySigner::random()));
            self.save(&keys)?;
            info!(path = %self.path.display(), generated, total = keys.len(), "Stored generated keys");
        }

        Ok(ProvisionedKeys {
            keys,
            reused,
            generated,
        })
    }
}

fn parse_key(index: usize, encoded: &str) -> Result<PrivateKeySigner, AccountError> {
    let trimmed = encoded.trim();
    let hex_key = trimmed.strip_prefix("0x").unwrap_or(trimmed);
    let bytes = Zeroizing::new(hex::decode(hex_key).map_err(|e| AccountError::InvalidKey {
        index,
        reason: e.to_string(),
    })?);
    if bytes.len() != 32 {
        return Err(AccountError::InvalidKey {
            index,
            reason: format!("expected 32 bytes, got {}", bytes.len()),
        });
    }

    PrivateKeySigner::from_bytes(&B256::from_slice(&bytes)).map_err(|e| AccountError::InvalidKey {
        index,
        reason: e.to_string(),
    })
}

/// One worker's identity
#[derive(Debug, Clone)]
pub struct WorkerAccount {
    pub address: Address,
    /// Present only in external signing mode
    pub signer: Option<PrivateKeySigner>,
}

/// Accounts bound to workers, by worker index
#[derive(Debug)]
pub struct AccountPool {
    pub accounts: Vec<WorkerAccount>,
    pub reused: usize,
    pub generated: usize,
}

/// Bind one account to each of `workers` workers
pub fn provision_accounts(
    mode: SigningMode,
    workers: usize,
    supplied: &[String],
    key_store: Option<&KeyStore>,
) -> Result<AccountPool, AccountError> {
    let pool = match mode {
        SigningMode::External => {
            let provisioned = match key_store {
                Some(store) => store.ensure_keys(workers)?,
                None => ProvisionedKeys {
                    keys: (0..workers).map(|_| PrivateKeySigner::random()).collect(),
                    reused: 0,
                    generated: workers,
                },
            };
            AccountPool {
                accounts: provisioned
                    .keys
                    .into_iter()
                    .take(workers)
                    .map(|signer| WorkerAccount {
                        address: signer.address(),
                        signer: Some(signer),
                    })
                    .collect(),
                reused: provisioned.reused,
                generated: provisioned.generated,
            }
        }
        SigningMode::Node => {
            if supplied.len() < workers {
                return Err(AccountError::InsufficientAccounts {
                    required: workers,
                    supplied: supplied.len(),
                });
            }
            let accounts = supplied
                .iter()
                .take(workers)
                .enumerate()
                .map(|(index, value)| {
                    value
                        .trim()
                        .parse::<Address>()
                        .map(|address| WorkerAccount {
                            address,
                            signer: None,
                        })
                        .map_err(|_| AccountError::InvalidAddress {
                            index,
                            value: value.clone(),
                        })
                })
                .collect::<Result<Vec<_>, _>>()?;
            AccountPool {
                accounts,
                reused: 0,
                generated: 0,
            }
        }
    };

    let mut seen = HashSet::new();
    if let Some(dup) = pool.accounts.iter().find(|a| !seen.insert(a.address)) {
        return Err(AccountError::DuplicateAccount(dup.address));
    }

    Ok(pool)
}
