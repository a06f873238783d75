//! Run-level error taxonomy
//!
//! Only these errors stop a run. Everything that goes wrong for a single
//! transaction is recovered inside the worker loop and counted as a failure.

use crate::accounts::AccountError;
use crate::args::ArgError;
use crate::compiler::CompileError;
use crate::config::ConfigError;
use crate::rpc_manager::RpcError;
use crate::tx_builder::TransactionBuilderError;
use alloy_primitives::B256;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ExerciserError {
    #[error("Setup error: {0}")]
    Setup(String),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Accounts(#[from] AccountError),

    #[error(transparent)]
    Compile(#[from] CompileError),

    #[error("Argument resolution failed: {0}")]
    ArgResolution(#[from] ArgError),

    #[error("Transaction failed: {0}")]
    Transaction(#[from] TransactionBuilderError),

    #[error("RPC error: {0}")]
    Rpc(#[from] RpcError),

    #[error("Timed out waiting for TX receipt {tx_hash} after {:.2}s", elapsed.as_secs_f64())]
    ReceiptTimeout { tx_hash: B256, elapsed: Duration },

    #[error("TX {tx_hash} failed (out of gas: {out_of_gas})")]
    ExecutionFailure { tx_hash: B256, out_of_gas: bool },

    #[error("Deployment {0} produced no contract address")]
    MissingContractAddress(B256),

    #[error("Failed to deploy contract with any of {attempts} workers")]
    DeploymentExhausted {
        attempts: usize,
        /// Error of the last worker that tried
        #[source]
        last: Box<ExerciserError>,
    },
}

impl ExerciserError {
    pub fn setup(reason: impl Into<String>) -> Self {
        Self::Setup(reason.into())
    }
}
