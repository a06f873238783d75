//! Shared run types

use crate::rpc_manager::CallStatsSnapshot;
use alloy_primitives::{Address, B256, U64};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Transaction receipt as returned by `eth_getTransactionReceipt`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Receipt {
    #[serde(default)]
    pub block_hash: Option<B256>,
    #[serde(default)]
    pub block_number: Option<U64>,
    #[serde(default)]
    pub contract_address: Option<Address>,
    #[serde(default)]
    pub cumulative_gas_used: Option<U64>,
    #[serde(default)]
    pub transaction_hash: Option<B256>,
    #[serde(default)]
    pub from: Option<Address>,
    #[serde(default)]
    pub gas_used: Option<U64>,
    #[serde(default)]
    pub status: Option<U64>,
    #[serde(default)]
    pub to: Option<Address>,
    #[serde(default)]
    pub transaction_index: Option<U64>,
}

impl Receipt {
    /// A receipt only counts once it references a real block
    pub fn is_mined(&self) -> bool {
        self.block_number.is_some_and(|n| n > U64::ZERO)
    }

    /// Pre-Byzantium receipts carry no status and are treated as successful
    pub fn succeeded(&self) -> bool {
        self.status.map_or(true, |s| s == U64::from(1))
    }

    pub fn gas_used(&self) -> u64 {
        self.gas_used.map_or(0, |g| g.to::<u64>())
    }
}

/// Global success/failure totals shared by every worker
#[derive(Debug, Default)]
pub struct RunCounters {
    successes: AtomicU64,
    failures: AtomicU64,
}

impl RunCounters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, successes: u64, failures: u64) {
        self.successes.fetch_add(successes, Ordering::Relaxed);
        self.failures.fetch_add(failures, Ordering::Relaxed);
    }

    pub fn successes(&self) -> u64 {
        self.successes.load(Ordering::Relaxed)
    }

    pub fn failures(&self) -> u64 {
        self.failures.load(Ordering::Relaxed)
    }
}

/// Final state of one worker after its loop completes
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WorkerReport {
    pub name: String,
    pub account: Address,
    pub loops: u64,
    pub successes: u64,
    pub failures: u64,
    pub out_of_gas: u64,
    pub start_nonce: u64,
    pub final_nonce: u64,
}

/// Result of a single read-only invocation
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum CallResult {
    Returned(alloy_primitives::Bytes),
    GasEstimate(u64),
}

/// What a completed run reports
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub contract: Address,
    pub successes: u64,
    pub failures: u64,
    pub workers: Vec<WorkerReport>,
    pub call_result: Option<CallResult>,
    pub rpc: CallStatsSnapshot,
    pub elapsed: Duration,
}
