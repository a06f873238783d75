//! Ledger Exerciser Library
//!
//! Drives concurrent transaction load against an EVM ledger node over
//! JSON-RPC. A pool of workers each owns one account and nonce sequence,
//! submits batches of contract calls (signed locally or by the node), waits
//! for receipts with an adaptive poll schedule, and folds outcomes into
//! shared success/failure totals.

pub mod accounts;
pub mod args;
pub mod compiler;
pub mod config;
pub mod error;
pub mod metrics;
pub mod orchestrator;
pub mod receipt;
pub mod rpc_manager;
pub mod structured_logging;
pub mod tx_builder;
pub mod types;
pub mod worker;

// Re-export commonly used types
pub use config::{CallMode, MetricsConfig, RunConfig, SigningMode};
pub use error::ExerciserError;
pub use orchestrator::Exerciser;
pub use rpc_manager::{HttpTransport, RpcError, RpcTransport};
pub use types::{RunSummary, WorkerReport};
