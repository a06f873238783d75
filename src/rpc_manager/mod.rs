//! RPC Manager Module
//!
//! Transport gateway between the workers and the node's JSON-RPC surface

// Submodules
pub mod rpc_atomics;
pub mod rpc_errors;
pub mod rpc_gateway;
pub mod rpc_transport;

// Re-exports for convenience
pub use rpc_atomics::{AtomicCallStats, CallStatsSnapshot};
pub use rpc_errors::{RetryPolicy, RpcError};
pub use rpc_gateway::RpcGateway;
pub use rpc_transport::{HttpTransport, RpcTransport};
