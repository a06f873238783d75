//! Timeout-bounded RPC gateway
//!
//! Every remote call made by a worker goes through [`RpcGateway::call`]:
//! - the whole call, retries included, is bounded by the configured timeout
//! - only throttling errors are retried, with doubling backoff
//! - each attempt increments `rpc.calls` and one of `rpc.success` / `rpc.fail`

use super::rpc_atomics::AtomicCallStats;
use super::rpc_errors::{RetryPolicy, RpcError};
use super::rpc_transport::RpcTransport;
use crate::metrics::WorkerMetrics;
use crate::tx_builder::SendTxArgs;
use crate::types::Receipt;
use alloy_primitives::{Address, Bytes, B256, U64};
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio_retry::RetryIf;
use tracing::debug;

#[derive(Debug, Clone)]
pub struct RpcGateway {
    transport: Arc<dyn RpcTransport>,
    timeout: Duration,
    policy: RetryPolicy,
    stats: Arc<AtomicCallStats>,
    metrics: WorkerMetrics,
}

impl RpcGateway {
    pub fn new(
        transport: Arc<dyn RpcTransport>,
        timeout: Duration,
        stats: Arc<AtomicCallStats>,
        metrics: WorkerMetrics,
    ) -> Self {
        Self {
            transport,
            timeout,
            policy: RetryPolicy::default(),
            stats,
            metrics,
        }
    }

    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn metrics(&self) -> &WorkerMetrics {
        &self.metrics
    }

    async fn attempt(&self, method: &str, params: &Value) -> Result<Value, RpcError> {
        debug!(method, "Invoking");
        self.metrics.incr("rpc.calls");
        let result = self.transport.request(method, params.clone()).await;
        self.stats.record_call(result.is_ok());
        match &result {
            Ok(_) => self.metrics.incr("rpc.success"),
            Err(err) => {
                self.metrics.incr("rpc.fail");
                if err.is_retryable() {
                    self.stats.record_rate_limit_hit();
                }
                debug!(method, error = %err, "Attempt failed");
            }
        }
        result
    }

    /// Raw call returning the undecoded `result`
    pub async fn call_raw(&self, method: &str, params: Value) -> Result<Value, RpcError> {
        let retries = RetryIf::spawn(
            self.policy.delays(),
            || self.attempt(method, &params),
            |err: &RpcError| err.is_retryable(),
        );

        match tokio::time::timeout(self.timeout, retries).await {
            Ok(result) => result,
            Err(_) => Err(RpcError::Timeout {
                method: method.to_string(),
                timeout_ms: self.timeout.as_millis() as u64,
            }),
        }
    }

    /// Call and decode the result
    pub async fn call<T: DeserializeOwned>(&self, method: &str, params: Value) -> Result<T, RpcError> {
        let value = self.call_raw(method, params).await?;
        serde_json::from_value(value)
            .map_err(|e| RpcError::Decode(format!("{} result: {}", method, e)))
    }

    /// `eth_getTransactionCount` at the given block tag
    pub async fn get_transaction_count(&self, address: Address, block: &str) -> Result<u64, RpcError> {
        let count: U64 = self
            .call("eth_getTransactionCount", json!([address, block]))
            .await?;
        Ok(count.to::<u64>())
    }

    /// `eth_sendTransaction`, signed by the node
    pub async fn send_transaction(&self, args: &SendTxArgs) -> Result<B256, RpcError> {
        self.call("eth_sendTransaction", json!([args])).await
    }

    /// `eth_sendRawTransaction` with a locally signed envelope
    pub async fn send_raw_transaction(&self, raw: &Bytes) -> Result<B256, RpcError> {
        self.call("eth_sendRawTransaction", json!([raw])).await
    }

    /// `eth_getTransactionReceipt`; `None` while the transaction is unmined
    pub async fn get_transaction_receipt(&self, tx_hash: B256) -> Result<Option<Receipt>, RpcError> {
        self.call("eth_getTransactionReceipt", json!([tx_hash])).await
    }

    /// `eth_call` against the latest block
    pub async fn call_contract(&self, args: &SendTxArgs) -> Result<Bytes, RpcError> {
        self.call("eth_call", json!([args, "latest"])).await
    }

    /// `eth_estimateGas`
    pub async fn estimate_gas(&self, args: &SendTxArgs) -> Result<u64, RpcError> {
        let gas: U64 = self.call("eth_estimateGas", json!([args])).await?;
        Ok(gas.to::<u64>())
    }

    /// `net_version`, used as the EIP-155 chain id
    pub async fn network_id(&self) -> Result<u64, RpcError> {
        let version: String = self.call("net_version", json!([])).await?;
        version.trim().parse::<u64>().map_err(|e| {
            RpcError::Decode(format!(
                "Failed to parse network ID returned from node '{}': {}",
                version, e
            ))
        })
    }
}
