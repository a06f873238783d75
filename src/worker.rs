//! Worker loop
//!
//! A worker owns one account and its nonce sequence for the whole run. Each
//! loop iteration fires a batch of transactions back to back, sleeps the
//! minimum receipt wait, then waits on every accepted hash in turn and folds
//! the outcome into the shared [`RunCounters`].

use crate::args::PartitionContext;
use crate::compiler::ContractArtifact;
use crate::config::{CallMode, RunConfig};
use crate::error::ExerciserError;
use crate::receipt::{retry_delay, ReceiptOutcome, ReceiptWaiter};
use crate::rpc_manager::{RpcError, RpcGateway};
use crate::tx_builder::{PrivateRouting, SigningStrategy, TransactionBuilderError, TransactionRequest};
use crate::types::{CallResult, RunCounters, WorkerReport};
use alloy_primitives::{Address, Bytes, B256};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

/// Display name of the worker at `index`
pub fn worker_name(index: usize) -> String {
    format!("W{:04}", index)
}

/// Nonce to continue from after a batch.
///
/// `issued` is one past the last provisional nonce handed out and `resolved`
/// pairs every nonce that reached a final state with whether the node used it
/// up (receipt obtained, or rejected as known / too low). Nonces that timed
/// out are reissued unless a later nonce was used.
pub fn next_nonce(base: u64, issued: u64, resolved: &[(u64, bool)]) -> u64 {
    let after_consumed = resolved
        .iter()
        .filter(|(_, consumed)| *consumed)
        .map(|(nonce, _)| nonce + 1)
        .max()
        .unwrap_or(base);
    let first_unused = resolved
        .iter()
        .filter(|(_, consumed)| !*consumed)
        .map(|(nonce, _)| *nonce)
        .min()
        .unwrap_or(issued);

    after_consumed.max(first_unused).max(base)
}

pub struct Worker {
    index: usize,
    name: String,
    config: Arc<RunConfig>,
    artifact: Arc<ContractArtifact>,
    signing: SigningStrategy,
    gateway: RpcGateway,
    waiter: ReceiptWaiter,
    counters: Arc<RunCounters>,
    nonce: u64,
    start_nonce: u64,
    loop_index: u64,
    last_mining_time: Duration,
    successes: u64,
    failures: u64,
    out_of_gas: u64,
}

impl Worker {
    pub fn new(
        index: usize,
        signing: SigningStrategy,
        config: Arc<RunConfig>,
        artifact: Arc<ContractArtifact>,
        gateway: RpcGateway,
        counters: Arc<RunCounters>,
    ) -> Self {
        let waiter = ReceiptWaiter::new(gateway.clone(), config.gas, config.receipt_wait_max());
        Self {
            index,
            name: worker_name(index),
            config,
            artifact,
            signing,
            gateway,
            waiter,
            counters,
            nonce: 0,
            start_nonce: 0,
            loop_index: 0,
            last_mining_time: Duration::ZERO,
            successes: 0,
            failures: 0,
            out_of_gas: 0,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn address(&self) -> Address {
        self.signing.address()
    }

    /// Take the starting nonce from the override, or from the node
    pub async fn init(&mut self) -> Result<(), RpcError> {
        self.nonce = match self.config.nonce {
            Some(nonce) => nonce,
            None => {
                let nonce = self
                    .gateway
                    .get_transaction_count(self.address(), "latest")
                    .await?;
                debug!(worker = %self.name, nonce, account = %self.address(), "Received nonce at 'latest' block");
                nonce
            }
        };
        self.start_nonce = self.nonce;
        Ok(())
    }

    fn request(&self, nonce: u64, to: Option<Address>, input: Bytes) -> TransactionRequest {
        let tx = match to {
            Some(to) => TransactionRequest::call(nonce, to, input),
            None => TransactionRequest::deployment(nonce, input),
        };
        let private = self.config.private_from.as_ref().map(|from| PrivateRouting {
            private_from: from.clone(),
            private_for: self.config.private_for.clone(),
        });

        tx.with_value(self.config.value)
            .with_gas(self.config.gas, self.config.gas_price)
            .with_private(private)
    }

    /// Sign if needed and submit one transaction
    async fn send(&self, tx: &TransactionRequest) -> Result<B256, TransactionBuilderError> {
        let start = Instant::now();
        let result = self.signing.submit(&self.gateway, tx).await;
        let call_secs = start.elapsed().as_secs_f64();

        let metrics = self.gateway.metrics();
        metrics.incr("tx.sub");
        match &result {
            Ok(hash) => {
                metrics.incr("tx.sent");
                info!(
                    worker = %self.name,
                    loop_index = self.loop_index,
                    nonce = tx.nonce,
                    tx = %hash,
                    deploy = tx.is_deployment(),
                    call_secs,
                    "TX sent"
                );
            }
            Err(err) => {
                metrics.incr("tx.sendfail");
                metrics.incr("tx.fail");
                error!(
                    worker = %self.name,
                    loop_index = self.loop_index,
                    nonce = tx.nonce,
                    category = err.category(),
                    error = %err,
                    call_secs,
                    "TX send failed"
                );
            }
        }
        result
    }

    /// Deploy the contract from this worker's account and return its address
    pub async fn install_contract(&mut self) -> Result<Address, ExerciserError> {
        let tx = self.request(self.nonce, None, self.artifact.bytecode.clone());
        let tx_hash = match self.send(&tx).await {
            Ok(hash) => hash,
            Err(err) => {
                if err.consumes_nonce() {
                    self.nonce += 1;
                }
                return Err(err.into());
            }
        };

        let outcome = self
            .waiter
            .wait_for(tx_hash, self.config.receipt_wait_min(), Duration::from_secs(1))
            .await;
        if outcome.consumed_nonce() {
            self.nonce += 1;
        }

        match outcome {
            ReceiptOutcome::Success { receipt, .. } => receipt
                .contract_address
                .ok_or(ExerciserError::MissingContractAddress(tx_hash)),
            ReceiptOutcome::Failure { out_of_gas, .. } => {
                Err(ExerciserError::ExecutionFailure { tx_hash, out_of_gas })
            }
            ReceiptOutcome::TimedOut { elapsed } => Err(ExerciserError::ReceiptTimeout { tx_hash, elapsed }),
            ReceiptOutcome::PollFailed { error, .. } => Err(error.into()),
        }
    }

    /// Single read-only invocation against `to`
    pub async fn call_once(&self, to: Address, mode: CallMode) -> Result<CallResult, ExerciserError> {
        let tx = self.request(self.nonce, Some(to), self.artifact.call_payload().clone());
        let args = tx.to_send_args(self.address());
        let start = Instant::now();

        let result = match mode {
            CallMode::EstimateGas => CallResult::GasEstimate(self.gateway.estimate_gas(&args).await?),
            CallMode::Call => CallResult::Returned(self.gateway.call_contract(&args).await?),
            CallMode::Transact => {
                return Err(ExerciserError::setup("call_once needs the call or estimate-gas mode"))
            }
        };
        info!(worker = %self.name, result = ?result, call_secs = start.elapsed().as_secs_f64(), "Call result");
        Ok(result)
    }

    fn partition(&self, index: u64) -> PartitionContext {
        let total_batches = if self.config.is_infinite() {
            u64::from(u32::MAX)
        } else {
            self.config.loops
        };
        PartitionContext {
            worker_index: self.index as u64,
            total_batches,
            batch_size: self.config.txns_per_loop,
            batch: self.loop_index,
            index,
        }
    }

    /// One iteration: fire the batch, wait on receipts, commit the nonce
    async fn run_batch(&mut self, to: Address) {
        let batch_size = self.config.txns_per_loop;
        let base = self.nonce;
        let mut issued = base;
        let mut pending = Vec::new();
        let mut resolved = Vec::new();

        for i in 0..batch_size {
            let payload = match self.artifact.payload_for(&self.partition(i)) {
                Ok(payload) => payload,
                Err(err) => {
                    self.gateway.metrics().incr("tx.fail");
                    warn!(
                        worker = %self.name,
                        loop_index = self.loop_index,
                        index = i,
                        nonce = issued,
                        error = %err,
                        "Resolving arguments failed, TX not sent"
                    );
                    continue;
                }
            };

            let tx = self.request(issued, Some(to), payload);
            match self.send(&tx).await {
                Ok(hash) => {
                    pending.push((issued, hash));
                    issued += 1;
                }
                Err(err) if err.consumes_nonce() => {
                    // The node has already seen this nonce
                    resolved.push((issued, true));
                    issued += 1;
                }
                Err(_) => {}
            }
        }

        let min_wait = self.config.receipt_wait_min();
        let delay = retry_delay(self.last_mining_time, min_wait);
        self.last_mining_time = Duration::ZERO;

        debug!(
            worker = %self.name,
            loop_index = self.loop_index,
            initial_secs = (min_wait + delay).as_secs_f64(),
            retry_secs = delay.as_secs_f64(),
            "Waiting for receipts"
        );
        let start = Instant::now();
        tokio::time::sleep(min_wait).await;

        let mut loop_successes = 0;
        for (nonce, hash) in pending {
            let outcome = self.waiter.wait_until_mined(start, hash, delay).await;

            match &outcome {
                ReceiptOutcome::Success { .. } => {
                    loop_successes += 1;
                    if self.last_mining_time.is_zero() {
                        self.last_mining_time = start.elapsed();
                        self.gateway.metrics().timing("tx.minetime", self.last_mining_time);
                        debug!(
                            worker = %self.name,
                            loop_index = self.loop_index,
                            mined_secs = self.last_mining_time.as_secs_f64(),
                            "First TX for this loop iteration mined"
                        );
                    }
                }
                ReceiptOutcome::Failure { out_of_gas, .. } => {
                    if *out_of_gas {
                        self.out_of_gas += 1;
                    }
                }
                ReceiptOutcome::TimedOut { .. } | ReceiptOutcome::PollFailed { .. } => {
                    error!(worker = %self.name, loop_index = self.loop_index, nonce, tx = %hash, "No receipt for TX");
                }
            }
            resolved.push((nonce, outcome.consumed_nonce()));
        }

        let loop_failures = batch_size - loop_successes;
        self.successes += loop_successes;
        self.failures += loop_failures;
        self.counters.record(loop_successes, loop_failures);

        self.nonce = next_nonce(base, issued, &resolved);
        debug!(
            worker = %self.name,
            loop_index = self.loop_index,
            successes = loop_successes,
            failures = loop_failures,
            nonce = self.nonce,
            "Loop complete"
        );
    }

    /// Run every configured loop against `to`; never fails, per-transaction
    /// errors are counted
    pub async fn run(mut self, to: Address) -> WorkerReport {
        debug!(
            worker = %self.name,
            txns_per_loop = self.config.txns_per_loop,
            loops = self.config.loops,
            account = %self.address(),
            "Started"
        );

        while self.config.is_infinite() || self.loop_index < self.config.loops {
            self.run_batch(to).await;
            self.loop_index += 1;
        }

        info!(
            worker = %self.name,
            loops = self.loop_index,
            successes = self.successes,
            failures = self.failures,
            "Finished"
        );

        WorkerReport {
            name: self.name,
            account: self.signing.address(),
            loops: self.loop_index,
            successes: self.successes,
            failures: self.failures,
            out_of_gas: self.out_of_gas,
            start_nonce: self.start_nonce,
            final_nonce: self.nonce,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::CompiledContract;
    use crate::metrics::WorkerMetrics;
    use crate::rpc_manager::{AtomicCallStats, RpcTransport};
    use crate::tx_builder::NodeSigner;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use proptest::prelude::*;
    use serde_json::{json, Value};

    #[derive(Debug, Default)]
    struct RecordingTransport {
        methods: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl RpcTransport for RecordingTransport {
        async fn request(&self, method: &str, _params: Value) -> Result<Value, RpcError> {
            self.methods.lock().push(method.to_string());
            Ok(json!("0x5208"))
        }
    }

    fn worker(transport: Arc<RecordingTransport>) -> Worker {
        let abi = r#"[{"type":"function","name":"set","inputs":[{"name":"x","type":"uint256"}],"outputs":[],"stateMutability":"nonpayable"}]"#;
        let compiled = CompiledContract {
            name: "Simple".to_string(),
            bytecode: Bytes::from_static(&[0x60, 0x80]),
            abi: serde_json::from_str(abi).unwrap(),
        };
        let artifact = ContractArtifact::new(compiled, "set", vec!["1".to_string()]).unwrap();
        let gateway = RpcGateway::new(
            transport,
            Duration::from_secs(5),
            Arc::new(AtomicCallStats::new()),
            WorkerMetrics::disabled("W0000", 0),
        );
        Worker::new(
            0,
            SigningStrategy::Node(NodeSigner::new(Address::repeat_byte(1))),
            Arc::new(RunConfig::default()),
            Arc::new(artifact),
            gateway,
            Arc::new(RunCounters::new()),
        )
    }

    #[tokio::test]
    async fn test_call_once_estimates_gas() {
        let transport = Arc::new(RecordingTransport::default());
        let result = worker(transport.clone())
            .call_once(Address::repeat_byte(0xcc), CallMode::EstimateGas)
            .await
            .unwrap();

        assert_eq!(result, CallResult::GasEstimate(21_000));
        assert_eq!(*transport.methods.lock(), vec!["eth_estimateGas"]);
    }

    #[tokio::test]
    async fn test_call_once_refuses_transact_mode() {
        let transport = Arc::new(RecordingTransport::default());
        let err = worker(transport.clone())
            .call_once(Address::repeat_byte(0xcc), CallMode::Transact)
            .await
            .unwrap_err();

        assert!(matches!(err, ExerciserError::Setup(_)));
        assert!(transport.methods.lock().is_empty());
    }

    #[test]
    fn test_worker_name() {
        assert_eq!(worker_name(0), "W0000");
        assert_eq!(worker_name(42), "W0042");
    }

    #[test]
    fn test_next_nonce_all_confirmed() {
        assert_eq!(next_nonce(5, 8, &[(5, true), (6, true), (7, true)]), 8);
    }

    #[test]
    fn test_next_nonce_timeout_is_reissued() {
        assert_eq!(next_nonce(5, 6, &[(5, false)]), 5);
        assert_eq!(next_nonce(5, 7, &[(5, true), (6, false)]), 6);
    }

    #[test]
    fn test_next_nonce_later_consumption_skips_gap() {
        assert_eq!(next_nonce(5, 7, &[(5, false), (6, true)]), 7);
    }

    #[test]
    fn test_next_nonce_stale_rejection_bumps_once() {
        assert_eq!(next_nonce(3, 4, &[(3, true)]), 4);
    }

    #[test]
    fn test_next_nonce_nothing_sent() {
        assert_eq!(next_nonce(9, 9, &[]), 9);
    }

    proptest! {
        #[test]
        fn prop_next_nonce_never_decreases(
            base in 0u64..1_000,
            outcomes in proptest::collection::vec(any::<bool>(), 0..20),
        ) {
            let resolved: Vec<(u64, bool)> = outcomes
                .iter()
                .enumerate()
                .map(|(i, consumed)| (base + i as u64, *consumed))
                .collect();
            let issued = base + resolved.len() as u64;
            let next = next_nonce(base, issued, &resolved);

            prop_assert!(next >= base);
            prop_assert!(next <= issued);
            if outcomes.iter().any(|c| *c) {
                prop_assert!(next > base);
            }
        }
    }
}
