//! Receipt Waiter
//!
//! ```text
//! WAITING_INITIAL -> POLLING -> { CONFIRMED_SUCCESS, CONFIRMED_FAILURE, TIMED_OUT }
//! ```
//!
//! The caller sleeps the minimum wait once per batch, then every accepted
//! hash is polled until it is mined or the maximum wait since the batch
//! started has passed.

use crate::metrics::WorkerMetrics;
use crate::rpc_manager::{RpcError, RpcGateway};
use crate::types::Receipt;
use alloy_primitives::B256;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, error, info};

const MIN_RETRY_DELAY: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitState {
    WaitingInitial,
    Polling,
    ConfirmedSuccess,
    ConfirmedFailure,
    TimedOut,
}

impl WaitState {
    pub fn is_terminal(self) -> bool {
        !matches!(self, Self::WaitingInitial | Self::Polling)
    }
}

/// How one submitted transaction resolved
#[derive(Debug, Clone, PartialEq)]
pub enum ReceiptOutcome {
    Success {
        receipt: Receipt,
        elapsed: Duration,
    },
    Failure {
        receipt: Receipt,
        elapsed: Duration,
        /// Gas used reached the gas limit
        out_of_gas: bool,
    },
    TimedOut {
        elapsed: Duration,
    },
    /// Polling itself failed with a non-retryable error
    PollFailed {
        error: RpcError,
        elapsed: Duration,
    },
}

impl ReceiptOutcome {
    pub fn state(&self) -> WaitState {
        match self {
            Self::Success { .. } => WaitState::ConfirmedSuccess,
            Self::Failure { .. } => WaitState::ConfirmedFailure,
            Self::TimedOut { .. } | Self::PollFailed { .. } => WaitState::TimedOut,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }

    pub fn receipt(&self) -> Option<&Receipt> {
        match self {
            Self::Success { receipt, .. } | Self::Failure { receipt, .. } => Some(receipt),
            _ => None,
        }
    }

    /// A mined receipt, successful or not, means the nonce was used
    pub fn consumed_nonce(&self) -> bool {
        self.receipt().is_some()
    }

    pub fn elapsed(&self) -> Duration {
        match self {
            Self::Success { elapsed, .. }
            | Self::Failure { elapsed, .. }
            | Self::TimedOut { elapsed }
            | Self::PollFailed { elapsed, .. } => *elapsed,
        }
    }
}

/// Delay between receipt polls.
///
/// Aims for two polls per round by splitting the difference between the
/// minimum wait and one second past the last observed mining time.
pub fn retry_delay(last_mining_time: Duration, min_wait: Duration) -> Duration {
    let last = last_mining_time.max(min_wait);
    ((last - min_wait + MIN_RETRY_DELAY) / 2).max(MIN_RETRY_DELAY)
}

#[derive(Debug, Clone)]
pub struct ReceiptWaiter {
    gateway: RpcGateway,
    gas_limit: u64,
    max_wait: Duration,
}

impl ReceiptWaiter {
    pub fn new(gateway: RpcGateway, gas_limit: u64, max_wait: Duration) -> Self {
        Self {
            gateway,
            gas_limit,
            max_wait,
        }
    }

    fn metrics(&self) -> &WorkerMetrics {
        self.gateway.metrics()
    }

    /// Sleep `min_wait`, then poll a single transaction
    pub async fn wait_for(&self, tx_hash: B256, min_wait: Duration, retry_delay: Duration) -> ReceiptOutcome {
        let start = Instant::now();
        debug!(
            tx = %tx_hash,
            state = ?WaitState::WaitingInitial,
            wait_secs = min_wait.as_secs_f64(),
            "Waiting for receipt"
        );
        tokio::time::sleep(min_wait).await;
        self.wait_until_mined(start, tx_hash, retry_delay).await
    }

    /// Poll until mined or until `max_wait` has elapsed since `start`
    pub async fn wait_until_mined(&self, start: Instant, tx_hash: B256, retry_delay: Duration) -> ReceiptOutcome {
        loop {
            let call_start = Instant::now();
            let polled = self.gateway.get_transaction_receipt(tx_hash).await;
            let elapsed = start.elapsed();

            let receipt = match polled {
                Ok(receipt) => receipt.filter(Receipt::is_mined),
                Err(error) => {
                    error!(tx = %tx_hash, %error, "Requesting TX receipt");
                    self.metrics().incr("tx.fail");
                    return ReceiptOutcome::PollFailed { error, elapsed };
                }
            };

            info!(
                tx = %tx_hash,
                mined = receipt.is_some(),
                elapsed_secs = elapsed.as_secs_f64(),
                call_secs = call_start.elapsed().as_secs_f64(),
                "Receipt poll"
            );

            if let Some(receipt) = receipt {
                self.metrics().incr("tx.receipt");
                debug!(
                    tx = %tx_hash,
                    status = ?receipt.status,
                    block = ?receipt.block_number,
                    gas_used = receipt.gas_used(),
                    cumulative_gas_used = ?receipt.cumulative_gas_used,
                    "Receipt"
                );

                let outcome = if receipt.succeeded() {
                    self.metrics().incr("tx.success");
                    ReceiptOutcome::Success { receipt, elapsed }
                } else {
                    self.metrics().incr("tx.failexec");
                    self.metrics().incr("tx.fail");
                    let out_of_gas = receipt.gas_used() == self.gas_limit;
                    error!(tx = %tx_hash, status = ?receipt.status, out_of_gas, "TX failed");
                    if out_of_gas {
                        error!(tx = %tx_hash, "TX ran out of gas before completion");
                    }
                    ReceiptOutcome::Failure {
                        receipt,
                        elapsed,
                        out_of_gas,
                    }
                };
                debug!(tx = %tx_hash, state = ?outcome.state(), "Receipt wait finished");
                return outcome;
            }

            if elapsed > self.max_wait {
                self.metrics().incr("tx.timeout");
                self.metrics().incr("tx.fail");
                error!(
                    tx = %tx_hash,
                    elapsed_secs = elapsed.as_secs_f64(),
                    "Timed out waiting for TX receipt"
                );
                return ReceiptOutcome::TimedOut { elapsed };
            }

            tokio::time::sleep(retry_delay).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rpc_manager::{AtomicCallStats, RpcTransport};
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use serde_json::{json, Value};
    use std::collections::VecDeque;
    use std::sync::Arc;

    /// Returns queued receipts, then `null` forever
    #[derive(Debug, Default)]
    struct ReceiptScript {
        responses: Mutex<VecDeque<Result<Value, RpcError>>>,
        polls: Mutex<usize>,
    }

    #[async_trait]
    impl RpcTransport for ReceiptScript {
        async fn request(&self, _method: &str, _params: Value) -> Result<Value, RpcError> {
            *self.polls.lock() += 1;
            self.responses.lock().pop_front().unwrap_or(Ok(Value::Null))
        }
    }

    fn waiter(responses: Vec<Result<Value, RpcError>>) -> (ReceiptWaiter, Arc<ReceiptScript>) {
        let script = Arc::new(ReceiptScript {
            responses: Mutex::new(responses.into()),
            polls: Mutex::new(0),
        });
        let gateway = RpcGateway::new(
            script.clone(),
            Duration::from_secs(30),
            Arc::new(AtomicCallStats::new()),
            WorkerMetrics::disabled("W0000", 0),
        );
        (ReceiptWaiter::new(gateway, 100_000, Duration::from_secs(20)), script)
    }

    fn mined(status: &str, gas_used: &str) -> Value {
        json!({
            "blockNumber": "0x10",
            "blockHash": "0x2222222222222222222222222222222222222222222222222222222222222222",
            "status": status,
            "gasUsed": gas_used,
        })
    }

    #[test]
    fn test_retry_delay_is_at_least_one_second() {
        let min = Duration::from_secs(11);
        assert_eq!(retry_delay(Duration::ZERO, min), Duration::from_secs(1));
        assert_eq!(retry_delay(Duration::from_secs(11), min), Duration::from_secs(1));
        assert_eq!(retry_delay(Duration::from_secs(15), min), Duration::from_millis(2500));
        assert_eq!(retry_delay(Duration::from_secs(2), Duration::ZERO), Duration::from_millis(1500));
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_on_first_poll() {
        let (waiter, script) = waiter(vec![Ok(mined("0x1", "0x5208"))]);

        let outcome = waiter
            .wait_for(B256::ZERO, Duration::from_secs(11), Duration::from_secs(1))
            .await;

        assert_eq!(outcome.state(), WaitState::ConfirmedSuccess);
        assert!(outcome.consumed_nonce());
        assert_eq!(outcome.elapsed(), Duration::from_secs(11));
        assert_eq!(*script.polls.lock(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unmined_receipts_keep_polling() {
        let pending = json!({ "blockNumber": "0x0" });
        let (waiter, script) = waiter(vec![Ok(Value::Null), Ok(pending), Ok(mined("0x1", "0x1"))]);

        let outcome = waiter
            .wait_for(B256::ZERO, Duration::from_secs(5), Duration::from_secs(2))
            .await;

        assert!(outcome.is_success());
        assert_eq!(outcome.elapsed(), Duration::from_secs(9));
        assert_eq!(*script.polls.lock(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_out_of_gas_failure() {
        let (waiter, _) = waiter(vec![Ok(mined("0x0", "0x186a0"))]);

        let outcome = waiter
            .wait_for(B256::ZERO, Duration::from_secs(1), Duration::from_secs(1))
            .await;

        assert!(matches!(outcome, ReceiptOutcome::Failure { out_of_gas: true, .. }));
        assert_eq!(outcome.state(), WaitState::ConfirmedFailure);
        assert!(outcome.consumed_nonce());
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_within_one_poll_interval() {
        let (waiter, _) = waiter(vec![]);
        let delay = Duration::from_secs(3);

        let outcome = waiter.wait_for(B256::ZERO, Duration::from_secs(11), delay).await;

        assert_eq!(outcome.state(), WaitState::TimedOut);
        assert!(!outcome.consumed_nonce());
        assert!(outcome.elapsed() > Duration::from_secs(20));
        assert!(outcome.elapsed() <= Duration::from_secs(20) + delay);
    }

    #[tokio::test(start_paused = true)]
    async fn test_poll_error_ends_wait() {
        let (waiter, _) = waiter(vec![Err(RpcError::Node {
            code: Some(-32000),
            message: "boom".to_string(),
        })]);

        let outcome = waiter
            .wait_for(B256::ZERO, Duration::from_secs(1), Duration::from_secs(1))
            .await;

        assert!(matches!(outcome, ReceiptOutcome::PollFailed { .. }));
        assert!(!outcome.consumed_nonce());
        assert!(!outcome.is_success());
    }

    #[test]
    fn test_terminal_states() {
        assert!(!WaitState::WaitingInitial.is_terminal());
        assert!(!WaitState::Polling.is_terminal());
        assert!(WaitState::ConfirmedSuccess.is_terminal());
        assert!(WaitState::TimedOut.is_terminal());
    }
}
