use std::time::Duration;
use thiserror::Error;

/// JSON-RPC error code some gateways use for request throttling
const LIMIT_EXCEEDED_CODE: i64 = -32005;

/// Typed RPC failure, classified once at the transport boundary
#[derive(Debug, Clone, Error, PartialEq)]
pub enum RpcError {
    /// The endpoint signalled request throttling (HTTP 429 or equivalent)
    #[error("Rate limit exceeded: {message}")]
    RateLimited { message: String },

    /// The node rejected the transaction because its nonce was already used
    #[error("Nonce too low: {message}")]
    NonceTooLow { message: String },

    /// The node already holds a transaction with this hash
    #[error("Known transaction: {message}")]
    KnownTransaction { message: String },

    /// The call did not complete within the configured RPC timeout
    #[error("Timeout after {timeout_ms}ms ({method})")]
    Timeout { method: String, timeout_ms: u64 },

    /// Network-level failure reaching the endpoint
    #[error("Transport error: {message}")]
    Transport { message: String },

    /// Any other error object returned by the node
    #[error("RPC response error: {message} (code: {code:?})")]
    Node { code: Option<i64>, message: String },

    /// The response could not be decoded into the expected shape
    #[error("Decode error: {0}")]
    Decode(String),
}

impl RpcError {
    /// Classify a JSON-RPC error object returned by the node
    pub fn from_node_error(code: i64, message: &str) -> Self {
        let lower = message.to_lowercase();
        let message = message.to_string();

        if code == LIMIT_EXCEEDED_CODE
            || lower.contains("429")
            || lower.contains("too many requests")
            || lower.contains("rate limit")
        {
            RpcError::RateLimited { message }
        } else if lower.contains("nonce too low") {
            RpcError::NonceTooLow { message }
        } else if lower.contains("known transaction") || lower.contains("already known") {
            RpcError::KnownTransaction { message }
        } else {
            RpcError::Node {
                code: Some(code),
                message,
            }
        }
    }

    /// Classify a non-success HTTP status
    pub fn from_http_status(status: u16, body: &str) -> Self {
        match status {
            429 => RpcError::RateLimited {
                message: format!("HTTP 429: {}", body.trim()),
            },
            _ => RpcError::Node {
                code: None,
                message: format!("HTTP {}: {}", status, body.trim()),
            },
        }
    }

    /// Create from a reqwest error
    pub fn from_reqwest(err: reqwest::Error, method: &str, timeout: Duration) -> Self {
        if err.is_timeout() {
            RpcError::Timeout {
                method: method.to_string(),
                timeout_ms: timeout.as_millis() as u64,
            }
        } else if err.is_decode() {
            RpcError::Decode(err.to_string())
        } else {
            RpcError::Transport {
                message: err.to_string(),
            }
        }
    }

    /// Only throttling is retried; everything else surfaces immediately
    pub fn is_retryable(&self) -> bool {
        matches!(self, RpcError::RateLimited { .. })
    }

    /// The node has implicitly rejected the current nonce, so the sender
    /// moves on to the next one rather than resubmitting
    pub fn consumes_nonce(&self) -> bool {
        matches!(
            self,
            RpcError::NonceTooLow { .. } | RpcError::KnownTransaction { .. }
        )
    }
}

/// Backoff policy for throttled calls
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Maximum number of attempts, including the first
    pub max_attempts: usize,

    /// Delay before the first retry in milliseconds
    pub base_delay_ms: u64,

    /// Upper bound for any single delay in milliseconds
    pub max_delay_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 10,
            base_delay_ms: 100,
            max_delay_ms: 5000,
        }
    }
}

impl RetryPolicy {
    /// Doubling delays between attempts, capped at `max_delay_ms`
    pub fn delays(&self) -> impl Iterator<Item = Duration> {
        tokio_retry::strategy::ExponentialBackoff::from_millis(2)
            .factor(self.base_delay_ms / 2)
            .max_delay(Duration::from_millis(self.max_delay_ms))
            .take(self.max_attempts.saturating_sub(1))
    }

    /// Policy that never retries
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }
}
