//! Error types for transaction building and submission

use crate::rpc_manager::RpcError;
use alloy_primitives::Address;
use thiserror::Error;

/// Failure of a single build/sign/submit attempt
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TransactionBuilderError {
    /// The signature recovers to an address other than the worker's account
    #[error("Signer mismatch: expected {expected}, recovered {recovered}")]
    SignerMismatch {
        expected: Address,
        recovered: Address,
    },

    /// Local signing or sender recovery failed
    #[error("Signing failed: {0}")]
    Signing(String),

    /// Submission was rejected or never reached the node
    #[error("RPC error: {0}")]
    Rpc(#[from] RpcError),
}

impl TransactionBuilderError {
    /// Whether the node has implicitly used up the nonce of this attempt
    pub fn consumes_nonce(&self) -> bool {
        match self {
            Self::Rpc(err) => err.consumes_nonce(),
            Self::SignerMismatch { .. } | Self::Signing(_) => false,
        }
    }

    /// Get the error category for metrics and observability
    pub fn category(&self) -> &'static str {
        match self {
            Self::SignerMismatch { .. } | Self::Signing(_) => "signing",
            Self::Rpc(_) => "rpc",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = TransactionBuilderError::Signing("bad key".to_string());
        assert_eq!(err.to_string(), "Signing failed: bad key");
    }

    #[test]
    fn test_nonce_consumption() {
        let stale: TransactionBuilderError = RpcError::NonceTooLow {
            message: "nonce too low".to_string(),
        }
        .into();
        assert!(stale.consumes_nonce());
        assert_eq!(stale.category(), "rpc");

        let known: TransactionBuilderError = RpcError::KnownTransaction {
            message: "known transaction".to_string(),
        }
        .into();
        assert!(known.consumes_nonce());

        let transport: TransactionBuilderError = RpcError::Transport {
            message: "connection refused".to_string(),
        }
        .into();
        assert!(!transport.consumes_nonce());

        let mismatch = TransactionBuilderError::SignerMismatch {
            expected: Address::ZERO,
            recovered: Address::repeat_byte(1),
        };
        assert!(!mismatch.consumes_nonce());
        assert_eq!(mismatch.category(), "signing");
    }
}
