//! Signing strategies
//!
//! Selected once per run and never mixed: either every worker signs locally
//! with its own key (`eth_sendRawTransaction`), or every worker hands an
//! unsigned descriptor to the node (`eth_sendTransaction`).

use super::builder::TransactionRequest;
use super::errors::TransactionBuilderError;
use crate::rpc_manager::RpcGateway;
use alloy_consensus::{SignableTransaction, TxEnvelope};
use alloy_eips::eip2718::Encodable2718;
use alloy_primitives::{Address, Bytes, B256};
use alloy_signer::SignerSync;
use alloy_signer_local::PrivateKeySigner;

/// A locally signed, encoded transaction
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedTransaction {
    pub hash: B256,
    pub raw: Bytes,
}

#[derive(Debug, Clone)]
pub struct ExternalSigner {
    signer: PrivateKeySigner,
    /// Account the worker is bound to; every signature must recover to it
    account: Address,
    chain_id: u64,
}

impl ExternalSigner {
    pub fn new(signer: PrivateKeySigner, chain_id: u64) -> Self {
        let account = signer.address();
        Self {
            signer,
            account,
            chain_id,
        }
    }

    #[cfg(test)]
    fn bound_to(mut self, account: Address) -> Self {
        self.account = account;
        self
    }

    pub fn address(&self) -> Address {
        self.account
    }

    /// Sign under the configured chain id and check the recovered sender
    pub fn sign(&self, tx: &TransactionRequest) -> Result<SignedTransaction, TransactionBuilderError> {
        let legacy = tx.to_legacy(self.chain_id);
        let sighash = legacy.signature_hash();

        let signature = self
            .signer
            .sign_hash_sync(&sighash)
            .map_err(|e| TransactionBuilderError::Signing(e.to_string()))?;

        let recovered = signature
            .recover_address_from_prehash(&sighash)
            .map_err(|e| TransactionBuilderError::Signing(e.to_string()))?;
        if recovered != self.address() {
            return Err(TransactionBuilderError::SignerMismatch {
                expected: self.address(),
                recovered,
            });
        }

        let signed = legacy.into_signed(signature);
        let hash = *signed.hash();
        let raw: Bytes = TxEnvelope::Legacy(signed).encoded_2718().into();

        Ok(SignedTransaction { hash, raw })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NodeSigner {
    from: Address,
}

impl NodeSigner {
    pub fn new(from: Address) -> Self {
        Self { from }
    }
}

/// How one worker's transactions are signed
#[derive(Debug, Clone)]
pub enum SigningStrategy {
    External(ExternalSigner),
    Node(NodeSigner),
}

impl SigningStrategy {
    /// The worker's bound account
    pub fn address(&self) -> Address {
        match self {
            Self::External(signer) => signer.address(),
            Self::Node(signer) => signer.from,
        }
    }

    /// Sign if needed and submit, returning the transaction hash
    pub async fn submit(
        &self,
        gateway: &RpcGateway,
        tx: &TransactionRequest,
    ) -> Result<B256, TransactionBuilderError> {
        match self {
            Self::External(signer) => {
                let signed = signer.sign(tx)?;
                let hash = gateway.send_raw_transaction(&signed.raw).await?;
                Ok(hash)
            }
            Self::Node(signer) => {
                let args = tx.to_send_args(signer.from);
                Ok(gateway.send_transaction(&args).await?)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::WorkerMetrics;
    use crate::rpc_manager::{AtomicCallStats, RpcError, RpcTransport};
    use crate::worker::next_nonce;
    use alloy_eips::eip2718::Decodable2718;
    use async_trait::async_trait;
    use serde_json::Value;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    #[derive(Debug, Default)]
    struct CountingTransport {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl RpcTransport for CountingTransport {
        async fn request(&self, _method: &str, _params: Value) -> Result<Value, RpcError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(Value::String(format!("{}", B256::repeat_byte(0xab))))
        }
    }

    fn request() -> TransactionRequest {
        TransactionRequest::call(9, Address::repeat_byte(0x42), Bytes::from_static(&[1, 2, 3]))
            .with_gas(100_000, 1)
            .with_value(10)
    }

    #[test]
    fn test_signed_envelope_round_trips_sender_and_chain() {
        let key = PrivateKeySigner::random();
        let address = key.address();
        let signer = ExternalSigner::new(key, 2018);

        let signed = signer.sign(&request()).unwrap();
        let envelope = TxEnvelope::decode_2718(&mut signed.raw.as_ref()).unwrap();

        assert_eq!(*envelope.tx_hash(), signed.hash);
        let TxEnvelope::Legacy(legacy) = envelope else {
            panic!("expected a legacy envelope");
        };
        let sender = legacy
            .signature()
            .recover_address_from_prehash(&legacy.tx().signature_hash())
            .unwrap();
        assert_eq!(sender, address);
        assert_eq!(legacy.tx().chain_id, Some(2018));
        assert_eq!(legacy.tx().nonce, 9);
    }

    #[test]
    fn test_strategy_address() {
        let key = PrivateKeySigner::random();
        let address = key.address();
        let external = SigningStrategy::External(ExternalSigner::new(key, 1));
        assert_eq!(external.address(), address);

        let node = SigningStrategy::Node(NodeSigner::new(Address::repeat_byte(7)));
        assert_eq!(node.address(), Address::repeat_byte(7));
    }

    #[test]
    fn test_signature_from_other_key_is_rejected() {
        let key = PrivateKeySigner::random();
        let actual = key.address();
        let bound = Address::repeat_byte(0x99);
        let signer = ExternalSigner::new(key, 2018).bound_to(bound);

        let err = signer.sign(&request()).unwrap_err();
        assert_eq!(
            err,
            TransactionBuilderError::SignerMismatch {
                expected: bound,
                recovered: actual,
            }
        );
        assert!(!err.consumes_nonce());
    }

    #[tokio::test]
    async fn test_signer_mismatch_sends_nothing_and_keeps_nonce() {
        let transport = Arc::new(CountingTransport::default());
        let gateway = RpcGateway::new(
            transport.clone(),
            Duration::from_secs(5),
            Arc::new(AtomicCallStats::new()),
            WorkerMetrics::disabled("W0000", 0),
        );
        let signer = ExternalSigner::new(PrivateKeySigner::random(), 2018).bound_to(Address::repeat_byte(0x99));
        let strategy = SigningStrategy::External(signer);

        let tx = request();
        let err = strategy.submit(&gateway, &tx).await.unwrap_err();
        assert!(matches!(err, TransactionBuilderError::SignerMismatch { .. }));
        assert_eq!(transport.calls.load(Ordering::SeqCst), 0);

        // A worker only advances past nonces the node consumed
        let base = tx.nonce;
        let issued = if err.consumes_nonce() { base + 1 } else { base };
        assert_eq!(next_nonce(base, issued, &[]), base);
    }
}
