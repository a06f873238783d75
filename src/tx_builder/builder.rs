//! Transaction requests
//!
//! A [`TransactionRequest`] is built fresh for every submission attempt from
//! the worker's current nonce and the run's static parameters. It is turned
//! either into a locally signed legacy envelope or into the [`SendTxArgs`]
//! descriptor the node signs itself.

use alloy_consensus::TxLegacy;
use alloy_primitives::{Address, Bytes, TxKind, U256, U64};
use serde::Serialize;

/// Confidentiality routing for private-transaction capable nodes
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PrivateRouting {
    pub private_from: String,
    pub private_for: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionRequest {
    pub nonce: u64,
    /// `None` for a contract deployment
    pub to: Option<Address>,
    pub value: U256,
    pub gas_limit: u64,
    pub gas_price: u128,
    pub input: Bytes,
    pub private: Option<PrivateRouting>,
}

impl TransactionRequest {
    /// Invocation of `to` with an encoded call payload
    pub fn call(nonce: u64, to: Address, input: Bytes) -> Self {
        Self {
            nonce,
            to: Some(to),
            value: U256::ZERO,
            gas_limit: 0,
            gas_price: 0,
            input,
            private: None,
        }
    }

    /// Contract creation carrying the deployment bytecode
    pub fn deployment(nonce: u64, bytecode: Bytes) -> Self {
        Self {
            nonce,
            to: None,
            value: U256::ZERO,
            gas_limit: 0,
            gas_price: 0,
            input: bytecode,
            private: None,
        }
    }

    pub fn with_value(mut self, value: u64) -> Self {
        self.value = U256::from(value);
        self
    }

    pub fn with_gas(mut self, gas_limit: u64, gas_price: u64) -> Self {
        self.gas_limit = gas_limit;
        self.gas_price = u128::from(gas_price);
        self
    }

    pub fn with_private(mut self, private: Option<PrivateRouting>) -> Self {
        self.private = private;
        self
    }

    pub fn is_deployment(&self) -> bool {
        self.to.is_none()
    }

    /// Unsigned EIP-155 legacy transaction for local signing
    pub fn to_legacy(&self, chain_id: u64) -> TxLegacy {
        TxLegacy {
            chain_id: Some(chain_id),
            nonce: self.nonce,
            gas_price: self.gas_price,
            gas_limit: self.gas_limit,
            to: self.to.map_or(TxKind::Create, TxKind::Call),
            value: self.value,
            input: self.input.clone(),
        }
    }

    /// Call descriptor for `eth_sendTransaction`, `eth_call` and `eth_estimateGas`
    pub fn to_send_args(&self, from: Address) -> SendTxArgs {
        SendTxArgs {
            nonce: U64::from(self.nonce),
            from,
            to: self.to,
            gas: U64::from(self.gas_limit),
            gas_price: U256::from(self.gas_price),
            value: self.value,
            data: self.input.clone(),
            private_from: self.private.as_ref().map(|p| p.private_from.clone()),
            private_for: self.private.as_ref().map(|p| p.private_for.clone()),
        }
    }
}

/// JSON shape of an unsigned submission
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SendTxArgs {
    pub nonce: U64,
    pub from: Address,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub to: Option<Address>,
    pub gas: U64,
    pub gas_price: U256,
    pub value: U256,
    pub data: Bytes,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub private_from: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub private_for: Option<Vec<String>>,
}
