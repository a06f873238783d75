//! Transaction Builder / Signer
//!
//! The module is split into focused parts:
//! - **errors**: failure taxonomy of one build/sign/submit attempt
//! - **builder**: per-attempt [`TransactionRequest`] and the unsigned
//!   [`SendTxArgs`] descriptor
//! - **signer**: the two mutually exclusive [`SigningStrategy`] variants
//!
//! ## Signing modes
//!
//! ### External
//! Legacy EIP-155 envelopes are signed with the worker's key under the run's
//! chain id, the sender is recovered from the signature and compared with the
//! bound account, and the encoded bytes go out through `eth_sendRawTransaction`.
//!
//! ### Node
//! `{nonce, from, to?, gas, gasPrice, value, data, privateFrom?, privateFor?}`
//! is sent through `eth_sendTransaction` for the node to sign.

// Public API - Error types
pub mod errors;
pub use errors::TransactionBuilderError;

mod builder;
mod signer;

pub use builder::{PrivateRouting, SendTxArgs, TransactionRequest};
pub use signer::{ExternalSigner, NodeSigner, SignedTransaction, SigningStrategy};
