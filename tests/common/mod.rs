//! Shared fixtures for the scenario tests: an in-memory node, a compiler
//! that skips solc, and a sink that records emitted stats.

#![allow(dead_code)]

use alloy_consensus::{Transaction, TxEnvelope};
use alloy_eips::eip2718::Decodable2718;
use alloy_json_abi::JsonAbi;
use alloy_primitives::{Address, Bytes, B256, U256};
use async_trait::async_trait;
use ledger_exerciser::compiler::{CompileError, CompiledContract, ContractCompiler};
use ledger_exerciser::metrics::MetricsSink;
use ledger_exerciser::rpc_manager::RetryPolicy;
use ledger_exerciser::{Exerciser, ExerciserError, RpcError, RpcTransport, RunConfig, RunSummary};
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::collections::{HashMap, HashSet, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::Arc;

pub const START_NONCE: u64 = 5;
pub const CHAIN_ID: u64 = 2018;
pub const GAS_ESTIMATE: u64 = 21_000;

pub fn contract_address() -> Address {
    Address::repeat_byte(0xcc)
}

pub fn deployed_address() -> Address {
    Address::repeat_byte(0xdd)
}

pub const ABI: &str = r#"[
    {"type":"function","name":"set","inputs":[{"name":"x","type":"uint256"}],"outputs":[],"stateMutability":"nonpayable"},
    {"type":"function","name":"get","inputs":[],"outputs":[{"name":"","type":"uint256"}],"stateMutability":"view"}
]"#;

/// How the node answers receipt polls for non-deployment transactions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReceiptMode {
    Success,
    Failure { gas_used: u64 },
    Pending,
}

#[derive(Debug)]
struct NodeState {
    receipt_mode: ReceiptMode,
    /// Polls answered with `null` before a receipt is returned
    pending_polls: u32,
    net_version: String,
    send_errors: VecDeque<RpcError>,
    deployments: HashSet<B256>,
    polls: HashMap<B256, u32>,
    sent: u64,
    calls: Vec<(String, Value)>,
    raw: Vec<TxEnvelope>,
}

/// In-memory JSON-RPC node
#[derive(Debug)]
pub struct MockNode {
    state: Mutex<NodeState>,
}

impl MockNode {
    pub fn new(receipt_mode: ReceiptMode) -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(NodeState {
                receipt_mode,
                pending_polls: 0,
                net_version: CHAIN_ID.to_string(),
                send_errors: VecDeque::new(),
                deployments: HashSet::new(),
                polls: HashMap::new(),
                sent: 0,
                calls: Vec::new(),
                raw: Vec::new(),
            }),
        })
    }

    /// Fail the next submissions, in order, with these errors
    pub fn fail_sends(&self, errors: impl IntoIterator<Item = RpcError>) {
        self.state.lock().send_errors.extend(errors);
    }

    pub fn set_pending_polls(&self, polls: u32) {
        self.state.lock().pending_polls = polls;
    }

    pub fn set_net_version(&self, version: &str) {
        self.state.lock().net_version = version.to_string();
    }

    pub fn methods(&self) -> Vec<String> {
        self.state.lock().calls.iter().map(|(m, _)| m.clone()).collect()
    }

    pub fn count(&self, method: &str) -> usize {
        self.state.lock().calls.iter().filter(|(m, _)| m == method).count()
    }

    /// First parameter of every call to `method`
    pub fn params(&self, method: &str) -> Vec<Value> {
        self.state
            .lock()
            .calls
            .iter()
            .filter(|(m, _)| m == method)
            .map(|(_, p)| p[0].clone())
            .collect()
    }

    /// Every raw transaction the node accepted
    pub fn raw_transactions(&self) -> Vec<TxEnvelope> {
        self.state.lock().raw.clone()
    }

    fn accept(state: &mut NodeState, deployment: bool, hash: Option<B256>) -> Result<Value, RpcError> {
        if let Some(err) = state.send_errors.pop_front() {
            return Err(err);
        }
        state.sent += 1;
        let hash = hash.unwrap_or_else(|| B256::left_padding_from(&state.sent.to_be_bytes()));
        if deployment {
            state.deployments.insert(hash);
        }
        Ok(json!(hash))
    }

    fn receipt(state: &mut NodeState, hash: B256) -> Value {
        let polls = state.polls.entry(hash).or_insert(0);
        *polls += 1;
        if *polls <= state.pending_polls {
            return Value::Null;
        }

        let (status, gas_used, contract) = if state.deployments.contains(&hash) {
            ("0x1", 100_000u64, Some(deployed_address()))
        } else {
            match state.receipt_mode {
                ReceiptMode::Success => ("0x1", 30_000, None),
                ReceiptMode::Failure { gas_used } => ("0x0", gas_used, None),
                ReceiptMode::Pending => return Value::Null,
            }
        };

        json!({
            "transactionHash": hash,
            "blockHash": B256::repeat_byte(0x11),
            "blockNumber": "0x10",
            "transactionIndex": "0x0",
            "status": status,
            "gasUsed": format!("{:#x}", gas_used),
            "cumulativeGasUsed": format!("{:#x}", gas_used),
            "contractAddress": contract,
            "logs": []
        })
    }
}

#[async_trait]
impl RpcTransport for MockNode {
    async fn request(&self, method: &str, params: Value) -> Result<Value, RpcError> {
        let mut state = self.state.lock();
        state.calls.push((method.to_string(), params.clone()));

        match method {
            "eth_getTransactionCount" => Ok(json!(format!("{:#x}", START_NONCE))),
            "net_version" => Ok(json!(state.net_version.clone())),
            "eth_sendTransaction" => {
                let deployment = params[0].get("to").is_none();
                Self::accept(&mut state, deployment, None)
            }
            "eth_sendRawTransaction" => {
                let raw: Bytes = serde_json::from_value(params[0].clone())
                    .map_err(|e| RpcError::Decode(e.to_string()))?;
                let envelope = TxEnvelope::decode_2718(&mut raw.as_ref())
                    .map_err(|e| RpcError::Decode(e.to_string()))?;
                let deployment = envelope.to().is_none();
                let hash = *envelope.tx_hash();
                let result = Self::accept(&mut state, deployment, Some(hash));
                if result.is_ok() {
                    state.raw.push(envelope);
                }
                result
            }
            "eth_getTransactionReceipt" => {
                let hash: B256 = serde_json::from_value(params[0].clone())
                    .map_err(|e| RpcError::Decode(e.to_string()))?;
                Ok(Self::receipt(&mut state, hash))
            }
            "eth_call" => Ok(json!(B256::left_padding_from(&[0x2a]))),
            "eth_estimateGas" => Ok(json!(format!("{:#x}", GAS_ESTIMATE))),
            other => Err(RpcError::Node {
                code: Some(-32601),
                message: format!("the method {} does not exist", other),
            }),
        }
    }
}

/// Hands back a fixed contract without invoking solc
#[derive(Debug, Default)]
pub struct StubCompiler;

#[async_trait]
impl ContractCompiler for StubCompiler {
    async fn compile(
        &self,
        _source: &Path,
        _contract_name: Option<&str>,
    ) -> Result<CompiledContract, CompileError> {
        let abi: JsonAbi =
            serde_json::from_str(ABI).map_err(|e| CompileError::Parse(e.to_string()))?;
        Ok(CompiledContract {
            name: "simple.sol:Simple".to_string(),
            bytecode: Bytes::from_static(&[0x60, 0x80, 0x60, 0x40]),
            abi,
        })
    }
}

/// Records every stat name it receives
#[derive(Debug, Default)]
pub struct RecordingSink {
    names: Mutex<Vec<String>>,
}

impl RecordingSink {
    /// Emissions of `stat` across every worker
    pub fn count(&self, stat: &str) -> usize {
        let suffix = format!(".{}", stat);
        self.names.lock().iter().filter(|n| n.ends_with(&suffix)).count()
    }
}

impl MetricsSink for RecordingSink {
    fn increment(&self, name: &str) {
        self.names.lock().push(name.to_string());
    }

    fn gauge(&self, name: &str, _value: u64) {
        self.names.lock().push(name.to_string());
    }
}

/// One node-signing worker per supplied account, one loop of one transaction
pub fn node_config(workers: usize) -> RunConfig {
    RunConfig {
        url: "http://127.0.0.1:8545".to_string(),
        source: PathBuf::from("simple.sol"),
        method: "set".to_string(),
        args: vec!["42".to_string()],
        contract: Some(contract_address().to_string()),
        workers,
        accounts: (0..workers)
            .map(|i| Address::repeat_byte(i as u8 + 1).to_string())
            .collect(),
        receipt_wait_min: 1,
        receipt_wait_max: 5,
        ..Default::default()
    }
}

pub fn address_param(value: &Value) -> Address {
    value.as_str().unwrap().parse().unwrap()
}

/// Decoded `set(uint256)` argument carried in a call payload
pub fn set_argument(data: &[u8]) -> U256 {
    U256::from_be_slice(&data[data.len() - 32..])
}

pub async fn run(
    node: Arc<MockNode>,
    config: RunConfig,
) -> (Result<RunSummary, ExerciserError>, Arc<RecordingSink>) {
    let sink = Arc::new(RecordingSink::default());
    let result = Exerciser::new(config, node)
        .with_compiler(Box::new(StubCompiler))
        .with_metrics_sink(sink.clone())
        .with_retry_policy(RetryPolicy::none())
        .start()
        .await;
    (result, sink)
}
