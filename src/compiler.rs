//! Contract compilation and call encoding
//!
//! The source is turned into deployable bytecode plus a JSON ABI, either by
//! invoking `solc` or by reading a prebuilt `.json` artifact. The resulting
//! [`ContractArtifact`] is produced once at startup and shared read-only with
//! all workers.

use crate::args::{has_placeholders, resolve_args, ArgError, PartitionContext};
use alloy_dyn_abi::JsonAbiExt;
use alloy_json_abi::{Function, JsonAbi};
use alloy_primitives::Bytes;
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::process::Command;
use tracing::{debug, info};

#[derive(Debug, Error)]
pub enum CompileError {
    #[error("Failed to run {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to compile [{status}]: {stderr}")]
    Failed { status: String, stderr: String },

    #[error("Failed to read artifact {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse compiler output: {0}")]
    Parse(String),

    #[error("Contract {name} not found in {source_file}: {available:?}")]
    ContractNotFound {
        name: String,
        source_file: String,
        available: Vec<String>,
    },

    #[error("More than one contract in {source_file}, please set one to call: {available:?}")]
    AmbiguousContract {
        source_file: String,
        available: Vec<String>,
    },

    #[error("Contract {0} has no deployable bytecode")]
    EmptyBytecode(String),
}

/// Bytecode and interface of one contract
#[derive(Debug, Clone)]
pub struct CompiledContract {
    pub name: String,
    pub bytecode: Bytes,
    pub abi: JsonAbi,
}

/// Produces a [`CompiledContract`] from a source file
#[async_trait]
pub trait ContractCompiler: Send + Sync {
    async fn compile(
        &self,
        source: &Path,
        contract_name: Option<&str>,
    ) -> Result<CompiledContract, CompileError>;
}

/// Pick the named contract, or the only one present
fn select_contract<T>(
    source: &Path,
    mut contracts: BTreeMap<String, T>,
    contract_name: Option<&str>,
) -> Result<(String, T), CompileError> {
    let available: Vec<String> = contracts.keys().cloned().collect();
    let source_file = source.display().to_string();

    match contract_name {
        Some(wanted) => {
            // solc keys contracts as `<path>:<Name>`
            let key = available
                .iter()
                .find(|k| k.as_str() == wanted || k.rsplit(':').next() == Some(wanted))
                .cloned()
                .ok_or_else(|| CompileError::ContractNotFound {
                    name: wanted.to_string(),
                    source_file: source_file.clone(),
                    available: available.clone(),
                })?;
            let contract = contracts.remove(&key).ok_or_else(|| CompileError::ContractNotFound {
                name: wanted.to_string(),
                source_file,
                available,
            })?;
            Ok((key, contract))
        }
        None if contracts.len() == 1 => contracts
            .pop_first()
            .ok_or(CompileError::AmbiguousContract { source_file, available }),
        None => Err(CompileError::AmbiguousContract { source_file, available }),
    }
}

fn decode_bytecode(name: &str, code: &str) -> Result<Bytes, CompileError> {
    let code = code.trim();
    let code = code.strip_prefix("0x").unwrap_or(code);
    if code.is_empty() {
        return Err(CompileError::EmptyBytecode(name.to_string()));
    }
    hex::decode(code)
        .map(Bytes::from)
        .map_err(|e| CompileError::Parse(format!("bytecode of {}: {}", name, e)))
}

/// ABI as emitted by the compiler, either inline JSON or a JSON string
fn decode_abi(name: &str, abi: Value) -> Result<JsonAbi, CompileError> {
    let parsed = match abi {
        Value::String(text) => serde_json::from_str(&text),
        other => serde_json::from_value(other),
    };
    parsed.map_err(|e| CompileError::Parse(format!("ABI of {}: {}", name, e)))
}

#[derive(Debug, Deserialize)]
struct CombinedJson {
    contracts: BTreeMap<String, CombinedContract>,
}

#[derive(Debug, Deserialize)]
struct CombinedContract {
    bin: String,
    abi: Value,
}

/// Runs `solc --combined-json`
#[derive(Debug, Clone)]
pub struct SolcCompiler {
    program: String,
    evm_version: Option<String>,
}

impl Default for SolcCompiler {
    fn default() -> Self {
        Self {
            program: "solc".to_string(),
            evm_version: None,
        }
    }
}

impl SolcCompiler {
    pub fn new(program: impl Into<String>, evm_version: Option<String>) -> Self {
        Self {
            program: program.into(),
            evm_version,
        }
    }

    fn arguments(&self, source: &Path) -> Vec<String> {
        let mut args = vec![
            "--combined-json".to_string(),
            "bin,abi".to_string(),
            "--optimize".to_string(),
        ];
        if let Some(version) = &self.evm_version {
            args.push("--evm-version".to_string());
            args.push(version.clone());
        }
        args.push("--allow-paths".to_string());
        args.push(".".to_string());
        args.push(source.display().to_string());
        args
    }

    fn parse_output(
        source: &Path,
        stdout: &[u8],
        contract_name: Option<&str>,
    ) -> Result<CompiledContract, CompileError> {
        let combined: CombinedJson =
            serde_json::from_slice(stdout).map_err(|e| CompileError::Parse(e.to_string()))?;
        let (name, contract) = select_contract(source, combined.contracts, contract_name)?;

        Ok(CompiledContract {
            bytecode: decode_bytecode(&name, &contract.bin)?,
            abi: decode_abi(&name, contract.abi)?,
            name,
        })
    }
}

#[async_trait]
impl ContractCompiler for SolcCompiler {
    async fn compile(
        &self,
        source: &Path,
        contract_name: Option<&str>,
    ) -> Result<CompiledContract, CompileError> {
        let args = self.arguments(source);
        debug!(command = %format!("{} {}", self.program, args.join(" ")), "Compiling");

        let output = Command::new(&self.program)
            .args(&args)
            .output()
            .await
            .map_err(|source| CompileError::Spawn {
                program: self.program.clone(),
                source,
            })?;

        if !output.status.success() {
            return Err(CompileError::Failed {
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            });
        }

        Self::parse_output(source, &output.stdout, contract_name)
    }
}

/// Reads a prebuilt artifact: `{"abi": [...], "bytecode": "0x..."}`, with
/// `bytecode` optionally nested as `{"object": "0x..."}`
#[derive(Debug, Clone, Copy, Default)]
pub struct PrebuiltArtifact;

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ArtifactBytecode {
    Hex(String),
    Object { object: String },
}

#[derive(Debug, Deserialize)]
struct ArtifactFile {
    #[serde(default, rename = "contractName")]
    contract_name: Option<String>,
    abi: Value,
    bytecode: ArtifactBytecode,
}

#[async_trait]
impl ContractCompiler for PrebuiltArtifact {
    async fn compile(
        &self,
        source: &Path,
        contract_name: Option<&str>,
    ) -> Result<CompiledContract, CompileError> {
        let contents = tokio::fs::read(source).await.map_err(|e| CompileError::Read {
            path: source.to_path_buf(),
            source: e,
        })?;
        let artifact: ArtifactFile =
            serde_json::from_slice(&contents).map_err(|e| CompileError::Parse(e.to_string()))?;

        let name = artifact
            .contract_name
            .or_else(|| contract_name.map(str::to_string))
            .or_else(|| source.file_stem().map(|s| s.to_string_lossy().into_owned()))
            .unwrap_or_default();
        let code = match artifact.bytecode {
            ArtifactBytecode::Hex(code) => code,
            ArtifactBytecode::Object { object } => object,
        };

        Ok(CompiledContract {
            bytecode: decode_bytecode(&name, &code)?,
            abi: decode_abi(&name, artifact.abi)?,
            name,
        })
    }
}

/// `.json` sources are prebuilt artifacts, everything else goes to solc
pub fn compiler_for(source: &Path, evm_version: Option<String>) -> Box<dyn ContractCompiler> {
    match source.extension().and_then(|e| e.to_str()) {
        Some(ext) if ext.eq_ignore_ascii_case("json") => Box::new(PrebuiltArtifact),
        _ => Box::new(SolcCompiler::new("solc", evm_version)),
    }
}

/// Compiled contract bound to the method and arguments of the run
#[derive(Debug, Clone)]
pub struct ContractArtifact {
    pub name: String,
    pub bytecode: Bytes,
    pub abi: JsonAbi,
    method: Function,
    args: Vec<String>,
    call_payload: Bytes,
    dynamic: bool,
}

impl ContractArtifact {
    /// Bind `method` and `args`, encoding the call payload once up front so
    /// conversion errors surface before any worker starts
    pub fn new(compiled: CompiledContract, method: &str, args: Vec<String>) -> Result<Self, ArgError> {
        let function = select_overload(&compiled.abi, method, args.len())?;

        let call_payload = encode_call(&function, &args, &PartitionContext::default())?;
        let dynamic = has_placeholders(&args);

        info!(
            contract = %compiled.name,
            method = %function.signature(),
            dynamic,
            "Contract artifact ready"
        );

        Ok(Self {
            name: compiled.name,
            bytecode: compiled.bytecode,
            abi: compiled.abi,
            method: function,
            args,
            call_payload,
            dynamic,
        })
    }

    pub fn method(&self) -> &Function {
        &self.method
    }

    /// Payload encoded with the default partition context
    pub fn call_payload(&self) -> &Bytes {
        &self.call_payload
    }

    /// Payload for one attempt; re-encoded only when arguments use placeholders
    pub fn payload_for(&self, ctx: &PartitionContext) -> Result<Bytes, ArgError> {
        if !self.dynamic {
            return Ok(self.call_payload.clone());
        }
        encode_call(&self.method, &self.args, ctx)
    }
}

/// A lone overload is taken as is so argument-count errors name it; several
/// are narrowed to the one taking exactly `supplied` arguments
fn select_overload(abi: &JsonAbi, method: &str, supplied: usize) -> Result<Function, ArgError> {
    let overloads = abi
        .function(method)
        .ok_or_else(|| ArgError::MethodNotFound(method.to_string()))?;

    match overloads.as_slice() {
        [] => Err(ArgError::MethodNotFound(method.to_string())),
        [only] => Ok(only.clone()),
        _ => {
            let matching: Vec<&Function> = overloads.iter().filter(|f| f.inputs.len() == supplied).collect();
            match matching.as_slice() {
                [function] => Ok((*function).clone()),
                [] => Err(ArgError::NoMatchingOverload {
                    method: method.to_string(),
                    supplied,
                }),
                several => Err(ArgError::AmbiguousOverload {
                    method: method.to_string(),
                    supplied,
                    candidates: several.len(),
                }),
            }
        }
    }
}

fn encode_call(function: &Function, args: &[String], ctx: &PartitionContext) -> Result<Bytes, ArgError> {
    let values = resolve_args(&function.name, &function.inputs, args, ctx)?;
    function
        .abi_encode_input(&values)
        .map(Bytes::from)
        .map_err(|e| ArgError::Encoding {
            method: function.name.clone(),
            reason: e.to_string(),
        })
}
