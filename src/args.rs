//! Argument resolution
//!
//! Turns the configured string arguments into typed ABI values for the
//! target method. Two placeholders are expanded before conversion:
//!
//! - `RANGE:<start>` becomes
//!   `start + worker·totalBatches·batchSize + batch·batchSize + index`,
//!   giving every worker a disjoint block of integers (unique token ids etc.)
//! - `HASH:<i>` becomes the hex SHA-256 of argument `i`, after that argument's
//!   own `RANGE:` expansion
//!
//! Resolution is a pure function of its inputs and is safe to call from any
//! number of workers at once.

use alloy_dyn_abi::{DynSolType, DynSolValue};
use alloy_json_abi::Param;
use alloy_primitives::{Address, I256, U256};
use sha2::{Digest, Sha256};
use thiserror::Error;

const RANGE_PREFIX: &str = "RANGE:";
const HASH_PREFIX: &str = "HASH:";

/// Where an attempt sits in the run, used to partition `RANGE:` values
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PartitionContext {
    pub worker_index: u64,
    pub total_batches: u64,
    pub batch_size: u64,
    pub batch: u64,
    pub index: u64,
}

#[derive(Debug, Clone, Error, PartialEq)]
pub enum ArgError {
    #[error("Method '{0}' not found")]
    MethodNotFound(String),

    #[error("Method {method} requires {required} args ({supplied} supplied)")]
    MissingArgument {
        method: String,
        required: usize,
        supplied: usize,
    },

    #[error("Method {method} has no overload taking {supplied} args")]
    NoMatchingOverload { method: String, supplied: usize },

    #[error("Method {method} has {candidates} overloads taking {supplied} args")]
    AmbiguousOverload {
        method: String,
        supplied: usize,
        candidates: usize,
    },

    #[error("Arg {position}: could not convert '{value}' to {expected}")]
    TypeConversion {
        position: usize,
        expected: String,
        value: String,
    },

    #[error("Arg {position}: invalid placeholder '{value}': {reason}")]
    BadPlaceholder {
        position: usize,
        value: String,
        reason: String,
    },

    #[error("Arg {position}: no string parsing configured yet for type {ty}")]
    UnsupportedType { position: usize, ty: String },

    #[error("Packing arguments for call {method}: {reason}")]
    Encoding { method: String, reason: String },
}

/// Compute the `RANGE:` value for a start offset and partition
pub fn range_value(start: i128, ctx: &PartitionContext) -> Option<i128> {
    let worker = i128::from(ctx.worker_index);
    let batches = i128::from(ctx.total_batches);
    let size = i128::from(ctx.batch_size);

    let worker_offset = worker.checked_mul(batches)?.checked_mul(size)?;
    let batch_offset = i128::from(ctx.batch).checked_mul(size)?;

    start
        .checked_add(worker_offset)?
        .checked_add(batch_offset)?
        .checked_add(i128::from(ctx.index))
}

/// Hex-encoded SHA-256 of a string
pub fn content_hash(value: &str) -> String {
    hex::encode(Sha256::digest(value.as_bytes()))
}

/// Whether any argument needs per-attempt resolution
pub fn has_placeholders(args: &[String]) -> bool {
    args.iter()
        .any(|a| a.starts_with(RANGE_PREFIX) || a.starts_with(HASH_PREFIX))
}

/// Expand `RANGE:` if present, otherwise return the literal
fn expand_range(position: usize, raw: &str, ctx: &PartitionContext) -> Result<String, ArgError> {
    let Some(start) = raw.strip_prefix(RANGE_PREFIX) else {
        return Ok(raw.to_string());
    };

    let start: i128 = start.trim().parse().map_err(|e| ArgError::BadPlaceholder {
        position,
        value: raw.to_string(),
        reason: format!("failed to parse start of the RANGE: {}", e),
    })?;

    range_value(start, ctx)
        .map(|v| v.to_string())
        .ok_or_else(|| ArgError::BadPlaceholder {
            position,
            value: raw.to_string(),
            reason: "RANGE value overflows".to_string(),
        })
}

/// Expand `HASH:` if present
fn expand_hash(
    position: usize,
    raw: &str,
    args: &[String],
    ctx: &PartitionContext,
) -> Result<Option<String>, ArgError> {
    let Some(target) = raw.strip_prefix(HASH_PREFIX) else {
        return Ok(None);
    };

    let target: usize = target.trim().parse().map_err(|e| ArgError::BadPlaceholder {
        position,
        value: raw.to_string(),
        reason: format!("failed to parse index of the HASH: {}", e),
    })?;
    let referenced = args.get(target).ok_or_else(|| ArgError::BadPlaceholder {
        position,
        value: raw.to_string(),
        reason: format!("index {} is out of range ({} args)", target, args.len()),
    })?;

    let resolved = expand_range(target, referenced, ctx)?;
    Ok(Some(content_hash(&resolved)))
}

fn convert(position: usize, ty: &DynSolType, value: &str) -> Result<DynSolValue, ArgError> {
    let conversion_error = || ArgError::TypeConversion {
        position,
        expected: ty.sol_type_name().into_owned(),
        value: value.to_string(),
    };

    match ty {
        DynSolType::Uint(bits) => {
            let parsed: U256 = value.trim().parse().map_err(|_| conversion_error())?;
            if *bits < 256 && parsed >> *bits != U256::ZERO {
                return Err(conversion_error());
            }
            Ok(DynSolValue::Uint(parsed, *bits))
        }
        DynSolType::Int(bits) => {
            let parsed = I256::from_dec_str(value.trim()).map_err(|_| conversion_error())?;
            if *bits < 256 {
                let limit = I256::ONE << (*bits - 1);
                if parsed >= limit || parsed < -limit {
                    return Err(conversion_error());
                }
            }
            Ok(DynSolValue::Int(parsed, *bits))
        }
        DynSolType::Bool => match value.trim().to_lowercase().as_str() {
            "true" => Ok(DynSolValue::Bool(true)),
            "false" => Ok(DynSolValue::Bool(false)),
            _ => Err(conversion_error()),
        },
        DynSolType::Address => value
            .trim()
            .parse::<Address>()
            .map(DynSolValue::Address)
            .map_err(|_| conversion_error()),
        DynSolType::String => Ok(DynSolValue::String(value.to_string())),
        other => Err(ArgError::UnsupportedType {
            position,
            ty: other.sol_type_name().into_owned(),
        }),
    }
}

/// Resolve `args` against the method's input parameters.
/// Arguments beyond the parameter list are ignored.
pub fn resolve_args(
    method: &str,
    inputs: &[Param],
    args: &[String],
    ctx: &PartitionContext,
) -> Result<Vec<DynSolValue>, ArgError> {
    if args.len() < inputs.len() {
        return Err(ArgError::MissingArgument {
            method: method.to_string(),
            required: inputs.len(),
            supplied: args.len(),
        });
    }

    inputs
        .iter()
        .zip(args)
        .enumerate()
        .map(|(position, (param, raw))| {
            let ty = DynSolType::parse(&param.ty).map_err(|_| ArgError::UnsupportedType {
                position,
                ty: param.ty.clone(),
            })?;

            if let Some(digest) = expand_hash(position, raw, args, ctx)? {
                return match ty {
                    DynSolType::String => Ok(DynSolValue::String(digest)),
                    _ => Err(ArgError::TypeConversion {
                        position,
                        expected: param.ty.clone(),
                        value: raw.clone(),
                    }),
                };
            }

            let expanded = expand_range(position, raw, ctx)?;
            convert(position, &ty, &expanded)
        })
        .collect()
}
