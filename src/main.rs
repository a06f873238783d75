//! Ledger Exerciser
//!
//! Command line entry point. Options come from (lowest to highest priority)
//! built-in defaults, an optional TOML file, `EXERCISER_*` environment
//! variables (a `.env` file is honoured) and command line flags.

use anyhow::{Context, Result};
use clap::Parser;
use ledger_exerciser::config::{CallMode, RunConfig, SigningMode};
use ledger_exerciser::metrics::{serve_prometheus, MetricsFormat};
use ledger_exerciser::structured_logging::init_logging;
use ledger_exerciser::types::CallResult;
use ledger_exerciser::{Exerciser, HttpTransport};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

/// Command line arguments
#[derive(Parser, Debug)]
#[command(name = "ledger-exerciser", author, version, about, long_about = None)]
struct Args {
    /// TOML file providing base values for every option below
    #[arg(long, env = "EXERCISER_CONFIG")]
    config: Option<PathBuf>,

    /// 0=error, 1=info, 2=debug
    #[arg(short = 'd', long, env = "EXERCISER_DEBUG", default_value_t = 1)]
    debug: u8,

    /// Emit logs as JSON lines
    #[arg(long, env = "EXERCISER_LOG_JSON")]
    log_json: bool,

    /// JSON/RPC URL for the node
    #[arg(short = 'u', long, env = "EXERCISER_URL")]
    url: Option<String>,

    /// Solidity contract to compile (and deploy if no contract address supplied),
    /// or a prebuilt `.json` artifact
    #[arg(short = 'f', long = "file", env = "EXERCISER_FILE")]
    file: Option<PathBuf>,

    /// Pre-deployed contract address, deployed if not specified
    #[arg(short = 'c', long, env = "EXERCISER_CONTRACT")]
    contract: Option<String>,

    /// Contract to use when the source file holds several
    #[arg(long, env = "EXERCISER_CONTRACT_NAME")]
    contract_name: Option<String>,

    /// EVM version passed to solc
    #[arg(long, env = "EXERCISER_EVM_VERSION")]
    evm_version: Option<String>,

    /// Method in the contract to invoke
    #[arg(short = 'm', long, env = "EXERCISER_METHOD")]
    method: Option<String>,

    /// String arguments to pass to the contract method (RANGE:<start> and HASH:<index> supported)
    #[arg(short = 'x', long = "args")]
    args: Vec<String>,

    /// Transactions submitted on each worker loop [default: 1]
    #[arg(short = 't', long = "transactions", env = "EXERCISER_TRANSACTIONS")]
    transactions: Option<u64>,

    /// Gas limit on the transaction [default: 1000000]
    #[arg(short = 'g', long, env = "EXERCISER_GAS")]
    gas: Option<u64>,

    /// Gas price [default: 0]
    #[arg(short = 'G', long = "gasprice", env = "EXERCISER_GASPRICE")]
    gas_price: Option<u64>,

    /// Wei transferred with each transaction [default: 0]
    #[arg(long, env = "EXERCISER_VALUE")]
    value: Option<u64>,

    /// Loops per worker, 0 = infinite [default: 1]
    #[arg(short = 'l', long, env = "EXERCISER_LOOPS")]
    loops: Option<u64>,

    /// Seconds to wait before checking for a receipt [default: 11]
    #[arg(short = 's', long = "seconds-min", env = "EXERCISER_SECONDS_MIN")]
    seconds_min: Option<u64>,

    /// Seconds before timing out waiting for a receipt [default: 20]
    #[arg(short = 'S', long = "seconds-max", env = "EXERCISER_SECONDS_MAX")]
    seconds_max: Option<u64>,

    /// Number of workers to run [default: 1]
    #[arg(short = 'w', long, env = "EXERCISER_WORKERS")]
    workers: Option<usize>,

    /// Sign externally with generated accounts
    #[arg(short = 'e', long = "extsign", env = "EXERCISER_EXTSIGN")]
    extsign: bool,

    /// Chain ID for external signing, 0 = query the node
    #[arg(short = 'i', long = "chainid", env = "EXERCISER_CHAINID")]
    chain_id: Option<u64>,

    /// Account addresses, one per worker, for node signing
    #[arg(short = 'a', long = "accounts", env = "EXERCISER_ACCOUNTS", value_delimiter = ',')]
    accounts: Vec<String>,

    /// File holding generated signing keys, reused across runs
    #[arg(long, env = "EXERCISER_KEYS_FILE")]
    keys_file: Option<PathBuf>,

    /// Starting nonce for every worker, queried from the node when unset
    #[arg(long, env = "EXERCISER_NONCE")]
    nonce: Option<u64>,

    /// Timeout in seconds for each RPC call, retries included [default: 30]
    #[arg(long, env = "EXERCISER_RPC_TIMEOUT")]
    rpc_timeout: Option<u64>,

    /// Invoke the method once with eth_call and exit
    #[arg(long, conflicts_with = "estimate_gas")]
    call: bool,

    /// Estimate gas for the method once and exit
    #[arg(long)]
    estimate_gas: bool,

    /// Private transaction sender key (node signing only)
    #[arg(long, env = "EXERCISER_PRIVATE_FROM")]
    private_from: Option<String>,

    /// Private transaction recipient keys
    #[arg(long)]
    private_for: Vec<String>,

    /// statsd server host:port
    #[arg(long, env = "EXERCISER_STATSD")]
    statsd: Option<String>,

    /// Use Telegraf tagged stat names instead of Graphite paths
    #[arg(long, env = "EXERCISER_STATSD_TELEGRAF")]
    statsd_telegraf: bool,

    /// Qualifier added to every stat name
    #[arg(long, env = "EXERCISER_STATSD_QUALIFIER")]
    statsd_qualifier: Option<String>,

    /// statsd flush period in milliseconds [default: 1000]
    #[arg(long, env = "EXERCISER_STATSD_FLUSH_MS")]
    statsd_flush_ms: Option<u64>,

    /// Serve aggregate metrics for Prometheus on this port
    #[arg(long, env = "EXERCISER_PROMETHEUS_PORT")]
    prometheus_port: Option<u16>,
}

/// Layer explicitly supplied options over the file (or default) configuration
fn build_config(args: &Args) -> Result<RunConfig> {
    let mut config = match &args.config {
        Some(path) => RunConfig::from_toml_file(path)
            .with_context(|| format!("Failed to load config from {}", path.display()))?,
        None => RunConfig::default(),
    };

    macro_rules! set_if_some {
        ($($field:ident <- $value:expr),* $(,)?) => {
            $(if let Some(value) = $value.clone() { config.$field = value; })*
        };
    }
    set_if_some! {
        url <- args.url,
        source <- args.file,
        value <- args.value,
        gas <- args.gas,
        gas_price <- args.gas_price,
        loops <- args.loops,
        txns_per_loop <- args.transactions,
        receipt_wait_min <- args.seconds_min,
        receipt_wait_max <- args.seconds_max,
        workers <- args.workers,
        chain_id <- args.chain_id,
        rpc_timeout_secs <- args.rpc_timeout,
    }
    if let Some(method) = &args.method {
        config.method = method.clone();
    }
    if args.contract.is_some() {
        config.contract = args.contract.clone();
    }
    if args.contract_name.is_some() {
        config.contract_name = args.contract_name.clone();
    }
    if args.evm_version.is_some() {
        config.evm_version = args.evm_version.clone();
    }
    if args.keys_file.is_some() {
        config.keys_file = args.keys_file.clone();
    }
    if args.nonce.is_some() {
        config.nonce = args.nonce;
    }
    if args.private_from.is_some() {
        config.private_from = args.private_from.clone();
    }
    if !args.args.is_empty() {
        config.args = args.args.clone();
    }
    if !args.accounts.is_empty() {
        config.accounts = args.accounts.clone();
    }
    if !args.private_for.is_empty() {
        config.private_for = args.private_for.clone();
    }
    if args.extsign {
        config.signing = SigningMode::External;
    }
    if args.call {
        config.call_mode = CallMode::Call;
    }
    if args.estimate_gas {
        config.call_mode = CallMode::EstimateGas;
    }

    if args.statsd.is_some() {
        config.metrics.statsd = args.statsd.clone();
    }
    if args.statsd_telegraf {
        config.metrics.format = MetricsFormat::Telegraf;
    }
    if args.statsd_qualifier.is_some() {
        config.metrics.qualifier = args.statsd_qualifier.clone();
    }
    if let Some(flush_ms) = args.statsd_flush_ms {
        config.metrics.flush_ms = flush_ms;
    }
    if args.prometheus_port.is_some() {
        config.metrics.prometheus_port = args.prometheus_port;
    }

    Ok(config)
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let args = Args::parse();

    init_logging(args.debug, args.log_json);
    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    let config = build_config(&args)?;
    config.validate().context("Invalid configuration")?;

    if let Some(port) = config.metrics.prometheus_port {
        serve_prometheus(port).context("Failed to start Prometheus exporter")?;
    }

    let transport = HttpTransport::new(&config.url, config.rpc_timeout())
        .context("Failed to create RPC transport")?;
    let exerciser = Exerciser::new(config, Arc::new(transport));
    info!(run_id = %exerciser.run_id(), "Exerciser created");

    let summary = exerciser.start().await.context("Exerciser failed")?;

    match &summary.call_result {
        Some(CallResult::Returned(data)) => info!(result = %data, "Call result"),
        Some(CallResult::GasEstimate(gas)) => info!(gas, "Estimate gas result"),
        None => info!(
            successes = summary.successes,
            failures = summary.failures,
            "Totals"
        ),
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_flags_map_onto_config() {
        let args = Args::try_parse_from([
            "ledger-exerciser",
            "-u", "http://localhost:8545",
            "-f", "simple.sol",
            "-m", "set",
            "-x", "RANGE:1",
            "-x", "HASH:0",
            "-t", "5",
            "-l", "0",
            "-w", "3",
            "-e",
            "-i", "2018",
            "--estimate-gas",
            "--statsd", "127.0.0.1:8125",
            "--statsd-telegraf",
        ])
        .unwrap();

        let config = build_config(&args).unwrap();
        assert_eq!(config.url, "http://localhost:8545");
        assert_eq!(config.args, vec!["RANGE:1", "HASH:0"]);
        assert_eq!(config.txns_per_loop, 5);
        assert!(config.is_infinite());
        assert_eq!(config.workers, 3);
        assert_eq!(config.signing, SigningMode::External);
        assert_eq!(config.chain_id, 2018);
        assert_eq!(config.call_mode, CallMode::EstimateGas);
        assert_eq!(config.metrics.format, MetricsFormat::Telegraf);
        assert_eq!(config.gas, 1_000_000);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_call_and_estimate_gas_conflict() {
        let result = Args::try_parse_from(["ledger-exerciser", "--call", "--estimate-gas"]);
        assert!(result.is_err());
    }

    #[test]
    fn test_flags_override_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
url = "http://file-node:8545"
source = "file.sol"
method = "set"
workers = 8
accounts = ["0x1111111111111111111111111111111111111111"]
"#
        )
        .unwrap();
        let path = file.path().to_string_lossy().into_owned();

        let args = Args::try_parse_from(["ledger-exerciser", "--config", &path, "-w", "2"]).unwrap();
        let config = build_config(&args).unwrap();

        assert_eq!(config.url, "http://file-node:8545");
        assert_eq!(config.workers, 2);
        assert_eq!(config.accounts.len(), 1);
    }
}
