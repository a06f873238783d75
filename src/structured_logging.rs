//! Structured logging and run context

use crate::types::{RunSummary, WorkerReport};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
use uuid::Uuid;

/// Default filter for the `debug` verbosity option: 0=error, 1=info, 2+=debug
pub fn level_for(debug: u8) -> &'static str {
    match debug {
        0 => "error",
        1 => "info",
        _ => "debug",
    }
}

/// Install the global subscriber. `RUST_LOG` takes precedence over `debug`.
pub fn init_logging(debug: u8, json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level_for(debug)));

    let registry = tracing_subscriber::registry().with(filter);
    let result = if json {
        registry
            .with(tracing_subscriber::fmt::layer().json().with_target(true))
            .try_init()
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_target(true))
            .try_init()
    };

    if let Err(e) = result {
        eprintln!("Logging already initialised: {}", e);
    }
}

/// Structured logger for run-level events
#[derive(Debug, Clone)]
pub struct StructuredLogger {
    run_id: String,
}

impl StructuredLogger {
    pub fn new(run_id: String) -> Self {
        Self { run_id }
    }

    pub fn log_run_started(&self, url: &str, workers: usize, loops: u64, txns_per_loop: u64) {
        tracing::info!(
            run_id = %self.run_id,
            url = %url,
            workers,
            loops,
            txns_per_loop,
            "Exerciser starting"
        );
    }

    pub fn log_accounts(&self, external: bool, reused: usize, generated: usize) {
        tracing::info!(
            run_id = %self.run_id,
            external,
            reused,
            generated,
            "Accounts provisioned"
        );
    }

    pub fn log_contract(&self, address: &str, deployed: bool) {
        tracing::info!(
            run_id = %self.run_id,
            contract = %address,
            deployed,
            "Contract address established"
        );
    }

    pub fn log_deploy_failure(&self, worker: &str, error: &str) {
        tracing::warn!(
            run_id = %self.run_id,
            worker = %worker,
            error = %error,
            "Contract deployment failed, trying next worker"
        );
    }

    pub fn log_worker_report(&self, report: &WorkerReport) {
        tracing::debug!(
            run_id = %self.run_id,
            worker = %report.name,
            loops = report.loops,
            successes = report.successes,
            failures = report.failures,
            out_of_gas = report.out_of_gas,
            start_nonce = report.start_nonce,
            final_nonce = report.final_nonce,
            "Worker report"
        );
    }

    pub fn log_summary(&self, summary: &RunSummary) {
        tracing::info!(
            run_id = %self.run_id,
            contract = %summary.contract,
            successes = summary.successes,
            failures = summary.failures,
            rpc_calls = summary.rpc.total_calls,
            rpc_errors = summary.rpc.total_errors,
            elapsed_secs = summary.elapsed.as_secs_f64(),
            "Exerciser complete"
        );
    }

    pub fn error(&self, message: &str) {
        tracing::error!(run_id = %self.run_id, "{}", message);
    }
}

/// Identity of one run, carried into every worker span
#[derive(Debug, Clone)]
pub struct RunContext {
    pub run_id: String,
    pub logger: StructuredLogger,
}

impl RunContext {
    pub fn new() -> Self {
        let run_id = Uuid::new_v4().to_string();
        Self {
            logger: StructuredLogger::new(run_id.clone()),
            run_id,
        }
    }

    /// Span the orchestrator runs inside
    pub fn span(&self) -> tracing::Span {
        tracing::info_span!("exerciser", run_id = %self.run_id)
    }

    /// Span a worker task runs inside
    pub fn worker_span(&self, worker: &str) -> tracing::Span {
        tracing::info_span!("worker", run_id = %self.run_id, worker = %worker)
    }
}

impl Default for RunContext {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_debug_levels() {
        assert_eq!(level_for(0), "error");
        assert_eq!(level_for(1), "info");
        assert_eq!(level_for(2), "debug");
        assert_eq!(level_for(9), "debug");
    }

    #[test]
    fn test_run_ids_are_unique() {
        let a = RunContext::new();
        let b = RunContext::new();
        assert_ne!(a.run_id, b.run_id);
        assert!(Uuid::parse_str(&a.run_id).is_ok());
    }
}
