//! Orchestrator
//!
//! Everything that can abort a run happens here, before the first worker
//! starts looping:
//! 1. configuration and account preconditions
//! 2. compiling the contract and binding the call arguments
//! 3. resolving the chain id for external signing
//! 4. initialising every worker's nonce
//! 5. validating the supplied contract address, or deploying it
//!
//! After that the workers run as independent tasks and are joined before the
//! totals are reported.

use crate::accounts::{provision_accounts, KeyStore, WorkerAccount};
use crate::compiler::{compiler_for, ContractArtifact, ContractCompiler};
use crate::config::{CallMode, RunConfig, SigningMode};
use crate::error::ExerciserError;
use crate::metrics::{connect_statsd, MetricNaming, MetricsSink, WorkerMetrics};
use crate::rpc_manager::{AtomicCallStats, RetryPolicy, RpcGateway, RpcTransport};
use crate::structured_logging::RunContext;
use crate::tx_builder::{ExternalSigner, NodeSigner, SigningStrategy};
use crate::types::{RunCounters, RunSummary};
use crate::worker::{worker_name, Worker};
use alloy_primitives::Address;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::Instant;
use tracing::Instrument;

pub struct Exerciser {
    config: Arc<RunConfig>,
    transport: Arc<dyn RpcTransport>,
    compiler: Option<Box<dyn ContractCompiler>>,
    sink: Option<Arc<dyn MetricsSink>>,
    flusher: Option<JoinHandle<()>>,
    retry_policy: RetryPolicy,
    context: RunContext,
}

impl Exerciser {
    pub fn new(config: RunConfig, transport: Arc<dyn RpcTransport>) -> Self {
        Self {
            config: Arc::new(config),
            transport,
            compiler: None,
            sink: None,
            flusher: None,
            retry_policy: RetryPolicy::default(),
            context: RunContext::new(),
        }
    }

    /// Use this compiler instead of the one picked from the source extension
    pub fn with_compiler(mut self, compiler: Box<dyn ContractCompiler>) -> Self {
        self.compiler = Some(compiler);
        self
    }

    /// Send per-worker stats to this sink instead of the configured statsd target
    pub fn with_metrics_sink(mut self, sink: Arc<dyn MetricsSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = policy;
        self
    }

    pub fn run_id(&self) -> &str {
        &self.context.run_id
    }

    /// Run to completion and report the totals
    pub async fn start(mut self) -> Result<RunSummary, ExerciserError> {
        let span = self.context.span();
        let result = self.execute().instrument(span).await;
        if let Err(err) = &result {
            self.context.logger.error(&err.to_string());
        }
        if let Some(sink) = &self.sink {
            sink.flush();
        }
        if let Some(flusher) = self.flusher.take() {
            Self::stop_flusher(flusher).await;
        }
        result
    }

    /// A flusher that ended before the run did stopped sending buffered stats
    async fn stop_flusher(flusher: JoinHandle<()>) {
        if !flusher.is_finished() {
            flusher.abort();
            return;
        }
        match flusher.await {
            Ok(()) => tracing::warn!("statsd flusher stopped before the run ended"),
            Err(e) => tracing::error!(error = %e, "statsd flusher failed"),
        }
    }

    fn gateway(&self, stats: &Arc<AtomicCallStats>, index: usize) -> RpcGateway {
        let naming = MetricNaming::new(
            self.config.metrics.format,
            &worker_name(index),
            index,
            self.config.metrics.qualifier.clone(),
        );
        RpcGateway::new(
            self.transport.clone(),
            self.config.rpc_timeout(),
            stats.clone(),
            WorkerMetrics::new(self.sink.clone(), naming),
        )
        .with_retry_policy(self.retry_policy.clone())
    }

    fn connect_metrics(&mut self) -> Result<(), ExerciserError> {
        if self.sink.is_some() {
            return Ok(());
        }
        let statsd = connect_statsd(self.config.metrics.statsd.as_deref())
            .map_err(|e| ExerciserError::setup(format!("Failed to create statsd sink: {}", e)))?;
        if let Some(statsd) = statsd {
            self.flusher = Some(statsd.spawn_flusher(Duration::from_millis(self.config.metrics.flush_ms)));
            self.sink = Some(statsd);
        }
        Ok(())
    }

    async fn resolve_chain_id(&self, gateway: &RpcGateway) -> Result<u64, ExerciserError> {
        if self.config.chain_id != 0 {
            return Ok(self.config.chain_id);
        }
        let chain_id = gateway
            .network_id()
            .await
            .map_err(|e| ExerciserError::setup(format!("Failed to query network ID: {}", e)))?;
        tracing::info!(chain_id, "Chain ID from net_version");
        Ok(chain_id)
    }

    fn signing_strategy(account: WorkerAccount, chain_id: u64) -> SigningStrategy {
        match account.signer {
            Some(signer) => SigningStrategy::External(ExternalSigner::new(signer, chain_id)),
            None => SigningStrategy::Node(NodeSigner::new(account.address)),
        }
    }

    /// Try each worker in order until one deployment succeeds
    async fn deploy_with_fallback(&self, workers: &mut [Worker]) -> Result<Address, ExerciserError> {
        let mut last = None;
        for worker in workers.iter_mut() {
            let span = self.context.worker_span(worker.name());
            match worker.install_contract().instrument(span).await {
                Ok(address) => return Ok(address),
                Err(err) => {
                    self.context
                        .logger
                        .log_deploy_failure(worker.name(), &err.to_string());
                    last = Some(err);
                }
            }
        }
        match last {
            Some(last) => Err(ExerciserError::DeploymentExhausted {
                attempts: workers.len(),
                last: Box::new(last),
            }),
            None => Err(ExerciserError::setup("No workers available to deploy the contract")),
        }
    }

    async fn execute(&mut self) -> Result<RunSummary, ExerciserError> {
        let started = Instant::now();
        let config = self.config.clone();
        config.validate()?;
        self.connect_metrics()?;

        self.context.logger.log_run_started(
            &config.url,
            config.workers,
            config.loops,
            config.txns_per_loop,
        );

        let key_store = config.keys_file.as_ref().map(KeyStore::new);
        let pool = provision_accounts(config.signing, config.workers, &config.accounts, key_store.as_ref())?;
        self.context.logger.log_accounts(
            config.signing == SigningMode::External,
            pool.reused,
            pool.generated,
        );

        let compiled = match &self.compiler {
            Some(compiler) => compiler.compile(&config.source, config.contract_name.as_deref()).await?,
            None => {
                compiler_for(&config.source, config.evm_version.clone())
                    .compile(&config.source, config.contract_name.as_deref())
                    .await?
            }
        };
        let artifact = Arc::new(ContractArtifact::new(
            compiled,
            &config.method,
            config.args.clone(),
        )?);

        let stats = Arc::new(AtomicCallStats::new());
        let chain_id = match config.signing {
            SigningMode::External => self.resolve_chain_id(&self.gateway(&stats, 0)).await?,
            SigningMode::Node => config.chain_id,
        };

        let counters = Arc::new(RunCounters::new());
        let mut workers = Vec::with_capacity(pool.accounts.len());
        for (index, account) in pool.accounts.into_iter().enumerate() {
            let mut worker = Worker::new(
                index,
                Self::signing_strategy(account, chain_id),
                config.clone(),
                artifact.clone(),
                self.gateway(&stats, index),
                counters.clone(),
            );
            worker.init().await?;
            workers.push(worker);
        }

        let contract = match &config.contract {
            Some(supplied) => supplied.trim().parse::<Address>().map_err(|_| {
                ExerciserError::setup(format!("Invalid contract address: {}", supplied))
            })?,
            None => self.deploy_with_fallback(&mut workers).await?,
        };
        self.context
            .logger
            .log_contract(&contract.to_string(), config.contract.is_none());

        if config.call_mode != CallMode::Transact {
            let worker = workers
                .first()
                .ok_or_else(|| ExerciserError::setup("No workers configured"))?;
            let call_result = worker
                .call_once(contract, config.call_mode)
                .instrument(self.context.worker_span(worker.name()))
                .await?;

            return Ok(RunSummary {
                contract,
                successes: 0,
                failures: 0,
                workers: Vec::new(),
                call_result: Some(call_result),
                rpc: stats.snapshot(),
                elapsed: started.elapsed(),
            });
        }

        let mut tasks = JoinSet::new();
        for worker in workers {
            let span = self.context.worker_span(worker.name());
            tasks.spawn(worker.run(contract).instrument(span));
        }

        let mut reports = Vec::with_capacity(config.workers);
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(report) => {
                    self.context.logger.log_worker_report(&report);
                    reports.push(report);
                }
                Err(e) => self.context.logger.error(&format!("Worker task failed: {}", e)),
            }
        }
        reports.sort_by(|a, b| a.name.cmp(&b.name));
        tracing::debug!(success_rate = stats.success_rate(), "RPC call statistics");

        let summary = RunSummary {
            contract,
            successes: counters.successes(),
            failures: counters.failures(),
            workers: reports,
            call_result: None,
            rpc: stats.snapshot(),
            elapsed: started.elapsed(),
        };
        self.context.logger.log_summary(&summary);
        Ok(summary)
    }
}
