//! Metrics emission
//!
//! Workers emit counters and timings through [`WorkerMetrics`], which names
//! each stat after the emitting process and worker, then forwards it to an
//! optional statsd sink. Every stat is also recorded through the `metrics`
//! facade so an installed Prometheus exporter can aggregate it.

use cadence::{BufferedUdpMetricSink, Counted, Gauged, MetricResult, StatsdClient};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::{SocketAddr, UdpSocket};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Largest statsd payload that fits a single datagram on common networks
const MAX_DATAGRAM_BYTES: usize = 1432;

/// Stat path convention
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MetricsFormat {
    /// `{qualifier.}{server}.P{pid}{worker}.{stat}`
    #[default]
    Graphite,
    /// `{stat},server=..,pid=..,worker=..{,qual=..}`
    Telegraf,
}

/// Destination for formatted stats
pub trait MetricsSink: Send + Sync + fmt::Debug {
    fn increment(&self, name: &str);
    fn gauge(&self, name: &str, value: u64);
    fn flush(&self) {}
}

/// statsd client over a buffered UDP sink. Stat names arrive fully
/// qualified, so the client carries no prefix of its own.
#[derive(Debug)]
pub struct StatsdSink {
    client: StatsdClient,
}

impl StatsdSink {
    pub fn connect(target: &str) -> MetricResult<Self> {
        let socket = UdpSocket::bind("0.0.0.0:0")?;
        socket.set_nonblocking(true)?;
        let sink = BufferedUdpMetricSink::with_capacity(target, socket, MAX_DATAGRAM_BYTES)?;
        Ok(Self {
            client: StatsdClient::from_sink("", sink),
        })
    }

    /// Flush the buffer on a fixed period until the sink is dropped
    pub fn spawn_flusher(self: &Arc<Self>, period: Duration) -> tokio::task::JoinHandle<()> {
        let sink = Arc::downgrade(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period.max(Duration::from_millis(1)));
            loop {
                ticker.tick().await;
                match sink.upgrade() {
                    Some(sink) => MetricsSink::flush(sink.as_ref()),
                    None => break,
                }
            }
        })
    }
}

// Metrics are best effort: send errors are logged and dropped
impl MetricsSink for StatsdSink {
    fn increment(&self, name: &str) {
        if let Err(e) = self.client.count(name, 1i64) {
            debug!(error = %e, "statsd send failed");
        }
    }

    fn gauge(&self, name: &str, value: u64) {
        if let Err(e) = self.client.gauge(name, value) {
            debug!(error = %e, "statsd send failed");
        }
    }

    fn flush(&self) {
        if let Err(e) = self.client.flush() {
            debug!(error = %e, "statsd flush failed");
        }
    }
}

/// Identity used to qualify every stat a worker emits
#[derive(Debug, Clone)]
pub struct MetricNaming {
    pub format: MetricsFormat,
    pub server: String,
    pub pid: u32,
    pub worker_name: String,
    pub worker_index: usize,
    pub qualifier: Option<String>,
}

impl MetricNaming {
    pub fn new(format: MetricsFormat, worker_name: &str, worker_index: usize, qualifier: Option<String>) -> Self {
        Self {
            format,
            server: short_hostname(),
            pid: std::process::id(),
            worker_name: worker_name.to_string(),
            worker_index,
            qualifier,
        }
    }

    pub fn name(&self, stat: &str) -> String {
        match self.format {
            MetricsFormat::Graphite => {
                let qual = self
                    .qualifier
                    .as_ref()
                    .map(|q| format!("{}.", q))
                    .unwrap_or_default();
                format!(
                    "{}{}.P{:06}{}.{}",
                    qual, self.server, self.pid, self.worker_name, stat
                )
            }
            MetricsFormat::Telegraf => {
                let qual = self
                    .qualifier
                    .as_ref()
                    .map(|q| format!(",qual={}", q))
                    .unwrap_or_default();
                format!(
                    "{},server={},pid={},worker={}{}",
                    stat, self.server, self.pid, self.worker_index, qual
                )
            }
        }
    }
}

fn short_hostname() -> String {
    hostname::get()
        .ok()
        .and_then(|h| h.into_string().ok())
        .and_then(|h| h.split('.').next().map(str::to_string))
        .filter(|h| !h.is_empty())
        .unwrap_or_else(|| "unknown".to_string())
}

/// Per-worker metrics handle. Cheap to clone.
#[derive(Debug, Clone)]
pub struct WorkerMetrics {
    sink: Option<Arc<dyn MetricsSink>>,
    naming: Arc<MetricNaming>,
}

impl WorkerMetrics {
    pub fn new(sink: Option<Arc<dyn MetricsSink>>, naming: MetricNaming) -> Self {
        Self {
            sink,
            naming: Arc::new(naming),
        }
    }

    /// Handle that only feeds the `metrics` facade
    pub fn disabled(worker_name: &str, worker_index: usize) -> Self {
        Self::new(
            None,
            MetricNaming::new(MetricsFormat::Graphite, worker_name, worker_index, None),
        )
    }

    pub fn incr(&self, stat: &'static str) {
        metrics::counter!(
            "exerciser_events_total",
            "stat" => stat,
            "worker" => self.naming.worker_name.clone()
        )
        .increment(1);

        if let Some(sink) = &self.sink {
            sink.increment(&self.naming.name(stat));
        }
    }

    pub fn timing(&self, stat: &'static str, elapsed: Duration) {
        let millis = elapsed.as_millis() as u64;
        metrics::gauge!(
            "exerciser_timing_ms",
            "stat" => stat,
            "worker" => self.naming.worker_name.clone()
        )
        .set(millis as f64);

        if let Some(sink) = &self.sink {
            sink.gauge(&self.naming.name(stat), millis);
        }
    }
}

/// Build the statsd sink for a run, if one is configured
pub fn connect_statsd(target: Option<&str>) -> MetricResult<Option<Arc<StatsdSink>>> {
    match target {
        Some(target) => {
            let sink = StatsdSink::connect(target).map_err(|e| {
                warn!(target, error = %e, "Failed to create statsd sink");
                e
            })?;
            Ok(Some(Arc::new(sink)))
        }
        None => Ok(None),
    }
}

/// Expose the `metrics` facade for scraping on `0.0.0.0:port`.
/// Must be called from within a tokio runtime.
pub fn serve_prometheus(port: u16) -> Result<SocketAddr, BuildError> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    PrometheusBuilder::new().with_http_listener(addr).install()?;
    info!(target: "prometheus", "Serving metrics at: http://{}", addr);
    Ok(addr)
}
