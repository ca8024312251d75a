//! Metrics collection and reporting.
//!
//! Uses Prometheus for metrics collection and exposition. Counters are fed
//! from the pipeline's event stream.

use civitas_governance::{PipelineEvent, TickReport};
use prometheus::{
    Encoder, Histogram, HistogramOpts, IntCounter, IntCounterVec, IntGauge, Opts, Registry,
    TextEncoder,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{debug, warn};

/// Metrics collector.
pub struct Metrics {
    registry: Registry,
    pub votes_accepted: IntCounter,
    /// Rejected requests by endpoint and error kind
    pub requests_rejected: IntCounterVec,
    pub batches_submitted: IntCounter,
    pub votes_submitted: IntCounter,
    pub batch_submission_failures: IntCounter,
    /// Settlement outcomes: confirmed, reverted, timed_out
    pub batches_settled: IntCounterVec,
    pub settlement_gas_used: IntCounter,
    pub proposals_finalized: IntCounterVec,
    pub approvals_recorded: IntCounter,
    pub operations_queued: IntCounter,
    pub operations_executed: IntCounter,
    /// Cancellations, split by emergency or regular
    pub operations_cancelled: IntCounterVec,
    pub chain_time: IntGauge,
    pub tick_duration: Histogram,
}

impl Metrics {
    /// Create new metrics collector.
    pub fn new() -> anyhow::Result<Arc<Self>> {
        let registry = Registry::new();

        let votes_accepted = IntCounter::new(
            "civitas_votes_accepted_total",
            "Signed votes accepted by the relay",
        )?;
        registry.register(Box::new(votes_accepted.clone()))?;

        let requests_rejected = IntCounterVec::new(
            Opts::new("civitas_requests_rejected_total", "Rejected vote and approval requests"),
            &["endpoint", "kind"],
        )?;
        registry.register(Box::new(requests_rejected.clone()))?;

        let batches_submitted = IntCounter::new(
            "civitas_batches_submitted_total",
            "Settlement batches submitted to the chain",
        )?;
        registry.register(Box::new(batches_submitted.clone()))?;

        let votes_submitted = IntCounter::new(
            "civitas_votes_submitted_total",
            "Votes included in submitted batches",
        )?;
        registry.register(Box::new(votes_submitted.clone()))?;

        let batch_submission_failures = IntCounter::new(
            "civitas_batch_submission_failures_total",
            "Settlement submissions the chain did not accept",
        )?;
        registry.register(Box::new(batch_submission_failures.clone()))?;

        let batches_settled = IntCounterVec::new(
            Opts::new("civitas_batches_settled_total", "Settlement batch outcomes"),
            &["outcome"],
        )?;
        registry.register(Box::new(batches_settled.clone()))?;

        let settlement_gas_used = IntCounter::new(
            "civitas_settlement_gas_used_total",
            "Gas used by confirmed settlement batches",
        )?;
        registry.register(Box::new(settlement_gas_used.clone()))?;

        let proposals_finalized = IntCounterVec::new(
            Opts::new("civitas_proposals_finalized_total", "Finalized proposals by outcome"),
            &["status"],
        )?;
        registry.register(Box::new(proposals_finalized.clone()))?;

        let approvals_recorded = IntCounter::new(
            "civitas_approvals_recorded_total",
            "Multisig approvals recorded",
        )?;
        registry.register(Box::new(approvals_recorded.clone()))?;

        let operations_queued = IntCounter::new(
            "civitas_timelock_queued_total",
            "Operations queued in the timelock",
        )?;
        registry.register(Box::new(operations_queued.clone()))?;

        let operations_executed = IntCounter::new(
            "civitas_timelock_executed_total",
            "Timelock operations executed",
        )?;
        registry.register(Box::new(operations_executed.clone()))?;

        let operations_cancelled = IntCounterVec::new(
            Opts::new("civitas_timelock_cancelled_total", "Timelock operations cancelled"),
            &["emergency"],
        )?;
        registry.register(Box::new(operations_cancelled.clone()))?;

        let chain_time = IntGauge::new(
            "civitas_chain_time_seconds",
            "Chain block time seen by the last scheduler tick",
        )?;
        registry.register(Box::new(chain_time.clone()))?;

        let tick_duration = Histogram::with_opts(
            HistogramOpts::new("civitas_tick_duration_seconds", "Scheduler tick duration")
                .buckets(vec![0.01, 0.05, 0.1, 0.5, 1.0, 5.0]),
        )?;
        registry.register(Box::new(tick_duration.clone()))?;

        Ok(Arc::new(Self {
            registry,
            votes_accepted,
            requests_rejected,
            batches_submitted,
            votes_submitted,
            batch_submission_failures,
            batches_settled,
            settlement_gas_used,
            proposals_finalized,
            approvals_recorded,
            operations_queued,
            operations_executed,
            operations_cancelled,
            chain_time,
            tick_duration,
        }))
    }

    /// Export metrics in Prometheus text format.
    pub fn export(&self) -> anyhow::Result<String> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder.encode(&metric_families, &mut buffer)?;
        Ok(String::from_utf8(buffer)?)
    }

    pub fn record_event(&self, event: &PipelineEvent) {
        match event {
            PipelineEvent::VoteAccepted { .. } => self.votes_accepted.inc(),
            PipelineEvent::RequestRejected { endpoint, kind } => self
                .requests_rejected
                .with_label_values(&[*endpoint, kind.as_str()])
                .inc(),
            PipelineEvent::BatchSubmitted { votes, .. } => {
                self.batches_submitted.inc();
                self.votes_submitted.inc_by(u64::from(*votes));
            }
            PipelineEvent::BatchSubmissionFailed => self.batch_submission_failures.inc(),
            PipelineEvent::BatchConfirmed { gas_used, .. } => {
                self.batches_settled.with_label_values(&["confirmed"]).inc();
                self.settlement_gas_used.inc_by(*gas_used);
            }
            PipelineEvent::BatchReverted { .. } => {
                self.batches_settled.with_label_values(&["reverted"]).inc()
            }
            PipelineEvent::BatchTimedOut { .. } => {
                self.batches_settled.with_label_values(&["timed_out"]).inc()
            }
            PipelineEvent::ProposalFinalized { status, .. } => {
                let status = status.to_string();
                self.proposals_finalized.with_label_values(&[status.as_str()]).inc()
            }
            PipelineEvent::ApprovalRecorded { .. } => self.approvals_recorded.inc(),
            PipelineEvent::OperationQueued { .. } => self.operations_queued.inc(),
            PipelineEvent::OperationExecuted { .. } => self.operations_executed.inc(),
            PipelineEvent::OperationCancelled { emergency, .. } => self
                .operations_cancelled
                .with_label_values(&[if *emergency { "true" } else { "false" }])
                .inc(),
        }
    }

    pub fn record_tick(&self, report: &TickReport, duration: Duration) {
        self.chain_time.set(i64::try_from(report.now).unwrap_or(i64::MAX));
        self.tick_duration.observe(duration.as_secs_f64());
    }

    /// Feed counters from the pipeline's event stream until it closes.
    pub fn spawn_recorder(
        self: &Arc<Self>,
        mut events: broadcast::Receiver<PipelineEvent>,
    ) -> tokio::task::JoinHandle<()> {
        let metrics = self.clone();
        tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(event) => metrics.record_event(&event),
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, "Metrics recorder lagged behind pipeline events");
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        debug!("Pipeline event stream closed");
                        break;
                    }
                }
            }
        })
    }
}

/// Metrics server.
pub struct MetricsServer {
    addr: std::net::SocketAddr,
    metrics: Arc<Metrics>,
}

impl MetricsServer {
    pub fn new(addr: std::net::SocketAddr, metrics: Arc<Metrics>) -> Self {
        Self { addr, metrics }
    }

    /// Serve `/metrics` until the task is dropped.
    pub async fn start(&self) -> anyhow::Result<()> {
        let metrics = self.metrics.clone();

        let app = axum::Router::new().route(
            "/metrics",
            axum::routing::get(move || {
                let metrics = metrics.clone();
                async move {
                    match metrics.export() {
                        Ok(output) => (axum::http::StatusCode::OK, output),
                        Err(e) => (axum::http::StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
                    }
                }
            }),
        );

        let listener = tokio::net::TcpListener::bind(self.addr).await?;
        axum::serve(listener, app).await?;

        Ok(())
    }
}
