use commonware_runtime::Metrics as RuntimeMetrics;
use prometheus_client::metrics::{counter::Counter, gauge::Gauge};

/// Metrics for the [`Engine`](super::Engine)
#[derive(Clone, Default)]
pub struct Metrics {
    /// Number of surveys in progress
    pub surveys: Gauge,
    /// Number of surveys held in memory
    pub tracked: Gauge,
    /// Number of surveys answered
    pub completed: Counter,
    /// Number of surveys aborted
    pub failed: Counter,
    /// Number of proofs emitted
    pub proofs_emitted: Counter,
    /// Number of messages buffered for surveys not yet announced
    pub buffered: Counter,
}

impl Metrics {
    /// Create and return a new set of metrics, registered with the given context.
    pub fn init<E: RuntimeMetrics>(context: E) -> Self {
        let metrics = Self::default();
        context.register(
            "surveys",
            "Number of surveys in progress",
            metrics.surveys.clone(),
        );
        context.register(
            "tracked",
            "Number of surveys held in memory",
            metrics.tracked.clone(),
        );
        context.register(
            "completed",
            "Number of surveys answered",
            metrics.completed.clone(),
        );
        context.register("failed", "Number of surveys aborted", metrics.failed.clone());
        context.register(
            "proofs_emitted",
            "Number of proofs emitted",
            metrics.proofs_emitted.clone(),
        );
        context.register(
            "buffered",
            "Number of messages buffered for surveys not yet announced",
            metrics.buffered.clone(),
        );
        metrics
    }
}
