use commonware_runtime::Metrics as RuntimeMetrics;
use prometheus_client::metrics::counter::Counter;

/// Metrics for the [`Engine`](super::Engine)
#[derive(Default)]
pub struct Metrics {
    /// Number of surveys answered
    pub answered: Counter,
    /// Number of surveys the provider could not answer
    pub failed: Counter,
    /// Number of range proofs emitted
    pub proofs_emitted: Counter,
}

impl Metrics {
    /// Create and return a new set of metrics, registered with the given context.
    pub fn init<E: RuntimeMetrics>(context: E) -> Self {
        let metrics = Self::default();
        context.register(
            "answered",
            "Number of surveys answered",
            metrics.answered.clone(),
        );
        context.register(
            "failed",
            "Number of surveys the provider could not answer",
            metrics.failed.clone(),
        );
        context.register(
            "proofs_emitted",
            "Number of range proofs emitted",
            metrics.proofs_emitted.clone(),
        );
        metrics
    }
}
