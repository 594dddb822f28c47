use commonware_runtime::Metrics as RuntimeMetrics;
use prometheus_client::metrics::{counter::Counter, gauge::Gauge};

/// Metrics for the [`Engine`](super::Engine)
#[derive(Default)]
pub struct Metrics {
    /// Number of surveys whose proofs are still expected
    pub surveys: Gauge,
    /// Number of surveys held in memory
    pub tracked: Gauge,
    /// Number of proofs accepted
    pub proofs_verified: Counter,
    /// Number of proofs rejected or badly signed
    pub proofs_rejected: Counter,
    /// Number of blocks appended to the chain
    pub blocks: Counter,
    /// Number of messages dropped
    pub messages_dropped: Counter,
}

impl Metrics {
    /// Create and return a new set of metrics, registered with the given context.
    pub fn init<E: RuntimeMetrics>(context: E) -> Self {
        let metrics = Self::default();
        context.register(
            "surveys",
            "Number of surveys whose proofs are still expected",
            metrics.surveys.clone(),
        );
        context.register(
            "tracked",
            "Number of surveys held in memory",
            metrics.tracked.clone(),
        );
        context.register(
            "proofs_verified",
            "Number of proofs accepted",
            metrics.proofs_verified.clone(),
        );
        context.register(
            "proofs_rejected",
            "Number of proofs rejected or badly signed",
            metrics.proofs_rejected.clone(),
        );
        context.register("blocks", "Number of blocks appended", metrics.blocks.clone());
        context.register(
            "messages_dropped",
            "Number of messages dropped",
            metrics.messages_dropped.clone(),
        );
        metrics
    }
}
