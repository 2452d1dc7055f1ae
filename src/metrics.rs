//! The metric sink port.
//!
//! Samples are last-value-wins gauges keyed by `(namespace, pod_name,
//! container_name)`. The production sink emits through the `metrics` crate
//! facade; the scrape endpoint or recorder is installed by the embedding
//! process, not here.

use metrics::{describe_gauge, gauge};

/// Gauge carrying a pod container's declared CPU request in milli-units.
pub const POD_CPU_USAGE: &str = "pod_cpu_usage";

/// Gauge carrying a pod container's declared memory request in bytes.
pub const POD_MEMORY_USAGE: &str = "pod_memory_usage";

/// Label values identifying one sample series.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SampleLabels {
    pub namespace: String,
    pub pod_name: String,
    pub container_name: String,
}

/// Write-only gauge abstraction; the sink holds the last value per label
/// combination, no history.
pub trait MetricSink: Send + Sync {
    fn set_gauge(&self, name: &'static str, labels: &SampleLabels, value: f64);
}

/// Sink emitting through the `metrics` facade into whatever recorder the
/// process installed.
pub struct TelemetrySink;

impl TelemetrySink {
    /// Register gauge descriptions. Call once at startup.
    pub fn describe() {
        describe_gauge!(POD_CPU_USAGE, "Declared CPU request of pod containers (milli-units)");
        describe_gauge!(POD_MEMORY_USAGE, "Declared memory request of pod containers (bytes)");
    }
}

impl MetricSink for TelemetrySink {
    fn set_gauge(&self, name: &'static str, labels: &SampleLabels, value: f64) {
        gauge!(
            name,
            "namespace" => labels.namespace.clone(),
            "pod_name" => labels.pod_name.clone(),
            "container_name" => labels.container_name.clone()
        )
        .set(value);
    }
}
