//! Per-pod sampling loop.
//!
//! Each tracked pod gets one independent loop: every tick it re-fetches the
//! pod's current spec from the directory and writes one CPU and one memory
//! gauge per container, in spec order. A failed fetch is reported and the
//! tick is skipped; only the cancellation signal ends the loop.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{debug, warn};

use crate::directory::{PodDirectory, PodId};
use crate::metrics::{MetricSink, SampleLabels, POD_CPU_USAGE, POD_MEMORY_USAGE};

/// Default interval between samples.
pub const DEFAULT_SAMPLE_INTERVAL: Duration = Duration::from_secs(5);

/// Run the sampling loop for one pod until cancelled.
///
/// The loop observes cancellation within at most one tick interval. The
/// first sample is taken one interval after start. A zero interval is
/// replaced with the default; `tokio::time::interval` panics on zero.
pub async fn run(
    pod: PodId,
    interval: Duration,
    directory: Arc<dyn PodDirectory>,
    sink: Arc<dyn MetricSink>,
    mut cancel: watch::Receiver<bool>,
) {
    let interval = if interval.is_zero() {
        warn!(pod = %pod, "Zero sampling interval requested, using default");
        DEFAULT_SAMPLE_INTERVAL
    } else {
        interval
    };
    let mut ticker = tokio::time::interval(interval);
    ticker.tick().await; // First tick is immediate, skip it

    loop {
        tokio::select! {
            changed = cancel.changed() => {
                if changed.is_err() || *cancel.borrow() {
                    debug!(pod = %pod, "Sampler cancelled");
                    return;
                }
            }
            _ = ticker.tick() => {
                sample_once(&pod, directory.as_ref(), sink.as_ref()).await;
            }
        }
    }
}

/// Fetch the pod and publish one sample per container per metric. Any
/// directory error (not-found, transport, timeout) skips this tick; prior
/// gauge values stay in place.
async fn sample_once(pod: &PodId, directory: &dyn PodDirectory, sink: &dyn MetricSink) {
    let unit = match directory.get(&pod.namespace, &pod.name).await {
        Ok(unit) => unit,
        Err(e) => {
            warn!(pod = %pod, error = %e, "Failed to fetch pod, skipping sample");
            return;
        }
    };

    for container in &unit.containers {
        let labels = SampleLabels {
            namespace: pod.namespace.clone(),
            pod_name: pod.name.clone(),
            container_name: container.name.clone(),
        };
        sink.set_gauge(POD_CPU_USAGE, &labels, container.cpu_request_millis as f64);
        sink.set_gauge(
            POD_MEMORY_USAGE,
            &labels,
            container.memory_request_bytes as f64,
        );
        debug!(
            pod = %pod,
            container = %container.name,
            cpu_millis = container.cpu_request_millis,
            memory_bytes = container.memory_request_bytes,
            "Sampled resource requests"
        );
    }
}
