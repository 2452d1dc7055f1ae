//! Pod resource request monitoring.
//!
//! This crate tracks the pods of one Kubernetes namespace, matches them
//! against a label filter, and periodically republishes each matched pod's
//! declared container resource requests (CPU, memory) as gauges.
//!
//! ## Architecture
//!
//! The monitor consists of three main components:
//!
//! 1. **Membership Tracker** (`tracker` module) - Consumes the directory's
//!    list+watch stream and raises edge-triggered appeared/removed events
//!    for pods passing the label filter.
//!
//! 2. **Per-Pod Sampler** (`sampler` module) - One cancellable loop per
//!    tracked pod; on a fixed interval re-fetches the pod spec and writes
//!    one gauge sample per container per metric.
//!
//! 3. **Monitor Coordinator** (`monitor` module) - Owns the tracker's
//!    lifecycle, spawns a sampler per appeared pod, and cancels exactly the
//!    right sampler on removal or shutdown.
//!
//! The Kubernetes API is consumed through the `PodDirectory` port
//! (`directory` module) with a `kube`-backed implementation (`kubernetes`
//! module); samples flow through the `MetricSink` port (`metrics` module)
//! into whatever recorder the embedding process installs.
//!
//! ## Usage
//!
//! Run as a binary against a cluster:
//!
//! ```bash
//! pod-resource-monitor --namespace default --label app=myapp --interval-secs 5
//! ```

pub mod directory;
pub mod filter;
pub mod kubernetes;
pub mod metrics;
pub mod monitor;
pub mod quantity;
pub mod sampler;
pub mod tracker;

#[cfg(test)]
pub(crate) mod testutil;
