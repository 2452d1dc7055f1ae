//! Pod resource request monitor binary.
//!
//! Tracks the pods of one namespace, matches them against a label filter,
//! and republishes each matched pod's declared container resource requests
//! as gauges on a fixed interval. SIGINT/SIGTERM trigger a graceful stop
//! that terminates the tracker and every sampler before exiting.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::watch;

use pod_resource_monitor::filter::LabelFilter;
use pod_resource_monitor::kubernetes::KubeDirectory;
use pod_resource_monitor::metrics::TelemetrySink;
use pod_resource_monitor::monitor::{MonitorConfig, PodMonitor};

/// Pod resource request monitor
#[derive(Parser, Debug, Clone)]
#[command(name = "pod-resource-monitor")]
#[command(about = "Publish declared pod resource requests as gauges")]
struct Args {
    /// Namespace whose pods are tracked
    #[arg(short, long, default_value = "default", env = "POD_NAMESPACE")]
    namespace: String,

    /// Label filter: empty matches all pods, `key` requires the key,
    /// `key=value` requires an exact match
    #[arg(short, long, default_value = "", env = "POD_LABEL")]
    label: LabelFilter,

    /// Sampling interval in seconds (must be at least 1)
    #[arg(
        short,
        long,
        default_value = "5",
        value_parser = clap::value_parser!(u64).range(1..)
    )]
    interval_secs: u64,

    /// Path to a kubeconfig file; defaults to the ambient configuration
    /// (~/.kube/config, else in-cluster credentials)
    #[arg(long)]
    kubeconfig: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing - RUST_LOG takes precedence, fallback to info
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();

    tracing::info!(
        namespace = %args.namespace,
        filter = %args.label,
        interval_secs = args.interval_secs,
        "Starting pod-resource-monitor"
    );

    TelemetrySink::describe();

    let directory = match &args.kubeconfig {
        Some(path) => KubeDirectory::from_kubeconfig(path).await,
        None => KubeDirectory::try_default().await,
    }
    .context("Failed to construct Kubernetes client")?;

    // Map OS signals onto the monitor's stop signal
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut sigint = signal(SignalKind::interrupt())?;
    let mut sigterm = signal(SignalKind::terminate())?;
    tokio::spawn(async move {
        tokio::select! {
            _ = sigint.recv() => {
                tracing::info!("Received SIGINT, initiating graceful shutdown");
            }
            _ = sigterm.recv() => {
                tracing::info!("Received SIGTERM, initiating graceful shutdown");
            }
        }
        let _ = shutdown_tx.send(true);
    });

    let config = MonitorConfig {
        namespace: args.namespace,
        filter: args.label,
        sample_interval: Duration::from_secs(args.interval_secs),
    };
    let monitor = PodMonitor::new(Arc::new(directory), Arc::new(TelemetrySink), config);
    monitor.run(shutdown_rx).await?;

    tracing::info!("Shutdown complete");
    Ok(())
}
