//! The monitor coordinator.
//!
//! Owns the membership tracker's lifecycle and a registry of live samplers
//! keyed by pod identity. The run loop is the only task that touches the
//! registry, so appeared-spawn and removed-cancel are serialized without a
//! lock. On stop the tracker and every sampler are cancelled and joined
//! before `run` returns.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use crate::directory::{DirectoryError, PodDirectory, PodId, PodUnit};
use crate::filter::LabelFilter;
use crate::metrics::MetricSink;
use crate::sampler;
use crate::tracker::{MembershipEvent, MembershipTracker};

/// Coordinator lifecycle states. `Stopped` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MonitorState {
    Idle,
    Starting,
    Running,
    Stopping,
    Stopped,
}

/// Monitor failure.
#[derive(Debug, thiserror::Error)]
pub enum MonitorError {
    /// The initial pod sync could not be performed. Retry policy for the
    /// initial connection belongs to the caller.
    #[error("initial pod sync failed: {0}")]
    Startup(#[from] DirectoryError),
    /// The tracker terminated without a stop request.
    #[error("membership event stream closed unexpectedly")]
    TrackerExited,
}

/// Coordinator configuration.
#[derive(Debug, Clone)]
pub struct MonitorConfig {
    /// Namespace whose pods are tracked.
    pub namespace: String,
    /// Label filter applied when a pod first appears.
    pub filter: LabelFilter,
    /// Interval between samples of each tracked pod.
    pub sample_interval: Duration,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            namespace: "default".to_string(),
            filter: LabelFilter::All,
            sample_interval: sampler::DEFAULT_SAMPLE_INTERVAL,
        }
    }
}

/// One live sampler: its cancellation signal and its task handle.
struct SamplerEntry {
    cancel: watch::Sender<bool>,
    task: JoinHandle<()>,
}

/// Pod resource monitor coordinator.
pub struct PodMonitor {
    directory: Arc<dyn PodDirectory>,
    sink: Arc<dyn MetricSink>,
    config: MonitorConfig,
    state: watch::Sender<MonitorState>,
}

impl PodMonitor {
    pub fn new(
        directory: Arc<dyn PodDirectory>,
        sink: Arc<dyn MetricSink>,
        config: MonitorConfig,
    ) -> Self {
        let (state, _) = watch::channel(MonitorState::Idle);
        Self {
            directory,
            sink,
            config,
            state,
        }
    }

    /// Observe lifecycle state transitions.
    pub fn state(&self) -> watch::Receiver<MonitorState> {
        self.state.subscribe()
    }

    /// Run until `shutdown` fires, then stop every sampler and the tracker
    /// and wait for all of them to terminate.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) -> Result<(), MonitorError> {
        self.set_state(MonitorState::Starting);

        let (tracker, mut events) = match MembershipTracker::start(
            self.directory.clone(),
            &self.config.namespace,
            self.config.filter.clone(),
        )
        .await
        {
            Ok(started) => started,
            Err(e) => {
                self.set_state(MonitorState::Stopped);
                return Err(MonitorError::Startup(e));
            }
        };

        self.set_state(MonitorState::Running);
        info!(
            namespace = %self.config.namespace,
            filter = %self.config.filter,
            interval_secs = self.config.sample_interval.as_secs(),
            "Pod monitor running"
        );

        let mut samplers: HashMap<PodId, SamplerEntry> = HashMap::new();
        let mut retired: Vec<JoinHandle<()>> = Vec::new();
        let mut result = Ok(());

        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!("Stop requested");
                        break;
                    }
                }
                event = events.recv() => match event {
                    Some(MembershipEvent::Appeared(unit)) => {
                        self.spawn_sampler(unit, &mut samplers);
                    }
                    Some(MembershipEvent::Removed(id)) => {
                        match samplers.remove(&id) {
                            Some(entry) => {
                                info!(pod = %id, "Pod removed, cancelling sampler");
                                let _ = entry.cancel.send(true);
                                retired.push(entry.task);
                            }
                            // Cancel of an unknown identity is a no-op.
                            None => debug!(pod = %id, "Removal for pod without sampler ignored"),
                        }
                    }
                    None => {
                        error!("Membership event stream closed unexpectedly");
                        result = Err(MonitorError::TrackerExited);
                        break;
                    }
                }
            }
        }

        self.set_state(MonitorState::Stopping);

        // Unblock the tracker before joining it, then cancel every sampler
        // and wait for all tasks to acknowledge termination.
        drop(events);
        tracker.stop().await;
        for (_, entry) in samplers.drain() {
            let _ = entry.cancel.send(true);
            retired.push(entry.task);
        }
        for task in retired {
            let _ = task.await;
        }

        self.set_state(MonitorState::Stopped);
        info!("Pod monitor stopped");
        result
    }

    /// Spawn exactly one sampler per identity; a duplicate appearance for a
    /// live identity is ignored.
    fn spawn_sampler(&self, unit: PodUnit, samplers: &mut HashMap<PodId, SamplerEntry>) {
        if samplers.contains_key(&unit.id) {
            debug!(pod = %unit.id, "Sampler already live, ignoring duplicate appearance");
            return;
        }

        info!(pod = %unit.id, "Pod appeared, starting sampler");
        let (cancel, cancel_rx) = watch::channel(false);
        let task = tokio::spawn(sampler::run(
            unit.id.clone(),
            self.config.sample_interval,
            self.directory.clone(),
            self.sink.clone(),
            cancel_rx,
        ));
        samplers.insert(unit.id, SamplerEntry { cancel, task });
    }

    fn set_state(&self, state: MonitorState) {
        debug!(state = ?state, "Monitor state transition");
        self.state.send_replace(state);
    }
}
