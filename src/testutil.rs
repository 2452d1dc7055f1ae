//! In-memory fakes for the directory and sink ports.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use futures::StreamExt;
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;

use crate::directory::{
    ContainerSpec, DirectoryError, DirectoryEvent, DirectoryStream, PodDirectory, PodId,
    PodSnapshot, PodUnit,
};
use crate::metrics::{MetricSink, SampleLabels};

/// Build a pod unit. `containers` are `(name, cpu_millis, memory_bytes)`.
pub fn pod(
    namespace: &str,
    name: &str,
    labels: &[(&str, &str)],
    containers: &[(&str, i64, i64)],
) -> PodUnit {
    PodUnit {
        id: PodId::new(namespace, name),
        labels: labels
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect(),
        containers: containers
            .iter()
            .map(|(name, cpu, memory)| ContainerSpec {
                name: name.to_string(),
                cpu_request_millis: *cpu,
                memory_request_bytes: *memory,
            })
            .collect(),
    }
}

type EventSender = mpsc::UnboundedSender<Result<DirectoryEvent, DirectoryError>>;

#[derive(Default)]
struct FakeState {
    /// Current directory truth, in list order.
    pods: Vec<PodUnit>,
    /// Sender feeding the most recently opened watch stream.
    watch_tx: Option<EventSender>,
    /// Events injected before any watch was open; delivered on open.
    pending: Vec<Result<DirectoryEvent, DirectoryError>>,
    /// Number of get calls per pod name that should fail before succeeding.
    failing_gets: HashMap<String, usize>,
    fail_next_list: bool,
    watch_count: usize,
}

/// In-memory pod directory. Watch events are injected by tests; the pod
/// list is the truth served by `list` and `get`.
#[derive(Default)]
pub struct FakeDirectory {
    state: Mutex<FakeState>,
}

impl FakeDirectory {
    pub fn new(pods: Vec<PodUnit>) -> Arc<Self> {
        let fake = Self::default();
        fake.state.lock().unwrap().pods = pods;
        Arc::new(fake)
    }

    /// Replace the directory truth without emitting events, as if pods
    /// changed while no watch was connected.
    pub fn set_pods(&self, pods: Vec<PodUnit>) {
        self.state.lock().unwrap().pods = pods;
    }

    /// Inject an event (or error) into the watch stream. Events injected
    /// before a watch is open are delivered once one opens.
    pub fn push_event(&self, event: Result<DirectoryEvent, DirectoryError>) {
        let mut state = self.state.lock().unwrap();
        match state.watch_tx.as_ref() {
            Some(tx) => {
                let _ = tx.send(event);
            }
            None => state.pending.push(event),
        }
    }

    /// Make the next `times` gets for `name` fail with a transport error.
    pub fn fail_next_gets(&self, name: &str, times: usize) {
        self.state
            .lock()
            .unwrap()
            .failing_gets
            .insert(name.to_string(), times);
    }

    pub fn fail_next_list(&self) {
        self.state.lock().unwrap().fail_next_list = true;
    }

    /// How many watch streams were opened (initial plus resyncs).
    pub fn watch_count(&self) -> usize {
        self.state.lock().unwrap().watch_count
    }
}

#[async_trait]
impl PodDirectory for FakeDirectory {
    async fn list(&self, _namespace: &str) -> Result<PodSnapshot, DirectoryError> {
        let mut state = self.state.lock().unwrap();
        if state.fail_next_list {
            state.fail_next_list = false;
            return Err(DirectoryError::Transport("list failed".to_string()));
        }
        Ok(PodSnapshot {
            units: state.pods.clone(),
            resume: None,
        })
    }

    async fn watch(
        &self,
        _namespace: &str,
        _resume: Option<&str>,
    ) -> Result<DirectoryStream, DirectoryError> {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut state = self.state.lock().unwrap();
        for event in state.pending.drain(..) {
            let _ = tx.send(event);
        }
        state.watch_tx = Some(tx);
        state.watch_count += 1;
        Ok(UnboundedReceiverStream::new(rx).boxed())
    }

    async fn get(&self, namespace: &str, name: &str) -> Result<PodUnit, DirectoryError> {
        let mut state = self.state.lock().unwrap();
        if let Some(remaining) = state.failing_gets.get_mut(name) {
            if *remaining > 0 {
                *remaining -= 1;
                return Err(DirectoryError::Transport("get failed".to_string()));
            }
        }
        state
            .pods
            .iter()
            .find(|p| p.id.name == name && p.id.namespace == namespace)
            .cloned()
            .ok_or_else(|| DirectoryError::NotFound {
                namespace: namespace.to_string(),
                name: name.to_string(),
            })
    }
}

/// Sink recording every gauge write, last-write-wins per series.
#[derive(Default)]
pub struct RecordingSink {
    samples: Mutex<Vec<(&'static str, SampleLabels, f64)>>,
}

impl RecordingSink {
    /// Last value written for a series, if any.
    pub fn value(
        &self,
        name: &'static str,
        namespace: &str,
        pod_name: &str,
        container_name: &str,
    ) -> Option<f64> {
        self.samples
            .lock()
            .unwrap()
            .iter()
            .rev()
            .find(|(n, labels, _)| {
                *n == name
                    && labels.namespace == namespace
                    && labels.pod_name == pod_name
                    && labels.container_name == container_name
            })
            .map(|(_, _, value)| *value)
    }

    /// Total number of gauge writes recorded.
    pub fn sample_count(&self) -> usize {
        self.samples.lock().unwrap().len()
    }

    /// Whether any series exists for a pod name.
    pub fn has_series_for_pod(&self, pod_name: &str) -> bool {
        self.samples
            .lock()
            .unwrap()
            .iter()
            .any(|(_, labels, _)| labels.pod_name == pod_name)
    }

    pub fn clear(&self) {
        self.samples.lock().unwrap().clear();
    }
}

impl MetricSink for RecordingSink {
    fn set_gauge(&self, name: &'static str, labels: &SampleLabels, value: f64) {
        self.samples
            .lock()
            .unwrap()
            .push((name, labels.clone(), value));
    }
}
