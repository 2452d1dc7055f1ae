//! The pod directory port.
//!
//! The cluster API is consumed through the `PodDirectory` trait: a full
//! `list`, a resumable `watch` event stream, and a point `get`. Directory
//! responses are decoded into plain domain types at this boundary, so
//! downstream code never inspects API objects. The production
//! implementation lives in the `kubernetes` module; tests substitute a
//! fake.

use std::collections::HashMap;
use std::fmt;

use async_trait::async_trait;
use futures::stream::BoxStream;

/// Identity of a pod: namespace plus name.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PodId {
    pub namespace: String,
    pub name: String,
}

impl PodId {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for PodId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// One container's declared resource requests, already converted to
/// integer units (CPU in milli-units, memory in bytes). A container with no
/// request for a resource reports 0.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerSpec {
    pub name: String,
    pub cpu_request_millis: i64,
    pub memory_request_bytes: i64,
}

/// Immutable snapshot of a pod at the time it was fetched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PodUnit {
    pub id: PodId,
    pub labels: HashMap<String, String>,
    /// Containers in spec order.
    pub containers: Vec<ContainerSpec>,
}

/// A directory change, decoded once at the directory boundary.
#[derive(Debug, Clone)]
pub enum DirectoryEvent {
    Added(PodUnit),
    Modified(PodUnit),
    Deleted(PodUnit),
}

/// Result of a full list: pods in list order plus the token a watch can
/// resume from, making list+watch one consistent initial sync.
#[derive(Debug, Clone, Default)]
pub struct PodSnapshot {
    pub units: Vec<PodUnit>,
    pub resume: Option<String>,
}

/// Directory failure. `NotFound` is distinct from transport problems so
/// callers can tell a deleted pod from a flaky connection; both are treated
/// as transient during steady-state sampling.
#[derive(Debug, Clone, thiserror::Error)]
pub enum DirectoryError {
    #[error("pod {namespace}/{name} not found")]
    NotFound { namespace: String, name: String },
    #[error("directory transport error: {0}")]
    Transport(String),
}

/// Stream of decoded directory events.
pub type DirectoryStream = BoxStream<'static, Result<DirectoryEvent, DirectoryError>>;

/// Read-only access to the cluster's pod state.
#[async_trait]
pub trait PodDirectory: Send + Sync {
    /// List all pods in a namespace, in the directory's order.
    async fn list(&self, namespace: &str) -> Result<PodSnapshot, DirectoryError>;

    /// Open a change stream for a namespace, logically beginning after the
    /// snapshot identified by `resume`.
    async fn watch(
        &self,
        namespace: &str,
        resume: Option<&str>,
    ) -> Result<DirectoryStream, DirectoryError>;

    /// Fetch the current spec of one pod.
    async fn get(&self, namespace: &str, name: &str) -> Result<PodUnit, DirectoryError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pod_id_display() {
        assert_eq!(PodId::new("default", "pod-1").to_string(), "default/pod-1");
    }

    #[test]
    fn test_not_found_is_distinct() {
        let err = DirectoryError::NotFound {
            namespace: "default".into(),
            name: "pod-1".into(),
        };
        assert!(matches!(err, DirectoryError::NotFound { .. }));
        assert_eq!(err.to_string(), "pod default/pod-1 not found");
    }
}
