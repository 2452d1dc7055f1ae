//! `kube`-backed implementation of the pod directory port.
//!
//! Queries the Kubernetes API server through `kube::Api<Pod>` and decodes
//! API objects into the crate's domain types at this boundary. Watches are
//! resumed from the resourceVersion returned by the preceding list, so the
//! list and the watch form one consistent initial sync.

use std::collections::HashMap;
use std::path::Path;

use async_trait::async_trait;
use futures::StreamExt;
use k8s_openapi::api::core::v1::Pod;
use kube::api::{Api, ListParams, WatchParams};
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::core::WatchEvent;
use kube::{Client, Config};
use tracing::warn;

use crate::directory::{
    ContainerSpec, DirectoryError, DirectoryEvent, DirectoryStream, PodDirectory, PodId,
    PodSnapshot, PodUnit,
};
use crate::quantity::Quantity;

/// Pod directory backed by the Kubernetes API server.
pub struct KubeDirectory {
    client: Client,
}

impl KubeDirectory {
    /// Connect using the ambient configuration: a local kubeconfig under
    /// the home-directory convention (or `KUBECONFIG`), else in-cluster
    /// credentials.
    pub async fn try_default() -> Result<Self, DirectoryError> {
        let client = Client::try_default().await.map_err(transport)?;
        Ok(Self { client })
    }

    /// Connect using an explicit kubeconfig file.
    pub async fn from_kubeconfig(path: &Path) -> Result<Self, DirectoryError> {
        let kubeconfig = Kubeconfig::read_from(path)
            .map_err(|e| DirectoryError::Transport(e.to_string()))?;
        let config = Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default())
            .await
            .map_err(|e| DirectoryError::Transport(e.to_string()))?;
        let client = Client::try_from(config).map_err(transport)?;
        Ok(Self { client })
    }

    /// Wrap an existing client, e.g. one shared with other components.
    pub fn with_client(client: Client) -> Self {
        Self { client }
    }

    fn pods(&self, namespace: &str) -> Api<Pod> {
        Api::namespaced(self.client.clone(), namespace)
    }
}

#[async_trait]
impl PodDirectory for KubeDirectory {
    async fn list(&self, namespace: &str) -> Result<PodSnapshot, DirectoryError> {
        let pod_list = self
            .pods(namespace)
            .list(&ListParams::default())
            .await
            .map_err(transport)?;

        let resume = pod_list.metadata.resource_version.clone();
        let units = pod_list
            .items
            .into_iter()
            .filter_map(|pod| decode_pod(pod, namespace))
            .collect();

        Ok(PodSnapshot { units, resume })
    }

    async fn watch(
        &self,
        namespace: &str,
        resume: Option<&str>,
    ) -> Result<DirectoryStream, DirectoryError> {
        let version = resume.unwrap_or("0").to_string();
        let stream = self
            .pods(namespace)
            .watch(&WatchParams::default(), &version)
            .await
            .map_err(transport)?;

        let namespace = namespace.to_string();
        let events = stream.filter_map(move |event| {
            let namespace = namespace.clone();
            async move {
                match event {
                    Ok(WatchEvent::Added(pod)) => {
                        decode_pod(pod, &namespace).map(|u| Ok(DirectoryEvent::Added(u)))
                    }
                    Ok(WatchEvent::Modified(pod)) => {
                        decode_pod(pod, &namespace).map(|u| Ok(DirectoryEvent::Modified(u)))
                    }
                    Ok(WatchEvent::Deleted(pod)) => {
                        decode_pod(pod, &namespace).map(|u| Ok(DirectoryEvent::Deleted(u)))
                    }
                    Ok(WatchEvent::Bookmark(_)) => None,
                    Ok(WatchEvent::Error(e)) => Some(Err(DirectoryError::Transport(format!(
                        "watch error {}: {}",
                        e.reason, e.message
                    )))),
                    Err(e) => Some(Err(DirectoryError::Transport(e.to_string()))),
                }
            }
        });

        Ok(events.boxed())
    }

    async fn get(&self, namespace: &str, name: &str) -> Result<PodUnit, DirectoryError> {
        match self.pods(namespace).get(name).await {
            Ok(pod) => decode_pod(pod, namespace).ok_or_else(|| DirectoryError::NotFound {
                namespace: namespace.to_string(),
                name: name.to_string(),
            }),
            Err(kube::Error::Api(ae)) if ae.code == 404 => Err(DirectoryError::NotFound {
                namespace: namespace.to_string(),
                name: name.to_string(),
            }),
            Err(e) => Err(transport(e)),
        }
    }
}

fn transport(e: kube::Error) -> DirectoryError {
    DirectoryError::Transport(e.to_string())
}

/// Decode an API pod into a domain unit. Pods without a name are skipped.
fn decode_pod(pod: Pod, fallback_namespace: &str) -> Option<PodUnit> {
    let name = pod.metadata.name?;
    let namespace = pod
        .metadata
        .namespace
        .unwrap_or_else(|| fallback_namespace.to_string());
    let labels: HashMap<String, String> = pod
        .metadata
        .labels
        .unwrap_or_default()
        .into_iter()
        .collect();

    let id = PodId::new(namespace, name);
    let containers = pod
        .spec
        .map(|spec| {
            spec.containers
                .into_iter()
                .map(|container| {
                    let requests = container
                        .resources
                        .and_then(|r| r.requests)
                        .unwrap_or_default();
                    ContainerSpec {
                        name: container.name,
                        cpu_request_millis: request_value(&id, "cpu", requests.get("cpu"), |q| {
                            q.milli_units()
                        }),
                        memory_request_bytes: request_value(
                            &id,
                            "memory",
                            requests.get("memory"),
                            |q| q.whole_units(),
                        ),
                    }
                })
                .collect()
        })
        .unwrap_or_default();

    Some(PodUnit {
        id,
        labels,
        containers,
    })
}

/// Convert one request quantity; an absent or unparsable request reports 0.
fn request_value(
    pod: &PodId,
    resource: &str,
    raw: Option<&k8s_openapi::apimachinery::pkg::api::resource::Quantity>,
    convert: impl Fn(&Quantity) -> i64,
) -> i64 {
    let Some(raw) = raw else { return 0 };
    match Quantity::parse(&raw.0) {
        Ok(q) => convert(&q),
        Err(e) => {
            warn!(pod = %pod, resource, error = %e, "Unparsable resource request, reporting 0");
            0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::core::v1::{Container, PodSpec, ResourceRequirements};
    use k8s_openapi::apimachinery::pkg::api::resource::Quantity as ApiQuantity;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
    use std::collections::BTreeMap;

    fn api_pod(name: &str, requests: &[(&str, &str)]) -> Pod {
        let requests: BTreeMap<String, ApiQuantity> = requests
            .iter()
            .map(|(k, v)| (k.to_string(), ApiQuantity(v.to_string())))
            .collect();
        Pod {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                namespace: Some("default".to_string()),
                labels: Some(BTreeMap::from([(
                    "app".to_string(),
                    "myapp".to_string(),
                )])),
                ..Default::default()
            },
            spec: Some(PodSpec {
                containers: vec![Container {
                    name: "c1".to_string(),
                    resources: Some(ResourceRequirements {
                        requests: Some(requests),
                        ..Default::default()
                    }),
                    ..Default::default()
                }],
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    #[test]
    fn test_decode_pod_converts_requests() {
        let unit = decode_pod(api_pod("pod-1", &[("cpu", "100m"), ("memory", "64Mi")]), "default")
            .unwrap();
        assert_eq!(unit.id, PodId::new("default", "pod-1"));
        assert_eq!(unit.labels.get("app").map(String::as_str), Some("myapp"));
        assert_eq!(unit.containers.len(), 1);
        assert_eq!(unit.containers[0].name, "c1");
        assert_eq!(unit.containers[0].cpu_request_millis, 100);
        assert_eq!(unit.containers[0].memory_request_bytes, 67_108_864);
    }

    #[test]
    fn test_decode_pod_missing_requests_report_zero() {
        let unit = decode_pod(api_pod("pod-1", &[]), "default").unwrap();
        assert_eq!(unit.containers[0].cpu_request_millis, 0);
        assert_eq!(unit.containers[0].memory_request_bytes, 0);
    }

    #[test]
    fn test_decode_pod_unparsable_request_reports_zero() {
        let unit = decode_pod(api_pod("pod-1", &[("cpu", "garbage")]), "default").unwrap();
        assert_eq!(unit.containers[0].cpu_request_millis, 0);
    }

    #[test]
    fn test_decode_pod_without_name_is_skipped() {
        let pod = Pod::default();
        assert!(decode_pod(pod, "default").is_none());
    }
}
