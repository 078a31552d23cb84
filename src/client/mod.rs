//! Orchestration-platform client used by the reconciliation core.
//!
//! The core never talks to `kube::Api` directly. Every read and write goes
//! through [`ResourceClient`], which has two implementations:
//!
//! - [`KubeClient`]: the real API server, via kube-rs
//! - `FakeClient`: an in-memory object store for tests, behind the
//!   `test-utils` feature
//!
//! Not-found reads are `Ok(None)`. Writes report stale resource versions and
//! lost create races as [`Error::Conflict`](crate::controller::error::Error::Conflict)
//! and missing objects as `Error::NotFound`.

#[cfg(any(test, feature = "test-utils"))]
pub mod fake;
pub mod kube_client;

#[cfg(any(test, feature = "test-utils"))]
pub use fake::FakeClient;
pub use kube_client::KubeClient;

use std::collections::BTreeMap;
use std::fmt::Debug;
use std::future::Future;

use k8s_openapi::NamespaceResourceScope;
use k8s_openapi::api::core::v1::Pod;
use kube::{Resource, ResourceExt};
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::controller::error::Result;

/// Namespaced, statically typed object the client can store and fetch.
pub trait ManagedObject:
    Resource<DynamicType = (), Scope = NamespaceResourceScope>
    + Clone
    + Debug
    + Serialize
    + DeserializeOwned
    + Send
    + Sync
    + 'static
{
}

impl<K> ManagedObject for K where
    K: Resource<DynamicType = (), Scope = NamespaceResourceScope>
        + Clone
        + Debug
        + Serialize
        + DeserializeOwned
        + Send
        + Sync
        + 'static
{
}

/// Generic get/create/update/delete primitives plus the two list queries the core needs.
pub trait ResourceClient: Clone + Send + Sync + 'static {
    /// Fetch an object by namespaced name. `Ok(None)` when it does not exist.
    fn get<K: ManagedObject>(
        &self,
        namespace: &str,
        name: &str,
    ) -> impl Future<Output = Result<Option<K>>> + Send;

    /// Create an object. Fails with `Conflict` if it already exists.
    fn create<K: ManagedObject>(
        &self,
        namespace: &str,
        obj: &K,
    ) -> impl Future<Output = Result<K>> + Send;

    /// Replace an object, guarded by the resource version it carries.
    fn replace<K: ManagedObject>(
        &self,
        namespace: &str,
        obj: &K,
    ) -> impl Future<Output = Result<K>> + Send;

    /// Request deletion. Fails with `NotFound` if the object does not exist.
    fn delete<K: ManagedObject>(
        &self,
        namespace: &str,
        name: &str,
    ) -> impl Future<Output = Result<()>> + Send;

    /// Pods whose labels contain every entry of `selector`.
    fn list_pods(
        &self,
        namespace: &str,
        selector: &BTreeMap<String, String>,
    ) -> impl Future<Output = Result<Vec<PodObservation>>> + Send;

    /// Addresses currently published by a service's endpoints, sorted and deduplicated.
    fn list_endpoints(
        &self,
        namespace: &str,
        service_name: &str,
    ) -> impl Future<Output = Result<Vec<String>>> + Send;
}

/// Lifecycle phase reported by the platform for a pod.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum PodPhase {
    Pending,
    Running,
    Succeeded,
    Failed,
    Unknown,
}

impl PodPhase {
    fn parse(phase: Option<&str>) -> Self {
        match phase {
            Some("Pending") => PodPhase::Pending,
            Some("Running") => PodPhase::Running,
            Some("Succeeded") => PodPhase::Succeeded,
            Some("Failed") => PodPhase::Failed,
            _ => PodPhase::Unknown,
        }
    }
}

/// Read-only snapshot of one pod, as seen by the status aggregator.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct PodObservation {
    pub name: String,
    pub phase: PodPhase,
    /// The pod's `Ready` condition is `True`.
    pub ready: bool,
}

impl PodObservation {
    pub fn new(name: impl Into<String>, phase: PodPhase, ready: bool) -> Self {
        Self {
            name: name.into(),
            phase,
            ready,
        }
    }

    pub fn from_pod(pod: &Pod) -> Self {
        let status = pod.status.as_ref();
        let ready = status
            .and_then(|s| s.conditions.as_ref())
            .is_some_and(|conditions| {
                conditions
                    .iter()
                    .any(|c| c.type_ == "Ready" && c.status == "True")
            });
        Self {
            name: pod.name_any(),
            phase: PodPhase::parse(status.and_then(|s| s.phase.as_deref())),
            ready,
        }
    }
}

/// Render a label map as a Kubernetes label selector string.
pub fn label_selector(selector: &BTreeMap<String, String>) -> String {
    selector
        .iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect::<Vec<_>>()
        .join(",")
}
