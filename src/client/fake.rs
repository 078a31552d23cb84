//! In-memory [`ResourceClient`] for tests.
//!
//! Objects are stored as JSON keyed by (kind, namespace, name) and behave like
//! the API server where the reconciliation core can observe the difference:
//!
//! - every write bumps a resource version, and `replace` with a stale one is a conflict
//! - `delete` on an object holding finalizers only sets `deletionTimestamp`
//! - a terminating object disappears once an update leaves it without finalizers
//!
//! Conflicts can be injected with [`FakeClient::fail_next_replaces`].

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use k8s_openapi::api::core::v1::Pod;
use kube::ResourceExt;
use serde_json::Value;

use super::{ManagedObject, PodObservation, ResourceClient};
use crate::controller::error::{Error, Result};

type ObjectKey = (String, String, String);

#[derive(Default)]
struct FakeState {
    objects: BTreeMap<ObjectKey, Value>,
    endpoints: BTreeMap<(String, String), Vec<String>>,
    next_resource_version: u64,
    pending_conflicts: usize,
    fail_lists: bool,
    latency: Option<Duration>,
    writes: usize,
}

impl FakeState {
    fn bump(&mut self) -> String {
        self.next_resource_version += 1;
        self.next_resource_version.to_string()
    }
}

/// Shared handle to an in-memory object store. Clones see the same objects.
#[derive(Clone, Default)]
pub struct FakeClient {
    state: Arc<Mutex<FakeState>>,
}

fn key<K: ManagedObject>(namespace: &str, name: &str) -> ObjectKey {
    (
        K::kind(&()).into_owned(),
        namespace.to_string(),
        name.to_string(),
    )
}

fn metadata_str<'a>(value: &'a Value, field: &str) -> Option<&'a str> {
    value.get("metadata").and_then(|m| m.get(field)).and_then(Value::as_str)
}

fn has_finalizers(value: &Value) -> bool {
    value
        .get("metadata")
        .and_then(|m| m.get("finalizers"))
        .and_then(Value::as_array)
        .is_some_and(|f| !f.is_empty())
}

fn set_metadata(value: &mut Value, field: &str, field_value: Value) {
    if let Some(meta) = value.get_mut("metadata").and_then(Value::as_object_mut) {
        meta.insert(field.to_string(), field_value);
    }
}

fn deletion_marker() -> Value {
    Value::String(
        jiff::Timestamp::now()
            .strftime("%Y-%m-%dT%H:%M:%SZ")
            .to_string(),
    )
}

impl FakeClient {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, FakeState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    async fn respond(&self) {
        let latency = self.lock().latency;
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
    }

    /// Seed an object as if it already existed on the platform.
    ///
    /// Pods seeded this way are what [`ResourceClient::list_pods`] returns.
    pub fn insert<K: ManagedObject>(&self, obj: &K) -> Result<()> {
        let namespace = obj.namespace().unwrap_or_else(|| "default".to_string());
        let mut value = serde_json::to_value(obj)?;
        let mut state = self.lock();
        let rv = state.bump();
        set_metadata(&mut value, "namespace", Value::String(namespace.clone()));
        set_metadata(&mut value, "resourceVersion", Value::String(rv));
        state
            .objects
            .insert(key::<K>(&namespace, &obj.name_any()), value);
        Ok(())
    }

    /// Builder form of [`FakeClient::insert`].
    pub fn with_object<K: ManagedObject>(self, obj: &K) -> Result<Self> {
        self.insert(obj)?;
        Ok(self)
    }

    /// Synchronously read back a stored object.
    pub fn object<K: ManagedObject>(&self, namespace: &str, name: &str) -> Option<K> {
        let state = self.lock();
        state
            .objects
            .get(&key::<K>(namespace, name))
            .and_then(|v| serde_json::from_value(v.clone()).ok())
    }

    /// Publish endpoint addresses for a service.
    pub fn set_endpoints(&self, namespace: &str, service_name: &str, addresses: &[&str]) {
        let mut addresses: Vec<String> = addresses.iter().map(|a| a.to_string()).collect();
        addresses.sort();
        addresses.dedup();
        self.lock()
            .endpoints
            .insert((namespace.to_string(), service_name.to_string()), addresses);
    }

    /// Make the next `count` calls to `replace` fail with a conflict.
    pub fn fail_next_replaces(&self, count: usize) {
        self.lock().pending_conflicts = count;
    }

    /// Make every list call fail with a transient error.
    pub fn fail_lists(&self, fail: bool) {
        self.lock().fail_lists = fail;
    }

    /// Delay every client call by `latency` before it touches the store.
    pub fn set_latency(&self, latency: Duration) {
        self.lock().latency = Some(latency);
    }

    /// Number of successful create, replace and delete calls so far.
    pub fn writes(&self) -> usize {
        self.lock().writes
    }
}

impl ResourceClient for FakeClient {
    async fn get<K: ManagedObject>(&self, namespace: &str, name: &str) -> Result<Option<K>> {
        self.respond().await;
        let state = self.lock();
        match state.objects.get(&key::<K>(namespace, name)) {
            Some(value) => Ok(Some(serde_json::from_value(value.clone())?)),
            None => Ok(None),
        }
    }

    async fn create<K: ManagedObject>(&self, namespace: &str, obj: &K) -> Result<K> {
        self.respond().await;
        let name = obj.name_any();
        let mut state = self.lock();
        let key = key::<K>(namespace, &name);
        if state.objects.contains_key(&key) {
            return Err(Error::Conflict(format!("{} {} already exists", key.0, name)));
        }

        let mut value = serde_json::to_value(obj)?;
        let rv = state.bump();
        set_metadata(&mut value, "namespace", Value::String(namespace.to_string()));
        set_metadata(&mut value, "resourceVersion", Value::String(rv));
        let created: K = serde_json::from_value(value.clone())?;
        state.objects.insert(key, value);
        state.writes += 1;
        Ok(created)
    }

    async fn replace<K: ManagedObject>(&self, namespace: &str, obj: &K) -> Result<K> {
        self.respond().await;
        let name = obj.name_any();
        let mut state = self.lock();
        let key = key::<K>(namespace, &name);

        if state.pending_conflicts > 0 {
            state.pending_conflicts -= 1;
            return Err(Error::Conflict(format!("{} {} was modified", key.0, name)));
        }

        let Some(stored) = state.objects.get(&key) else {
            return Err(Error::NotFound(format!("{} {}", key.0, name)));
        };
        let stored_rv = metadata_str(stored, "resourceVersion").map(str::to_string);
        if obj.resource_version().is_some() && obj.resource_version() != stored_rv {
            return Err(Error::Conflict(format!(
                "{} {}: resource version {:?} is stale",
                key.0,
                name,
                obj.resource_version()
            )));
        }
        let deletion = stored
            .get("metadata")
            .and_then(|m| m.get("deletionTimestamp"))
            .cloned();

        let mut value = serde_json::to_value(obj)?;
        let rv = state.bump();
        set_metadata(&mut value, "namespace", Value::String(namespace.to_string()));
        set_metadata(&mut value, "resourceVersion", Value::String(rv));
        if let Some(deletion) = deletion {
            set_metadata(&mut value, "deletionTimestamp", deletion);
        }
        let replaced: K = serde_json::from_value(value.clone())?;

        let terminating = metadata_str(&value, "deletionTimestamp").is_some();
        if terminating && !has_finalizers(&value) {
            state.objects.remove(&key);
        } else {
            state.objects.insert(key, value);
        }
        state.writes += 1;
        Ok(replaced)
    }

    async fn delete<K: ManagedObject>(&self, namespace: &str, name: &str) -> Result<()> {
        self.respond().await;
        let mut state = self.lock();
        let key = key::<K>(namespace, name);
        let Some(stored) = state.objects.get(&key) else {
            return Err(Error::NotFound(format!("{} {}", key.0, name)));
        };

        if has_finalizers(stored) {
            if metadata_str(stored, "deletionTimestamp").is_none() {
                let rv = state.bump();
                if let Some(stored) = state.objects.get_mut(&key) {
                    set_metadata(stored, "deletionTimestamp", deletion_marker());
                    set_metadata(stored, "resourceVersion", Value::String(rv));
                }
            }
        } else {
            state.objects.remove(&key);
        }
        state.writes += 1;
        Ok(())
    }

    async fn list_pods(
        &self,
        namespace: &str,
        selector: &BTreeMap<String, String>,
    ) -> Result<Vec<PodObservation>> {
        self.respond().await;
        let state = self.lock();
        if state.fail_lists {
            return Err(Error::Transient("injected list failure".to_string()));
        }

        let pod_kind = key::<Pod>(namespace, "").0;
        let mut pods = Vec::new();
        for ((kind, ns, _), value) in &state.objects {
            if *kind != pod_kind || ns != namespace {
                continue;
            }
            let pod: Pod = serde_json::from_value(value.clone())?;
            let labels = pod.labels();
            if selector.iter().all(|(k, v)| labels.get(k) == Some(v)) {
                pods.push(PodObservation::from_pod(&pod));
            }
        }
        Ok(pods)
    }

    async fn list_endpoints(&self, namespace: &str, service_name: &str) -> Result<Vec<String>> {
        self.respond().await;
        let state = self.lock();
        if state.fail_lists {
            return Err(Error::Transient("injected list failure".to_string()));
        }
        Ok(state
            .endpoints
            .get(&(namespace.to_string(), service_name.to_string()))
            .cloned()
            .unwrap_or_default())
    }
}
