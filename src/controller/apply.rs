//! Create-or-update engine for role-owned resources.
//!
//! [`ensure_resource`] is one algorithm for every kind. What differs per kind
//! lives in [`OwnedResource`]: which spec fields the operator owns, and which
//! platform-assigned fields must survive a replace.

use std::collections::BTreeMap;

use k8s_openapi::api::apps::v1::StatefulSet;
use k8s_openapi::api::core::v1::Service;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::ResourceExt;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::client::{ManagedObject, ResourceClient};
use crate::controller::error::{Error, Result};

/// Bound on re-fetch-and-retry after an update conflict.
pub const MAX_CONFLICT_RETRIES: usize = 3;

/// Per-kind capabilities the generic reconciler needs.
pub trait OwnedResource: ManagedObject {
    /// The operator-owned part of the object, for change detection.
    ///
    /// Compared as a subset: fields the desired object leaves unset may carry
    /// any server-defaulted value on the live one.
    fn mutable_fields(&self) -> Value;

    /// Operator-owned fields compared for strict equality, so that removing
    /// an entry is detected.
    fn exact_fields(&self) -> Value {
        Value::Null
    }

    /// Copy fields the platform assigned (or made immutable) from `live` into `self`.
    fn preserve_platform_fields(&mut self, live: &Self);
}

impl OwnedResource for StatefulSet {
    fn mutable_fields(&self) -> Value {
        let spec = self.spec.as_ref();
        serde_json::json!({
            "template": spec.map(|s| &s.template),
            "updateStrategy": spec.and_then(|s| s.update_strategy.as_ref()),
        })
    }

    fn exact_fields(&self) -> Value {
        let spec = self.spec.as_ref();
        let template = spec.map(|s| &s.template);
        let pod_meta = template.and_then(|t| t.metadata.as_ref());
        serde_json::json!({
            "replicas": spec.and_then(|s| s.replicas),
            "podLabels": pod_meta.and_then(|m| m.labels.as_ref()),
            "podAnnotations": pod_meta.and_then(|m| m.annotations.as_ref()),
            "nodeSelector": template
                .and_then(|t| t.spec.as_ref())
                .and_then(|s| s.node_selector.as_ref()),
        })
    }

    fn preserve_platform_fields(&mut self, live: &Self) {
        let (Some(desired), Some(live)) = (self.spec.as_mut(), live.spec.as_ref()) else {
            return;
        };
        desired.selector = live.selector.clone();
        desired.service_name = live.service_name.clone();
        desired.volume_claim_templates = live.volume_claim_templates.clone();
        desired.pod_management_policy = live.pod_management_policy.clone();
    }
}

impl OwnedResource for Service {
    fn mutable_fields(&self) -> Value {
        let spec = self.spec.as_ref();
        let ports: Option<Vec<Value>> = spec.and_then(|s| s.ports.as_ref()).map(|ports| {
            ports
                .iter()
                .map(|p| {
                    serde_json::json!({
                        "name": p.name,
                        "port": p.port,
                        "targetPort": p.target_port,
                        "protocol": p.protocol,
                    })
                })
                .collect()
        });
        serde_json::json!({
            "type": spec.and_then(|s| s.type_.as_ref()),
            "ports": ports,
            "publishNotReadyAddresses": spec.and_then(|s| s.publish_not_ready_addresses),
        })
    }

    fn exact_fields(&self) -> Value {
        serde_json::json!({
            "selector": self.spec.as_ref().and_then(|s| s.selector.as_ref()),
        })
    }

    fn preserve_platform_fields(&mut self, live: &Self) {
        let (Some(desired), Some(live)) = (self.spec.as_mut(), live.spec.as_ref()) else {
            return;
        };
        // Headless services keep their explicit "None"
        if live.cluster_ip.is_some() {
            desired.cluster_ip = live.cluster_ip.clone();
        }
        desired.cluster_ips = live.cluster_ips.clone();
        desired.ip_families = live.ip_families.clone();
        desired.ip_family_policy = live.ip_family_policy.clone();
        desired.health_check_node_port = live.health_check_node_port;

        if let (Some(ports), Some(live_ports)) = (desired.ports.as_mut(), live.ports.as_ref()) {
            for port in ports.iter_mut() {
                if let Some(assigned) = live_ports
                    .iter()
                    .find(|lp| lp.name == port.name)
                    .and_then(|lp| lp.node_port)
                {
                    port.node_port = Some(assigned);
                }
            }
        }
    }
}

/// What [`ensure_resource`] did.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EnsureOutcome {
    Created,
    Updated,
    Unchanged,
    /// The live object carries a deletion marker and was left alone.
    Terminating,
}

fn union_maps(
    live: Option<&BTreeMap<String, String>>,
    desired: Option<&BTreeMap<String, String>>,
) -> Option<BTreeMap<String, String>> {
    if live.is_none() && desired.is_none() {
        return None;
    }
    let mut merged = live.cloned().unwrap_or_default();
    merged.extend(desired.cloned().unwrap_or_default());
    Some(merged)
}

/// Merge live metadata into the desired object's metadata.
///
/// Labels and annotations union with desired winning, finalizers keep the
/// live order with ours appended, owner references come from desired and the
/// resource version from live.
fn merge_metadata(desired: &mut ObjectMeta, live: &ObjectMeta) {
    desired.labels = union_maps(live.labels.as_ref(), desired.labels.as_ref());
    desired.annotations = union_maps(live.annotations.as_ref(), desired.annotations.as_ref());

    let mut finalizers = live.finalizers.clone().unwrap_or_default();
    for f in desired.finalizers.iter().flatten() {
        if !finalizers.contains(f) {
            finalizers.push(f.clone());
        }
    }
    desired.finalizers = if finalizers.is_empty() {
        None
    } else {
        Some(finalizers)
    };

    desired.resource_version = live.resource_version.clone();
    desired.uid = live.uid.clone();
}

/// Values the API server omits when serializing, so a live object shows them as absent.
fn is_omitted_when_empty(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Bool(b) => !b,
        Value::Number(n) => n.as_i64() == Some(0),
        Value::String(s) => s.is_empty(),
        Value::Array(a) => a.is_empty(),
        Value::Object(o) => o.is_empty(),
    }
}

/// Whether every value set in `desired` is present and equal in `live`.
///
/// Nulls in `desired` match anything. Arrays must have the same length and
/// match element by element.
fn json_subset(desired: &Value, live: &Value) -> bool {
    match (desired, live) {
        (Value::Null, _) => true,
        (Value::Object(desired), Value::Object(live)) => {
            desired.iter().all(|(key, value)| match live.get(key) {
                Some(l) => json_subset(value, l),
                None => is_omitted_when_empty(value),
            })
        }
        (Value::Array(desired), Value::Array(live)) => {
            desired.len() == live.len() && desired.iter().zip(live).all(|(d, l)| json_subset(d, l))
        }
        (desired, live) => desired == live,
    }
}

fn fields_unchanged<K: OwnedResource>(merged: &K, live: &K) -> bool {
    json_subset(&merged.mutable_fields(), &live.mutable_fields())
        && merged.exact_fields() == live.exact_fields()
}

fn metadata_unchanged(merged: &ObjectMeta, live: &ObjectMeta) -> bool {
    merged.labels == live.labels
        && merged.annotations == live.annotations
        && merged.finalizers == live.finalizers
        && merged.owner_references == live.owner_references
}

/// Create the desired object or bring the live one in line with it.
///
/// Conflicts are retried with a fresh fetch up to [`MAX_CONFLICT_RETRIES`]
/// times; exhaustion is returned as a retryable [`Error::Conflict`].
pub async fn ensure_resource<C, K>(client: &C, namespace: &str, desired: &K) -> Result<EnsureOutcome>
where
    C: ResourceClient,
    K: OwnedResource,
{
    let name = desired.name_any();
    let kind = K::kind(&());
    let mut last_conflict = None;

    for attempt in 0..=MAX_CONFLICT_RETRIES {
        if attempt > 0 {
            debug!(resource = %kind, name = %name, attempt, "Retrying after conflict");
        }

        let Some(live) = client.get::<K>(namespace, &name).await? else {
            match client.create(namespace, desired).await {
                Ok(_) => {
                    info!(resource = %kind, name = %name, namespace = %namespace, "Created resource");
                    return Ok(EnsureOutcome::Created);
                }
                // Lost a create race, the next fetch finds the winner
                Err(e) if e.is_conflict() => {
                    last_conflict = Some(e);
                    continue;
                }
                Err(e) => return Err(e),
            }
        };

        if live.meta().deletion_timestamp.is_some() {
            debug!(resource = %kind, name = %name, "Live resource is terminating, skipping update");
            return Ok(EnsureOutcome::Terminating);
        }

        let mut merged = desired.clone();
        merged.preserve_platform_fields(&live);
        merge_metadata(merged.meta_mut(), live.meta());

        if fields_unchanged(&merged, &live) && metadata_unchanged(merged.meta(), live.meta())
        {
            debug!(resource = %kind, name = %name, "Resource up to date");
            return Ok(EnsureOutcome::Unchanged);
        }

        match client.replace(namespace, &merged).await {
            Ok(_) => {
                info!(resource = %kind, name = %name, namespace = %namespace, "Updated resource");
                return Ok(EnsureOutcome::Updated);
            }
            Err(e) if e.is_conflict() => {
                last_conflict = Some(e);
            }
            Err(e) => return Err(e),
        }
    }

    warn!(resource = %kind, name = %name, "Conflict retries exhausted");
    Err(Error::Conflict(format!(
        "{} {}: gave up after {} conflicts ({})",
        kind,
        name,
        MAX_CONFLICT_RETRIES + 1,
        last_conflict.map(|e| e.to_string()).unwrap_or_default()
    )))
}

/// Request deletion. A resource that is already gone counts as deleted.
pub async fn delete_resource<C, K>(client: &C, namespace: &str, name: &str) -> Result<()>
where
    C: ResourceClient,
    K: ManagedObject,
{
    match client.delete::<K>(namespace, name).await {
        Ok(()) => {
            info!(resource = %K::kind(&()), name = %name, namespace = %namespace, "Requested deletion");
            Ok(())
        }
        Err(e) if e.is_not_found() => Ok(()),
        Err(e) => Err(e),
    }
}
