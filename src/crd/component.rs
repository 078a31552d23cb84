//! Per-role desired state and status types shared by every StarRocks role.

use std::collections::BTreeMap;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// One functional tier of a StarRocks cluster.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Ord, PartialOrd, Deserialize, Serialize, JsonSchema)]
pub enum Role {
    /// Frontend: metadata, planning and the MySQL-protocol entry point.
    Fe,
    /// Backend: storage and execution.
    Be,
    /// Compute node: stateless execution.
    Cn,
}

impl Role {
    /// Every role in reconcile order. Teardown walks this in reverse.
    pub const ALL: [Role; 3] = [Role::Fe, Role::Be, Role::Cn];

    /// Short tag used in resource names and labels.
    pub fn tag(&self) -> &'static str {
        match self {
            Role::Fe => "fe",
            Role::Be => "be",
            Role::Cn => "cn",
        }
    }

    /// Role whose live members must be known before this role can start.
    pub fn dependency(&self) -> Option<Role> {
        match self {
            Role::Fe => None,
            Role::Be | Role::Cn => Some(Role::Fe),
        }
    }

    /// Finalizer token attached to every resource this role creates.
    pub fn finalizer(&self) -> &'static str {
        match self {
            Role::Fe => "starrocks.com/fe-protection",
            Role::Be => "starrocks.com/be-protection",
            Role::Cn => "starrocks.com/cn-protection",
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.tag())
    }
}

/// Declared state of one role.
#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ComponentSpec {
    /// Number of pods (default 1).
    #[serde(default = "default_replicas")]
    pub replicas: i32,

    /// Container image, e.g. `starrocks/fe-ubuntu:3.3-latest`. Required.
    #[serde(default)]
    pub image: String,

    /// Image pull policy (default: IfNotPresent).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_pull_policy: Option<String>,

    /// Image pull secrets.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub image_pull_secrets: Vec<String>,

    /// Service account the pods run as.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_account: Option<String>,

    /// Resource requests and limits.
    #[serde(default)]
    pub resources: ResourceRequirementsSpec,

    /// Extra labels applied to pods. Operator selector labels take precedence.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub pod_labels: BTreeMap<String, String>,

    /// Extra annotations applied to pods.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, String>,

    /// Node selector for pod scheduling.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub node_selector: BTreeMap<String, String>,

    /// Name of a ConfigMap mounted as the role's configuration directory.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config_map_name: Option<String>,

    /// External service settings.
    #[serde(default)]
    pub service: ServiceSpec,
}

fn default_replicas() -> i32 {
    1
}

/// Resource requests and limits, as quantity strings keyed by resource name.
#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ResourceRequirementsSpec {
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub requests: BTreeMap<String, String>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub limits: BTreeMap<String, String>,
}

/// Settings of the externally reachable service.
#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ServiceSpec {
    /// Service type (default: ClusterIP).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub r#type: Option<String>,

    /// Annotations applied to the external service.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, String>,
}

/// Health phase of one role, recomputed from the pod population every pass.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Hash, Deserialize, Serialize, JsonSchema)]
pub enum ComponentPhase {
    #[default]
    Reconciling,
    Running,
    Failed,
}

impl std::fmt::Display for ComponentPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ComponentPhase::Reconciling => write!(f, "Reconciling"),
            ComponentPhase::Running => write!(f, "Running"),
            ComponentPhase::Failed => write!(f, "Failed"),
        }
    }
}

/// Observed state of one role.
#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ComponentStatus {
    #[serde(default)]
    pub phase: ComponentPhase,

    /// Names of every resource this role has created or ensured, in first-seen order.
    #[serde(default)]
    pub resource_names: Vec<String>,

    /// Name of the externally reachable service.
    #[serde(default)]
    pub service_name: String,

    /// Pods that are pending or running but not ready.
    #[serde(default)]
    pub creating_instances: Vec<String>,

    /// Pods that are ready.
    #[serde(default)]
    pub running_instances: Vec<String>,

    /// Pods that have failed.
    #[serde(default)]
    pub failed_instances: Vec<String>,

    /// Last aggregation or sync problem, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl ComponentStatus {
    /// Record a resource name, keeping the list free of duplicates.
    pub fn record_resource_name(&mut self, name: &str) {
        if !self.resource_names.iter().any(|n| n == name) {
            self.resource_names.push(name.to_string());
        }
    }
}
