//! StarRocksCluster Custom Resource Definition.
//!
//! A StarRocksCluster declares up to one [`ComponentSpec`] per [`Role`]. A role
//! is enabled by the presence of its spec; the per-role status blocks are owned
//! exclusively by the operator.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::component::{ComponentSpec, ComponentStatus, Role};

/// StarRocksCluster is a custom resource for deploying StarRocks clusters.
///
/// Example:
/// ```yaml
/// apiVersion: starrocks.com/v1
/// kind: StarRocksCluster
/// metadata:
///   name: analytics
/// spec:
///   starRocksFeSpec:
///     replicas: 3
///     image: starrocks/fe-ubuntu:3.3-latest
///   starRocksBeSpec:
///     replicas: 3
///     image: starrocks/be-ubuntu:3.3-latest
///     resources:
///       requests:
///         cpu: "4"
///         memory: 4Gi
/// ```
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema)]
#[kube(
    group = "starrocks.com",
    version = "v1",
    kind = "StarRocksCluster",
    plural = "starrocksclusters",
    shortname = "src",
    status = "StarRocksClusterStatus",
    namespaced,
    printcolumn = r#"{"name":"Phase", "type":"string", "jsonPath":".status.phase"}"#,
    printcolumn = r#"{"name":"FE", "type":"string", "jsonPath":".status.starRocksFeStatus.phase"}"#,
    printcolumn = r#"{"name":"BE", "type":"string", "jsonPath":".status.starRocksBeStatus.phase"}"#,
    printcolumn = r#"{"name":"CN", "type":"string", "jsonPath":".status.starRocksCnStatus.phase"}"#,
    printcolumn = r#"{"name":"Age", "type":"date", "jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct StarRocksClusterSpec {
    /// Frontend (metadata) nodes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub star_rocks_fe_spec: Option<ComponentSpec>,

    /// Backend (storage and compute) nodes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub star_rocks_be_spec: Option<ComponentSpec>,

    /// Stateless compute nodes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub star_rocks_cn_spec: Option<ComponentSpec>,
}

impl StarRocksClusterSpec {
    /// Spec of a role, `None` when the role is disabled.
    pub fn component(&self, role: Role) -> Option<&ComponentSpec> {
        match role {
            Role::Fe => self.star_rocks_fe_spec.as_ref(),
            Role::Be => self.star_rocks_be_spec.as_ref(),
            Role::Cn => self.star_rocks_cn_spec.as_ref(),
        }
    }
}

/// Status of a StarRocksCluster.
#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct StarRocksClusterStatus {
    /// Aggregated phase over every enabled role.
    #[serde(default)]
    pub phase: ClusterPhase,

    /// The generation most recently observed by the controller.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,

    /// Conditions describing the current state.
    #[serde(default)]
    pub conditions: Vec<Condition>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub star_rocks_fe_status: Option<ComponentStatus>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub star_rocks_be_status: Option<ComponentStatus>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub star_rocks_cn_status: Option<ComponentStatus>,
}

impl StarRocksClusterStatus {
    /// Status block of a role.
    pub fn component(&self, role: Role) -> Option<&ComponentStatus> {
        match role {
            Role::Fe => self.star_rocks_fe_status.as_ref(),
            Role::Be => self.star_rocks_be_status.as_ref(),
            Role::Cn => self.star_rocks_cn_status.as_ref(),
        }
    }

    /// Mutable slot holding the status block of a role.
    pub fn component_slot(&mut self, role: Role) -> &mut Option<ComponentStatus> {
        match role {
            Role::Fe => &mut self.star_rocks_fe_status,
            Role::Be => &mut self.star_rocks_be_status,
            Role::Cn => &mut self.star_rocks_cn_status,
        }
    }
}

impl StarRocksCluster {
    /// Status block of a role, if the operator has written one.
    pub fn component_status(&self, role: Role) -> Option<&ComponentStatus> {
        self.status.as_ref().and_then(|s| s.component(role))
    }

    /// Status block of a role, created empty on first access.
    pub fn component_status_mut(&mut self, role: Role) -> &mut ComponentStatus {
        self.status
            .get_or_insert_with(StarRocksClusterStatus::default)
            .component_slot(role)
            .get_or_insert_with(ComponentStatus::default)
    }

    /// Whether the cluster carries a deletion marker.
    pub fn is_deleting(&self) -> bool {
        self.metadata.deletion_timestamp.is_some()
    }
}

/// ClusterPhase is the aggregated phase of a StarRocksCluster.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Hash, Deserialize, Serialize, JsonSchema)]
pub enum ClusterPhase {
    /// At least one role is rolling out or not yet observed.
    #[default]
    Reconciling,
    /// Every enabled role is running.
    Running,
    /// At least one role has failed.
    Failed,
    /// The cluster carries a deletion marker and is being torn down.
    Deleting,
}

impl std::fmt::Display for ClusterPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ClusterPhase::Reconciling => write!(f, "Reconciling"),
            ClusterPhase::Running => write!(f, "Running"),
            ClusterPhase::Failed => write!(f, "Failed"),
            ClusterPhase::Deleting => write!(f, "Deleting"),
        }
    }
}

/// Condition describes the state of a cluster at a certain point.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    /// Type of condition.
    pub r#type: String,
    /// Status of the condition ("True", "False", "Unknown").
    pub status: String,
    /// Machine-readable reason for the condition's last transition.
    pub reason: String,
    /// Human-readable message indicating details about last transition.
    pub message: String,
    /// Last time the condition transitioned from one status to another.
    pub last_transition_time: String,
    /// The generation of the resource this condition was observed for.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,
}

impl Condition {
    /// Create a new condition.
    pub fn new(
        condition_type: &str,
        status: bool,
        reason: &str,
        message: &str,
        generation: Option<i64>,
    ) -> Self {
        Self {
            r#type: condition_type.to_string(),
            status: if status {
                "True".to_string()
            } else {
                "False".to_string()
            },
            reason: reason.to_string(),
            message: message.to_string(),
            last_transition_time: jiff::Timestamp::now().to_string(),
            observed_generation: generation,
        }
    }

    /// Create a "Ready" condition.
    pub fn ready(ready: bool, reason: &str, message: &str, generation: Option<i64>) -> Self {
        Self::new("Ready", ready, reason, message, generation)
    }

    /// Create a "Progressing" condition.
    pub fn progressing(
        progressing: bool,
        reason: &str,
        message: &str,
        generation: Option<i64>,
    ) -> Self {
        Self::new("Progressing", progressing, reason, message, generation)
    }

    /// Create a "Degraded" condition.
    pub fn degraded(degraded: bool, reason: &str, message: &str, generation: Option<i64>) -> Self {
        Self::new("Degraded", degraded, reason, message, generation)
    }
}
