//! Status aggregation and condition helpers.
//!
//! A role's phase is recomputed from scratch on every pass: it is a pure
//! function of the replica target and the latest pod snapshot.

use std::collections::BTreeSet;

use crate::client::{PodObservation, PodPhase};
use crate::crd::{ClusterPhase, ComponentPhase, ComponentStatus, Condition};

/// Pod names partitioned by health.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PodPartition {
    pub ready: Vec<String>,
    pub creating: Vec<String>,
    pub failed: Vec<String>,
}

/// Partition a pod snapshot.
///
/// Ordinals `0..replicas` of the workload set with no observed pod are listed
/// as creating, so a role with no pods yet reports one entry per expected member.
/// Succeeded and unknown pods are ignored.
pub fn aggregate_pods(workload_name: &str, replicas: i32, pods: &[PodObservation]) -> PodPartition {
    let mut partition = PodPartition::default();
    for pod in pods {
        if pod.ready {
            partition.ready.push(pod.name.clone());
            continue;
        }
        match pod.phase {
            PodPhase::Pending | PodPhase::Running => partition.creating.push(pod.name.clone()),
            PodPhase::Failed => partition.failed.push(pod.name.clone()),
            PodPhase::Succeeded | PodPhase::Unknown => {}
        }
    }

    let observed: BTreeSet<&str> = pods.iter().map(|p| p.name.as_str()).collect();
    for ordinal in 0..replicas.max(0) {
        let name = format!("{}-{}", workload_name, ordinal);
        if !observed.contains(name.as_str()) {
            partition.creating.push(name);
        }
    }

    partition.ready.sort();
    partition.creating.sort();
    partition.failed.sort();
    partition
}

/// Reduce a partition to a phase.
///
/// Failed takes precedence when nothing is ready. Running requires the exact
/// replica count ready with nothing pending or failed. Everything else,
/// including more ready pods than wanted during scale-down, is Reconciling.
pub fn compute_phase(replicas: i32, partition: &PodPartition) -> ComponentPhase {
    let ready = partition.ready.len();
    let target = usize::try_from(replicas.max(0)).unwrap_or_default();

    if !partition.failed.is_empty() && ready == 0 {
        return ComponentPhase::Failed;
    }
    if ready == target && partition.creating.is_empty() && partition.failed.is_empty() {
        return ComponentPhase::Running;
    }
    ComponentPhase::Reconciling
}

/// Write a complete phase-plus-lists tuple into a role's status block.
pub fn apply_partition(status: &mut ComponentStatus, replicas: i32, partition: PodPartition) {
    status.phase = compute_phase(replicas, &partition);
    status.running_instances = partition.ready;
    status.creating_instances = partition.creating;
    status.failed_instances = partition.failed;
    status.reason = None;
}

/// Cluster phase from the phases of every declared role.
pub fn aggregate_cluster_phase<I>(phases: I) -> ClusterPhase
where
    I: IntoIterator<Item = ComponentPhase>,
{
    let mut any = false;
    let mut all_running = true;
    for phase in phases {
        any = true;
        match phase {
            ComponentPhase::Failed => return ClusterPhase::Failed,
            ComponentPhase::Reconciling => all_running = false,
            ComponentPhase::Running => {}
        }
    }
    if any && all_running {
        ClusterPhase::Running
    } else {
        ClusterPhase::Reconciling
    }
}

/// Builder for managing conditions list
pub struct ConditionBuilder {
    conditions: Vec<Condition>,
}

impl ConditionBuilder {
    /// Start from existing conditions so unchanged ones keep their transition time.
    pub fn from_existing(conditions: &[Condition]) -> Self {
        Self {
            conditions: conditions.to_vec(),
        }
    }

    /// Add or update a condition
    pub fn set(&mut self, condition: Condition) -> &mut Self {
        if let Some(existing) = self
            .conditions
            .iter_mut()
            .find(|c| c.r#type == condition.r#type)
        {
            if existing.status == condition.status && existing.reason == condition.reason {
                existing.message = condition.message;
                existing.observed_generation = condition.observed_generation;
            } else {
                *existing = condition;
            }
        } else {
            self.conditions.push(condition);
        }
        self
    }

    pub fn ready(
        &mut self,
        ready: bool,
        reason: &str,
        message: &str,
        generation: Option<i64>,
    ) -> &mut Self {
        self.set(Condition::ready(ready, reason, message, generation))
    }

    pub fn progressing(
        &mut self,
        progressing: bool,
        reason: &str,
        message: &str,
        generation: Option<i64>,
    ) -> &mut Self {
        self.set(Condition::progressing(
            progressing,
            reason,
            message,
            generation,
        ))
    }

    pub fn degraded(
        &mut self,
        degraded: bool,
        reason: &str,
        message: &str,
        generation: Option<i64>,
    ) -> &mut Self {
        self.set(Condition::degraded(degraded, reason, message, generation))
    }

    /// Build the conditions list
    pub fn build(self) -> Vec<Condition> {
        self.conditions
    }
}

/// Conditions matching a cluster phase.
pub fn cluster_conditions(
    existing: &[Condition],
    phase: ClusterPhase,
    message: &str,
    generation: Option<i64>,
) -> Vec<Condition> {
    let mut builder = ConditionBuilder::from_existing(existing);
    let reason = phase.to_string();
    builder
        .ready(phase == ClusterPhase::Running, &reason, message, generation)
        .progressing(
            matches!(phase, ClusterPhase::Reconciling | ClusterPhase::Deleting),
            &reason,
            message,
            generation,
        )
        .degraded(phase == ClusterPhase::Failed, &reason, message, generation);
    builder.build()
}

/// Check if a condition type is true
pub fn is_condition_true(conditions: &[Condition], condition_type: &str) -> bool {
    conditions
        .iter()
        .find(|c| c.r#type == condition_type)
        .is_some_and(|c| c.status == "True")
}
