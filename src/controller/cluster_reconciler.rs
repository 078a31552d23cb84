//! Reconciliation loop for StarRocksCluster.
//!
//! [`reconcile_cluster`] is one tick over every role, generic over the
//! platform client. [`reconcile`] and [`error_policy`] wrap it for the
//! kube-runtime controller: cluster finalizer, deadline, status patch,
//! events and metrics.

use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::{Duration, Instant};

use kube::{
    Api, ResourceExt,
    api::{Patch, PatchParams},
    runtime::controller::Action,
};
use tracing::{debug, error, info, warn};

use crate::client::ResourceClient;
use crate::controller::context::{Context, FIELD_MANAGER};
use crate::controller::error::{Error, Result};
use crate::controller::status::{aggregate_cluster_phase, cluster_conditions};
use crate::controller::sub_controller::RoleControllers;
use crate::crd::{CLUSTER_FINALIZER, ClusterPhase, Role, StarRocksCluster, StarRocksClusterStatus};

/// Requeue interval once every role is running
const STEADY_REQUEUE: Duration = Duration::from_secs(60);
/// Requeue interval while roles are rolling out or being torn down
const PROGRESS_REQUEUE: Duration = Duration::from_secs(10);

/// What one tick achieved.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TickOutcome {
    /// Declared roles were synced and their status refreshed.
    Synced(ClusterPhase),
    /// The cluster is being deleted. `cleared` once every role is torn down.
    Teardown { cleared: bool },
}

/// Run one reconcile tick for a cluster, mutating its status in place.
///
/// Roles are synced in dependency order. A role whose spec was removed is
/// torn down and its status block dropped once cleared. When the cluster
/// carries a deletion marker roles are torn down in reverse order instead,
/// stopping at the first one that is not cleared yet.
///
/// The status block is complete even when an error is returned, so the
/// caller can persist it either way.
pub async fn reconcile_cluster<C: ResourceClient>(
    controllers: &RoleControllers<C>,
    cluster: &mut StarRocksCluster,
) -> Result<TickOutcome> {
    let name = cluster.name_any();
    let generation = cluster.metadata.generation;

    if cluster.is_deleting() {
        let cleared = teardown(controllers, cluster).await;
        let status = cluster.status.get_or_insert_with(StarRocksClusterStatus::default);
        status.phase = ClusterPhase::Deleting;
        let message = match &cleared {
            Ok(true) => "All roles torn down".to_string(),
            Ok(false) => "Waiting for role resources to be released".to_string(),
            Err(e) => format!("Teardown failed: {}", e),
        };
        status.conditions =
            cluster_conditions(&status.conditions, ClusterPhase::Deleting, &message, generation);
        return cleared.map(|cleared| TickOutcome::Teardown { cleared });
    }

    let mut first_error: Option<Error> = None;
    for role in Role::ALL {
        let controller = controllers.get(role);
        if cluster.spec.component(role).is_some() {
            let synced = controller.sync(cluster).await;
            controller.update_status(cluster).await;
            // Written after the pod aggregation, which resets the reason
            if let Err(e) = synced {
                warn!(name = %name, role = %role, error = %e, "Role sync failed");
                cluster.component_status_mut(role).reason = Some(e.to_string());
                first_error.get_or_insert(e);
            }
        } else if cluster.component_status(role).is_some() {
            info!(name = %name, role = %role, "Role removed from spec, tearing down");
            match controller.clear_resources(cluster).await {
                Ok(true) => {
                    if let Some(status) = cluster.status.as_mut() {
                        *status.component_slot(role) = None;
                    }
                }
                Ok(false) => debug!(name = %name, role = %role, "Removed role not cleared yet"),
                Err(e) => {
                    warn!(name = %name, role = %role, error = %e, "Removed role teardown failed");
                    first_error.get_or_insert(e);
                }
            }
        }
    }

    let declared: Vec<_> = Role::ALL
        .into_iter()
        .filter(|role| cluster.spec.component(*role).is_some())
        .filter_map(|role| cluster.component_status(role).map(|s| s.phase))
        .collect();
    let mut phase = aggregate_cluster_phase(declared);
    if first_error.as_ref().is_some_and(|e| !e.is_retryable()) {
        phase = ClusterPhase::Failed;
    }

    let message = match &first_error {
        Some(e) => e.to_string(),
        None => format!("Cluster is {}", phase),
    };
    let status = cluster.status.get_or_insert_with(StarRocksClusterStatus::default);
    status.phase = phase;
    status.observed_generation = generation;
    status.conditions = cluster_conditions(&status.conditions, phase, &message, generation);

    match first_error {
        Some(e) => Err(e),
        None => Ok(TickOutcome::Synced(phase)),
    }
}

async fn teardown<C: ResourceClient>(
    controllers: &RoleControllers<C>,
    cluster: &StarRocksCluster,
) -> Result<bool> {
    for role in Role::ALL.into_iter().rev() {
        if !controllers.get(role).clear_resources(cluster).await? {
            debug!(name = %cluster.name_any(), role = %role, "Role not cleared yet");
            return Ok(false);
        }
    }
    Ok(true)
}

/// Run one tick on a copy of `obj`, bounded by `deadline`.
///
/// Returns the mutated copy together with the tick's result. When the
/// deadline expires the copy is discarded and a transient error returned,
/// so a half-finished status is never persisted.
pub async fn reconcile_with_deadline<C: ResourceClient>(
    controllers: &RoleControllers<C>,
    obj: &StarRocksCluster,
    deadline: Duration,
) -> Result<(StarRocksCluster, Result<TickOutcome>)> {
    let mut cluster = obj.clone();
    match tokio::time::timeout(deadline, reconcile_cluster(controllers, &mut cluster)).await {
        Ok(result) => Ok((cluster, result)),
        Err(_) => {
            warn!(
                name = %obj.name_any(),
                deadline_secs = deadline.as_secs(),
                "Reconcile deadline exceeded"
            );
            Err(Error::Transient(format!(
                "reconcile exceeded deadline of {}s",
                deadline.as_secs()
            )))
        }
    }
}

/// Reconcile a StarRocksCluster
///
/// This is the main reconciliation function called by the controller.
pub async fn reconcile(obj: Arc<StarRocksCluster>, ctx: Arc<Context>) -> Result<Action> {
    let start_time = Instant::now();
    let name = obj.name_any();
    let namespace = obj.namespace().unwrap_or_else(|| "default".to_string());

    debug!(name = %name, namespace = %namespace, "Reconciling StarRocksCluster");

    let api: Api<StarRocksCluster> = Api::namespaced(ctx.client.clone(), &namespace);
    let has_finalizer = obj.finalizers().iter().any(|f| f == CLUSTER_FINALIZER);

    if obj.is_deleting() && !has_finalizer {
        return Ok(Action::await_change());
    }
    if !obj.is_deleting() && !has_finalizer {
        info!(name = %name, "Adding finalizer");
        patch_cluster_finalizers(&api, &obj, true).await?;
        return Ok(Action::requeue(Duration::from_secs(1)));
    }

    let (cluster, result) =
        reconcile_with_deadline(&ctx.controllers, &obj, ctx.reconcile_timeout).await?;

    // The finalizer patch below needs the resource version the status write produced
    let latest = if cluster.status != obj.status {
        patch_status(&api, &name, cluster.status.as_ref()).await?
    } else {
        (*obj).clone()
    };
    record_metrics(&ctx, &cluster, start_time);

    let old_phase = obj.status.as_ref().map(|s| s.phase);
    let new_phase = cluster.status.as_ref().map(|s| s.phase);
    if let Some(phase) = new_phase.filter(|p| Some(*p) != old_phase) {
        ctx.publish_normal_event(
            &obj,
            "PhaseChanged",
            "Reconciling",
            Some(format!("Cluster phase is now {}", phase)),
        )
        .await;
    }

    match result {
        Ok(TickOutcome::Teardown { cleared: true }) => {
            info!(name = %name, "All roles cleared, removing finalizer");
            patch_cluster_finalizers(&api, &latest, false).await?;
            if let Some(ref health_state) = ctx.health_state {
                health_state.metrics.forget_cluster(&namespace, &name);
            }
            Ok(Action::await_change())
        }
        Ok(TickOutcome::Teardown { cleared: false }) => Ok(Action::requeue(PROGRESS_REQUEUE)),
        Ok(TickOutcome::Synced(ClusterPhase::Running)) => Ok(Action::requeue(STEADY_REQUEUE)),
        Ok(TickOutcome::Synced(_)) => Ok(Action::requeue(PROGRESS_REQUEUE)),
        Err(e) => {
            if !e.is_retryable() {
                ctx.publish_warning_event(&obj, "ReconcileFailed", "Reconciling", Some(e.to_string()))
                    .await;
            }
            Err(e)
        }
    }
}

/// Error policy for the controller
pub fn error_policy(obj: Arc<StarRocksCluster>, error: &Error, ctx: Arc<Context>) -> Action {
    let name = obj.name_any();
    let namespace = obj.namespace().unwrap_or_else(|| "default".to_string());

    if let Some(ref health_state) = ctx.health_state {
        health_state.metrics.record_error(&namespace, &name);
    }

    if error.is_not_found() {
        debug!(name = %name, "Resource not found (likely deleted)");
        return Action::await_change();
    }

    if error.is_retryable() {
        warn!(name = %name, error = %error, "Retryable error, will retry");
    } else {
        error!(name = %name, error = %error, "Non-retryable error");
    }
    Action::requeue(error.requeue_after())
}

/// Add or drop the cluster finalizer, keeping every other token.
///
/// The patch carries the observed resource version, so a concurrent change
/// to the finalizer list surfaces as a conflict instead of being overwritten.
async fn patch_cluster_finalizers(
    api: &Api<StarRocksCluster>,
    obj: &StarRocksCluster,
    present: bool,
) -> Result<()> {
    let mut finalizers: Vec<String> = obj
        .finalizers()
        .iter()
        .filter(|f| f.as_str() != CLUSTER_FINALIZER)
        .cloned()
        .collect();
    if present {
        finalizers.push(CLUSTER_FINALIZER.to_string());
    }
    let patch = serde_json::json!({
        "metadata": {
            "finalizers": finalizers,
            "resourceVersion": obj.resource_version(),
        }
    });
    match api
        .patch(&obj.name_any(), &PatchParams::default(), &Patch::Merge(&patch))
        .await
    {
        Ok(_) => Ok(()),
        // Already gone after the last finalizer was dropped
        Err(kube::Error::Api(e)) if e.code == 404 && !present => Ok(()),
        Err(e) => Err(e.into()),
    }
}

async fn patch_status(
    api: &Api<StarRocksCluster>,
    name: &str,
    status: Option<&StarRocksClusterStatus>,
) -> Result<StarRocksCluster> {
    let mut status = serde_json::to_value(status)?;
    // A merge patch only removes a dropped role's block when it is sent as null
    if let Some(fields) = status.as_object_mut() {
        for key in ["starRocksFeStatus", "starRocksBeStatus", "starRocksCnStatus"] {
            fields.entry(key).or_insert(serde_json::Value::Null);
        }
    }
    let patch = serde_json::json!({ "status": status });
    Ok(api
        .patch_status(name, &PatchParams::apply(FIELD_MANAGER), &Patch::Merge(&patch))
        .await?)
}

fn record_metrics(ctx: &Context, cluster: &StarRocksCluster, start_time: Instant) {
    let Some(ref health_state) = ctx.health_state else {
        return;
    };
    let name = cluster.name_any();
    let namespace = cluster.namespace().unwrap_or_else(|| "default".to_string());
    let metrics = &health_state.metrics;

    metrics.record_reconcile(&namespace, &name, start_time.elapsed().as_secs_f64());
    if let Some(status) = cluster.status.as_ref() {
        metrics.set_cluster_phase(&namespace, &name, status.phase);
    }
    for role in Role::ALL {
        let (Some(spec), Some(status)) = (cluster.spec.component(role), cluster.component_status(role))
        else {
            continue;
        };
        let ready = i64::try_from(status.running_instances.len()).unwrap_or(i64::MAX);
        metrics.set_role_replicas(&namespace, &name, role.tag(), i64::from(spec.replicas), ready);
    }

    let now = jiff::Timestamp::now().as_second();
    health_state
        .last_reconcile
        .store(u64::try_from(now).unwrap_or_default(), Ordering::Relaxed);
}
