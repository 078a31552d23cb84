//! Per-role sub-controller.
//!
//! A [`RoleController`] composes the dependency resolver, the desired-state
//! resolver, the resource reconciler, the status aggregator and the finalizer
//! manager into the four operations the cluster reconciler drives each tick.
//! Every role runs the same engine; the role only changes names, ports and
//! the dependency it resolves.

use k8s_openapi::api::apps::v1::StatefulSet;
use k8s_openapi::api::core::v1::Service;
use kube::ResourceExt;
use tracing::{debug, info, warn};

use crate::client::{ManagedObject, ResourceClient};
use crate::controller::apply::{EnsureOutcome, delete_resource, ensure_resource};
use crate::controller::dependency::resolve_dependency;
use crate::controller::error::{Error, Result};
use crate::controller::finalizer::{clear_finalizers, tracked_names};
use crate::controller::status::{aggregate_pods, apply_partition};
use crate::crd::{ComponentPhase, Role, StarRocksCluster};
use crate::resources::common::{
    RoleContext, external_service_name, search_service_name, selector_labels, workload_name,
};
use crate::resources::services::{generate_external_service, generate_search_service};
use crate::resources::statefulset::generate_statefulset;

fn namespace_of(cluster: &StarRocksCluster) -> String {
    cluster.namespace().unwrap_or_else(|| "default".to_string())
}

/// Reconciliation engine for one role.
#[derive(Clone)]
pub struct RoleController<C> {
    client: C,
    role: Role,
}

impl<C: ResourceClient> RoleController<C> {
    pub fn new(client: C, role: Role) -> Self {
        Self { client, role }
    }

    pub fn role(&self) -> Role {
        self.role
    }

    /// Drive the role's StatefulSet and services toward the declared spec.
    ///
    /// Resource names are recorded in the role's status block before they are
    /// ensured, so a pass that aborts midway still leaves them tracked for
    /// teardown. Services are applied before the StatefulSet.
    pub async fn sync(&self, cluster: &mut StarRocksCluster) -> Result<()> {
        let namespace = namespace_of(cluster);
        let cluster_name = cluster.name_any();
        let role = self.role;

        let addresses = resolve_dependency(&self.client, &namespace, &cluster_name, role).await?;
        let (search, external, sts) = {
            let ctx = RoleContext::new(cluster, role, addresses)?;
            (
                generate_search_service(&ctx),
                generate_external_service(&ctx),
                generate_statefulset(&ctx),
            )
        };

        let status = cluster.component_status_mut(role);
        status.record_resource_name(&search_service_name(&cluster_name, role));
        status.record_resource_name(&external_service_name(&cluster_name, role));
        status.record_resource_name(&workload_name(&cluster_name, role));
        status.service_name = external_service_name(&cluster_name, role);

        let outcomes = [
            ensure_resource(&self.client, &namespace, &search).await?,
            ensure_resource(&self.client, &namespace, &external).await?,
            ensure_resource(&self.client, &namespace, &sts).await?,
        ];

        if outcomes.contains(&EnsureOutcome::Terminating) {
            warn!(name = %cluster_name, role = %role, "Role resources are still terminating");
            return Err(Error::Transient(format!(
                "{} resources of {} are terminating, waiting for removal",
                role, cluster_name
            )));
        }

        if outcomes.iter().any(|o| *o != EnsureOutcome::Unchanged) {
            info!(name = %cluster_name, namespace = %namespace, role = %role, ?outcomes, "Synced role");
        } else {
            debug!(name = %cluster_name, role = %role, "Role already in sync");
        }
        Ok(())
    }

    /// Recompute the role's phase and pod lists from the live pod set.
    ///
    /// Never fails: a pod listing error keeps the previous lists, reports
    /// `Reconciling` and records the error as the reason.
    pub async fn update_status(&self, cluster: &mut StarRocksCluster) {
        let role = self.role;
        let Some(replicas) = cluster.spec.component(role).map(|s| s.replicas) else {
            return;
        };
        let namespace = namespace_of(cluster);
        let cluster_name = cluster.name_any();
        let selector = selector_labels(&cluster_name, role);

        match self.client.list_pods(&namespace, &selector).await {
            Ok(pods) => {
                let partition = aggregate_pods(&workload_name(&cluster_name, role), replicas, &pods);
                let status = cluster.component_status_mut(role);
                apply_partition(status, replicas, partition);
                debug!(name = %cluster_name, role = %role, phase = %status.phase, "Updated role status");
            }
            Err(e) => {
                warn!(name = %cluster_name, role = %role, error = %e, "Failed to list pods");
                let status = cluster.component_status_mut(role);
                status.phase = ComponentPhase::Reconciling;
                status.reason = Some(format!("failed to list pods: {}", e));
            }
        }
    }

    /// Strip the role's finalizer from every tracked resource.
    ///
    /// Returns `true` while a tracked resource still holds the token.
    pub async fn clear_finalizers(&self, cluster: &StarRocksCluster) -> Result<bool> {
        clear_finalizers(&self.client, cluster, self.role).await
    }

    /// Tear the role down: clear finalizers, request deletion of every
    /// tracked resource, then check nothing tracked is left.
    ///
    /// Returns `true` once every tracked resource is gone, or is terminating
    /// without this role's token and is up to the garbage collector.
    pub async fn clear_resources(&self, cluster: &StarRocksCluster) -> Result<bool> {
        let namespace = namespace_of(cluster);
        let role = self.role;
        let still_referenced = self.clear_finalizers(cluster).await?;

        let names = tracked_names(cluster, role);
        for name in &names {
            delete_resource::<C, Service>(&self.client, &namespace, name).await?;
            delete_resource::<C, StatefulSet>(&self.client, &namespace, name).await?;
        }

        let mut cleared = !still_referenced;
        for name in &names {
            cleared &= self.is_released::<Service>(&namespace, name).await?;
            cleared &= self.is_released::<StatefulSet>(&namespace, name).await?;
        }

        info!(name = %cluster.name_any(), role = %role, cleared, "Cleared role resources");
        Ok(cleared)
    }

    async fn is_released<K: ManagedObject>(&self, namespace: &str, name: &str) -> Result<bool> {
        let token = self.role.finalizer();
        Ok(match self.client.get::<K>(namespace, name).await? {
            None => true,
            Some(obj) => {
                obj.meta().deletion_timestamp.is_some()
                    && !obj.finalizers().iter().any(|f| f == token)
            }
        })
    }
}

/// One [`RoleController`] per role, sharing a client.
#[derive(Clone)]
pub struct RoleControllers<C> {
    fe: RoleController<C>,
    be: RoleController<C>,
    cn: RoleController<C>,
}

impl<C: ResourceClient> RoleControllers<C> {
    pub fn new(client: C) -> Self {
        Self {
            fe: RoleController::new(client.clone(), Role::Fe),
            be: RoleController::new(client.clone(), Role::Be),
            cn: RoleController::new(client, Role::Cn),
        }
    }

    pub fn get(&self, role: Role) -> &RoleController<C> {
        match role {
            Role::Fe => &self.fe,
            Role::Be => &self.be,
            Role::Cn => &self.cn,
        }
    }
}
