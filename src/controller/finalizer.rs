//! Finalizer lifecycle for role-owned resources.
//!
//! Every resource a role creates carries the role's finalizer token from
//! creation. Teardown strips the token from every tracked resource so the
//! platform's garbage collector can finish deleting them.

use std::collections::BTreeSet;

use k8s_openapi::api::apps::v1::StatefulSet;
use k8s_openapi::api::core::v1::Service;
use kube::ResourceExt;
use tracing::{debug, info, warn};

use crate::client::{ManagedObject, ResourceClient};
use crate::controller::apply::MAX_CONFLICT_RETRIES;
use crate::controller::error::Result;
use crate::crd::{Role, StarRocksCluster};
use crate::resources::common::{external_service_name, search_service_name, workload_name};

/// Result of stripping a token from one resource.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Removal {
    /// The resource does not exist.
    Absent,
    /// The resource exists and no longer carries the token.
    Cleared,
    /// The token is still present because every attempt hit a conflict.
    StillHeld,
}

/// Remove `token` from one resource's finalizers.
///
/// Removing a token that is already absent is a no-op. Conflicts are retried
/// with a fresh fetch; if they persist the resource is reported as
/// [`Removal::StillHeld`] for the next tick rather than failing this one.
pub async fn remove_finalizer<C, K>(
    client: &C,
    namespace: &str,
    name: &str,
    token: &str,
) -> Result<Removal>
where
    C: ResourceClient,
    K: ManagedObject,
{
    for _ in 0..=MAX_CONFLICT_RETRIES {
        let Some(mut live) = client.get::<K>(namespace, name).await? else {
            return Ok(Removal::Absent);
        };

        let finalizers = live.finalizers_mut();
        let Some(pos) = finalizers.iter().position(|f| f == token) else {
            return Ok(Removal::Cleared);
        };
        finalizers.remove(pos);

        match client.replace(namespace, &live).await {
            Ok(_) => {
                info!(resource = %K::kind(&()), name = %name, finalizer = %token, "Removed finalizer");
                return Ok(Removal::Cleared);
            }
            // Garbage collected between the fetch and the update
            Err(e) if e.is_not_found() => return Ok(Removal::Absent),
            Err(e) if e.is_conflict() => {
                debug!(resource = %K::kind(&()), name = %name, "Conflict removing finalizer, refetching");
            }
            Err(e) => return Err(e),
        }
    }

    warn!(resource = %K::kind(&()), name = %name, "Finalizer still held after conflict retries");
    Ok(Removal::StillHeld)
}

/// Every resource name teardown must visit for a role.
///
/// The recorded `resourceNames` and `serviceName` plus the names the role
/// would derive today, so a crash before the first status write leaks nothing.
pub fn tracked_names(cluster: &StarRocksCluster, role: Role) -> BTreeSet<String> {
    let cluster_name = cluster.name_any();
    let mut names = BTreeSet::from([
        workload_name(&cluster_name, role),
        external_service_name(&cluster_name, role),
        search_service_name(&cluster_name, role),
    ]);

    if let Some(status) = cluster.component_status(role) {
        names.extend(status.resource_names.iter().cloned());
        if !status.service_name.is_empty() {
            names.insert(status.service_name.clone());
        }
    }
    names
}

/// Strip the role's token from every tracked StatefulSet and Service.
///
/// Returns `true` while at least one tracked resource still holds the token.
pub async fn clear_finalizers<C: ResourceClient>(
    client: &C,
    cluster: &StarRocksCluster,
    role: Role,
) -> Result<bool> {
    let namespace = cluster.namespace().unwrap_or_else(|| "default".to_string());
    let token = role.finalizer();
    let mut still_referenced = false;

    for name in tracked_names(cluster, role) {
        let sts = remove_finalizer::<C, StatefulSet>(client, &namespace, &name, token).await?;
        let svc = remove_finalizer::<C, Service>(client, &namespace, &name, token).await?;
        still_referenced |= sts == Removal::StillHeld || svc == Removal::StillHeld;
    }

    debug!(
        name = %cluster.name_any(),
        role = %role,
        still_referenced,
        "Cleared role finalizers"
    );
    Ok(still_referenced)
}
