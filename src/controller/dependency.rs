//! Live-member discovery for roles that depend on another role.

use tracing::debug;

use crate::client::ResourceClient;
use crate::controller::error::Result;
use crate::crd::Role;
use crate::resources::common::search_service_name;

/// Addresses currently published by the dependency's discovery service.
///
/// Roles without a dependency resolve to nothing. An empty list, or a
/// discovery service that does not exist yet, is a valid answer meaning
/// "no peers yet"; the dependent role re-resolves on every tick.
pub async fn resolve_dependency<C: ResourceClient>(
    client: &C,
    namespace: &str,
    cluster_name: &str,
    role: Role,
) -> Result<Vec<String>> {
    let Some(dependency) = role.dependency() else {
        return Ok(Vec::new());
    };
    let service = search_service_name(cluster_name, dependency);

    let mut addresses = match client.list_endpoints(namespace, &service).await {
        Ok(addresses) => addresses,
        Err(e) if e.is_not_found() => Vec::new(),
        Err(e) => return Err(e),
    };
    addresses.sort();
    addresses.dedup();

    debug!(
        role = %role,
        dependency = %dependency,
        service = %service,
        count = addresses.len(),
        "Resolved dependency addresses"
    );
    Ok(addresses)
}
