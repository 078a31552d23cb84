//! Common resource generation utilities.
//!
//! Deterministic names, label sets and owner references shared by every
//! resource a role owns. Nothing here touches the API server.

use std::collections::BTreeMap;

use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use kube::ResourceExt;

use crate::controller::error::{Error, Result};
use crate::crd::{ComponentSpec, Role, StarRocksCluster};

pub const LABEL_NAME: &str = "app.kubernetes.io/name";
pub const LABEL_INSTANCE: &str = "app.kubernetes.io/instance";
pub const LABEL_COMPONENT: &str = "app.kubernetes.io/component";
pub const LABEL_MANAGED_BY: &str = "app.kubernetes.io/managed-by";
pub const LABEL_SERVICE_TYPE: &str = "app.kubernetes.io/service-type";

/// Port name and number exposed by a role's container and services.
pub struct NamedPort {
    pub name: &'static str,
    pub port: i32,
}

const FE_PORTS: &[NamedPort] = &[
    NamedPort { name: "http", port: 8030 },
    NamedPort { name: "rpc", port: 9020 },
    NamedPort { name: "query", port: 9030 },
    NamedPort { name: "edit-log", port: 9010 },
];

const BE_PORTS: &[NamedPort] = &[
    NamedPort { name: "be", port: 9060 },
    NamedPort { name: "webserver", port: 8040 },
    NamedPort { name: "heartbeat", port: 9050 },
    NamedPort { name: "brpc", port: 8060 },
];

const CN_PORTS: &[NamedPort] = &[
    NamedPort { name: "thrift", port: 9060 },
    NamedPort { name: "webserver", port: 8040 },
    NamedPort { name: "heartbeat", port: 9050 },
    NamedPort { name: "brpc", port: 8060 },
];

/// FE MySQL-protocol port, advertised to dependent roles.
pub const FE_QUERY_PORT: i32 = 9030;

pub fn role_ports(role: Role) -> &'static [NamedPort] {
    match role {
        Role::Fe => FE_PORTS,
        Role::Be => BE_PORTS,
        Role::Cn => CN_PORTS,
    }
}

/// Name of the role's workload set: `<cluster>-<tag>`.
pub fn workload_name(cluster_name: &str, role: Role) -> String {
    format!("{}-{}", cluster_name, role.tag())
}

/// Name of the role's externally reachable service: `<cluster>-<tag>`.
pub fn external_service_name(cluster_name: &str, role: Role) -> String {
    format!("{}-{}", cluster_name, role.tag())
}

/// Name of the role's discovery service: `<cluster>-<tag>-search`.
pub fn search_service_name(cluster_name: &str, role: Role) -> String {
    format!("{}-{}-search", cluster_name, role.tag())
}

/// Labels the workload set and both services use to select the role's pods.
///
/// Applied last wherever labels are merged, so users cannot override them.
pub fn selector_labels(cluster_name: &str, role: Role) -> BTreeMap<String, String> {
    let mut labels = BTreeMap::new();
    labels.insert(LABEL_NAME.to_string(), "starrocks".to_string());
    labels.insert(LABEL_INSTANCE.to_string(), cluster_name.to_string());
    labels.insert(LABEL_COMPONENT.to_string(), role.tag().to_string());
    labels
}

/// Labels on every object the operator manages for a role.
pub fn standard_labels(cluster_name: &str, role: Role) -> BTreeMap<String, String> {
    let mut labels = selector_labels(cluster_name, role);
    labels.insert(
        LABEL_MANAGED_BY.to_string(),
        "starrocks-operator".to_string(),
    );
    labels
}

/// Create owner reference for a StarRocksCluster
pub fn owner_reference(cluster: &StarRocksCluster) -> OwnerReference {
    OwnerReference {
        api_version: "starrocks.com/v1".to_string(),
        kind: "StarRocksCluster".to_string(),
        name: cluster.name_any(),
        uid: cluster.uid().unwrap_or_default(),
        controller: Some(true),
        block_owner_deletion: Some(true),
    }
}

/// Everything the desired-state resolver needs to render one role.
pub struct RoleContext<'a> {
    pub cluster: &'a StarRocksCluster,
    pub role: Role,
    pub spec: &'a ComponentSpec,
    /// Live addresses of the role's dependency, sorted.
    pub dependency_addresses: Vec<String>,
}

impl<'a> RoleContext<'a> {
    /// Validate the role's spec and bundle it with its cluster identity.
    pub fn new(
        cluster: &'a StarRocksCluster,
        role: Role,
        mut dependency_addresses: Vec<String>,
    ) -> Result<Self> {
        let spec = cluster.spec.component(role).ok_or_else(|| {
            Error::MissingField(format!("spec for role {} is not declared", role))
        })?;
        validate_component(role, spec)?;
        dependency_addresses.sort();
        dependency_addresses.dedup();
        Ok(Self {
            cluster,
            role,
            spec,
            dependency_addresses,
        })
    }

    pub fn cluster_name(&self) -> String {
        self.cluster.name_any()
    }

    pub fn namespace(&self) -> String {
        self.cluster
            .namespace()
            .unwrap_or_else(|| "default".to_string())
    }

    /// Finalizer list stamped onto every created resource.
    pub fn finalizers(&self) -> Vec<String> {
        vec![self.role.finalizer().to_string()]
    }
}

/// Reject specs the resolver cannot render.
pub fn validate_component(role: Role, spec: &ComponentSpec) -> Result<()> {
    if spec.image.trim().is_empty() {
        return Err(Error::MissingField(format!("{}.image", role)));
    }
    if spec.replicas < 0 {
        return Err(Error::Validation(format!(
            "{}.replicas cannot be negative (got {})",
            role, spec.replicas
        )));
    }
    for (key, value) in spec
        .resources
        .requests
        .iter()
        .chain(spec.resources.limits.iter())
    {
        if value.trim().is_empty() {
            return Err(Error::Validation(format!(
                "{}.resources: quantity for {} is empty",
                role, key
            )));
        }
    }
    Ok(())
}
