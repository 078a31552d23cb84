//! Service generation for StarRocks roles.
//!
//! Creates two services per role:
//! - **Search Service**: headless, for peer discovery and stable pod DNS
//! - **External Service**: for client and dependent-role connections

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::{Service, ServicePort, ServiceSpec};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;

use crate::resources::common::{
    LABEL_SERVICE_TYPE, RoleContext, external_service_name, owner_reference, role_ports,
    search_service_name, selector_labels, standard_labels,
};

fn service_ports(ctx: &RoleContext<'_>) -> Vec<ServicePort> {
    role_ports(ctx.role)
        .iter()
        .map(|p| ServicePort {
            name: Some(p.name.to_string()),
            port: p.port,
            target_port: Some(IntOrString::String(p.name.to_string())),
            protocol: Some("TCP".to_string()),
            ..Default::default()
        })
        .collect()
}

fn service_labels(ctx: &RoleContext<'_>, service_type: &str) -> BTreeMap<String, String> {
    let mut labels = standard_labels(&ctx.cluster_name(), ctx.role);
    labels.insert(LABEL_SERVICE_TYPE.to_string(), service_type.to_string());
    labels
}

/// Generate the headless discovery Service for a role.
///
/// `publishNotReadyAddresses` lets FE members find each other before any of
/// them is ready, which initial leader election depends on.
pub fn generate_search_service(ctx: &RoleContext<'_>) -> Service {
    let cluster_name = ctx.cluster_name();
    Service {
        metadata: ObjectMeta {
            name: Some(search_service_name(&cluster_name, ctx.role)),
            namespace: Some(ctx.namespace()),
            labels: Some(service_labels(ctx, "search")),
            owner_references: Some(vec![owner_reference(ctx.cluster)]),
            finalizers: Some(ctx.finalizers()),
            ..Default::default()
        },
        spec: Some(ServiceSpec {
            type_: Some("ClusterIP".to_string()),
            cluster_ip: Some("None".to_string()),
            publish_not_ready_addresses: Some(true),
            selector: Some(selector_labels(&cluster_name, ctx.role)),
            ports: Some(service_ports(ctx)),
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Generate the externally reachable Service for a role.
pub fn generate_external_service(ctx: &RoleContext<'_>) -> Service {
    let cluster_name = ctx.cluster_name();
    let service = &ctx.spec.service;
    Service {
        metadata: ObjectMeta {
            name: Some(external_service_name(&cluster_name, ctx.role)),
            namespace: Some(ctx.namespace()),
            labels: Some(service_labels(ctx, "external")),
            annotations: if service.annotations.is_empty() {
                None
            } else {
                Some(service.annotations.clone())
            },
            owner_references: Some(vec![owner_reference(ctx.cluster)]),
            finalizers: Some(ctx.finalizers()),
            ..Default::default()
        },
        spec: Some(ServiceSpec {
            type_: Some(
                service
                    .r#type
                    .clone()
                    .unwrap_or_else(|| "ClusterIP".to_string()),
            ),
            selector: Some(selector_labels(&cluster_name, ctx.role)),
            ports: Some(service_ports(ctx)),
            ..Default::default()
        }),
        ..Default::default()
    }
}
