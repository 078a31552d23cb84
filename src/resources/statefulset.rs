//! StatefulSet generation for StarRocks roles.
//!
//! Every role runs as one StatefulSet:
//! - Stable network identity via the role's discovery (search) service
//! - Parallel pod management so a scaled-up tier starts all members at once
//! - Operator selector labels that user pod labels cannot override
//! - Dependency addresses rendered into the container environment

use std::collections::BTreeMap;

use k8s_openapi::api::apps::v1::{
    RollingUpdateStatefulSetStrategy, StatefulSet, StatefulSetSpec, StatefulSetUpdateStrategy,
};
use k8s_openapi::api::core::v1::{
    ConfigMapVolumeSource, Container, ContainerPort, EnvVar, EnvVarSource, HTTPGetAction,
    LocalObjectReference, ObjectFieldSelector, PodSpec, PodTemplateSpec, Probe,
    ResourceRequirements, Volume, VolumeMount,
};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;

use crate::crd::Role;
use crate::resources::common::{
    FE_QUERY_PORT, RoleContext, external_service_name, owner_reference, role_ports,
    search_service_name, selector_labels, standard_labels, workload_name,
};

/// Grace period that lets FE hand over leadership and BE drain tablets
const TERMINATION_GRACE_PERIOD: i64 = 120;

/// Generate the StatefulSet for a role.
pub fn generate_statefulset(ctx: &RoleContext<'_>) -> StatefulSet {
    let cluster_name = ctx.cluster_name();
    let labels = standard_labels(&cluster_name, ctx.role);

    StatefulSet {
        metadata: ObjectMeta {
            name: Some(workload_name(&cluster_name, ctx.role)),
            namespace: Some(ctx.namespace()),
            labels: Some(labels),
            owner_references: Some(vec![owner_reference(ctx.cluster)]),
            finalizers: Some(ctx.finalizers()),
            ..Default::default()
        },
        spec: Some(StatefulSetSpec {
            replicas: Some(ctx.spec.replicas),
            service_name: Some(search_service_name(&cluster_name, ctx.role)),
            selector: LabelSelector {
                match_labels: Some(selector_labels(&cluster_name, ctx.role)),
                ..Default::default()
            },
            pod_management_policy: Some("Parallel".to_string()),
            update_strategy: Some(StatefulSetUpdateStrategy {
                type_: Some("RollingUpdate".to_string()),
                rolling_update: Some(RollingUpdateStatefulSetStrategy {
                    partition: Some(0),
                    ..Default::default()
                }),
            }),
            template: generate_pod_template(ctx),
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Pod labels: user labels first, then the operator's, which win on collision.
pub fn pod_labels(ctx: &RoleContext<'_>) -> BTreeMap<String, String> {
    let mut labels = ctx.spec.pod_labels.clone();
    labels.extend(standard_labels(&ctx.cluster_name(), ctx.role));
    labels
}

fn generate_pod_template(ctx: &RoleContext<'_>) -> PodTemplateSpec {
    let image_pull_secrets = if ctx.spec.image_pull_secrets.is_empty() {
        None
    } else {
        Some(
            ctx.spec
                .image_pull_secrets
                .iter()
                .map(|name| LocalObjectReference { name: name.clone() })
                .collect(),
        )
    };

    PodTemplateSpec {
        metadata: Some(ObjectMeta {
            labels: Some(pod_labels(ctx)),
            annotations: if ctx.spec.annotations.is_empty() {
                None
            } else {
                Some(ctx.spec.annotations.clone())
            },
            ..Default::default()
        }),
        spec: Some(PodSpec {
            termination_grace_period_seconds: Some(TERMINATION_GRACE_PERIOD),
            service_account_name: ctx.spec.service_account.clone(),
            node_selector: if ctx.spec.node_selector.is_empty() {
                None
            } else {
                Some(ctx.spec.node_selector.clone())
            },
            image_pull_secrets,
            containers: vec![generate_container(ctx)],
            volumes: config_volume(ctx).map(|v| vec![v]),
            ..Default::default()
        }),
    }
}

fn generate_container(ctx: &RoleContext<'_>) -> Container {
    let role = ctx.role;
    Container {
        name: role.tag().to_string(),
        image: Some(ctx.spec.image.clone()),
        image_pull_policy: ctx.spec.image_pull_policy.clone(),
        command: Some(vec![entrypoint(role).to_string()]),
        args: Some(vec!["$(FE_SERVICE_NAME)".to_string()]),
        ports: Some(
            role_ports(role)
                .iter()
                .map(|p| ContainerPort {
                    container_port: p.port,
                    name: Some(p.name.to_string()),
                    protocol: Some("TCP".to_string()),
                    ..Default::default()
                })
                .collect(),
        ),
        env: Some(generate_env_vars(ctx)),
        resources: generate_resource_requirements(ctx),
        volume_mounts: config_volume(ctx).map(|_| {
            vec![VolumeMount {
                name: "config".to_string(),
                mount_path: config_dir(role).to_string(),
                read_only: Some(true),
                ..Default::default()
            }]
        }),
        startup_probe: Some(generate_probe(role, 60)),
        liveness_probe: Some(generate_probe(role, 3)),
        readiness_probe: Some(generate_probe(role, 3)),
        ..Default::default()
    }
}

fn entrypoint(role: Role) -> &'static str {
    match role {
        Role::Fe => "/opt/starrocks/fe_entrypoint.sh",
        Role::Be => "/opt/starrocks/be_entrypoint.sh",
        Role::Cn => "/opt/starrocks/cn_entrypoint.sh",
    }
}

fn config_dir(role: Role) -> &'static str {
    match role {
        Role::Fe => "/opt/starrocks/fe/conf",
        Role::Be => "/opt/starrocks/be/conf",
        Role::Cn => "/opt/starrocks/cn/conf",
    }
}

fn config_volume(ctx: &RoleContext<'_>) -> Option<Volume> {
    ctx.spec.config_map_name.as_ref().map(|name| Volume {
        name: "config".to_string(),
        config_map: Some(ConfigMapVolumeSource {
            name: name.clone(),
            ..Default::default()
        }),
        ..Default::default()
    })
}

fn field_ref_env(name: &str, field_path: &str) -> EnvVar {
    EnvVar {
        name: name.to_string(),
        value_from: Some(EnvVarSource {
            field_ref: Some(ObjectFieldSelector {
                field_path: field_path.to_string(),
                ..Default::default()
            }),
            ..Default::default()
        }),
        ..Default::default()
    }
}

fn value_env(name: &str, value: String) -> EnvVar {
    EnvVar {
        name: name.to_string(),
        value: Some(value),
        ..Default::default()
    }
}

/// Environment for the role's container.
///
/// FE points `FE_SERVICE_NAME` at its own discovery service for leader
/// election. BE and CN point it at the FE external service and additionally
/// receive the sorted live FE addresses in `FE_ENDPOINTS`.
pub fn generate_env_vars(ctx: &RoleContext<'_>) -> Vec<EnvVar> {
    let cluster_name = ctx.cluster_name();
    let namespace = ctx.namespace();

    let mut env = vec![
        field_ref_env("POD_NAME", "metadata.name"),
        field_ref_env("POD_IP", "status.podIP"),
        field_ref_env("HOST_IP", "status.hostIP"),
        value_env("POD_NAMESPACE", namespace.clone()),
        value_env("COMPONENT_ROLE", ctx.role.tag().to_string()),
        value_env("HOST_TYPE", "FQDN".to_string()),
    ];

    match ctx.role.dependency() {
        None => {
            env.push(value_env(
                "FE_SERVICE_NAME",
                format!(
                    "{}.{}",
                    search_service_name(&cluster_name, ctx.role),
                    namespace
                ),
            ));
        }
        Some(dependency) => {
            env.push(value_env(
                "FE_SERVICE_NAME",
                format!(
                    "{}.{}",
                    external_service_name(&cluster_name, dependency),
                    namespace
                ),
            ));
            env.push(value_env("FE_QUERY_PORT", FE_QUERY_PORT.to_string()));
            env.push(value_env("FE_ENDPOINTS", ctx.dependency_addresses.join(",")));
        }
    }

    env
}

fn generate_resource_requirements(ctx: &RoleContext<'_>) -> Option<ResourceRequirements> {
    let to_quantities = |m: &BTreeMap<String, String>| -> Option<BTreeMap<String, Quantity>> {
        if m.is_empty() {
            None
        } else {
            Some(
                m.iter()
                    .map(|(k, v)| (k.clone(), Quantity(v.clone())))
                    .collect(),
            )
        }
    };

    let requests = to_quantities(&ctx.spec.resources.requests);
    let limits = to_quantities(&ctx.spec.resources.limits);
    if requests.is_none() && limits.is_none() {
        return None;
    }
    Some(ResourceRequirements {
        requests,
        limits,
        ..Default::default()
    })
}

/// Health probe for a role. FE and BE/CN expose `/api/health` on their HTTP ports.
fn generate_probe(role: Role, failure_threshold: i32) -> Probe {
    let port = match role {
        Role::Fe => "http",
        Role::Be | Role::Cn => "webserver",
    };
    Probe {
        http_get: Some(HTTPGetAction {
            path: Some("/api/health".to_string()),
            port: IntOrString::String(port.to_string()),
            ..Default::default()
        }),
        period_seconds: Some(5),
        timeout_seconds: Some(3),
        failure_threshold: Some(failure_threshold),
        ..Default::default()
    }
}
