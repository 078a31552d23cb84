//! Single-role sub-controller scenarios.

use std::collections::BTreeMap;

use k8s_openapi::api::apps::v1::StatefulSet;
use k8s_openapi::api::core::v1::Service;
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::ResourceExt;
use starrocks_operator::client::{FakeClient, ResourceClient};
use starrocks_operator::controller::sub_controller::RoleController;
use starrocks_operator::crd::{ComponentPhase, ComponentStatus, Role};

use crate::common::fixtures::{StarRocksClusterBuilder, role_pod};

const FE_TOKEN: &str = "starrocks.com/fe-protection";

fn statefulset(name: &str, finalizers: &[&str]) -> StatefulSet {
    StatefulSet {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some("default".to_string()),
            finalizers: Some(finalizers.iter().map(|f| f.to_string()).collect()),
            ..Default::default()
        },
        ..Default::default()
    }
}

fn service(name: &str, finalizers: &[&str]) -> Service {
    Service {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some("default".to_string()),
            finalizers: Some(finalizers.iter().map(|f| f.to_string()).collect()),
            ..Default::default()
        },
        ..Default::default()
    }
}

fn fe_status(resource_names: &[&str], service_name: &str) -> ComponentStatus {
    ComponentStatus {
        resource_names: resource_names.iter().map(|n| n.to_string()).collect(),
        service_name: service_name.to_string(),
        ..Default::default()
    }
}

fn env_value(sts: &StatefulSet, name: &str) -> Option<String> {
    sts.spec
        .as_ref()?
        .template
        .spec
        .as_ref()?
        .containers
        .first()?
        .env
        .as_ref()?
        .iter()
        .find(|e| e.name == name)
        .and_then(|e| e.value.clone())
}

#[tokio::test]
async fn test_clear_finalizers_on_fe_resources() {
    let client = FakeClient::new()
        .with_object(&statefulset("test-fe", &[FE_TOKEN]))
        .unwrap()
        .with_object(&service("test-fe-service", &[FE_TOKEN]))
        .unwrap();
    let cluster = StarRocksClusterBuilder::new("test")
        .status(Role::Fe, fe_status(&["test-fe"], "test-fe-service"))
        .build();

    let controller = RoleController::new(client.clone(), Role::Fe);
    let still_referenced = controller.clear_finalizers(&cluster).await.unwrap();
    assert!(!still_referenced);

    let svc: Service = client.object("default", "test-fe-service").unwrap();
    assert!(svc.finalizers().is_empty());
    let sts: StatefulSet = client.object("default", "test-fe").unwrap();
    assert!(sts.finalizers().is_empty());
}

#[tokio::test]
async fn test_clear_finalizers_is_idempotent() {
    let client = FakeClient::new()
        .with_object(&statefulset("test-fe", &[FE_TOKEN]))
        .unwrap();
    let cluster = StarRocksClusterBuilder::new("test")
        .status(Role::Fe, fe_status(&["test-fe"], "test-fe"))
        .build();
    let controller = RoleController::new(client.clone(), Role::Fe);

    assert!(!controller.clear_finalizers(&cluster).await.unwrap());
    let writes = client.writes();
    assert!(!controller.clear_finalizers(&cluster).await.unwrap());
    assert_eq!(client.writes(), writes);
}

#[tokio::test]
async fn test_clear_resources() {
    let client = FakeClient::new()
        .with_object(&service("test-fe-access", &[]))
        .unwrap()
        .with_object(&service("test-fe-search", &[]))
        .unwrap();
    let cluster = StarRocksClusterBuilder::new("test")
        .deleting()
        .status(Role::Fe, fe_status(&["test-fe"], "test-fe-access"))
        .build();

    let controller = RoleController::new(client.clone(), Role::Fe);
    let cleared = controller.clear_resources(&cluster).await.unwrap();
    assert!(cleared);

    assert!(client.object::<StatefulSet>("default", "test-fe").is_none());
    assert!(client.object::<Service>("default", "test-fe-access").is_none());
    assert!(client.object::<Service>("default", "test-fe-search").is_none());
}

#[tokio::test]
async fn test_clear_resources_strips_stale_finalizers() {
    let client = FakeClient::new()
        .with_object(&statefulset("test-fe", &[FE_TOKEN]))
        .unwrap()
        .with_object(&service("test-fe", &[FE_TOKEN]))
        .unwrap()
        .with_object(&service("test-fe-search", &[FE_TOKEN]))
        .unwrap();
    let cluster = StarRocksClusterBuilder::new("test")
        .deleting()
        .status(Role::Fe, fe_status(&["test-fe-search", "test-fe"], "test-fe"))
        .build();

    let controller = RoleController::new(client.clone(), Role::Fe);
    assert!(controller.clear_resources(&cluster).await.unwrap());

    assert!(client.object::<StatefulSet>("default", "test-fe").is_none());
    assert!(client.object::<Service>("default", "test-fe").is_none());
    assert!(client.object::<Service>("default", "test-fe-search").is_none());
}

#[tokio::test]
async fn test_clear_resources_leaves_foreign_finalizers_to_gc() {
    let client = FakeClient::new()
        .with_object(&statefulset("test-fe", &["example.com/backup", FE_TOKEN]))
        .unwrap();
    let cluster = StarRocksClusterBuilder::new("test")
        .deleting()
        .status(Role::Fe, fe_status(&["test-fe"], "test-fe"))
        .build();

    let controller = RoleController::new(client.clone(), Role::Fe);
    assert!(controller.clear_resources(&cluster).await.unwrap());

    let sts: StatefulSet = client.object("default", "test-fe").unwrap();
    assert!(sts.metadata.deletion_timestamp.is_some());
    assert_eq!(sts.finalizers(), ["example.com/backup".to_string()]);
}

#[tokio::test]
async fn test_clear_resources_visits_every_recorded_name() {
    let client = FakeClient::new()
        .with_object(&service("test-fe-legacy", &[FE_TOKEN]))
        .unwrap();
    let cluster = StarRocksClusterBuilder::new("test")
        .deleting()
        .status(Role::Fe, fe_status(&["test-fe-legacy", "test-fe"], "test-fe"))
        .build();

    let controller = RoleController::new(client.clone(), Role::Fe);
    assert!(controller.clear_resources(&cluster).await.unwrap());
    assert!(client.object::<Service>("default", "test-fe-legacy").is_none());
}

#[tokio::test]
async fn test_clear_resources_not_cleared_while_conflicts_persist() {
    let client = FakeClient::new()
        .with_object(&statefulset("test-fe", &[FE_TOKEN]))
        .unwrap();
    client.fail_next_replaces(4);
    let cluster = StarRocksClusterBuilder::new("test")
        .deleting()
        .status(Role::Fe, fe_status(&["test-fe"], "test-fe"))
        .build();

    let controller = RoleController::new(client.clone(), Role::Fe);
    assert!(!controller.clear_resources(&cluster).await.unwrap());

    // Next tick succeeds
    assert!(controller.clear_resources(&cluster).await.unwrap());
    assert!(client.object::<StatefulSet>("default", "test-fe").is_none());
}

#[tokio::test]
async fn test_sync_renders_declared_spec() {
    let mut cluster = StarRocksClusterBuilder::new("test")
        .fe(3, "test.image")
        .with_spec(Role::Fe, |spec| {
            spec.service_account = Some("test-sa".to_string());
            spec.resources
                .requests
                .insert("cpu".to_string(), "4".to_string());
            spec.resources
                .requests
                .insert("memory".to_string(), "4Gi".to_string());
            spec.pod_labels = BTreeMap::from([
                ("test".to_string(), "test".to_string()),
                ("test1".to_string(), "test1".to_string()),
            ]);
        })
        .build();

    let client = FakeClient::new();
    let controller = RoleController::new(client.clone(), Role::Fe);
    controller.sync(&mut cluster).await.unwrap();
    controller.update_status(&mut cluster).await;

    let status = cluster.component_status(Role::Fe).unwrap();
    assert_eq!(status.phase, ComponentPhase::Reconciling);
    assert_eq!(status.service_name, "test-fe");
    assert_eq!(status.creating_instances.len(), 3);
    assert!(status.running_instances.is_empty());

    assert!(client.object::<Service>("default", "test-fe").is_some());
    assert!(client.object::<Service>("default", "test-fe-search").is_some());

    let sts: StatefulSet = client.object("default", "test-fe").unwrap();
    assert_eq!(sts.finalizers(), [FE_TOKEN.to_string()]);
    let spec = sts.spec.unwrap();
    assert_eq!(spec.replicas, Some(3));
    let template = spec.template;
    let labels = template.metadata.unwrap().labels.unwrap();
    assert_eq!(labels.get("test"), Some(&"test".to_string()));
    assert_eq!(labels.get("test1"), Some(&"test1".to_string()));

    let pod = template.spec.unwrap();
    assert_eq!(pod.service_account_name, Some("test-sa".to_string()));
    let container = &pod.containers[0];
    assert_eq!(container.image, Some("test.image".to_string()));
    let requests = container
        .resources
        .as_ref()
        .and_then(|r| r.requests.clone())
        .unwrap();
    assert_eq!(requests.get("cpu"), Some(&Quantity("4".to_string())));
    assert_eq!(requests.get("memory"), Some(&Quantity("4Gi".to_string())));
}

#[tokio::test]
async fn test_sync_twice_is_noop() {
    let mut cluster = StarRocksClusterBuilder::new("test")
        .fe(3, "starrocks/fe-ubuntu:3.3")
        .build();
    let client = FakeClient::new();
    let controller = RoleController::new(client.clone(), Role::Fe);

    controller.sync(&mut cluster).await.unwrap();
    let writes = client.writes();
    let before: StatefulSet = client.object("default", "test-fe").unwrap();

    controller.sync(&mut cluster).await.unwrap();
    assert_eq!(client.writes(), writes);
    let after: StatefulSet = client.object("default", "test-fe").unwrap();
    assert_eq!(before.resource_version(), after.resource_version());
}

#[tokio::test]
async fn test_sync_is_noop_against_server_defaulted_objects() {
    let mut cluster = StarRocksClusterBuilder::new("test")
        .fe(3, "starrocks/fe-ubuntu:3.3")
        .build();
    let client = FakeClient::new();
    let controller = RoleController::new(client.clone(), Role::Fe);
    controller.sync(&mut cluster).await.unwrap();

    // Re-store every object the way the API server returns it after defaulting
    let search: Service = client.object("default", "test-fe-search").unwrap();
    let mut search = serde_json::to_value(search).unwrap();
    search["spec"]["type"] = serde_json::json!("ClusterIP");
    search["spec"]["sessionAffinity"] = serde_json::json!("None");
    client.insert(&serde_json::from_value::<Service>(search).unwrap()).unwrap();

    let sts: StatefulSet = client.object("default", "test-fe").unwrap();
    let mut sts = serde_json::to_value(sts).unwrap();
    sts["spec"]["updateStrategy"]["rollingUpdate"]["partition"] = serde_json::json!(0);
    sts["spec"]["revisionHistoryLimit"] = serde_json::json!(10);
    sts["spec"]["template"]["spec"]["dnsPolicy"] = serde_json::json!("ClusterFirst");
    sts["spec"]["template"]["spec"]["containers"][0]["terminationMessagePath"] =
        serde_json::json!("/dev/termination-log");
    sts["spec"]["template"]["spec"]["containers"][0]["readinessProbe"]["successThreshold"] =
        serde_json::json!(1);
    client.insert(&serde_json::from_value::<StatefulSet>(sts).unwrap()).unwrap();

    let writes = client.writes();
    for _ in 0..3 {
        controller.sync(&mut cluster).await.unwrap();
    }
    assert_eq!(client.writes(), writes);
}

#[tokio::test]
async fn test_sync_applies_scale_change() {
    let mut cluster = StarRocksClusterBuilder::new("test")
        .fe(3, "starrocks/fe-ubuntu:3.3")
        .build();
    let client = FakeClient::new();
    let controller = RoleController::new(client.clone(), Role::Fe);
    controller.sync(&mut cluster).await.unwrap();

    if let Some(fe) = cluster.spec.star_rocks_fe_spec.as_mut() {
        fe.replicas = 5;
    }
    controller.sync(&mut cluster).await.unwrap();

    let sts: StatefulSet = client.object("default", "test-fe").unwrap();
    assert_eq!(sts.spec.unwrap().replicas, Some(5));
}

#[tokio::test]
async fn test_backend_sync_renders_frontend_endpoints() {
    let mut cluster = StarRocksClusterBuilder::new("test")
        .fe(3, "starrocks/fe-ubuntu:3.3")
        .be(3, "starrocks/be-ubuntu:3.3")
        .build();
    let client = FakeClient::new();
    let controller = RoleController::new(client.clone(), Role::Be);

    // No FE members yet is a valid input
    controller.sync(&mut cluster).await.unwrap();
    let sts: StatefulSet = client.object("default", "test-be").unwrap();
    assert_eq!(env_value(&sts, "FE_ENDPOINTS"), Some(String::new()));

    client.set_endpoints("default", "test-fe-search", &["10.0.0.3", "10.0.0.1", "10.0.0.2"]);
    controller.sync(&mut cluster).await.unwrap();
    let sts: StatefulSet = client.object("default", "test-be").unwrap();
    assert_eq!(
        env_value(&sts, "FE_ENDPOINTS"),
        Some("10.0.0.1,10.0.0.2,10.0.0.3".to_string())
    );
    assert_eq!(
        env_value(&sts, "FE_SERVICE_NAME"),
        Some("test-fe.default".to_string())
    );
}

#[tokio::test]
async fn test_update_status_from_pods() {
    let mut cluster = StarRocksClusterBuilder::new("test")
        .fe(3, "starrocks/fe-ubuntu:3.3")
        .build();
    let client = FakeClient::new();
    for ordinal in 0..3 {
        client
            .insert(&role_pod("test", Role::Fe, ordinal, "Running", true))
            .unwrap();
    }
    // Pods of another role are not counted
    client
        .insert(&role_pod("test", Role::Be, 0, "Failed", false))
        .unwrap();

    let controller = RoleController::new(client.clone(), Role::Fe);
    controller.update_status(&mut cluster).await;

    let status = cluster.component_status(Role::Fe).unwrap();
    assert_eq!(status.phase, ComponentPhase::Running);
    assert_eq!(
        status.running_instances,
        vec!["test-fe-0", "test-fe-1", "test-fe-2"]
    );
    assert!(status.failed_instances.is_empty());
}

#[tokio::test]
async fn test_update_status_all_failed() {
    let mut cluster = StarRocksClusterBuilder::new("test")
        .be(1, "starrocks/be-ubuntu:3.3")
        .build();
    let client = FakeClient::new()
        .with_object(&role_pod("test", Role::Be, 0, "Failed", false))
        .unwrap();

    let controller = RoleController::new(client, Role::Be);
    controller.update_status(&mut cluster).await;

    let status = cluster.component_status(Role::Be).unwrap();
    assert_eq!(status.phase, ComponentPhase::Failed);
    assert_eq!(status.failed_instances, vec!["test-be-0"]);
}

#[tokio::test]
async fn test_update_status_does_not_touch_resource_names() {
    let mut cluster = StarRocksClusterBuilder::new("test")
        .fe(1, "starrocks/fe-ubuntu:3.3")
        .status(Role::Fe, fe_status(&["test-fe"], "test-fe"))
        .build();
    let controller = RoleController::new(FakeClient::new(), Role::Fe);
    controller.update_status(&mut cluster).await;

    let status = cluster.component_status(Role::Fe).unwrap();
    assert_eq!(status.resource_names, vec!["test-fe"]);
    assert_eq!(status.service_name, "test-fe");
}

#[tokio::test]
async fn test_sync_recreates_after_external_delete() {
    let mut cluster = StarRocksClusterBuilder::new("test")
        .fe(1, "starrocks/fe-ubuntu:3.3")
        .build();
    let client = FakeClient::new();
    let controller = RoleController::new(client.clone(), Role::Fe);
    controller.sync(&mut cluster).await.unwrap();

    // Someone strips our token and deletes the external service
    let mut svc: Service = client.object("default", "test-fe").unwrap();
    svc.metadata.finalizers = None;
    client.replace("default", &svc).await.unwrap();
    client.delete::<Service>("default", "test-fe").await.unwrap();
    assert!(client.object::<Service>("default", "test-fe").is_none());

    controller.sync(&mut cluster).await.unwrap();
    let svc: Service = client.object("default", "test-fe").unwrap();
    assert_eq!(svc.finalizers(), [FE_TOKEN.to_string()]);
}
