//! Whole-tick scenarios across roles.

use k8s_openapi::api::apps::v1::StatefulSet;
use k8s_openapi::api::core::v1::Service;
use kube::ResourceExt;
use starrocks_operator::client::FakeClient;
use starrocks_operator::controller::cluster_reconciler::{TickOutcome, reconcile_cluster};
use starrocks_operator::controller::status::is_condition_true;
use starrocks_operator::controller::sub_controller::RoleControllers;
use starrocks_operator::crd::{ClusterPhase, ComponentPhase, Role};

use crate::common::fixtures::{StarRocksClusterBuilder, role_pod};

fn standard_cluster() -> StarRocksClusterBuilder {
    StarRocksClusterBuilder::new("test")
        .fe(3, "starrocks/fe-ubuntu:3.3")
        .be(3, "starrocks/be-ubuntu:3.3")
        .finalizer("starrocks.com/cluster-protection")
}

#[tokio::test]
async fn test_first_tick_creates_all_roles() {
    let client = FakeClient::new();
    let controllers = RoleControllers::new(client.clone());
    let mut cluster = standard_cluster().cn(2, "starrocks/cn-ubuntu:3.3").build();

    let outcome = reconcile_cluster(&controllers, &mut cluster).await.unwrap();
    assert_eq!(outcome, TickOutcome::Synced(ClusterPhase::Reconciling));

    for role in Role::ALL {
        let name = format!("test-{}", role.tag());
        assert!(client.object::<StatefulSet>("default", &name).is_some());
        assert!(client.object::<Service>("default", &name).is_some());
        assert!(
            client
                .object::<Service>("default", &format!("{}-search", name))
                .is_some()
        );
        assert_eq!(
            cluster.component_status(role).unwrap().phase,
            ComponentPhase::Reconciling
        );
    }

    let status = cluster.status.as_ref().unwrap();
    assert_eq!(status.observed_generation, Some(1));
    assert!(is_condition_true(&status.conditions, "Progressing"));
    assert!(!is_condition_true(&status.conditions, "Ready"));
}

#[tokio::test]
async fn test_cluster_running_once_all_pods_ready() {
    let client = FakeClient::new();
    for role in [Role::Fe, Role::Be] {
        for ordinal in 0..3 {
            client
                .insert(&role_pod("test", role, ordinal, "Running", true))
                .unwrap();
        }
    }
    let controllers = RoleControllers::new(client);
    let mut cluster = standard_cluster().build();

    let outcome = reconcile_cluster(&controllers, &mut cluster).await.unwrap();
    assert_eq!(outcome, TickOutcome::Synced(ClusterPhase::Running));
    assert!(is_condition_true(
        &cluster.status.as_ref().unwrap().conditions,
        "Ready"
    ));
}

#[tokio::test]
async fn test_second_tick_writes_nothing() {
    let client = FakeClient::new();
    let controllers = RoleControllers::new(client.clone());
    let mut cluster = standard_cluster().build();

    reconcile_cluster(&controllers, &mut cluster).await.unwrap();
    let writes = client.writes();
    let status = cluster.status.clone();

    reconcile_cluster(&controllers, &mut cluster).await.unwrap();
    assert_eq!(client.writes(), writes);
    assert_eq!(cluster.status, status);
}

#[tokio::test]
async fn test_removed_role_is_torn_down() {
    let client = FakeClient::new();
    let controllers = RoleControllers::new(client.clone());
    let mut cluster = standard_cluster().cn(1, "starrocks/cn-ubuntu:3.3").build();
    reconcile_cluster(&controllers, &mut cluster).await.unwrap();
    assert!(client.object::<StatefulSet>("default", "test-cn").is_some());

    cluster.spec.star_rocks_cn_spec = None;
    reconcile_cluster(&controllers, &mut cluster).await.unwrap();

    assert!(client.object::<StatefulSet>("default", "test-cn").is_none());
    assert!(client.object::<Service>("default", "test-cn").is_none());
    assert!(client.object::<Service>("default", "test-cn-search").is_none());
    assert!(cluster.component_status(Role::Cn).is_none());
    // Other roles untouched
    assert!(client.object::<StatefulSet>("default", "test-fe").is_some());
}

#[tokio::test]
async fn test_deletion_tears_down_all_roles() {
    let client = FakeClient::new();
    let controllers = RoleControllers::new(client.clone());
    let mut cluster = standard_cluster().build();
    reconcile_cluster(&controllers, &mut cluster).await.unwrap();

    let mut deleting = standard_cluster().deleting().build();
    deleting.status = cluster.status.clone();
    let outcome = reconcile_cluster(&controllers, &mut deleting).await.unwrap();
    assert_eq!(outcome, TickOutcome::Teardown { cleared: true });
    assert_eq!(deleting.status.as_ref().unwrap().phase, ClusterPhase::Deleting);

    for name in ["test-fe", "test-be"] {
        assert!(client.object::<StatefulSet>("default", name).is_none());
        assert!(client.object::<Service>("default", name).is_none());
    }
}

#[tokio::test]
async fn test_frontend_waits_for_dependents() {
    let client = FakeClient::new();
    let controllers = RoleControllers::new(client.clone());
    let mut cluster = standard_cluster().build();
    reconcile_cluster(&controllers, &mut cluster).await.unwrap();

    // A foreign finalizer plus a persistent conflict keeps BE behind
    let mut be: StatefulSet = client.object("default", "test-be").unwrap();
    be.finalizers_mut().push("example.com/hold".to_string());
    client.insert(&be).unwrap();
    client.fail_next_replaces(4);

    let mut deleting = standard_cluster().deleting().build();
    deleting.status = cluster.status.clone();
    let outcome = reconcile_cluster(&controllers, &mut deleting).await.unwrap();
    assert_eq!(outcome, TickOutcome::Teardown { cleared: false });

    // FE was not touched while BE is still held
    let fe: StatefulSet = client.object("default", "test-fe").unwrap();
    assert!(fe.metadata.deletion_timestamp.is_none());
    assert!(fe.finalizers().iter().any(|f| f == "starrocks.com/fe-protection"));

    let outcome = reconcile_cluster(&controllers, &mut deleting).await.unwrap();
    assert_eq!(outcome, TickOutcome::Teardown { cleared: true });
    assert!(client.object::<StatefulSet>("default", "test-fe").is_none());
}

#[tokio::test]
async fn test_list_failure_degrades_without_error() {
    let client = FakeClient::new();
    let controllers = RoleControllers::new(client.clone());
    let mut cluster = StarRocksClusterBuilder::new("test")
        .fe(1, "starrocks/fe-ubuntu:3.3")
        .build();
    reconcile_cluster(&controllers, &mut cluster).await.unwrap();

    client.fail_lists(true);
    let outcome = reconcile_cluster(&controllers, &mut cluster).await.unwrap();
    assert_eq!(outcome, TickOutcome::Synced(ClusterPhase::Reconciling));
    assert!(cluster.component_status(Role::Fe).unwrap().reason.is_some());
}

#[tokio::test]
async fn test_sync_error_is_reported_on_role_status() {
    let client = FakeClient::new();
    let controllers = RoleControllers::new(client.clone());
    let mut cluster = standard_cluster()
        .with_spec(Role::Be, |be| be.image.clear())
        .build();

    let err = reconcile_cluster(&controllers, &mut cluster).await.unwrap_err();
    assert!(!err.is_retryable());

    let be = cluster.component_status(Role::Be).unwrap();
    assert_eq!(be.reason.as_deref(), Some("Missing required field: be.image"));
    // The healthy role keeps a clean status
    assert!(cluster.component_status(Role::Fe).unwrap().reason.is_none());
    assert_eq!(cluster.status.as_ref().unwrap().phase, ClusterPhase::Failed);
    assert!(is_condition_true(
        &cluster.status.as_ref().unwrap().conditions,
        "Degraded"
    ));
}
