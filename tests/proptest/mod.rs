// Test code is allowed to panic on failure
#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::indexing_slicing,
    clippy::panic
)]

//! Property-based tests for starrocks-operator.
//!
//! Uses proptest to generate random pod populations and specs and verify
//! the phase policy and resolver invariants.

#[path = "../common/mod.rs"]
mod common;

use proptest::prelude::*;

use starrocks_operator::client::{PodObservation, PodPhase};
use starrocks_operator::controller::status::{aggregate_pods, compute_phase};
use starrocks_operator::crd::{ComponentPhase, Role};
use starrocks_operator::resources::common::RoleContext;
use starrocks_operator::resources::statefulset::generate_statefulset;

use common::fixtures::StarRocksClusterBuilder;

/// Strategy for generating replica targets.
fn replica_target() -> impl Strategy<Value = i32> {
    0..=10i32
}

/// Strategy for generating one pod's (phase, ready) observation.
fn pod_state() -> impl Strategy<Value = (PodPhase, bool)> {
    prop_oneof![
        Just((PodPhase::Running, true)),
        Just((PodPhase::Running, false)),
        Just((PodPhase::Pending, false)),
        Just((PodPhase::Failed, false)),
        Just((PodPhase::Succeeded, false)),
        Just((PodPhase::Unknown, false)),
    ]
}

fn pods(states: &[(PodPhase, bool)]) -> Vec<PodObservation> {
    states
        .iter()
        .enumerate()
        .map(|(i, (phase, ready))| PodObservation::new(format!("test-be-{}", i), *phase, *ready))
        .collect()
}

fn address() -> impl Strategy<Value = String> {
    (0u8..=255, 0u8..=255).prop_map(|(a, b)| format!("10.0.{}.{}", a, b))
}

proptest! {
    /// Property: Running iff ready == target and nothing is creating or failed.
    #[test]
    fn test_running_iff_exactly_ready(
        replicas in replica_target(),
        states in prop::collection::vec(pod_state(), 0..12)
    ) {
        let partition = aggregate_pods("test-be", replicas, &pods(&states));
        let phase = compute_phase(replicas, &partition);
        let expected = partition.ready.len() == usize::try_from(replicas).unwrap()
            && partition.creating.is_empty()
            && partition.failed.is_empty();
        prop_assert_eq!(phase == ComponentPhase::Running, expected);
    }

    /// Property: Failed iff nothing is ready and at least one pod failed.
    #[test]
    fn test_failed_iff_none_ready_and_some_failed(
        replicas in replica_target(),
        states in prop::collection::vec(pod_state(), 0..12)
    ) {
        let partition = aggregate_pods("test-be", replicas, &pods(&states));
        let phase = compute_phase(replicas, &partition);
        let expected = partition.ready.is_empty() && !partition.failed.is_empty();
        prop_assert_eq!(phase == ComponentPhase::Failed, expected);
    }

    /// Property: Without any observed pods every expected member is listed as creating.
    #[test]
    fn test_empty_snapshot_lists_every_member(replicas in replica_target()) {
        let partition = aggregate_pods("test-be", replicas, &[]);
        prop_assert_eq!(partition.creating.len(), usize::try_from(replicas).unwrap());
        prop_assert!(partition.ready.is_empty());
    }

    /// Property: Every observed pod lands in at most one partition.
    #[test]
    fn test_partitions_are_disjoint(
        replicas in replica_target(),
        states in prop::collection::vec(pod_state(), 0..12)
    ) {
        let partition = aggregate_pods("test-be", replicas, &pods(&states));
        for name in &partition.ready {
            prop_assert!(!partition.creating.contains(name));
            prop_assert!(!partition.failed.contains(name));
        }
        for name in &partition.creating {
            prop_assert!(!partition.failed.contains(name));
        }
    }

    /// Property: The desired workload set does not depend on address order.
    #[test]
    fn test_desired_state_is_order_independent(
        addrs in prop::collection::vec(address(), 0..8),
        replicas in replica_target()
    ) {
        let cluster = StarRocksClusterBuilder::new("test")
            .fe(1, "starrocks/fe-ubuntu:3.3")
            .be(replicas, "starrocks/be-ubuntu:3.3")
            .build();
        let mut reversed = addrs.clone();
        reversed.reverse();

        let a = generate_statefulset(&RoleContext::new(&cluster, Role::Be, addrs).unwrap());
        let b = generate_statefulset(&RoleContext::new(&cluster, Role::Be, reversed).unwrap());
        prop_assert_eq!(
            serde_json::to_vec(&a).unwrap(),
            serde_json::to_vec(&b).unwrap()
        );
    }
}
