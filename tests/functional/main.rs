// Test code is allowed to panic on failure
#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::indexing_slicing,
    clippy::panic
)]

//! Functional tests for the StarRocks role reconciliation engine.
//!
//! These tests drive the role sub-controllers and the cluster tick against
//! the in-memory `FakeClient`, WITHOUT requiring a live Kubernetes cluster.
//!
//! ```bash
//! # Run all functional tests
//! cargo test --test functional
//!
//! # Run specific test
//! cargo test --test functional test_sync_renders_declared_spec
//! ```
//!
//! ## Test Categories
//!
//! - **Sub-controller tests**: `sync`, `update_status`, `clear_finalizers`
//!   and `clear_resources` for a single role
//! - **Cluster tests**: whole ticks across roles, role removal and
//!   ordered teardown on deletion

#[path = "../common/mod.rs"]
mod common;

mod cluster_tests;
mod sub_controller_tests;
