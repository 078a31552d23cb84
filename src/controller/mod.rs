//! Controller module for starrocks-operator.
//!
//! The generic role engine and the StarRocksCluster controller that drives it.
//!
//! Leaves first:
//! - `apply`: create-or-update engine shared by every resource kind
//! - `status`: pod-set aggregation and cluster conditions
//! - `finalizer`: role finalizer removal for teardown
//! - `dependency`: live addresses of the role a role depends on
//! - `sub_controller`: the four per-role operations
//! - `cluster_reconciler`: the per-tick loop over all roles

pub mod apply;
pub mod cluster_reconciler;
pub mod context;
pub mod dependency;
pub mod error;
pub mod finalizer;
pub mod status;
pub mod sub_controller;
