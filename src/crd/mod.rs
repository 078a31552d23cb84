//! Custom Resource Definitions (CRDs) for starrocks-operator.
//!
//! - `StarRocksCluster`: a multi-role StarRocks deployment (FE, BE and CN tiers)

mod component;
mod starrocks_cluster;

pub use component::*;
pub use starrocks_cluster::*;

/// Finalizer the operator keeps on the StarRocksCluster itself until every role is torn down.
pub const CLUSTER_FINALIZER: &str = "starrocks.com/cluster-protection";
