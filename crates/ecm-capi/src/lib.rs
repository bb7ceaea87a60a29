//! Cluster-API integration for the edge cluster manager
//!
//! Provider strategies that turn a ClusterTemplate into CAPI template
//! documents and a ClusterClass, plus helpers for CAPI Clusters.

#![deny(missing_docs)]

pub mod cluster;
pub mod clusterclass;
pub mod constants;
pub mod provider;

pub use cluster::{cluster_class_index_keys, cluster_resource, set_cluster_labels, CLUSTER_CLASS_INDEX};
pub use clusterclass::{skeleton, ClusterClass, ClusterClassSpec};
pub use provider::{registry, ProviderRegistry, ProviderStrategy};
