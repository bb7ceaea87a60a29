//! CAPI Cluster helpers
//!
//! Clusters are handled as dynamic objects; only the topology class
//! reference and labels are read or written here.

use std::collections::BTreeMap;

use kube::api::DynamicObject;
use kube::discovery::ApiResource;
use kube::ResourceExt;
use tracing::{debug, instrument};

use ecm_common::kube_utils::{build_api_resource, dynamic_str};
use ecm_common::labels::system_label_policy;
use ecm_common::retry::{retry_on_conflict, RetryConfig};
use ecm_common::store::ResourceStore;
use ecm_common::Result;

use crate::constants::{CAPI_API_VERSION, CLUSTER_KIND};

/// Secondary index over Clusters keyed by `<namespace>/<ClusterClass name>`
pub const CLUSTER_CLASS_INDEX: &str = "spec.topology.classRef";

/// The CAPI Cluster resource
pub fn cluster_resource() -> ApiResource {
    build_api_resource(CAPI_API_VERSION, CLUSTER_KIND)
}

/// Index key for a ClusterClass
pub fn cluster_class_key(namespace: &str, name: &str) -> String {
    format!("{namespace}/{name}")
}

/// Index keys for a Cluster: its topology's ClusterClass, if it has a topology
///
/// Reads `spec.topology.classRef` and falls back to the older
/// `spec.topology.class` string. A classRef namespace overrides the Cluster's.
pub fn cluster_class_index_keys(cluster: &DynamicObject) -> Vec<String> {
    if cluster.data.pointer("/spec/topology").is_none() {
        return Vec::new();
    }

    let name = dynamic_str(cluster, "/spec/topology/classRef/name")
        .or_else(|| dynamic_str(cluster, "/spec/topology/class"))
        .filter(|n| !n.is_empty());
    let Some(name) = name else {
        return Vec::new();
    };

    let namespace = dynamic_str(cluster, "/spec/topology/classRef/namespace")
        .filter(|ns| !ns.is_empty())
        .map(String::from)
        .or_else(|| cluster.namespace())
        .unwrap_or_default();

    vec![cluster_class_key(&namespace, name)]
}

/// Replace the user labels of a Cluster, keeping its system labels
///
/// Read-modify-write under optimistic concurrency, retried on conflict.
#[instrument(skip(store, user_labels))]
pub async fn set_cluster_labels(
    store: &dyn ResourceStore,
    namespace: &str,
    name: &str,
    user_labels: &BTreeMap<String, String>,
) -> Result<DynamicObject> {
    let ar = cluster_resource();
    let policy = system_label_policy();

    retry_on_conflict(&RetryConfig::conflict(), "set_cluster_labels", || {
        let ar = &ar;
        async move {
            let mut cluster = store.get(ar, namespace, name).await?;
            let labels = policy.set_user_labels(cluster.labels(), user_labels)?;
            cluster.metadata.labels = Some(labels);
            let updated = store.update(ar, &cluster).await?;
            debug!(cluster = %name, "cluster labels updated");
            Ok(updated)
        }
    })
    .await
}
