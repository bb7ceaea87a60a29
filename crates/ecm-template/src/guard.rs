//! Deletion guard
//!
//! A ClusterTemplate may only be deleted once no Cluster's topology points
//! at its ClusterClass. Clusters are found through the
//! `spec.topology.classRef` secondary index, which must be registered on the
//! store before the guard runs.

use std::sync::Arc;

use kube::ResourceExt;
use tracing::{debug, instrument};

use ecm_capi::cluster::{
    cluster_class_index_keys, cluster_class_key, cluster_resource, CLUSTER_CLASS_INDEX,
};
use ecm_common::crd::ClusterTemplate;
use ecm_common::store::{IndexFn, ResourceStore};
use ecm_common::{Error, Result};

/// Indexer for Clusters keyed by `<namespace>/<ClusterClass>`
pub fn cluster_class_indexer() -> IndexFn {
    Arc::new(cluster_class_index_keys)
}

/// The ClusterClass a template produced, as `(namespace, name)`
///
/// Prefers the published `status.clusterClassRef`; a template that never got
/// that far is matched by name.
pub fn cluster_class_of(ct: &ClusterTemplate) -> (String, String) {
    match ct.status.as_ref().and_then(|s| s.cluster_class_ref.as_ref()) {
        Some(r) => (r.namespace.clone(), r.name.clone()),
        None => (ct.namespace().unwrap_or_default(), ct.name_any()),
    }
}

/// Refuse deletion of a template whose ClusterClass is still in use
#[instrument(skip(store, ct), fields(template = %ct.name_any()))]
pub async fn check_delete(store: &dyn ResourceStore, ct: &ClusterTemplate) -> Result<()> {
    let (namespace, name) = cluster_class_of(ct);
    let key = cluster_class_key(&namespace, &name);
    let clusters = store
        .list_indexed(&cluster_resource(), CLUSTER_CLASS_INDEX, &key)
        .await?;

    if clusters.is_empty() {
        debug!(cluster_class = %key, "no clusters reference the template");
        return Ok(());
    }

    let mut names: Vec<String> = clusters.iter().map(|c| c.name_any()).collect();
    names.sort();
    Err(Error::in_use(ct.name_any(), names))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controller::{reconcile, Context};
    use ecm_common::crd::{ClusterClassRef, ClusterTemplateSpec, ClusterTemplateStatus};
    use ecm_common::kube_utils::{from_dynamic, to_dynamic, HasApiResource};
    use ecm_common::store::memory::MemoryStore;
    use ecm_common::ErrorKind;
    use kube::api::DynamicObject;
    use serde_json::json;

    const NS: &str = "tenant";
    const CT: &str = "baseline-v1.0.0";

    fn template() -> ClusterTemplate {
        let mut ct = ClusterTemplate::new(
            CT,
            ClusterTemplateSpec {
                control_plane_provider_type: "kubeadm".to_string(),
                infra_provider_type: "docker".to_string(),
                kubernetes_version: "v1.30.6".to_string(),
                ..Default::default()
            },
        );
        ct.metadata.namespace = Some(NS.to_string());
        ct
    }

    fn cluster(ns: &str, name: &str, class: &str) -> DynamicObject {
        let mut obj = DynamicObject::new(name, &cluster_resource()).within(ns);
        obj.data = json!({"spec": {"topology": {"classRef": {"name": class}}}});
        obj
    }

    fn indexed_store() -> Arc<MemoryStore> {
        let store = MemoryStore::shared();
        store.register_index(&cluster_resource(), CLUSTER_CLASS_INDEX, cluster_class_indexer());
        store
    }

    /// Story: a template in use cannot be deleted until its Clusters are gone
    #[tokio::test]
    async fn story_delete_blocked_until_clusters_gone() {
        let store = indexed_store();
        let ctx = Arc::new(Context::new(store.clone()));
        let ar = ClusterTemplate::api_resource();
        store.seed(&ar, to_dynamic(&template()).unwrap());

        let ct: ClusterTemplate = from_dynamic(store.object(&ar, NS, CT).unwrap()).unwrap();
        reconcile(Arc::new(ct), ctx.clone()).await.unwrap();
        let ct: ClusterTemplate = from_dynamic(store.object(&ar, NS, CT).unwrap()).unwrap();
        assert!(ct.has_finalizer());

        store.seed(&cluster_resource(), cluster(NS, "edge-1", CT));
        let err = check_delete(store.as_ref(), &ct).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InUse);
        assert!(err.to_string().contains("edge-1"));

        store.delete(&cluster_resource(), NS, "edge-1").await.unwrap();
        check_delete(store.as_ref(), &ct).await.unwrap();

        store.delete(&ar, NS, CT).await.unwrap();
        let deleting: ClusterTemplate = from_dynamic(store.object(&ar, NS, CT).unwrap()).unwrap();
        reconcile(Arc::new(deleting), ctx).await.unwrap();
        assert!(store.object(&ar, NS, CT).is_none());
    }

    #[tokio::test]
    async fn test_clusters_of_other_classes_do_not_block() {
        let store = indexed_store();
        store.seed(&cluster_resource(), cluster(NS, "edge-1", "other-v1.0.0"));
        store.seed(&cluster_resource(), cluster("other-tenant", "edge-2", CT));
        check_delete(store.as_ref(), &template()).await.unwrap();
    }

    #[tokio::test]
    async fn test_in_use_lists_clusters_sorted() {
        let store = indexed_store();
        store.seed(&cluster_resource(), cluster(NS, "edge-b", CT));
        store.seed(&cluster_resource(), cluster(NS, "edge-a", CT));
        match check_delete(store.as_ref(), &template()).await.unwrap_err() {
            Error::InUse { template, clusters } => {
                assert_eq!(template, CT);
                assert_eq!(clusters, vec!["edge-a", "edge-b"]);
            }
            other => panic!("expected InUse, got {other}"),
        }
    }

    #[test]
    fn test_class_ref_takes_precedence_over_name() {
        let mut ct = template();
        assert_eq!(cluster_class_of(&ct), (NS.to_string(), CT.to_string()));

        ct.status = Some(ClusterTemplateStatus {
            cluster_class_ref: Some(ClusterClassRef {
                api_version: "cluster.x-k8s.io/v1beta1".to_string(),
                kind: "ClusterClass".to_string(),
                name: "renamed".to_string(),
                namespace: "shared".to_string(),
            }),
            ..Default::default()
        });
        assert_eq!(cluster_class_of(&ct), ("shared".to_string(), "renamed".to_string()));
    }
}
