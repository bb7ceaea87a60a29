//! ClusterTemplate validating admission webhook
//!
//! - CREATE: name pattern, provider kinds, kubernetes version, parseable
//!   `clusterConfiguration` and label syntax
//! - UPDATE: the spec is immutable
//! - DELETE: the deletion guard

use std::sync::Arc;

use axum::{extract::State, routing::post, Json, Router};
use kube::api::DynamicObject;
use kube::core::admission::{AdmissionRequest, AdmissionResponse, AdmissionReview, Operation};
use tracing::{debug, error, info};

use ecm_common::crd::ClusterTemplate;
use ecm_common::kube_utils::from_dynamic;
use ecm_common::store::ResourceStore;

use crate::guard::check_delete;

/// Path the webhook configuration points at
pub const VALIDATE_PATH: &str = "/validate/clustertemplates";

/// Shared webhook state
pub struct WebhookState {
    /// Store used by the deletion guard
    pub store: Arc<dyn ResourceStore>,
}

/// Router serving the validating webhook
pub fn router(state: Arc<WebhookState>) -> Router {
    Router::new()
        .route(VALIDATE_PATH, post(validate_handler))
        .with_state(state)
}

/// Handle a validating admission review for ClusterTemplates
pub async fn validate_handler(
    State(state): State<Arc<WebhookState>>,
    Json(body): Json<AdmissionReview<DynamicObject>>,
) -> Json<AdmissionReview<DynamicObject>> {
    let req: AdmissionRequest<DynamicObject> = match body.try_into() {
        Ok(req) => req,
        Err(e) => {
            error!(error = %e, "failed to parse admission request");
            return Json(AdmissionResponse::invalid(e.to_string()).into_review());
        }
    };
    Json(validate(&state, &req).await.into_review())
}

fn decode(obj: Option<&DynamicObject>, which: &str) -> Result<ClusterTemplate, String> {
    let obj = obj.ok_or_else(|| format!("admission request carries no {which} object"))?;
    from_dynamic(obj.clone()).map_err(|e| e.to_string())
}

/// Decide one admission request
pub async fn validate(state: &WebhookState, req: &AdmissionRequest<DynamicObject>) -> AdmissionResponse {
    let allow = AdmissionResponse::from(req);
    let verdict = match req.operation {
        Operation::Create => validate_create(req),
        Operation::Update => validate_update(req),
        Operation::Delete => validate_delete(state, req).await,
        Operation::Connect => Ok(()),
    };

    match verdict {
        Ok(()) => {
            debug!(uid = %req.uid, operation = ?req.operation, name = %req.name, "admitted");
            allow
        }
        Err(reason) => {
            info!(uid = %req.uid, operation = ?req.operation, name = %req.name, %reason, "denied");
            allow.deny(reason)
        }
    }
}

fn validate_create(req: &AdmissionRequest<DynamicObject>) -> Result<(), String> {
    let ct = decode(req.object.as_ref(), "new")?;
    let name = ct.metadata.name.as_deref().unwrap_or(&req.name);
    ct.spec.validate(name).map_err(|e| e.to_string())
}

fn validate_update(req: &AdmissionRequest<DynamicObject>) -> Result<(), String> {
    let new = decode(req.object.as_ref(), "new")?;
    let old = decode(req.old_object.as_ref(), "old")?;
    if new.spec != old.spec {
        return Err(format!(
            "ClusterTemplate {} spec is immutable; create a new version instead",
            req.name
        ));
    }
    Ok(())
}

async fn validate_delete(
    state: &WebhookState,
    req: &AdmissionRequest<DynamicObject>,
) -> Result<(), String> {
    let ct = decode(req.old_object.as_ref(), "old")?;
    check_delete(state.store.as_ref(), &ct)
        .await
        .map_err(|e| e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use ecm_capi::cluster::{cluster_resource, CLUSTER_CLASS_INDEX};
    use ecm_common::crd::ClusterTemplateSpec;
    use ecm_common::kube_utils::to_dynamic;
    use ecm_common::store::memory::MemoryStore;
    use rstest::rstest;
    use serde_json::{json, Value};
    use tower::ServiceExt;

    use crate::guard::cluster_class_indexer;

    fn template(name: &str, cp: &str, config: &str) -> Value {
        let mut ct = ClusterTemplate::new(
            name,
            ClusterTemplateSpec {
                control_plane_provider_type: cp.to_string(),
                infra_provider_type: "docker".to_string(),
                kubernetes_version: "v1.30.6".to_string(),
                cluster_configuration: Some(config.to_string()),
                ..Default::default()
            },
        );
        ct.metadata.namespace = Some("tenant".to_string());
        serde_json::to_value(to_dynamic(&ct).unwrap()).unwrap()
    }

    fn review(operation: &str, name: &str, object: Option<Value>, old: Option<Value>) -> Value {
        json!({
            "apiVersion": "admission.k8s.io/v1",
            "kind": "AdmissionReview",
            "request": {
                "uid": "3f1c2a",
                "kind": {"group": "edge-orchestrator.intel.com", "version": "v1alpha1", "kind": "ClusterTemplate"},
                "resource": {"group": "edge-orchestrator.intel.com", "version": "v1alpha1", "resource": "clustertemplates"},
                "name": name,
                "namespace": "tenant",
                "operation": operation,
                "userInfo": {"username": "tenant-admin"},
                "object": object,
                "oldObject": old,
                "dryRun": false,
            },
        })
    }

    fn state() -> (Arc<MemoryStore>, WebhookState) {
        let store = MemoryStore::shared();
        store.register_index(&cluster_resource(), CLUSTER_CLASS_INDEX, cluster_class_indexer());
        let state = WebhookState {
            store: store.clone(),
        };
        (store, state)
    }

    async fn decide(state: &WebhookState, body: Value) -> AdmissionResponse {
        let review: AdmissionReview<DynamicObject> = serde_json::from_value(body).unwrap();
        let req: AdmissionRequest<DynamicObject> = review.try_into().unwrap();
        validate(state, &req).await
    }

    #[rstest]
    #[case("baseline-v1.0.0", "kubeadm", "{}", true)]
    #[case("baseline-v1.0.0", "rke2", "", true)]
    #[case("baseline", "kubeadm", "{}", false)]
    #[case("baseline-v1.0.0", "talos", "{}", false)]
    #[case("baseline-v1.0.0", "kubeadm", "{\"spec\":", false)]
    #[tokio::test]
    async fn test_create_validation(
        #[case] name: &str,
        #[case] cp: &str,
        #[case] config: &str,
        #[case] allowed: bool,
    ) {
        let (_, state) = state();
        let resp = decide(&state, review("CREATE", name, Some(template(name, cp, config)), None)).await;
        assert_eq!(resp.allowed, allowed);
    }

    /// Story: spec edits are rejected but metadata edits pass
    #[tokio::test]
    async fn story_spec_is_immutable() {
        let (_, state) = state();
        let old = template("baseline-v1.0.0", "kubeadm", "{}");

        let mut relabelled = old.clone();
        relabelled["metadata"]["labels"] = json!({"default": "true"});
        let resp = decide(&state, review("UPDATE", "baseline-v1.0.0", Some(relabelled), Some(old.clone()))).await;
        assert!(resp.allowed);

        let mut edited = old.clone();
        edited["spec"]["kubernetesVersion"] = json!("v1.31.0");
        let resp = decide(&state, review("UPDATE", "baseline-v1.0.0", Some(edited), Some(old))).await;
        assert!(!resp.allowed);
        assert!(resp.result.message.contains("immutable"));
    }

    /// Story: deletion is denied while a Cluster uses the template
    #[tokio::test]
    async fn story_delete_denied_while_in_use() {
        let (store, state) = state();
        let mut cluster = DynamicObject::new("edge-1", &cluster_resource()).within("tenant");
        cluster.data = json!({"spec": {"topology": {"classRef": {"name": "baseline-v1.0.0"}}}});
        store.seed(&cluster_resource(), cluster);

        let old = template("baseline-v1.0.0", "kubeadm", "{}");
        let resp = decide(&state, review("DELETE", "baseline-v1.0.0", None, Some(old.clone()))).await;
        assert!(!resp.allowed);
        assert!(resp.result.message.contains("in use"));

        store.delete(&cluster_resource(), "tenant", "edge-1").await.unwrap();
        let resp = decide(&state, review("DELETE", "baseline-v1.0.0", None, Some(old))).await;
        assert!(resp.allowed);
    }

    #[tokio::test]
    async fn test_router_serves_reviews() {
        let (_, state) = state();
        let app = router(Arc::new(state));
        let body = review(
            "CREATE",
            "baseline",
            Some(template("baseline", "kubeadm", "{}")),
            None,
        );
        let resp = app
            .oneshot(
                Request::post(VALIDATE_PATH)
                    .header("content-type", "application/json")
                    .body(Body::from(body.to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);

        let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        let out: Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(out["response"]["uid"], json!("3f1c2a"));
        assert_eq!(out["response"]["allowed"], json!(false));
    }
}
