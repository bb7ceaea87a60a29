//! Pod Security Admission configuration for tenant namespaces
//!
//! Each tenant namespace carries a secret with one admission configuration
//! per pod-security level. Workload clusters pick the level they run at.

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::Secret;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use k8s_openapi::ByteString;
use kube::api::DynamicObject;
use tracing::debug;

use ecm_common::kube_utils::{secret_resource, to_dynamic};
use ecm_common::store::ResourceStore;
use ecm_common::Result;

/// Name of the PSA secret in every tenant namespace
pub const PSA_SECRET_NAME: &str = "pod-security-admission-config";

/// Pod-security levels with a built-in configuration
pub const PSA_LEVELS: [&str; 3] = ["privileged", "baseline", "restricted"];

fn admission_configuration(level: &str) -> String {
    format!(
        r#"apiVersion: apiserver.config.k8s.io/v1
kind: AdmissionConfiguration
plugins:
- name: PodSecurity
  configuration:
    apiVersion: pod-security.admission.config.k8s.io/v1
    kind: PodSecurityConfiguration
    defaults:
      enforce: "{level}"
      enforce-version: "latest"
      audit: "{level}"
      audit-version: "latest"
      warn: "{level}"
      warn-version: "latest"
    exemptions:
      usernames: []
      runtimeClasses: []
      namespaces: [kube-system]
"#
    )
}

/// Built-in policy blobs keyed by level
pub fn default_psa_config() -> BTreeMap<String, String> {
    PSA_LEVELS
        .iter()
        .map(|level| (level.to_string(), admission_configuration(level)))
        .collect()
}

/// The PSA secret for a tenant namespace
pub fn psa_secret(namespace: &str, config: &BTreeMap<String, String>) -> Result<DynamicObject> {
    let secret = Secret {
        metadata: ObjectMeta {
            name: Some(PSA_SECRET_NAME.to_string()),
            namespace: Some(namespace.to_string()),
            ..Default::default()
        },
        type_: Some("Opaque".to_string()),
        data: Some(
            config
                .iter()
                .map(|(k, v)| (k.clone(), ByteString(v.as_bytes().to_vec())))
                .collect(),
        ),
        ..Default::default()
    };
    to_dynamic(&secret)
}

/// Create the PSA secret; an existing one is left alone
pub async fn ensure_psa_secret(
    store: &dyn ResourceStore,
    namespace: &str,
    config: &BTreeMap<String, String>,
) -> Result<()> {
    let secret = psa_secret(namespace, config)?;
    match store.create(&secret_resource(), &secret).await {
        Ok(_) => {
            debug!(%namespace, "created PSA secret");
            Ok(())
        }
        Err(e) if e.is_already_exists() => Ok(()),
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ecm_common::store::memory::{MemoryStore, StoreOp};

    #[test]
    fn test_default_config_covers_every_level() {
        let config = default_psa_config();
        assert_eq!(
            config.keys().map(String::as_str).collect::<Vec<_>>(),
            vec!["baseline", "privileged", "restricted"]
        );
        assert!(config["restricted"].contains(r#"enforce: "restricted""#));
    }

    #[test]
    fn test_secret_carries_exactly_the_configured_keys() {
        let config = BTreeMap::from([("baseline".to_string(), "policy".to_string())]);
        let secret = psa_secret("tenant", &config).unwrap();
        assert_eq!(secret.metadata.name.as_deref(), Some(PSA_SECRET_NAME));
        assert_eq!(secret.metadata.namespace.as_deref(), Some("tenant"));
        let data = secret.data["data"].as_object().unwrap();
        assert_eq!(data.keys().collect::<Vec<_>>(), vec!["baseline"]);
        // "policy" base64 encoded
        assert_eq!(data["baseline"], serde_json::json!("cG9saWN5"));
    }

    #[tokio::test]
    async fn test_ensure_is_idempotent() {
        let store = MemoryStore::new();
        let config = default_psa_config();
        ensure_psa_secret(&store, "tenant", &config).await.unwrap();
        ensure_psa_secret(&store, "tenant", &config).await.unwrap();
        assert_eq!(store.calls(StoreOp::Create, "Secret"), 2);
        assert_eq!(store.objects(&secret_resource(), "tenant").len(), 1);
    }
}
