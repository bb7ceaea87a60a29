//! Shared Kubernetes utilities using kube-rs
//!
//! The resource store works on `DynamicObject`s addressed by `ApiResource`.
//! Typed resources are converted at the edges with [`to_dynamic`] and
//! [`from_dynamic`].

use std::path::Path;
use std::time::Duration;

use kube::api::DynamicObject;
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::discovery::ApiResource;
use kube::{Client, Config};
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::crd::ClusterTemplate;
use crate::{Error, Result};

// =============================================================================
// HasApiResource Trait
// =============================================================================

/// Trait for types that have a known API group, version, and kind.
///
/// # Example
/// ```ignore
/// impl HasApiResource for ClusterClass {
///     const API_VERSION: &'static str = "cluster.x-k8s.io/v1beta1";
///     const KIND: &'static str = "ClusterClass";
/// }
///
/// let ar = ClusterClass::api_resource();
/// ```
pub trait HasApiResource {
    /// Full API version (e.g., "cluster.x-k8s.io/v1beta1", "v1")
    const API_VERSION: &'static str;
    /// Resource kind (e.g., "ClusterClass")
    const KIND: &'static str;

    /// Build an ApiResource from the type's constants.
    fn api_resource() -> ApiResource {
        build_api_resource(Self::API_VERSION, Self::KIND)
    }
}

impl HasApiResource for ClusterTemplate {
    const API_VERSION: &'static str = "edge-orchestrator.intel.com/v1alpha1";
    const KIND: &'static str = "ClusterTemplate";
}

/// Core ConfigMap
pub fn config_map_resource() -> ApiResource {
    build_api_resource("v1", "ConfigMap")
}

/// Core Secret
pub fn secret_resource() -> ApiResource {
    build_api_resource("v1", "Secret")
}

/// Build an ApiResource from an apiVersion string and kind
pub fn build_api_resource(api_version: &str, kind: &str) -> ApiResource {
    let (group, version) = parse_api_version(api_version);
    ApiResource {
        group,
        version,
        kind: kind.to_string(),
        api_version: api_version.to_string(),
        plural: pluralize_kind(kind),
    }
}

/// Parse API version into (group, version) tuple
///
/// ```ignore
/// assert_eq!(parse_api_version("cluster.x-k8s.io/v1beta1"), ("cluster.x-k8s.io".into(), "v1beta1".into()));
/// assert_eq!(parse_api_version("v1"), ("".into(), "v1".into()));
/// ```
pub fn parse_api_version(api_version: &str) -> (String, String) {
    match api_version.split_once('/') {
        Some((group, version)) => (group.to_string(), version.to_string()),
        None => (String::new(), api_version.to_string()),
    }
}

/// Known kind → plural mappings for the resources the cluster manager touches
const KIND_PLURALS: &[(&str, &str)] = &[
    ("clusterclass", "clusterclasses"),
    ("cluster", "clusters"),
    ("clustertemplate", "clustertemplates"),
    ("kubeadmcontrolplanetemplate", "kubeadmcontrolplanetemplates"),
    ("rke2controlplanetemplate", "rke2controlplanetemplates"),
    ("kthreescontrolplanetemplate", "kthreescontrolplanetemplates"),
    ("dockermachinetemplate", "dockermachinetemplates"),
    ("dockerclustertemplate", "dockerclustertemplates"),
    ("intelmachinetemplate", "intelmachinetemplates"),
    ("intelclustertemplate", "intelclustertemplates"),
    ("runtimeproject", "runtimeprojects"),
    ("projectwatcher", "projectwatchers"),
    ("projectactivewatcher", "projectactivewatchers"),
];

/// Pluralize a Kubernetes resource kind
///
/// Uses a lookup table for known CAPI/platform types, falling back to
/// simple pluralization rules for unknown types.
pub fn pluralize_kind(kind: &str) -> String {
    let lower = kind.to_lowercase();

    if let Some((_, plural)) = KIND_PLURALS.iter().find(|(singular, _)| *singular == lower) {
        return (*plural).to_string();
    }

    if lower.ends_with('s') || lower.ends_with("ch") || lower.ends_with("sh") {
        format!("{}es", lower)
    } else if lower.ends_with('y') && !lower.ends_with("ay") && !lower.ends_with("ey") {
        format!("{}ies", &lower[..lower.len() - 1])
    } else {
        format!("{}s", lower)
    }
}

/// Stable key for a resource type, `group/version/plural`
pub fn gvr_key(ar: &ApiResource) -> String {
    format!("{}/{}/{}", ar.group, ar.version, ar.plural)
}

/// Convert a typed object into a DynamicObject
pub fn to_dynamic<K: Serialize>(obj: &K) -> Result<DynamicObject> {
    let value = serde_json::to_value(obj).map_err(|e| Error::serialization(e.to_string()))?;
    serde_json::from_value(value).map_err(|e| Error::serialization(e.to_string()))
}

/// Convert a DynamicObject into a typed object
pub fn from_dynamic<K: DeserializeOwned>(obj: DynamicObject) -> Result<K> {
    let kind = obj
        .types
        .as_ref()
        .map(|t| t.kind.clone())
        .unwrap_or_default();
    let value = serde_json::to_value(obj).map_err(|e| Error::serialization(e.to_string()))?;
    serde_json::from_value(value).map_err(|e| Error::serialization_for_kind(kind, e.to_string()))
}

/// Read a string at a JSON pointer inside a DynamicObject's body
pub fn dynamic_str<'a>(obj: &'a DynamicObject, pointer: &str) -> Option<&'a str> {
    obj.data.pointer(pointer).and_then(|v| v.as_str())
}

/// Default connection timeout for kube clients
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
/// Default read timeout for kube clients (longer than the watch timeout)
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(30);

/// Create a kube client from an optional kubeconfig path
pub async fn create_client(kubeconfig: Option<&Path>) -> Result<Client> {
    let mut config = match kubeconfig {
        Some(path) => {
            let kubeconfig = Kubeconfig::read_from(path).map_err(|e| {
                Error::internal_with_context(
                    "create_client",
                    format!("failed to read kubeconfig: {}", e),
                )
            })?;
            Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default())
                .await
                .map_err(|e| {
                    Error::internal_with_context(
                        "create_client",
                        format!("failed to load kubeconfig: {}", e),
                    )
                })?
        }
        None => Config::infer().await.map_err(|e| {
            Error::internal_with_context("create_client", format!("failed to infer config: {}", e))
        })?,
    };
    config.connect_timeout = Some(DEFAULT_CONNECT_TIMEOUT);
    config.read_timeout = Some(DEFAULT_READ_TIMEOUT);
    Client::try_from(config).map_err(|e| {
        Error::internal_with_context("create_client", format!("failed to create client: {}", e))
    })
}
