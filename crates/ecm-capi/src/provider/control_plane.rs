//! Control-plane templates
//!
//! The ClusterTemplate's `clusterConfiguration` is the body of the
//! control-plane template. It is decoded into [`ControlPlaneTemplate`], which
//! fixes the document's outer shape and leaves `spec.template.spec` to the
//! provider. The strategy then stamps identity and kind.

use kube::api::{DynamicObject, ObjectMeta};
use kube::discovery::ApiResource;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use ecm_common::crd::ControlPlaneKind;
use ecm_common::kube_utils::{build_api_resource, to_dynamic};
use ecm_common::{Error, Result};

use crate::constants::{
    K3S_CONTROLPLANE_API_VERSION, K3S_CONTROLPLANE_TEMPLATE_KIND,
    KUBEADM_CONTROLPLANE_API_VERSION, KUBEADM_CONTROLPLANE_TEMPLATE_KIND,
    RKE2_CONTROLPLANE_API_VERSION, RKE2_CONTROLPLANE_TEMPLATE_KIND,
};

/// A control-plane template document
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ControlPlaneTemplate {
    /// API version, overwritten with the provider's
    #[serde(default)]
    pub api_version: String,
    /// Kind, overwritten with the provider's
    #[serde(default)]
    pub kind: String,
    /// Object metadata; name and namespace are overwritten
    #[serde(default)]
    pub metadata: ObjectMeta,
    /// Template spec
    #[serde(default)]
    pub spec: ControlPlaneTemplateSpec,
}

/// `spec` of a control-plane template
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
pub struct ControlPlaneTemplateSpec {
    /// The template resource
    #[serde(default)]
    pub template: ControlPlaneTemplateResource,
}

/// `spec.template` of a control-plane template
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
pub struct ControlPlaneTemplateResource {
    /// Provider-specific control-plane settings
    #[serde(default)]
    pub spec: Map<String, Value>,
}

/// API version of a control-plane kind's template
pub fn api_version(kind: ControlPlaneKind) -> &'static str {
    match kind {
        ControlPlaneKind::Kubeadm => KUBEADM_CONTROLPLANE_API_VERSION,
        ControlPlaneKind::Rke2 => RKE2_CONTROLPLANE_API_VERSION,
        ControlPlaneKind::K3s => K3S_CONTROLPLANE_API_VERSION,
    }
}

/// Template kind of a control-plane kind
pub fn template_kind(kind: ControlPlaneKind) -> &'static str {
    match kind {
        ControlPlaneKind::Kubeadm => KUBEADM_CONTROLPLANE_TEMPLATE_KIND,
        ControlPlaneKind::Rke2 => RKE2_CONTROLPLANE_TEMPLATE_KIND,
        ControlPlaneKind::K3s => K3S_CONTROLPLANE_TEMPLATE_KIND,
    }
}

/// ApiResource of a control-plane kind's template
pub fn template_resource(kind: ControlPlaneKind) -> ApiResource {
    build_api_resource(api_version(kind), template_kind(kind))
}

/// Path of the file list in the template, as a JSON-patch append target
pub fn files_patch_path(kind: ControlPlaneKind) -> &'static str {
    match kind {
        ControlPlaneKind::Kubeadm => "/spec/template/spec/kubeadmConfigSpec/files/-",
        ControlPlaneKind::Rke2 => "/spec/template/spec/files/-",
        ControlPlaneKind::K3s => "/spec/template/spec/kthreesConfigSpec/files/-",
    }
}

/// Decode a template's `clusterConfiguration` into a control-plane template
///
/// Blank configuration yields an empty template. Malformed JSON is an
/// `InvalidConfig` error naming the template.
pub fn parse(kind: ControlPlaneKind, template: &str, config: &str) -> Result<ControlPlaneTemplate> {
    let config = if config.trim().is_empty() { "{}" } else { config };
    let mut cp: ControlPlaneTemplate = serde_json::from_str(config).map_err(|e| {
        Error::invalid_config_field(template, "spec.clusterConfiguration", e.to_string())
    })?;
    cp.api_version = api_version(kind).to_string();
    cp.kind = template_kind(kind).to_string();
    Ok(cp)
}

impl ControlPlaneTemplate {
    /// Set name and namespace, dropping server-populated metadata
    pub fn stamp(mut self, namespace: &str, name: &str) -> Self {
        self.metadata = ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(namespace.to_string()),
            labels: self.metadata.labels,
            annotations: self.metadata.annotations,
            ..Default::default()
        };
        self
    }

    /// Point the control plane at an explicit machine template
    pub fn with_infrastructure_ref(mut self, api_version: &str, kind: &str, name: &str) -> Self {
        self.spec.template.spec.insert(
            "infrastructureRef".to_string(),
            json!({ "apiVersion": api_version, "kind": kind, "name": name }),
        );
        self
    }

    /// The document as a dynamic object
    pub fn into_dynamic(self) -> Result<DynamicObject> {
        to_dynamic(&self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    const RKE2_CONFIG: &str = r#"{
        "apiVersion": "controlplane.cluster.x-k8s.io/v1beta1",
        "kind": "RKE2ControlPlaneTemplate",
        "metadata": {"name": "ignored", "resourceVersion": "12", "labels": {"team": "edge"}},
        "spec": {"template": {"spec": {"serverConfig": {"cni": "calico"}, "files": []}}}
    }"#;

    #[test]
    fn story_configuration_becomes_stamped_template() {
        let cp = parse(ControlPlaneKind::Rke2, "baseline-v1.0.0", RKE2_CONFIG)
            .unwrap()
            .stamp("tenant", "baseline-v1.0.0");

        assert_eq!(cp.kind, "RKE2ControlPlaneTemplate");
        assert_eq!(cp.metadata.name.as_deref(), Some("baseline-v1.0.0"));
        assert_eq!(cp.metadata.namespace.as_deref(), Some("tenant"));
        assert!(cp.metadata.resource_version.is_none());
        assert_eq!(
            cp.metadata.labels.as_ref().and_then(|l| l.get("team")).map(String::as_str),
            Some("edge")
        );
        assert_eq!(cp.spec.template.spec["serverConfig"]["cni"], json!("calico"));
    }

    #[test]
    fn story_malformed_configuration_is_invalid_config() {
        let err = parse(ControlPlaneKind::Kubeadm, "broken-v1.0.0", "{not json").unwrap_err();
        assert_eq!(err.kind(), ecm_common::ErrorKind::InvalidConfig);
        assert_eq!(err.template(), Some("broken-v1.0.0"));
    }

    #[rstest]
    #[case(ControlPlaneKind::Kubeadm, "KubeadmControlPlaneTemplate", "controlplane.cluster.x-k8s.io/v1beta1")]
    #[case(ControlPlaneKind::Rke2, "RKE2ControlPlaneTemplate", "controlplane.cluster.x-k8s.io/v1beta1")]
    #[case(ControlPlaneKind::K3s, "KThreesControlPlaneTemplate", "controlplane.cluster.x-k8s.io/v1beta2")]
    fn test_blank_configuration_yields_typed_empty_template(
        #[case] kind: ControlPlaneKind,
        #[case] expected_kind: &str,
        #[case] expected_version: &str,
    ) {
        let cp = parse(kind, "t-v1.0.0", "  ").unwrap();
        assert_eq!(cp.kind, expected_kind);
        assert_eq!(cp.api_version, expected_version);
        assert!(cp.spec.template.spec.is_empty());
    }

    #[test]
    fn test_infrastructure_ref_is_set_explicitly() {
        let cp = parse(ControlPlaneKind::Rke2, "t-v1.0.0", "{}")
            .unwrap()
            .with_infrastructure_ref(
                "infrastructure.cluster.x-k8s.io/v1alpha1",
                "IntelMachineTemplate",
                "t-v1.0.0-controlplane",
            );
        assert_eq!(
            cp.spec.template.spec["infrastructureRef"]["name"],
            json!("t-v1.0.0-controlplane")
        );
    }
}
