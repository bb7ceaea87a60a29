//! ClusterTemplate Custom Resource Definition
//!
//! A ClusterTemplate is the tenant-facing description of how edge clusters
//! are built. The template controller expands it into a provider-specific
//! bundle (control-plane template, machine template, infrastructure cluster
//! template, prerequisites and a ClusterClass).

use std::collections::BTreeMap;

use kube::{CustomResource, ResourceExt};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::types::{
    find_condition, ClusterNetwork, Condition, ControlPlaneKind, InfraKind,
};
use crate::labels::{validate_labels, DEFAULT_TEMPLATE_LABEL_KEY, DEFAULT_TEMPLATE_LABEL_VALUE};
use crate::names::split_name_version;
use crate::{Error, Result};

/// API group of the ClusterTemplate CRD
pub const CLUSTER_TEMPLATE_GROUP: &str = "edge-orchestrator.intel.com";

/// Finalizer held while the template's prerequisites exist
pub const CLUSTER_TEMPLATE_FINALIZER: &str = "edge-orchestrator.intel.com/clustertemplate";

/// Annotation carrying the human-readable template description
pub const DESCRIPTION_ANNOTATION: &str = "edge-orchestrator.intel.com/description";

/// Condition: prerequisite side objects exist
pub const CONDITION_PREREQUISITES: &str = "Prerequisites";
/// Condition: control-plane template exists
pub const CONDITION_CONTROL_PLANE_TEMPLATE: &str = "ControlPlaneTemplate";
/// Condition: control-plane machine template exists
pub const CONDITION_CONTROL_PLANE_MACHINE_TEMPLATE: &str = "ControlPlaneMachineTemplate";
/// Condition: infrastructure cluster template exists
pub const CONDITION_INFRA_CLUSTER_TEMPLATE: &str = "InfraProviderClusterTemplate";
/// Condition: ClusterClass exists
pub const CONDITION_CLUSTER_CLASS: &str = "ClusterClass";
/// Summary condition: all of the above are true
pub const CONDITION_READY: &str = "Ready";

/// Per-step conditions in reconcile order
pub const STEP_CONDITIONS: [&str; 5] = [
    CONDITION_CONTROL_PLANE_TEMPLATE,
    CONDITION_PREREQUISITES,
    CONDITION_CONTROL_PLANE_MACHINE_TEMPLATE,
    CONDITION_INFRA_CLUSTER_TEMPLATE,
    CONDITION_CLUSTER_CLASS,
];

/// Specification for a ClusterTemplate
///
/// The spec is immutable after creation; the admission webhook rejects edits.
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "edge-orchestrator.intel.com",
    version = "v1alpha1",
    kind = "ClusterTemplate",
    plural = "clustertemplates",
    shortname = "ct",
    status = "ClusterTemplateStatus",
    namespaced,
    derive = "PartialEq",
    printcolumn = r#"{"name":"ControlPlane","type":"string","jsonPath":".spec.controlPlaneProviderType"}"#,
    printcolumn = r#"{"name":"Infra","type":"string","jsonPath":".spec.infraProviderType"}"#,
    printcolumn = r#"{"name":"K8s","type":"string","jsonPath":".spec.kubernetesVersion"}"#,
    printcolumn = r#"{"name":"Ready","type":"boolean","jsonPath":".status.ready"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct ClusterTemplateSpec {
    /// Control-plane provider: kubeadm, rke2 or k3s
    ///
    /// Kept as a string so templates written by older releases with a since
    /// removed provider still deserialize and can be reported as unsupported.
    pub control_plane_provider_type: String,

    /// Infrastructure provider: docker or intel
    pub infra_provider_type: String,

    /// Kubernetes version of derived clusters (e.g. "v1.30.6+rke2r1")
    pub kubernetes_version: String,

    /// Control-plane template document as JSON, understood by the control-plane provider
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cluster_configuration: Option<String>,

    /// Pod and service networks of derived clusters
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cluster_network: Option<ClusterNetwork>,

    /// User labels copied onto derived Clusters
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cluster_labels: Option<BTreeMap<String, String>>,
}

impl ClusterTemplateSpec {
    /// Parsed control-plane kind
    pub fn control_plane_kind(&self) -> Result<ControlPlaneKind> {
        self.control_plane_provider_type.parse()
    }

    /// Parsed infrastructure kind
    pub fn infra_kind(&self) -> Result<InfraKind> {
        self.infra_provider_type.parse()
    }

    /// The cluster configuration, with an absent or blank value read as `{}`
    pub fn cluster_configuration_or_empty(&self) -> &str {
        match self.cluster_configuration.as_deref() {
            Some(cfg) if !cfg.trim().is_empty() => cfg,
            _ => "{}",
        }
    }

    /// Validate the spec of a template named `name`
    pub fn validate(&self, name: &str) -> Result<()> {
        split_name_version(name)?;

        self.control_plane_kind().map_err(|e| {
            Error::invalid_config_field(name, "spec.controlPlaneProviderType", e.to_string())
        })?;
        self.infra_kind().map_err(|e| {
            Error::invalid_config_field(name, "spec.infraProviderType", e.to_string())
        })?;

        if self.kubernetes_version.trim().is_empty() {
            return Err(Error::invalid_config_field(
                name,
                "spec.kubernetesVersion",
                "kubernetes version cannot be empty",
            ));
        }

        serde_json::from_str::<serde_json::Value>(self.cluster_configuration_or_empty())
            .map_err(|e| {
                Error::invalid_config_field(name, "spec.clusterConfiguration", e.to_string())
            })?;

        if let Some(labels) = &self.cluster_labels {
            validate_labels(labels).map_err(|e| {
                Error::invalid_config_field(name, "spec.clusterLabels", e.to_string())
            })?;
        }
        Ok(())
    }
}

/// Reference from a template to its ClusterClass
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ClusterClassRef {
    /// API version of the ClusterClass
    pub api_version: String,
    /// Kind (always ClusterClass)
    pub kind: String,
    /// Name of the ClusterClass
    pub name: String,
    /// Namespace of the ClusterClass
    pub namespace: String,
}

/// Status for a ClusterTemplate
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ClusterTemplateStatus {
    /// Per-step conditions plus the summarized Ready condition
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,

    /// True iff the Ready condition is True
    #[serde(default)]
    pub ready: bool,

    /// Number of ensure steps completed by the latest reconcile; absent while deleting
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step: Option<u32>,

    /// The generated ClusterClass, set once it exists
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cluster_class_ref: Option<ClusterClassRef>,
}

impl ClusterTemplateStatus {
    /// Find a condition by type
    pub fn condition(&self, type_: &str) -> Option<&Condition> {
        find_condition(&self.conditions, type_)
    }

    /// True if the named condition exists and is True
    pub fn is_condition_true(&self, type_: &str) -> bool {
        self.condition(type_).is_some_and(Condition::is_true)
    }
}

impl ClusterTemplate {
    /// True once a deletion timestamp is set
    pub fn is_deleting(&self) -> bool {
        self.metadata.deletion_timestamp.is_some()
    }

    /// True if the template controller's finalizer is present
    pub fn has_finalizer(&self) -> bool {
        self.finalizers()
            .iter()
            .any(|f| f == CLUSTER_TEMPLATE_FINALIZER)
    }

    /// True if this template is its namespace's default
    pub fn is_default(&self) -> bool {
        self.labels()
            .get(DEFAULT_TEMPLATE_LABEL_KEY)
            .is_some_and(|v| v == DEFAULT_TEMPLATE_LABEL_VALUE)
    }

    /// The description annotation, if any
    pub fn description(&self) -> Option<&str> {
        self.annotations()
            .get(DESCRIPTION_ANNOTATION)
            .map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kube::CustomResourceExt;

    fn spec() -> ClusterTemplateSpec {
        ClusterTemplateSpec {
            control_plane_provider_type: "kubeadm".to_string(),
            infra_provider_type: "docker".to_string(),
            kubernetes_version: "v1.30.6".to_string(),
            cluster_configuration: Some(r#"{"kind":"KubeadmControlPlaneTemplate"}"#.to_string()),
            cluster_network: None,
            cluster_labels: None,
        }
    }

    #[test]
    fn test_crd_has_expected_names() {
        let crd = ClusterTemplate::crd();
        assert_eq!(
            crd.metadata.name.as_deref(),
            Some("clustertemplates.edge-orchestrator.intel.com")
        );
        assert_eq!(crd.spec.scope, "Namespaced");
        assert_eq!(crd.spec.group, CLUSTER_TEMPLATE_GROUP);
    }

    #[test]
    fn test_valid_spec_passes() {
        assert!(spec().validate("baseline-v1.0.0").is_ok());
    }

    #[test]
    fn test_name_must_carry_a_version() {
        let err = spec().validate("baseline").unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::InvalidConfig);
    }

    #[test]
    fn test_unknown_provider_is_rejected_with_field() {
        let mut s = spec();
        s.control_plane_provider_type = "talos".to_string();
        match s.validate("baseline-v1.0.0").unwrap_err() {
            Error::InvalidConfig { field, .. } => {
                assert_eq!(field.as_deref(), Some("spec.controlPlaneProviderType"))
            }
            other => panic!("unexpected error {other}"),
        }
    }

    #[test]
    fn test_malformed_configuration_is_rejected() {
        let mut s = spec();
        s.cluster_configuration = Some("{not json".to_string());
        assert!(s.validate("baseline-v1.0.0").is_err());
    }

    #[test]
    fn test_blank_configuration_reads_as_empty_object() {
        let mut s = spec();
        s.cluster_configuration = Some("  ".to_string());
        assert_eq!(s.cluster_configuration_or_empty(), "{}");
        assert!(s.validate("baseline-v1.0.0").is_ok());
    }

    #[test]
    fn test_bad_cluster_labels_are_rejected() {
        let mut s = spec();
        s.cluster_labels = Some(BTreeMap::from([(
            "bad key".to_string(),
            "x".to_string(),
        )]));
        assert!(s.validate("baseline-v1.0.0").is_err());
    }

    #[test]
    fn test_default_marker_and_finalizer() {
        let mut ct = ClusterTemplate::new("baseline-v1.0.0", spec());
        assert!(!ct.is_default());
        assert!(!ct.has_finalizer());
        ct.metadata.labels = Some(BTreeMap::from([(
            "default".to_string(),
            "true".to_string(),
        )]));
        ct.metadata.finalizers = Some(vec![CLUSTER_TEMPLATE_FINALIZER.to_string()]);
        assert!(ct.is_default());
        assert!(ct.has_finalizer());
    }

    #[test]
    fn test_status_serializes_camel_case() {
        let status = ClusterTemplateStatus {
            ready: true,
            step: Some(5),
            cluster_class_ref: Some(ClusterClassRef {
                api_version: "cluster.x-k8s.io/v1beta1".to_string(),
                kind: "ClusterClass".to_string(),
                name: "baseline-v1.0.0".to_string(),
                namespace: "tenant".to_string(),
            }),
            ..Default::default()
        };
        let json = serde_json::to_value(&status).unwrap();
        assert_eq!(json["clusterClassRef"]["apiVersion"], "cluster.x-k8s.io/v1beta1");
        assert_eq!(json["ready"], true);
    }
}
