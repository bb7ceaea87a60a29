//! ClusterClass types and the shared skeleton
//!
//! Only the fields the cluster manager writes are modelled. The skeleton
//! carries the control-plane MachineHealthCheck; provider strategies fill in
//! the three template refs, the variables and the patches.

use std::collections::BTreeMap;

use kube::CustomResource;
use serde::{Deserialize, Serialize};

use ecm_common::kube_utils::HasApiResource;

use crate::constants::{CAPI_API_VERSION, NODE_READY_CONDITION, NODE_UNHEALTHY_TIMEOUT};

/// ClusterClass spec (cluster.x-k8s.io/v1beta1)
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[kube(
    group = "cluster.x-k8s.io",
    version = "v1beta1",
    kind = "ClusterClass",
    plural = "clusterclasses",
    namespaced,
    schema = "disabled",
    derive = "PartialEq"
)]
#[serde(rename_all = "camelCase")]
pub struct ClusterClassSpec {
    /// Infrastructure cluster template
    #[serde(default)]
    pub infrastructure: LocalObjectTemplate,
    /// Control-plane template and its machine infrastructure
    #[serde(default)]
    pub control_plane: ControlPlaneClass,
    /// Worker classes; left to the cluster author
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workers: Option<serde_json::Value>,
    /// Variables a Cluster topology may set
    #[serde(default)]
    pub variables: Vec<ClusterClassVariable>,
    /// JSON patches applied to the templates
    #[serde(default)]
    pub patches: Vec<ClusterClassPatch>,
}

impl HasApiResource for ClusterClass {
    const API_VERSION: &'static str = CAPI_API_VERSION;
    const KIND: &'static str = "ClusterClass";
}

/// A reference to a template in the same namespace
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
pub struct LocalObjectTemplate {
    /// The referenced template
    #[serde(rename = "ref", default)]
    pub template_ref: TemplateRef,
}

impl LocalObjectTemplate {
    /// Reference `kind`/`name` at `api_version` in `namespace`
    pub fn new(api_version: &str, kind: &str, name: &str, namespace: &str) -> Self {
        Self {
            template_ref: TemplateRef {
                api_version: api_version.to_string(),
                kind: kind.to_string(),
                name: name.to_string(),
                namespace: namespace.to_string(),
            },
        }
    }
}

/// Object reference by apiVersion, kind, name and namespace
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct TemplateRef {
    /// API version of the referenced object
    #[serde(default)]
    pub api_version: String,
    /// Kind of the referenced object
    #[serde(default)]
    pub kind: String,
    /// Name of the referenced object
    #[serde(default)]
    pub name: String,
    /// Namespace of the referenced object
    #[serde(default)]
    pub namespace: String,
}

/// Control-plane class
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ControlPlaneClass {
    /// The control-plane template
    #[serde(flatten)]
    pub template: LocalObjectTemplate,
    /// Machine template used for control-plane nodes
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub machine_infrastructure: Option<LocalObjectTemplate>,
    /// Remediation for unhealthy control-plane machines
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub machine_health_check: Option<MachineHealthCheckClass>,
}

/// MachineHealthCheck settings for a class
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MachineHealthCheckClass {
    /// Node conditions that mark a machine unhealthy
    #[serde(default)]
    pub unhealthy_conditions: Vec<UnhealthyCondition>,
}

/// A node condition that marks a machine unhealthy after `timeout`
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
pub struct UnhealthyCondition {
    /// Node condition type
    #[serde(rename = "type")]
    pub type_: String,
    /// Condition status ("Unknown", "False")
    pub status: String,
    /// Duration string, e.g. "300s"
    pub timeout: String,
}

/// A ClusterClass variable declaration
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ClusterClassVariable {
    /// Variable name
    pub name: String,
    /// Whether a topology must set it
    #[serde(default)]
    pub required: bool,
    /// Variable schema
    pub schema: VariableSchema,
}

/// Wrapper around the OpenAPI schema of a variable
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct VariableSchema {
    /// OpenAPI v3 schema
    #[serde(rename = "openAPIV3Schema")]
    pub open_api_v3_schema: SchemaProps,
}

/// The subset of OpenAPI v3 schema properties variables use
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SchemaProps {
    /// JSON type ("string", "boolean", "object")
    #[serde(rename = "type")]
    pub type_: String,
    /// Human-readable description
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Default value
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<serde_json::Value>,
    /// Object properties
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub properties: Option<BTreeMap<String, SchemaProps>>,
}

impl SchemaProps {
    /// A scalar of `type_`
    pub fn scalar(type_: &str) -> Self {
        Self {
            type_: type_.to_string(),
            ..Default::default()
        }
    }

    /// Set the default value
    pub fn with_default(mut self, default: serde_json::Value) -> Self {
        self.default = Some(default);
        self
    }

    /// Set the description
    pub fn with_description(mut self, description: &str) -> Self {
        self.description = Some(description.to_string());
        self
    }
}

/// A named patch with its definitions
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ClusterClassPatch {
    /// Patch name
    pub name: String,
    /// Human-readable description
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Go template evaluating to "true" when the patch applies
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enabled_if: Option<String>,
    /// Selector plus JSON patches
    #[serde(default)]
    pub definitions: Vec<PatchDefinition>,
}

/// JSON patches for the templates a selector matches
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PatchDefinition {
    /// Which templates to patch
    pub selector: PatchSelector,
    /// Patch operations
    #[serde(default)]
    pub json_patches: Vec<JsonPatch>,
}

/// Template selector of a patch definition
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PatchSelector {
    /// API version of the selected templates
    pub api_version: String,
    /// Kind of the selected templates
    pub kind: String,
    /// Which class slots to match
    pub match_resources: PatchSelectorMatch,
}

/// Class slots a patch selector matches
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PatchSelectorMatch {
    /// Match the control-plane template or its machine template
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub control_plane: bool,
    /// Match the infrastructure cluster template
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub infrastructure_cluster: bool,
}

/// One RFC 6902 operation
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct JsonPatch {
    /// "add", "replace" or "remove"
    pub op: String,
    /// JSON pointer into the template
    pub path: String,
    /// Literal value
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<serde_json::Value>,
    /// Value taken from a variable or template
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value_from: Option<JsonPatchValue>,
}

impl JsonPatch {
    /// `op` at `path` with the value of `variable`
    pub fn from_variable(op: &str, path: &str, variable: &str) -> Self {
        Self {
            op: op.to_string(),
            path: path.to_string(),
            value: None,
            value_from: Some(JsonPatchValue {
                variable: Some(variable.to_string()),
                template: None,
            }),
        }
    }

    /// `op` at `path` with a literal value
    pub fn literal(op: &str, path: &str, value: serde_json::Value) -> Self {
        Self {
            op: op.to_string(),
            path: path.to_string(),
            value: Some(value),
            value_from: None,
        }
    }
}

/// Source of a patch value
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
pub struct JsonPatchValue {
    /// Variable name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub variable: Option<String>,
    /// Go template
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub template: Option<String>,
}

/// The generic ClusterClass every strategy starts from
///
/// Control-plane machines are remediated when the node Ready condition stays
/// Unknown or False for 300 seconds.
pub fn skeleton(namespace: &str, name: &str) -> ClusterClass {
    let unhealthy = |status: &str| UnhealthyCondition {
        type_: NODE_READY_CONDITION.to_string(),
        status: status.to_string(),
        timeout: NODE_UNHEALTHY_TIMEOUT.to_string(),
    };

    let mut cc = ClusterClass::new(
        name,
        ClusterClassSpec {
            control_plane: ControlPlaneClass {
                machine_health_check: Some(MachineHealthCheckClass {
                    unhealthy_conditions: vec![unhealthy("Unknown"), unhealthy("False")],
                }),
                ..Default::default()
            },
            ..Default::default()
        },
    );
    cc.metadata.namespace = Some(namespace.to_string());
    cc
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn story_skeleton_guards_control_plane_with_health_check() {
        let cc = skeleton("tenant", "baseline-v1.0.0");
        assert_eq!(cc.metadata.namespace.as_deref(), Some("tenant"));

        let mhc = cc.spec.control_plane.machine_health_check.unwrap();
        let statuses: Vec<_> = mhc
            .unhealthy_conditions
            .iter()
            .map(|c| (c.type_.as_str(), c.status.as_str(), c.timeout.as_str()))
            .collect();
        assert_eq!(
            statuses,
            vec![("Ready", "Unknown", "300s"), ("Ready", "False", "300s")]
        );
        assert!(cc.spec.variables.is_empty());
        assert!(cc.spec.patches.is_empty());
    }

    #[test]
    fn test_wire_shape() {
        let mut cc = skeleton("tenant", "ct");
        cc.spec.control_plane.template = LocalObjectTemplate::new(
            "controlplane.cluster.x-k8s.io/v1beta1",
            "RKE2ControlPlaneTemplate",
            "ct",
            "tenant",
        );
        cc.spec.patches.push(ClusterClassPatch {
            name: "p".to_string(),
            enabled_if: Some("{{ true }}".to_string()),
            definitions: vec![PatchDefinition {
                selector: PatchSelector {
                    api_version: "a/v1".to_string(),
                    kind: "K".to_string(),
                    match_resources: PatchSelectorMatch {
                        control_plane: true,
                        ..Default::default()
                    },
                },
                json_patches: vec![JsonPatch::from_variable("add", "/spec/x", "v")],
            }],
            ..Default::default()
        });

        let value = serde_json::to_value(&cc).unwrap();
        assert_eq!(value["apiVersion"], json!("cluster.x-k8s.io/v1beta1"));
        assert_eq!(value["spec"]["controlPlane"]["ref"]["kind"], json!("RKE2ControlPlaneTemplate"));
        assert_eq!(
            value["spec"]["patches"][0]["definitions"][0]["selector"]["matchResources"],
            json!({"controlPlane": true})
        );
        assert_eq!(
            value["spec"]["patches"][0]["definitions"][0]["jsonPatches"][0],
            json!({"op": "add", "path": "/spec/x", "valueFrom": {"variable": "v"}})
        );
        assert_eq!(value["spec"]["patches"][0]["enabledIf"], json!("{{ true }}"));

        let back: ClusterClass = serde_json::from_value(value).unwrap();
        assert_eq!(back, cc);
    }
}
