//! Template info documents
//!
//! `TemplateInfo` is the wire shape of a template as seen by the REST layer
//! and as stored in the seed-template directory (one JSON file per template).
//! It carries the logical name and version separately; the ClusterTemplate
//! object joins them into its name.

use std::collections::BTreeMap;

use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use serde::{Deserialize, Serialize};

use crate::crd::{ClusterNetwork, ClusterTemplate, ClusterTemplateSpec, DESCRIPTION_ANNOTATION};
use crate::names::{join_name_version, split_name_version};
use crate::{Error, Result};

/// A template as exchanged with the REST layer and seed files
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
pub struct TemplateInfo {
    /// Logical template name
    pub name: String,
    /// Template version, `vX.Y.Z[suffix]`
    pub version: String,
    /// Human-readable description
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Control-plane provider (kubeadm, rke2, k3s)
    #[serde(rename = "controlplaneprovidertype")]
    pub control_plane_provider_type: String,
    /// Infrastructure provider (docker, intel)
    #[serde(rename = "infraprovidertype")]
    pub infra_provider_type: String,
    /// Kubernetes version
    #[serde(rename = "kubernetesVersion")]
    pub kubernetes_version: String,
    /// Control-plane template document
    #[serde(
        rename = "clusterconfiguration",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub cluster_configuration: Option<serde_json::Value>,
    /// Pod and service networks
    #[serde(
        rename = "clusterNetwork",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub cluster_network: Option<ClusterNetwork>,
    /// Labels copied to derived clusters
    #[serde(
        rename = "cluster-labels",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub cluster_labels: Option<BTreeMap<String, String>>,
}

impl TemplateInfo {
    /// Decode a template info JSON document
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json)
            .map_err(|e| Error::serialization_for_kind("TemplateInfo", e.to_string()))
    }

    /// The ClusterTemplate object name for this template
    pub fn object_name(&self) -> Result<String> {
        join_name_version(&self.name, &self.version)
    }
}

/// Convert a template info document into a ClusterTemplate in `namespace`
pub fn from_template_info_to_cluster_template(
    info: &TemplateInfo,
    namespace: &str,
) -> Result<ClusterTemplate> {
    let name = info.object_name()?;

    let cluster_configuration = info
        .cluster_configuration
        .as_ref()
        .map(serde_json::to_string)
        .transpose()
        .map_err(|e| Error::serialization_for_kind("ClusterTemplate", e.to_string()))?;

    let annotations = info
        .description
        .as_ref()
        .map(|d| BTreeMap::from([(DESCRIPTION_ANNOTATION.to_string(), d.clone())]));

    Ok(ClusterTemplate {
        metadata: ObjectMeta {
            name: Some(name),
            namespace: Some(namespace.to_string()),
            annotations,
            ..Default::default()
        },
        spec: ClusterTemplateSpec {
            control_plane_provider_type: info.control_plane_provider_type.clone(),
            infra_provider_type: info.infra_provider_type.clone(),
            kubernetes_version: info.kubernetes_version.clone(),
            cluster_configuration,
            cluster_network: info.cluster_network.clone(),
            cluster_labels: info.cluster_labels.clone(),
        },
        status: None,
    })
}

/// Convert a ClusterTemplate back into its template info document
pub fn from_cluster_template_to_template_info(ct: &ClusterTemplate) -> Result<TemplateInfo> {
    let full_name = ct
        .metadata
        .name
        .as_deref()
        .ok_or_else(|| Error::validation("cluster template has no name"))?;
    let (name, version) = split_name_version(full_name)?;

    let cluster_configuration = ct
        .spec
        .cluster_configuration
        .as_deref()
        .filter(|c| !c.trim().is_empty())
        .map(serde_json::from_str::<serde_json::Value>)
        .transpose()
        .map_err(|e| {
            Error::invalid_config_field(full_name, "spec.clusterConfiguration", e.to_string())
        })?;

    Ok(TemplateInfo {
        name,
        version,
        description: ct.description().map(String::from),
        control_plane_provider_type: ct.spec.control_plane_provider_type.clone(),
        infra_provider_type: ct.spec.infra_provider_type.clone(),
        kubernetes_version: ct.spec.kubernetes_version.clone(),
        cluster_configuration,
        cluster_network: ct.spec.cluster_network.clone(),
        cluster_labels: ct.spec.cluster_labels.clone(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::NetworkRanges;

    const SEED: &str = r#"{
        "name": "baseline",
        "version": "v2.0.1",
        "description": "Baseline cluster template",
        "controlplaneprovidertype": "rke2",
        "infraprovidertype": "intel",
        "kubernetesVersion": "v1.30.6+rke2r1",
        "clusterconfiguration": {
            "kind": "RKE2ControlPlaneTemplate",
            "apiVersion": "controlplane.cluster.x-k8s.io/v1beta1",
            "spec": {"template": {"spec": {"serverConfig": {"cni": "calico"}}}}
        },
        "clusterNetwork": {
            "pods": {"cidrBlocks": ["10.42.0.0/16"]},
            "services": {"cidrBlocks": ["10.43.0.0/16"]}
        },
        "cluster-labels": {"default-extension": "baseline"}
    }"#;

    /// Story: a seed file becomes a ClusterTemplate and converts back unchanged
    #[test]
    fn story_seed_file_round_trips_through_cluster_template() {
        let info = TemplateInfo::from_json(SEED).unwrap();
        let ct = from_template_info_to_cluster_template(&info, "tenant-a").unwrap();

        assert_eq!(ct.metadata.name.as_deref(), Some("baseline-v2.0.1"));
        assert_eq!(ct.metadata.namespace.as_deref(), Some("tenant-a"));
        assert_eq!(ct.description(), Some("Baseline cluster template"));
        assert_eq!(ct.spec.control_plane_provider_type, "rke2");
        assert_eq!(
            ct.spec.cluster_network.as_ref().unwrap().pods,
            Some(NetworkRanges {
                cidr_blocks: vec!["10.42.0.0/16".to_string()]
            })
        );

        let back = from_cluster_template_to_template_info(&ct).unwrap();
        assert_eq!(back, info);
    }

    #[test]
    fn test_missing_version_is_rejected() {
        let mut info = TemplateInfo::from_json(SEED).unwrap();
        info.version = "2.0.1".to_string();
        assert!(from_template_info_to_cluster_template(&info, "ns").is_err());
    }

    #[test]
    fn test_unversioned_object_name_is_rejected() {
        let info = TemplateInfo::from_json(SEED).unwrap();
        let mut ct = from_template_info_to_cluster_template(&info, "ns").unwrap();
        ct.metadata.name = Some("baseline".to_string());
        assert!(from_cluster_template_to_template_info(&ct).is_err());
    }

    #[test]
    fn test_malformed_document_is_a_serialization_error() {
        let err = TemplateInfo::from_json("{\"name\": 1}").unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::InvalidConfig);
    }
}
