//! API versions, kinds and fixed names for the CAPI documents we produce

// =============================================================================
// API Versions
// =============================================================================

/// Core CAPI API version (Cluster, ClusterClass)
pub const CAPI_API_VERSION: &str = "cluster.x-k8s.io/v1beta1";

/// Control-plane API group
pub const CONTROLPLANE_API_GROUP: &str = "controlplane.cluster.x-k8s.io";

/// KubeadmControlPlaneTemplate API version
pub const KUBEADM_CONTROLPLANE_API_VERSION: &str = "controlplane.cluster.x-k8s.io/v1beta1";

/// RKE2ControlPlaneTemplate API version
pub const RKE2_CONTROLPLANE_API_VERSION: &str = "controlplane.cluster.x-k8s.io/v1beta1";

/// KThreesControlPlaneTemplate API version
pub const K3S_CONTROLPLANE_API_VERSION: &str = "controlplane.cluster.x-k8s.io/v1beta2";

/// Docker infrastructure API version
pub const DOCKER_INFRASTRUCTURE_API_VERSION: &str = "infrastructure.cluster.x-k8s.io/v1beta1";

/// Intel infrastructure API version
pub const INTEL_INFRASTRUCTURE_API_VERSION: &str = "infrastructure.cluster.x-k8s.io/v1alpha1";

// =============================================================================
// Kinds
// =============================================================================

/// CAPI Cluster
pub const CLUSTER_KIND: &str = "Cluster";
/// CAPI ClusterClass
pub const CLUSTER_CLASS_KIND: &str = "ClusterClass";
/// Kubeadm control-plane template
pub const KUBEADM_CONTROLPLANE_TEMPLATE_KIND: &str = "KubeadmControlPlaneTemplate";
/// RKE2 control-plane template
pub const RKE2_CONTROLPLANE_TEMPLATE_KIND: &str = "RKE2ControlPlaneTemplate";
/// K3s control-plane template
pub const K3S_CONTROLPLANE_TEMPLATE_KIND: &str = "KThreesControlPlaneTemplate";
/// Docker machine template
pub const DOCKER_MACHINE_TEMPLATE_KIND: &str = "DockerMachineTemplate";
/// Docker cluster template
pub const DOCKER_CLUSTER_TEMPLATE_KIND: &str = "DockerClusterTemplate";
/// Intel machine template
pub const INTEL_MACHINE_TEMPLATE_KIND: &str = "IntelMachineTemplate";
/// Intel cluster template
pub const INTEL_CLUSTER_TEMPLATE_KIND: &str = "IntelClusterTemplate";

// =============================================================================
// Names
// =============================================================================

/// Suffix of the control-plane machine template name
pub const CONTROLPLANE_MACHINE_TEMPLATE_SUFFIX: &str = "-controlplane";

/// Suffix of the RKE2 + Docker load-balancer ConfigMap name
pub const RKE2_LB_CONFIG_SUFFIX: &str = "-rke2-class-lb-config";

/// Key holding the HAProxy template in the load-balancer ConfigMap
pub const LB_CONFIG_KEY: &str = "value";

/// Name of the control-plane machine template for a ClusterTemplate
pub fn control_plane_machine_template_name(template: &str) -> String {
    format!("{template}{CONTROLPLANE_MACHINE_TEMPLATE_SUFFIX}")
}

/// Name of the RKE2 + Docker load-balancer ConfigMap for a ClusterTemplate
pub fn rke2_lb_config_name(template: &str) -> String {
    format!("{template}{RKE2_LB_CONFIG_SUFFIX}")
}

// =============================================================================
// ClusterClass variables
// =============================================================================

/// Object variable carrying the connect-agent static manifest file
pub const VAR_CONNECT_AGENT_MANIFEST: &str = "connectAgentManifest";
/// Boolean variable making the k3s binary directory read-only
pub const VAR_READ_ONLY: &str = "readOnly";
/// Boolean variable for air-gapped k3s agents
pub const VAR_AIR_GAPPED: &str = "airGapped";
/// String variable selecting the kind node image for Docker machines
pub const VAR_DOCKER_KIND_IMAGE: &str = "dockerKindImage";

/// Guard enabling the connect-agent patch only when a manifest path is set
pub const CONNECT_AGENT_GUARD: &str = "{{ if .connectAgentManifest.path }}true{{ end }}";
/// Guard enabling the read-only patch only when `readOnly` is true
pub const READ_ONLY_GUARD: &str = "{{ if .readOnly }}true{{ end }}";
/// Guard enabling the kind image patch only when an image is set
pub const DOCKER_KIND_IMAGE_GUARD: &str = "{{ if .dockerKindImage }}true{{ end }}";

/// Command prepended to k3s installs when `readOnly` is set
pub const K3S_READ_ONLY_COMMAND: &str = "export INSTALL_K3S_BIN_DIR_READ_ONLY=true";

/// Node condition watched by the control-plane MachineHealthCheck
pub const NODE_READY_CONDITION: &str = "Ready";
/// Unhealthy-condition timeout for the control-plane MachineHealthCheck
pub const NODE_UNHEALTHY_TIMEOUT: &str = "300s";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_derived_names() {
        assert_eq!(
            control_plane_machine_template_name("baseline-v1.0.0"),
            "baseline-v1.0.0-controlplane"
        );
        assert_eq!(
            rke2_lb_config_name("baseline-v1.0.0"),
            "baseline-v1.0.0-rke2-class-lb-config"
        );
    }
}
