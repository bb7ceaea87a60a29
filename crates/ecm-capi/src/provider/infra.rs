//! Infrastructure machine and cluster templates
//!
//! Both infra providers' templates are composed as untyped documents; the
//! Intel provider publishes no schema we link against and the Docker ones
//! only need a handful of fields.

use kube::api::DynamicObject;
use kube::discovery::ApiResource;
use serde_json::{json, Value};

use ecm_common::crd::InfraKind;
use ecm_common::kube_utils::build_api_resource;
use ecm_common::{Error, Result};

use crate::constants::{
    DOCKER_CLUSTER_TEMPLATE_KIND, DOCKER_INFRASTRUCTURE_API_VERSION,
    DOCKER_MACHINE_TEMPLATE_KIND, INTEL_CLUSTER_TEMPLATE_KIND, INTEL_INFRASTRUCTURE_API_VERSION,
    INTEL_MACHINE_TEMPLATE_KIND,
};

/// API version of an infra kind's templates
pub fn api_version(kind: InfraKind) -> &'static str {
    match kind {
        InfraKind::Docker => DOCKER_INFRASTRUCTURE_API_VERSION,
        InfraKind::Intel => INTEL_INFRASTRUCTURE_API_VERSION,
    }
}

/// Machine template kind
pub fn machine_template_kind(kind: InfraKind) -> &'static str {
    match kind {
        InfraKind::Docker => DOCKER_MACHINE_TEMPLATE_KIND,
        InfraKind::Intel => INTEL_MACHINE_TEMPLATE_KIND,
    }
}

/// Cluster template kind
pub fn cluster_template_kind(kind: InfraKind) -> &'static str {
    match kind {
        InfraKind::Docker => DOCKER_CLUSTER_TEMPLATE_KIND,
        InfraKind::Intel => INTEL_CLUSTER_TEMPLATE_KIND,
    }
}

/// ApiResource of the machine template
pub fn machine_template_resource(kind: InfraKind) -> ApiResource {
    build_api_resource(api_version(kind), machine_template_kind(kind))
}

/// ApiResource of the cluster template
pub fn cluster_template_resource(kind: InfraKind) -> ApiResource {
    build_api_resource(api_version(kind), cluster_template_kind(kind))
}

fn document(api_version: &str, kind: &str, namespace: &str, name: &str, spec: Value) -> Result<DynamicObject> {
    serde_json::from_value(json!({
        "apiVersion": api_version,
        "kind": kind,
        "metadata": { "name": name, "namespace": namespace },
        "spec": { "template": { "spec": spec } },
    }))
    .map_err(|e| Error::serialization_for_kind(kind, e.to_string()))
}

/// Control-plane machine template
///
/// Docker machines mount the host's Docker socket so CAPD can run nested
/// containers.
pub fn machine_template(kind: InfraKind, namespace: &str, name: &str) -> Result<DynamicObject> {
    let spec = match kind {
        InfraKind::Docker => json!({
            "extraMounts": [{
                "containerPath": "/var/run/docker.sock",
                "hostPath": "/var/run/docker.sock",
            }],
        }),
        InfraKind::Intel => json!({}),
    };
    document(api_version(kind), machine_template_kind(kind), namespace, name, spec)
}

/// Infrastructure cluster template
///
/// `haproxy_config` names a ConfigMap holding a custom load-balancer config
/// template; only Docker honours it.
pub fn cluster_template(
    kind: InfraKind,
    namespace: &str,
    name: &str,
    haproxy_config: Option<&str>,
) -> Result<DynamicObject> {
    let spec = match (kind, haproxy_config) {
        (InfraKind::Docker, Some(config_map)) => json!({
            "loadBalancer": {
                "customHAProxyConfigTemplateRef": { "name": config_map },
            },
        }),
        _ => json!({}),
    };
    document(api_version(kind), cluster_template_kind(kind), namespace, name, spec)
}

/// HAProxy config template for RKE2 on Docker
///
/// Adds the RKE2 supervisor port (9345) next to the API server so joining
/// nodes can reach the first server through the load balancer.
pub const RKE2_HAPROXY_CONFIG: &str = r#"# generated by cluster-manager
global
  log /dev/log local0
  log /dev/log local1 notice
  daemon

resolvers docker
  nameserver dns 127.0.0.11:53

defaults
  log global
  mode tcp
  option dontlognull
  timeout connect 5000
  timeout client 50000
  timeout server 50000
  default-server init-addr none

frontend stats
  mode http
  bind *:8404
  stats enable
  stats uri /stats
  stats refresh 1s
  stats admin if TRUE

frontend control-plane
  bind *:{{ .FrontendControlPlanePort }}
  {{ if .IPv6 -}}
  bind :::{{ .FrontendControlPlanePort }};
  {{- end }}
  default_backend kube-apiservers

backend kube-apiservers
  option httpchk GET /healthz
  {{range $server, $backend := .BackendServers }}
  server {{ $server }} {{ JoinHostPort $backend.Address $.BackendControlPlanePort }} check check-ssl verify none resolvers docker resolve-prefer {{ if $.IPv6 -}} ipv6 {{- else -}} ipv4 {{- end }}
  {{- end}}

frontend rke2-join
  bind *:9345
  {{ if .IPv6 -}}
  bind :::9345;
  {{- end }}
  default_backend rke2-servers

backend rke2-servers
  option httpchk GET /v1-rke2/readyz
  http-check expect status 403
  {{range $server, $backend := .BackendServers }}
  server {{ $server }} {{ JoinHostPort $backend.Address 9345 }} check check-ssl verify none
  {{- end}}
"#;

#[cfg(test)]
mod tests {
    use super::*;
    use ecm_common::kube_utils::dynamic_str;
    use kube::ResourceExt;

    #[test]
    fn test_docker_machine_template_mounts_socket() {
        let mt = machine_template(InfraKind::Docker, "tenant", "ct-controlplane").unwrap();
        assert_eq!(mt.name_any(), "ct-controlplane");
        assert_eq!(mt.namespace().as_deref(), Some("tenant"));
        assert_eq!(mt.types.as_ref().unwrap().kind, "DockerMachineTemplate");
        assert_eq!(
            dynamic_str(&mt, "/spec/template/spec/extraMounts/0/hostPath"),
            Some("/var/run/docker.sock")
        );
    }

    #[test]
    fn test_intel_templates_are_untyped_v1alpha1() {
        let ct = cluster_template(InfraKind::Intel, "tenant", "ct", Some("ignored")).unwrap();
        let types = ct.types.as_ref().unwrap();
        assert_eq!(types.api_version, "infrastructure.cluster.x-k8s.io/v1alpha1");
        assert_eq!(types.kind, "IntelClusterTemplate");
        assert_eq!(ct.data["spec"]["template"]["spec"], json!({}));
    }

    #[test]
    fn test_docker_cluster_template_references_haproxy_config() {
        let ct = cluster_template(InfraKind::Docker, "tenant", "ct", Some("ct-rke2-class-lb-config"))
            .unwrap();
        assert_eq!(
            dynamic_str(
                &ct,
                "/spec/template/spec/loadBalancer/customHAProxyConfigTemplateRef/name"
            ),
            Some("ct-rke2-class-lb-config")
        );
    }

    #[test]
    fn test_haproxy_config_exposes_supervisor_port() {
        assert!(RKE2_HAPROXY_CONFIG.contains("bind *:9345"));
    }
}
