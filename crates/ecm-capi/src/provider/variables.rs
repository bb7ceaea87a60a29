//! ClusterClass variables and patches shared between strategies

use std::collections::BTreeMap;

use serde_json::json;

use crate::clusterclass::{
    ClusterClassPatch, ClusterClassVariable, JsonPatch, PatchDefinition, PatchSelector,
    PatchSelectorMatch, SchemaProps, VariableSchema,
};
use crate::constants::{
    CONNECT_AGENT_GUARD, DOCKER_KIND_IMAGE_GUARD, K3S_READ_ONLY_COMMAND, READ_ONLY_GUARD,
    VAR_AIR_GAPPED, VAR_CONNECT_AGENT_MANIFEST, VAR_DOCKER_KIND_IMAGE, VAR_READ_ONLY,
};

fn variable(name: &str, schema: SchemaProps) -> ClusterClassVariable {
    ClusterClassVariable {
        name: name.to_string(),
        required: false,
        schema: VariableSchema {
            open_api_v3_schema: schema,
        },
    }
}

/// `connectAgentManifest`: a file entry with path, content and owner
pub fn connect_agent_manifest_variable() -> ClusterClassVariable {
    let properties: BTreeMap<String, SchemaProps> = ["path", "content", "owner"]
        .into_iter()
        .map(|p| (p.to_string(), SchemaProps::scalar("string")))
        .collect();
    variable(
        VAR_CONNECT_AGENT_MANIFEST,
        SchemaProps {
            type_: "object".to_string(),
            description: Some("Static pod manifest for the cluster connect agent".to_string()),
            properties: Some(properties),
            default: None,
        },
    )
}

/// `readOnly`: install k3s into a read-only binary directory
pub fn read_only_variable() -> ClusterClassVariable {
    variable(
        VAR_READ_ONLY,
        SchemaProps::scalar("boolean")
            .with_default(json!(false))
            .with_description("Host root filesystem is read-only"),
    )
}

/// `airGapped`: k3s agents run without registry access
pub fn air_gapped_variable() -> ClusterClassVariable {
    variable(
        VAR_AIR_GAPPED,
        SchemaProps::scalar("boolean")
            .with_default(json!(false))
            .with_description("Nodes have no access to public registries"),
    )
}

/// `dockerKindImage`: node image for Docker machines
pub fn docker_kind_image_variable() -> ClusterClassVariable {
    variable(
        VAR_DOCKER_KIND_IMAGE,
        SchemaProps::scalar("string").with_description("kind node image for Docker machines"),
    )
}

fn control_plane_selector(api_version: &str, kind: &str) -> PatchSelector {
    PatchSelector {
        api_version: api_version.to_string(),
        kind: kind.to_string(),
        match_resources: PatchSelectorMatch {
            control_plane: true,
            infrastructure_cluster: false,
        },
    }
}

fn patch(
    name: &str,
    enabled_if: Option<&str>,
    selector: PatchSelector,
    json_patches: Vec<JsonPatch>,
) -> ClusterClassPatch {
    ClusterClassPatch {
        name: name.to_string(),
        description: None,
        enabled_if: enabled_if.map(String::from),
        definitions: vec![PatchDefinition {
            selector,
            json_patches,
        }],
    }
}

/// Append the connect-agent manifest to the control plane's file list
pub fn connect_agent_patch(cp_api_version: &str, cp_kind: &str, files_path: &str) -> ClusterClassPatch {
    patch(
        VAR_CONNECT_AGENT_MANIFEST,
        Some(CONNECT_AGENT_GUARD),
        control_plane_selector(cp_api_version, cp_kind),
        vec![JsonPatch::from_variable("add", files_path, VAR_CONNECT_AGENT_MANIFEST)],
    )
}

/// Set the kind node image on the control-plane machine template
pub fn docker_kind_image_patch(infra_api_version: &str, machine_kind: &str) -> ClusterClassPatch {
    patch(
        VAR_DOCKER_KIND_IMAGE,
        Some(DOCKER_KIND_IMAGE_GUARD),
        control_plane_selector(infra_api_version, machine_kind),
        vec![JsonPatch::from_variable(
            "add",
            "/spec/template/spec/customImage",
            VAR_DOCKER_KIND_IMAGE,
        )],
    )
}

/// Replace the k3s agent's airGapped flag with `variable`
pub fn air_gapped_patch(cp_api_version: &str, cp_kind: &str, variable: &str) -> ClusterClassPatch {
    patch(
        VAR_AIR_GAPPED,
        None,
        control_plane_selector(cp_api_version, cp_kind),
        vec![JsonPatch::from_variable(
            "replace",
            "/spec/template/spec/kthreesConfigSpec/agentConfig/airGapped",
            variable,
        )],
    )
}

/// Export the read-only install flag before k3s is installed
pub fn read_only_patch(cp_api_version: &str, cp_kind: &str) -> ClusterClassPatch {
    patch(
        VAR_READ_ONLY,
        Some(READ_ONLY_GUARD),
        control_plane_selector(cp_api_version, cp_kind),
        vec![JsonPatch::literal(
            "add",
            "/spec/template/spec/kthreesConfigSpec/preK3sCommands/-",
            json!(K3S_READ_ONLY_COMMAND),
        )],
    )
}
