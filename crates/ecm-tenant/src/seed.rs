//! Seed templates installed into every tenant namespace
//!
//! Read once at start-up from a directory of template-info JSON documents.
//! Files are taken in lexicographic order, so the first file is the default
//! template when no preferred default is configured.

use std::path::{Path, PathBuf};

use kube::ResourceExt;
use tracing::{debug, info};

use ecm_common::crd::ClusterTemplate;
use ecm_common::store::{create_typed, ResourceStore};
use ecm_common::template_info::{from_template_info_to_cluster_template, TemplateInfo};
use ecm_common::{Error, Result};

fn io_error(path: &Path, e: std::io::Error) -> Error {
    Error::internal_with_context("seed", format!("{}: {e}", path.display()))
}

/// The `*.json` files in `dir`, sorted by file name
fn template_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for entry in std::fs::read_dir(dir).map_err(|e| io_error(dir, e))? {
        let path = entry.map_err(|e| io_error(dir, e))?.path();
        if path.is_file() && path.extension().is_some_and(|ext| ext == "json") {
            files.push(path);
        }
    }
    files.sort_by(|a, b| a.file_name().cmp(&b.file_name()));
    Ok(files)
}

/// Load the seed templates from `dir`
///
/// The returned templates carry no namespace.
pub fn load_templates(dir: &Path) -> Result<Vec<ClusterTemplate>> {
    let mut templates = Vec::new();
    for path in template_files(dir)? {
        let json = std::fs::read_to_string(&path).map_err(|e| io_error(&path, e))?;
        let info = TemplateInfo::from_json(&json).map_err(|e| {
            Error::serialization_for_kind("TemplateInfo", format!("{}: {e}", path.display()))
        })?;
        let mut ct = from_template_info_to_cluster_template(&info, "")?;
        ct.metadata.namespace = None;
        debug!(file = %path.display(), template = %ct.name_any(), "loaded seed template");
        templates.push(ct);
    }
    info!(dir = %dir.display(), count = templates.len(), "loaded seed templates");
    Ok(templates)
}

/// Install the seed templates in `namespace`; existing ones are kept
pub async fn seed_templates(
    store: &dyn ResourceStore,
    namespace: &str,
    templates: &[ClusterTemplate],
) -> Result<()> {
    for template in templates {
        let mut ct = template.clone();
        ct.metadata.namespace = Some(namespace.to_string());
        ct.metadata.resource_version = None;
        ct.metadata.uid = None;
        match create_typed(store, &ct).await {
            Ok(_) => debug!(%namespace, template = %ct.name_any(), "seeded template"),
            Err(e) if e.is_already_exists() => {}
            Err(e) => return Err(e),
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use ecm_common::kube_utils::HasApiResource;
    use ecm_common::store::memory::MemoryStore;
    use ecm_common::ErrorKind;
    use std::fs;

    fn info(name: &str, version: &str, cp: &str) -> String {
        serde_json::json!({
            "name": name,
            "version": version,
            "description": format!("{name} template"),
            "controlplaneprovidertype": cp,
            "infraprovidertype": "docker",
            "kubernetesVersion": "v1.30.6",
            "clusterconfiguration": {"spec": {"kubeadmConfigSpec": {}}},
            "clusterNetwork": {
                "pods": {"cidrBlocks": ["10.42.0.0/16"]},
                "services": {"cidrBlocks": ["10.43.0.0/16"]},
            },
        })
        .to_string()
    }

    #[test]
    fn test_loads_json_files_in_name_order() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("b-rke2.json"), info("rke2", "v1.0.0", "rke2")).unwrap();
        fs::write(dir.path().join("a-kubeadm.json"), info("baseline", "v2.0.1", "kubeadm")).unwrap();
        fs::write(dir.path().join("README.md"), "not a template").unwrap();

        let templates = load_templates(dir.path()).unwrap();
        let names: Vec<String> = templates.iter().map(|t| t.name_any()).collect();
        assert_eq!(names, vec!["baseline-v2.0.1", "rke2-v1.0.0"]);
        assert!(templates[0].metadata.namespace.is_none());
        assert_eq!(templates[0].description(), Some("baseline template"));
    }

    #[test]
    fn test_empty_directory_has_no_templates() {
        let dir = tempfile::tempdir().unwrap();
        assert!(load_templates(dir.path()).unwrap().is_empty());
    }

    #[test]
    fn test_bad_document_names_the_file() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("broken.json"), "{\"name\": ").unwrap();
        let err = load_templates(dir.path()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidConfig);
        assert!(err.to_string().contains("broken.json"));
    }

    #[test]
    fn test_missing_directory_fails() {
        let dir = tempfile::tempdir().unwrap();
        let err = load_templates(&dir.path().join("absent")).unwrap_err();
        assert!(err.to_string().contains("absent"));
    }

    #[tokio::test]
    async fn test_seeding_twice_keeps_existing_templates() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("a.json"), info("baseline", "v2.0.1", "kubeadm")).unwrap();
        let templates = load_templates(dir.path()).unwrap();

        let store = MemoryStore::new();
        seed_templates(&store, "tenant", &templates).await.unwrap();
        seed_templates(&store, "tenant", &templates).await.unwrap();

        let stored = store.objects(&ClusterTemplate::api_resource(), "tenant");
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].metadata.namespace.as_deref(), Some("tenant"));
    }
}
