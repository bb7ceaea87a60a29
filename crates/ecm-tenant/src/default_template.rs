//! Default-template election
//!
//! Every tenant namespace has exactly one ClusterTemplate labelled
//! `default=true`. Clusters created without naming a template use it.

use kube::ResourceExt;
use tracing::{debug, info, instrument, warn};

use ecm_common::crd::ClusterTemplate;
use ecm_common::labels::{
    DEFAULT_TEMPLATE_LABEL_KEY, DEFAULT_TEMPLATE_LABEL_VALUE, DEFAULT_TEMPLATE_SELECTOR,
};
use ecm_common::names::{parse_version, split_name_version};
use ecm_common::retry::{retry_on_conflict, RetryConfig};
use ecm_common::store::{get_typed_fresh, list_typed, update_typed, ListOptions, ResourceStore};
use ecm_common::{Error, Result};

/// The namespace's default template
///
/// Fails with `DefaultNotFound` unless exactly one template carries the
/// default label.
pub async fn get_default_template(
    store: &dyn ResourceStore,
    namespace: &str,
) -> Result<ClusterTemplate> {
    let mut matches: Vec<ClusterTemplate> = list_typed(
        store,
        namespace,
        &ListOptions::labels(DEFAULT_TEMPLATE_SELECTOR),
    )
    .await?;
    match matches.len() {
        1 => Ok(matches.remove(0)),
        n => Err(Error::default_not_found(namespace, n)),
    }
}

/// Add or remove the default label under conflict retry
async fn set_default_label(
    store: &dyn ResourceStore,
    namespace: &str,
    name: &str,
    default: bool,
) -> Result<()> {
    retry_on_conflict(&RetryConfig::conflict(), "set_default_label", || async move {
        let mut ct: ClusterTemplate = get_typed_fresh(store, namespace, name).await?;
        if ct.is_default() == default {
            return Ok(());
        }
        let labels = ct.labels_mut();
        if default {
            labels.insert(
                DEFAULT_TEMPLATE_LABEL_KEY.to_string(),
                DEFAULT_TEMPLATE_LABEL_VALUE.to_string(),
            );
        } else {
            labels.remove(DEFAULT_TEMPLATE_LABEL_KEY);
        }
        update_typed(store, &ct).await.map(|_| ())
    })
    .await
}

/// Resolve a template reference against `names`
///
/// An exact name wins. Otherwise `wanted` is a logical name and the highest
/// version carrying it is chosen.
pub fn resolve_template_name<'a>(names: &'a [String], wanted: &str) -> Option<&'a str> {
    if let Some(exact) = names.iter().find(|n| *n == wanted) {
        return Some(exact.as_str());
    }
    names
        .iter()
        .filter_map(|n| {
            let (logical, version) = split_name_version(n).ok()?;
            (logical == wanted).then(|| (parse_version(&version), n.as_str()))
        })
        .max_by(|a, b| a.0.cmp(&b.0))
        .map(|(_, name)| name)
}

async fn confirm_exists(
    store: &dyn ResourceStore,
    namespace: &str,
    name: &str,
) -> Result<Option<String>> {
    match get_typed_fresh::<ClusterTemplate>(store, namespace, name).await {
        Ok(_) => Ok(Some(name.to_string())),
        Err(e) if e.is_not_found() => {
            debug!(template = %name, "preferred default template not in namespace");
            Ok(None)
        }
        Err(e) => Err(e),
    }
}

/// Make sure the namespace has a default template and return its name
///
/// An existing default with a supported control plane is kept. One left
/// behind by an older release with a since removed provider loses the
/// label. The replacement is `preferred` when it names a template in the
/// namespace, either exactly or by logical name, else the first seed
/// template.
#[instrument(skip(store, seeds))]
pub async fn elect_default_template(
    store: &dyn ResourceStore,
    namespace: &str,
    seeds: &[ClusterTemplate],
    preferred: Option<&str>,
) -> Result<String> {
    let current: Vec<ClusterTemplate> = list_typed(
        store,
        namespace,
        &ListOptions::labels(DEFAULT_TEMPLATE_SELECTOR),
    )
    .await?;

    for ct in &current {
        if ct.spec.control_plane_kind().is_ok() {
            debug!(template = %ct.name_any(), "default template already set");
            return Ok(ct.name_any());
        }
        warn!(
            template = %ct.name_any(),
            control_plane = %ct.spec.control_plane_provider_type,
            "dropping default label from template with unsupported control plane"
        );
        set_default_label(store, namespace, &ct.name_any(), false).await?;
    }

    let preferred = match preferred.filter(|p| !p.is_empty()) {
        Some(wanted) => {
            let in_namespace: Vec<ClusterTemplate> =
                list_typed(store, namespace, &ListOptions::default()).await?;
            let candidates: Vec<String> = seeds
                .iter()
                .chain(&in_namespace)
                .map(|ct| ct.name_any())
                .collect();
            match resolve_template_name(&candidates, wanted) {
                Some(name) => confirm_exists(store, namespace, name).await?,
                None => {
                    debug!(preferred = %wanted, "preferred default template not in namespace");
                    None
                }
            }
        }
        None => None,
    };

    let chosen = match preferred.or_else(|| seeds.first().map(|ct| ct.name_any())) {
        Some(name) => name,
        None => {
            return Err(Error::validation(format!(
                "no templates available to make default in {namespace}"
            )))
        }
    };

    set_default_label(store, namespace, &chosen, true).await?;
    info!(template = %chosen, "elected default template");
    Ok(chosen)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ecm_common::crd::ClusterTemplateSpec;
    use ecm_common::kube_utils::{to_dynamic, HasApiResource};
    use ecm_common::store::memory::{MemoryStore, StoreOp};
    use ecm_common::ErrorKind;
    use rstest::rstest;

    const NS: &str = "tenant";

    fn template(name: &str, cp: &str, default: bool) -> ClusterTemplate {
        let mut ct = ClusterTemplate::new(
            name,
            ClusterTemplateSpec {
                control_plane_provider_type: cp.to_string(),
                infra_provider_type: "docker".to_string(),
                kubernetes_version: "v1.30.6".to_string(),
                ..Default::default()
            },
        );
        ct.metadata.namespace = Some(NS.to_string());
        if default {
            ct.labels_mut()
                .insert("default".to_string(), "true".to_string());
        }
        ct
    }

    fn store_with(templates: &[ClusterTemplate]) -> MemoryStore {
        let store = MemoryStore::new();
        for ct in templates {
            store.seed(&ClusterTemplate::api_resource(), to_dynamic(ct).unwrap());
        }
        store
    }

    fn seeds() -> Vec<ClusterTemplate> {
        vec![
            template("baseline-v2.0.1", "kubeadm", false),
            template("rke2-v1.0.0", "rke2", false),
        ]
    }

    async fn defaults(store: &MemoryStore) -> Vec<String> {
        list_typed::<ClusterTemplate>(store, NS, &ListOptions::labels(DEFAULT_TEMPLATE_SELECTOR))
            .await
            .unwrap()
            .iter()
            .map(|ct| ct.name_any())
            .collect()
    }

    #[rstest]
    #[case(None, "baseline-v2.0.1")]
    #[case(Some("rke2-v1.0.0"), "rke2-v1.0.0")]
    #[case(Some("missing-v9.9.9"), "baseline-v2.0.1")]
    #[case(Some(""), "baseline-v2.0.1")]
    #[case(Some("rke2"), "rke2-v1.0.0")]
    #[case(Some("baseline"), "baseline-v2.0.1")]
    #[tokio::test]
    async fn test_election_choice(#[case] preferred: Option<&str>, #[case] expected: &str) {
        let store = store_with(&seeds());
        let chosen = elect_default_template(&store, NS, &seeds(), preferred)
            .await
            .unwrap();
        assert_eq!(chosen, expected);
        assert_eq!(defaults(&store).await, vec![expected.to_string()]);
    }

    #[rstest]
    #[case("restricted", Some("restricted-v1.10.0"))]
    #[case("restricted-v1.2.0", Some("restricted-v1.2.0"))]
    #[case("baseline", Some("baseline-v2.0.1"))]
    #[case("privileged", None)]
    fn test_resolve_template_name(#[case] wanted: &str, #[case] expected: Option<&str>) {
        let names: Vec<String> = [
            "baseline-v2.0.1",
            "restricted-v1.2.0",
            "restricted-v1.10.0",
            "restricted-v1.10.0-rc1",
        ]
        .map(String::from)
        .to_vec();
        assert_eq!(resolve_template_name(&names, wanted), expected);
    }

    /// Story: the operator names the default by its logical name only
    #[tokio::test]
    async fn story_logical_default_name_picks_newest_version() {
        let seeds = vec![
            template("baseline-v2.0.1", "kubeadm", false),
            template("restricted-v1.0.0", "kubeadm", false),
            template("restricted-v1.1.0", "kubeadm", false),
        ];
        let store = store_with(&seeds);

        let chosen = elect_default_template(&store, NS, &seeds, Some("restricted"))
            .await
            .unwrap();
        assert_eq!(chosen, "restricted-v1.1.0");
        assert_eq!(defaults(&store).await, vec!["restricted-v1.1.0".to_string()]);
    }

    #[tokio::test]
    async fn test_logical_name_matches_templates_already_in_namespace() {
        let mut existing = seeds();
        existing.push(template("edge-v3.0.0", "k3s", false));
        let store = store_with(&existing);

        let chosen = elect_default_template(&store, NS, &seeds(), Some("edge"))
            .await
            .unwrap();
        assert_eq!(chosen, "edge-v3.0.0");
    }

    #[tokio::test]
    async fn test_supported_default_is_kept() {
        let mut existing = seeds();
        existing[1] = template("rke2-v1.0.0", "rke2", true);
        let store = store_with(&existing);

        let chosen = elect_default_template(&store, NS, &seeds(), Some("baseline-v2.0.1"))
            .await
            .unwrap();
        assert_eq!(chosen, "rke2-v1.0.0");
        assert_eq!(store.calls(StoreOp::Update, "ClusterTemplate"), 0);
    }

    /// Story: a default left by an older release with a removed provider is replaced
    #[tokio::test]
    async fn story_unsupported_default_is_replaced() {
        let mut existing = seeds();
        existing.push(template("legacy-v0.1.0", "microk8s", true));
        let store = store_with(&existing);

        let chosen = elect_default_template(&store, NS, &seeds(), None).await.unwrap();
        assert_eq!(chosen, "baseline-v2.0.1");
        assert_eq!(defaults(&store).await, vec!["baseline-v2.0.1".to_string()]);
        let legacy = store
            .object(&ClusterTemplate::api_resource(), NS, "legacy-v0.1.0")
            .unwrap();
        assert!(legacy.labels().get("default").is_none());
    }

    #[tokio::test]
    async fn test_no_templates_is_an_error() {
        let store = MemoryStore::new();
        let err = elect_default_template(&store, NS, &[], None).await.unwrap_err();
        assert!(err.to_string().contains("no templates"));
    }

    #[tokio::test]
    async fn test_label_write_retries_conflict() {
        let store = store_with(&seeds());
        store.fail_next(StoreOp::Update, "ClusterTemplate", || {
            Error::conflict("ClusterTemplate", "baseline-v2.0.1", "object has been modified")
        });

        elect_default_template(&store, NS, &seeds(), None).await.unwrap();
        assert_eq!(store.calls(StoreOp::Update, "ClusterTemplate"), 2);
        assert_eq!(defaults(&store).await, vec!["baseline-v2.0.1".to_string()]);
    }

    #[rstest]
    #[case(&[], 0)]
    #[case(&["baseline-v2.0.1", "rke2-v1.0.0"], 2)]
    #[tokio::test]
    async fn test_default_lookup_needs_exactly_one(#[case] marked: &[&str], #[case] matches: usize) {
        let templates: Vec<ClusterTemplate> = seeds()
            .into_iter()
            .map(|ct| {
                let default = marked.contains(&ct.name_any().as_str());
                template(&ct.name_any(), &ct.spec.control_plane_provider_type, default)
            })
            .collect();
        let store = store_with(&templates);

        match get_default_template(&store, NS).await.unwrap_err() {
            Error::DefaultNotFound { namespace, matches: n } => {
                assert_eq!(namespace, NS);
                assert_eq!(n, matches);
            }
            other => panic!("expected DefaultNotFound, got {other}"),
        }
    }

    #[tokio::test]
    async fn test_default_lookup_after_election() {
        let store = store_with(&seeds());
        elect_default_template(&store, NS, &seeds(), None).await.unwrap();
        let ct = get_default_template(&store, NS).await.unwrap();
        assert_eq!(ct.name_any(), "baseline-v2.0.1");
        assert_eq!(
            get_default_template(&store, "elsewhere").await.unwrap_err().kind(),
            ErrorKind::DefaultNotFound
        );
    }
}
