//! Label classification and syntax checks
//!
//! Every managed object's labels split into two disjoint sets. System labels
//! are keys starting with one of the configured prefixes; the platform owns
//! them. User labels are everything else and belong to the tenant. A "set
//! labels" operation keeps the system set and replaces the user set.
//!
//! The prefix list is process-global. It is initialised once at start-up from
//! `--system-labels-prefixes` and is read-only afterwards.

use std::collections::BTreeMap;

use once_cell::sync::{Lazy, OnceCell};
use regex::Regex;

use crate::{Error, Result};

/// Built-in system label prefixes
pub const DEFAULT_SYSTEM_LABEL_PREFIXES: &[&str] = &[
    "edge-orchestrator.intel.com",
    "cluster.x-k8s.io",
    "topology.cluster.x-k8s.io",
    "prometheusMetricsURL",
    "trusted-compute-compatible",
];

/// Label marking a tenant's default ClusterTemplate
pub const DEFAULT_TEMPLATE_LABEL_KEY: &str = "default";

/// Value of [`DEFAULT_TEMPLATE_LABEL_KEY`] on the default template
pub const DEFAULT_TEMPLATE_LABEL_VALUE: &str = "true";

/// Selector matching the default template
pub const DEFAULT_TEMPLATE_SELECTOR: &str = "default=true";

const MAX_NAME_LENGTH: usize = 63;
const MAX_PREFIX_LENGTH: usize = 253;

static LABEL_NAME: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[A-Za-z0-9]([-A-Za-z0-9_.]*[A-Za-z0-9])?$").expect("static regex compiles")
});

static DNS_SUBDOMAIN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[a-z0-9]([-a-z0-9]*[a-z0-9])?(\.[a-z0-9]([-a-z0-9]*[a-z0-9])?)*$")
        .expect("static regex compiles")
});

static SYSTEM_LABELS: OnceCell<LabelPolicy> = OnceCell::new();

/// Classifies label keys as system or user owned
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LabelPolicy {
    prefixes: Vec<String>,
}

impl Default for LabelPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_SYSTEM_LABEL_PREFIXES.iter().copied())
    }
}

impl LabelPolicy {
    /// Create a policy from an explicit prefix list
    pub fn new<I, S>(prefixes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            prefixes: prefixes.into_iter().map(Into::into).collect(),
        }
    }

    /// Parse a comma-separated override; empty input keeps the defaults
    pub fn from_csv(csv: &str) -> Self {
        let prefixes: Vec<String> = csv
            .split(',')
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .map(String::from)
            .collect();
        if prefixes.is_empty() {
            Self::default()
        } else {
            Self { prefixes }
        }
    }

    /// The configured prefixes
    pub fn prefixes(&self) -> &[String] {
        &self.prefixes
    }

    /// True if `key` belongs to the platform
    pub fn is_system(&self, key: &str) -> bool {
        self.prefixes.iter().any(|p| key.starts_with(p.as_str()))
    }

    /// The system-owned subset of `labels`
    pub fn system_labels(&self, labels: &BTreeMap<String, String>) -> BTreeMap<String, String> {
        labels
            .iter()
            .filter(|(k, _)| self.is_system(k))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    /// The tenant-owned subset of `labels`
    pub fn user_labels(&self, labels: &BTreeMap<String, String>) -> BTreeMap<String, String> {
        labels
            .iter()
            .filter(|(k, _)| !self.is_system(k))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    /// Keep the system labels of `existing` and replace its user labels with `user`
    ///
    /// Fails if `user` tries to set a system key.
    pub fn set_user_labels(
        &self,
        existing: &BTreeMap<String, String>,
        user: &BTreeMap<String, String>,
    ) -> Result<BTreeMap<String, String>> {
        if let Some(key) = user.keys().find(|k| self.is_system(k)) {
            return Err(Error::validation(format!(
                "label {key} is reserved for the platform"
            )));
        }
        validate_labels(user)?;
        let mut merged = self.system_labels(existing);
        merged.extend(user.iter().map(|(k, v)| (k.clone(), v.clone())));
        Ok(merged)
    }
}

/// Install the process-wide label policy
///
/// Must be called at most once, before any controller starts.
pub fn init_system_label_policy(policy: LabelPolicy) -> Result<()> {
    SYSTEM_LABELS.set(policy).map_err(|_| {
        Error::internal_with_context("labels", "system label prefixes already initialised")
    })
}

/// The process-wide label policy (built-in defaults if never initialised)
pub fn system_label_policy() -> &'static LabelPolicy {
    SYSTEM_LABELS.get_or_init(LabelPolicy::default)
}

/// Merge `overlay` into `base`; overlay wins on duplicate keys
pub fn merge_labels(
    base: &BTreeMap<String, String>,
    overlay: &BTreeMap<String, String>,
) -> BTreeMap<String, String> {
    let mut merged = base.clone();
    merged.extend(overlay.iter().map(|(k, v)| (k.clone(), v.clone())));
    merged
}

/// Remove `keys` from `labels`
pub fn remove_labels<'a>(
    labels: &BTreeMap<String, String>,
    keys: impl IntoIterator<Item = &'a str>,
) -> BTreeMap<String, String> {
    let mut out = labels.clone();
    for key in keys {
        out.remove(key);
    }
    out
}

/// Check a label map against Kubernetes label syntax
pub fn validate_labels(labels: &BTreeMap<String, String>) -> Result<()> {
    for (key, value) in labels {
        validate_label_key(key)?;
        validate_label_value(key, value)?;
    }
    Ok(())
}

/// Validate a label key: `[prefix/]name`
pub fn validate_label_key(key: &str) -> Result<()> {
    let (prefix, name) = match key.rsplit_once('/') {
        Some((prefix, name)) => (Some(prefix), name),
        None => (None, key),
    };

    if let Some(prefix) = prefix {
        if prefix.is_empty() || prefix.len() > MAX_PREFIX_LENGTH || !DNS_SUBDOMAIN.is_match(prefix)
        {
            return Err(Error::validation(format!(
                "label key {key}: prefix must be a DNS subdomain of at most {MAX_PREFIX_LENGTH} characters"
            )));
        }
    }

    if name.is_empty() || name.len() > MAX_NAME_LENGTH || !LABEL_NAME.is_match(name) {
        return Err(Error::validation(format!(
            "label key {key}: name must be 1-{MAX_NAME_LENGTH} alphanumeric characters, '-', '_' or '.'"
        )));
    }
    Ok(())
}

/// Validate a label value (may be empty)
pub fn validate_label_value(key: &str, value: &str) -> Result<()> {
    if value.is_empty() {
        return Ok(());
    }
    if value.len() > MAX_NAME_LENGTH || !LABEL_NAME.is_match(value) {
        return Err(Error::validation(format!(
            "label {key}: value {value:?} must be at most {MAX_NAME_LENGTH} alphanumeric characters, '-', '_' or '.'"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn labels(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn cluster_labels() -> BTreeMap<String, String> {
        labels(&[
            ("edge-orchestrator.intel.com/project-id", "p1"),
            ("cluster.x-k8s.io/cluster-name", "edge-a"),
            ("topology.cluster.x-k8s.io/owned", ""),
            ("prometheusMetricsURL", "metrics.example"),
            ("trusted-compute-compatible", "false"),
            ("site", "store-42"),
            ("app.kubernetes.io/part-of", "retail"),
        ])
    }

    #[rstest]
    #[case("edge-orchestrator.intel.com/project-id", true)]
    #[case("cluster.x-k8s.io/cluster-name", true)]
    #[case("topology.cluster.x-k8s.io/owned", true)]
    #[case("prometheusMetricsURL", true)]
    #[case("trusted-compute-compatible", true)]
    #[case("site", false)]
    #[case("app.kubernetes.io/name", false)]
    fn test_default_prefixes_classify_keys(#[case] key: &str, #[case] system: bool) {
        assert_eq!(LabelPolicy::default().is_system(key), system);
    }

    /// Story: system and user labels partition every label map
    #[test]
    fn story_label_sets_partition_the_map() {
        let policy = LabelPolicy::default();
        let all = cluster_labels();
        let system = policy.system_labels(&all);
        let user = policy.user_labels(&all);

        assert!(system.keys().all(|k| !user.contains_key(k)));
        assert_eq!(merge_labels(&system, &user), all);
        assert_eq!(user.len(), 2);
    }

    /// Story: setting labels on a cluster never touches platform labels
    #[test]
    fn story_set_labels_keeps_system_and_replaces_user_labels() {
        let policy = LabelPolicy::default();
        let existing = cluster_labels();
        let wanted = labels(&[("site", "store-7"), ("tier", "gold")]);

        let result = policy.set_user_labels(&existing, &wanted).unwrap();

        assert_eq!(policy.system_labels(&result), policy.system_labels(&existing));
        assert_eq!(policy.user_labels(&result), wanted);
        assert!(!result.contains_key("app.kubernetes.io/part-of"));
    }

    #[test]
    fn test_set_labels_rejects_system_keys() {
        let policy = LabelPolicy::default();
        let wanted = labels(&[("cluster.x-k8s.io/cluster-name", "hijack")]);
        assert!(policy.set_user_labels(&cluster_labels(), &wanted).is_err());
    }

    #[test]
    fn test_from_csv_overrides_defaults() {
        let policy = LabelPolicy::from_csv("example.com, other.io ,");
        assert_eq!(policy.prefixes(), &["example.com", "other.io"]);
        assert!(policy.is_system("example.com/x"));
        assert!(!policy.is_system("cluster.x-k8s.io/cluster-name"));
    }

    #[test]
    fn test_from_csv_empty_keeps_defaults() {
        assert_eq!(LabelPolicy::from_csv(" , "), LabelPolicy::default());
    }

    #[test]
    fn test_remove_labels() {
        let out = remove_labels(&cluster_labels(), ["site", "missing"]);
        assert!(!out.contains_key("site"));
        assert_eq!(out.len(), cluster_labels().len() - 1);
    }

    #[rstest]
    #[case("site", "store-42", true)]
    #[case("example.com/tier", "gold", true)]
    #[case("empty-value", "", true)]
    #[case("-leading-dash", "x", false)]
    #[case("Upper.Case/name", "x", false)]
    #[case("/no-prefix", "x", false)]
    #[case("site", "has space", false)]
    #[case("site", "trailing-", false)]
    fn test_label_syntax(#[case] key: &str, #[case] value: &str, #[case] valid: bool) {
        assert_eq!(validate_labels(&labels(&[(key, value)])).is_ok(), valid);
    }

    #[test]
    fn test_label_value_length_limit() {
        let long = "a".repeat(64);
        assert!(validate_label_value("k", &long).is_err());
        assert!(validate_label_value("k", &long[..63]).is_ok());
    }
}
