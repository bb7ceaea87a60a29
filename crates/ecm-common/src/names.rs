//! Versioned template names
//!
//! Template names have the form `<name>-v<major>.<minor>.<patch>[suffix]`.
//! The logical name may itself contain dashes; the version starts at the
//! first `-v<digit>` group that is followed by a full semver triple.

use once_cell::sync::Lazy;
use regex::Regex;
use semver::Version;

use crate::{Error, Result};

static NAME_VERSION: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(.+?)-(v\d+\.\d+\.\d+.*)$").expect("static regex compiles"));

static VERSION: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^v\d+\.\d+\.\d+.*$").expect("static regex compiles"));

/// Split `name-vX.Y.Z[suffix]` into `(name, version)`
pub fn split_name_version(full: &str) -> Result<(String, String)> {
    let caps = NAME_VERSION.captures(full).ok_or_else(|| {
        Error::invalid_config_field(
            full,
            "metadata.name",
            "name must match <name>-v<major>.<minor>.<patch>[suffix]",
        )
    })?;
    Ok((caps[1].to_string(), caps[2].to_string()))
}

/// Join a logical name and version into a template name
pub fn join_name_version(name: &str, version: &str) -> Result<String> {
    if name.is_empty() {
        return Err(Error::validation("template name cannot be empty"));
    }
    if !is_version(version) {
        return Err(Error::validation(format!(
            "template version {version:?} must match v<major>.<minor>.<patch>[suffix]"
        )));
    }
    Ok(format!("{name}-{version}"))
}

/// True if `version` looks like `vX.Y.Z[suffix]`
pub fn is_version(version: &str) -> bool {
    VERSION.is_match(version)
}

/// Semantic version of `vX.Y.Z[suffix]`
///
/// `None` when the suffix is not a valid pre-release or build tag.
pub fn parse_version(version: &str) -> Option<Version> {
    Version::parse(version.strip_prefix('v')?).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("baseline-v1.0.0", "baseline", "v1.0.0")]
    #[case("privileged-k3s-v0.2.1", "privileged-k3s", "v0.2.1")]
    #[case("restricted-v2.10.3-rc1", "restricted", "v2.10.3-rc1")]
    #[case("rke2-v1-v1.2.3", "rke2-v1", "v1.2.3")]
    #[case("foo-v1.0.0-rc-v2.0.0", "foo", "v1.0.0-rc-v2.0.0")]
    fn test_split_name_version(#[case] full: &str, #[case] name: &str, #[case] version: &str) {
        let (n, v) = split_name_version(full).unwrap();
        assert_eq!((n.as_str(), v.as_str()), (name, version));
        assert_eq!(join_name_version(&n, &v).unwrap(), full);
    }

    #[rstest]
    #[case("baseline")]
    #[case("baseline-1.0.0")]
    #[case("-v1.0.0")]
    #[case("baseline-v1.0")]
    fn test_split_rejects_unversioned_names(#[case] full: &str) {
        assert!(split_name_version(full).is_err());
    }

    #[test]
    fn test_parse_version_orders_releases() {
        let rc = parse_version("v1.2.0-rc1").unwrap();
        let release = parse_version("v1.2.0").unwrap();
        assert!(rc < release);
        assert!(parse_version("v1.10.0").unwrap() > release);
        assert_eq!(parse_version("v1.0.0_custom"), None);
        assert_eq!(parse_version("1.0.0"), None);
    }

    #[test]
    fn test_join_validates_parts() {
        assert!(join_name_version("", "v1.0.0").is_err());
        assert!(join_name_version("baseline", "1.0.0").is_err());
    }
}
