//! Common types for the edge cluster manager: CRDs, errors, labels and the
//! resource store

#![deny(missing_docs)]

pub mod crd;
pub mod error;
pub mod kube_utils;
pub mod labels;
pub mod leader_election;
pub mod names;
pub mod retry;
pub mod store;
pub mod telemetry;
pub mod template_info;

pub use error::{Error, ErrorKind};

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Field manager recorded on server-side applies
pub const FIELD_MANAGER: &str = "cluster-manager";

/// Namespace the manager runs in when `POD_NAMESPACE` is unset
pub const DEFAULT_SYSTEM_NAMESPACE: &str = "orch-cluster";

/// Namespace the manager runs in, from the downward API
pub fn system_namespace() -> String {
    std::env::var("POD_NAMESPACE").unwrap_or_else(|_| DEFAULT_SYSTEM_NAMESPACE.to_string())
}
