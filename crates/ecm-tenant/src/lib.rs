//! Tenant lifecycle for the edge cluster manager
//!
//! Watches tenant projects in the platform datamodel and keeps one namespace
//! per project provisioned with the seed ClusterTemplates, a PSA secret and
//! an elected default template.

#![deny(missing_docs)]

pub mod controller;
pub mod datamodel;
pub mod default_template;
pub mod psa;
pub mod seed;

pub use controller::{TenantConfig, TenantController, DATAMODEL_TIMEOUT};
pub use datamodel::{Datamodel, KubeDatamodel, Project, ProjectEvent, WatcherStatus};
pub use default_template::{elect_default_template, get_default_template};
pub use seed::load_templates;
