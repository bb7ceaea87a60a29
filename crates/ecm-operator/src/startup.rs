//! Start-up steps and their failure classes

use std::path::Path;

use anyhow::Context as _;
use axum_server::tls_rustls::RustlsConfig;
use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition;
use kube::api::{Api, Patch, PatchParams};
use kube::{Client, CustomResourceExt};
use thiserror::Error;

use ecm_common::crd::ClusterTemplate;
use ecm_common::FIELD_MANAGER;

/// Name of the ClusterTemplate CRD
pub const CLUSTER_TEMPLATE_CRD: &str = "clustertemplates.edge-orchestrator.intel.com";

/// Why the process could not start
///
/// Each class exits with its own code; 0 means a clean shutdown.
#[derive(Debug, Error)]
pub enum StartupError {
    /// Bad flags or configuration
    #[error("invalid configuration: {0:#}")]
    Config(#[source] anyhow::Error),
    /// Logging could not be initialised
    #[error("failed to initialise logging: {0:#}")]
    Telemetry(#[source] anyhow::Error),
    /// No usable Kubernetes client
    #[error("failed to create Kubernetes client: {0:#}")]
    KubeClient(#[source] anyhow::Error),
    /// The CRD could not be installed
    #[error("failed to install CRDs: {0:#}")]
    Crd(#[source] anyhow::Error),
    /// Seed templates could not be loaded
    #[error("failed to load seed templates: {0:#}")]
    Templates(#[source] anyhow::Error),
    /// TLS setup for the webhook failed
    #[error("failed to configure TLS: {0:#}")]
    Tls(#[source] anyhow::Error),
    /// The tenant datamodel rejected registration
    #[error("failed to register with the tenant datamodel: {0:#}")]
    Datamodel(#[source] anyhow::Error),
}

impl StartupError {
    /// Process exit code for this failure
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Config(_) => 1,
            Self::Telemetry(_) => 2,
            Self::KubeClient(_) => 3,
            Self::Crd(_) => 4,
            Self::Templates(_) => 5,
            Self::Tls(_) => 6,
            Self::Datamodel(_) => 7,
        }
    }
}

/// The ClusterTemplate CRD as YAML
pub fn crd_yaml() -> anyhow::Result<String> {
    serde_yaml::to_string(&ClusterTemplate::crd()).context("failed to serialize CRD")
}

/// Install or update the ClusterTemplate CRD with server-side apply
pub async fn ensure_crds_installed(client: &Client) -> anyhow::Result<()> {
    let crds: Api<CustomResourceDefinition> = Api::all(client.clone());
    let params = PatchParams::apply(FIELD_MANAGER).force();

    tracing::info!(crd = CLUSTER_TEMPLATE_CRD, "Installing CRD...");
    crds.patch(
        CLUSTER_TEMPLATE_CRD,
        &params,
        &Patch::Apply(&ClusterTemplate::crd()),
    )
    .await
    .with_context(|| format!("failed to install {CLUSTER_TEMPLATE_CRD} CRD"))?;
    tracing::info!("CRDs installed/updated");
    Ok(())
}

/// Install the process-wide rustls crypto provider
pub fn install_crypto_provider() -> anyhow::Result<()> {
    rustls::crypto::aws_lc_rs::default_provider()
        .install_default()
        .map_err(|_| anyhow::anyhow!("a rustls crypto provider is already installed"))
}

/// Load the webhook serving certificate
pub async fn load_tls(cert: &Path, key: &Path) -> anyhow::Result<RustlsConfig> {
    RustlsConfig::from_pem_file(cert, key)
        .await
        .with_context(|| format!("failed to load {} / {}", cert.display(), key.display()))
}
