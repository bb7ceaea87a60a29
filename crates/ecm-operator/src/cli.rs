//! Command-line flags, each with an environment fallback

use std::net::SocketAddr;
use std::path::PathBuf;

use clap::{Parser, ValueEnum};

use ecm_common::labels::LabelPolicy;
use ecm_common::store::StoreConfig;
use ecm_common::telemetry::TelemetryConfig;
use ecm_tenant::TenantConfig;

/// Log line format
#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    /// One JSON object per line
    Json,
    /// Human-readable text
    Text,
}

/// Edge cluster manager: ClusterTemplate and tenant-lifecycle controllers
#[derive(Parser, Debug)]
#[command(name = "cluster-manager", version, about, long_about = None)]
pub struct Cli {
    /// Print the ClusterTemplate CRD as YAML and exit
    #[arg(long)]
    pub crd: bool,

    /// Template to make default in new tenant namespaces
    #[arg(long, env = "DEFAULT_TEMPLATE")]
    pub default_template: Option<String>,

    /// Comma-separated label prefixes owned by the platform
    #[arg(long, env = "SYSTEM_LABELS_PREFIXES")]
    pub system_labels_prefixes: Option<String>,

    /// Directory of template-info JSON documents seeded into every tenant
    #[arg(long, env = "TEMPLATES_DIR", default_value = "/templates")]
    pub templates_dir: PathBuf,

    /// Run controllers only while holding the leader lease
    #[arg(long, env = "LEADER_ELECT")]
    pub leader_elect: bool,

    /// Do not watch tenant projects
    #[arg(long, env = "DISABLE_MULTITENANCY")]
    pub disable_multitenancy: bool,

    /// Address of the health and readiness probes
    #[arg(long, env = "HEALTH_PROBE_BIND_ADDRESS", default_value = "0.0.0.0:8081")]
    pub health_probe_bind_address: SocketAddr,

    /// Address of the admission webhook
    #[arg(long, env = "WEBHOOK_BIND_ADDRESS", default_value = "0.0.0.0:9443")]
    pub webhook_bind_address: SocketAddr,

    /// Directory holding the webhook's tls.crt and tls.key; webhook disabled when unset
    #[arg(long, env = "WEBHOOK_CERT_DIR")]
    pub webhook_cert_dir: Option<PathBuf>,

    /// Sustained Kubernetes API requests per second
    #[arg(long, env = "KUBE_API_QPS", default_value_t = 20.0, value_parser = parse_qps)]
    pub kube_api_qps: f32,

    /// Kubernetes API request burst
    #[arg(long, env = "KUBE_API_BURST", default_value_t = 30)]
    pub kube_api_burst: u32,

    /// Log line format
    #[arg(long, env = "LOG_FORMAT", value_enum, default_value_t = LogFormat::Json)]
    pub log_format: LogFormat,
}

/// Accept finite rates up to one million per second; 0 disables limiting
fn parse_qps(value: &str) -> Result<f32, String> {
    let qps: f32 = value
        .parse()
        .map_err(|e| format!("{value:?} is not a number: {e}"))?;
    if !qps.is_finite() || !(0.0..=1_000_000.0).contains(&qps) {
        return Err(format!("{value} must be between 0 and 1000000"));
    }
    Ok(qps)
}

impl Cli {
    /// Label policy from `--system-labels-prefixes`, if given
    pub fn label_policy(&self) -> Option<LabelPolicy> {
        self.system_labels_prefixes
            .as_deref()
            .filter(|csv| !csv.trim().is_empty())
            .map(LabelPolicy::from_csv)
    }

    /// Logging settings
    pub fn telemetry(&self) -> TelemetryConfig {
        TelemetryConfig {
            json: self.log_format == LogFormat::Json,
            ..Default::default()
        }
    }

    /// Resource store settings
    pub fn store(&self) -> StoreConfig {
        StoreConfig {
            qps: self.kube_api_qps,
            burst: self.kube_api_burst,
            ..Default::default()
        }
    }

    /// Tenant controller settings
    pub fn tenant(&self) -> TenantConfig {
        TenantConfig {
            default_template: self.default_template.clone().filter(|t| !t.is_empty()),
            ..Default::default()
        }
    }

    /// Webhook certificate and key paths
    pub fn webhook_tls_paths(&self) -> Option<(PathBuf, PathBuf)> {
        self.webhook_cert_dir
            .as_ref()
            .map(|dir| (dir.join("tls.crt"), dir.join("tls.key")))
    }
}
