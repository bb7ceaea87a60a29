//! Edge cluster manager operator
//!
//! Wires the ClusterTemplate controller, the tenant-lifecycle controller,
//! the admission webhook and the probe server into one process.

#![deny(missing_docs)]

pub mod cli;
pub mod controller_runner;
pub mod health;
pub mod startup;

use std::sync::Arc;

use anyhow::Context as _;
use futures::future::join_all;
use kube::Client;
use tracing::{error, info, warn};

use ecm_capi::cluster::{cluster_resource, CLUSTER_CLASS_INDEX};
use ecm_capi::provider::child_resources;
use ecm_common::crd::ClusterTemplate;
use ecm_common::kube_utils::HasApiResource;
use ecm_common::labels::init_system_label_policy;
use ecm_common::leader_election::{LeaderElector, LEADER_LEASE_NAME};
use ecm_common::store::{KubeStore, KubeStoreBuilder, ResourceStore};
use ecm_common::telemetry::init_telemetry;
use ecm_common::system_namespace;
use ecm_template::{cluster_class_indexer, WebhookState};
use ecm_tenant::{load_templates, Datamodel, KubeDatamodel};

use crate::cli::Cli;
use crate::controller_runner::{build_template_controller, build_tenant_controller, ControllerFuture};
use crate::health::Readiness;
use crate::startup::{
    crd_yaml, ensure_crds_installed, install_crypto_provider, load_tls, StartupError,
};

fn identity() -> String {
    std::env::var("POD_NAME").unwrap_or_else(|_| format!("cluster-manager-{}", std::process::id()))
}

/// Run the operator until shutdown
pub async fn run(cli: Cli) -> Result<(), StartupError> {
    if cli.crd {
        let yaml = crd_yaml().map_err(StartupError::Config)?;
        println!("{yaml}");
        return Ok(());
    }

    init_telemetry(cli.telemetry()).map_err(|e| StartupError::Telemetry(e.into()))?;
    if let Some(policy) = cli.label_policy() {
        info!(prefixes = ?policy.prefixes(), "using configured system label prefixes");
        init_system_label_policy(policy).map_err(|e| StartupError::Config(e.into()))?;
    }
    install_crypto_provider().map_err(StartupError::Tls)?;

    info!("cluster manager starting...");

    let client = Client::try_default()
        .await
        .context("no kubeconfig or in-cluster configuration")
        .map_err(StartupError::KubeClient)?;
    ensure_crds_installed(&client).await.map_err(StartupError::Crd)?;

    let templates = if cli.disable_multitenancy {
        Vec::new()
    } else {
        load_templates(&cli.templates_dir)
            .with_context(|| format!("reading {}", cli.templates_dir.display()))
            .map_err(StartupError::Templates)?
    };

    let store: Arc<dyn ResourceStore> = Arc::new(
        child_resources()
            .into_iter()
            .fold(KubeStore::builder(client.clone()), KubeStoreBuilder::cache)
            .config(cli.store())
            .cache(ClusterTemplate::api_resource())
            .cache(cluster_resource())
            .index(&cluster_resource(), CLUSTER_CLASS_INDEX, cluster_class_indexer())
            .build(),
    );

    let readiness = Readiness::default();
    let health_addr = cli.health_probe_bind_address;
    let probe_readiness = readiness.clone();
    tokio::spawn(async move {
        if let Err(e) = health::serve(health_addr, probe_readiness).await {
            error!(error = %e, "health probe server stopped");
        }
    });

    if let Some((cert, key)) = cli.webhook_tls_paths() {
        let tls = load_tls(&cert, &key).await.map_err(StartupError::Tls)?;
        let app = ecm_template::router(Arc::new(WebhookState {
            store: store.clone(),
        }));
        let addr = cli.webhook_bind_address;
        info!(%addr, "Starting admission webhook server");
        tokio::spawn(async move {
            if let Err(e) = axum_server::bind_rustls(addr, tls)
                .serve(app.into_make_service())
                .await
            {
                error!(error = %e, "admission webhook server stopped");
            }
        });
    } else {
        warn!("no webhook certificate directory configured, admission webhook disabled");
    }

    let datamodel = if cli.disable_multitenancy {
        None
    } else {
        let datamodel = Arc::new(KubeDatamodel::new(client.clone()));
        datamodel
            .register_project_watcher()
            .await
            .map_err(|e| StartupError::Datamodel(e.into()))?;
        Some(datamodel)
    };

    let elector = cli.leader_elect.then(|| {
        Arc::new(LeaderElector::new(
            client.clone(),
            LEADER_LEASE_NAME,
            &system_namespace(),
            &identity(),
        ))
    });
    let mut guard = match elector {
        Some(elector) => Some(elector.acquire().await),
        None => None,
    };

    let mut controllers: Vec<ControllerFuture> =
        vec![build_template_controller(client.clone(), store.clone())];
    if let Some(datamodel) = datamodel {
        controllers.push(build_tenant_controller(
            datamodel,
            store.clone(),
            templates,
            cli.tenant(),
        ));
    }

    info!(controllers = controllers.len(), "controllers running");
    readiness.set(true);

    let lost = async {
        match guard.as_mut() {
            Some(guard) => guard.lost().await,
            None => std::future::pending().await,
        }
    };

    tokio::select! {
        _ = join_all(controllers) => info!("controllers stopped"),
        _ = lost => warn!("leadership lost, shutting down"),
        _ = tokio::signal::ctrl_c() => info!("shutdown signal received"),
    }
    readiness.set(false);
    Ok(())
}
