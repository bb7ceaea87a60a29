//! Controller runner - builds the controller futures
//!
//! Each `build_*` function returns boxed futures that the caller composes,
//! typically under the leader lease.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use futures::StreamExt;
use kube::runtime::watcher::Config as WatcherConfig;
use kube::runtime::Controller;
use kube::{Api, Client};
use tokio::sync::mpsc;

use ecm_capi::ClusterClass;
use ecm_common::crd::ClusterTemplate;
use ecm_common::store::ResourceStore;
use ecm_template::{error_policy, reconcile, Context};
use ecm_tenant::{KubeDatamodel, TenantConfig, TenantController};

/// Watcher timeout (seconds), below the client read timeout
const WATCH_TIMEOUT_SECS: u32 = 25;

/// Project events buffered between the watch and the tenant controller
const PROJECT_EVENT_BUFFER: usize = 64;

/// A controller loop
pub type ControllerFuture = Pin<Box<dyn Future<Output = ()> + Send>>;

/// Build the ClusterTemplate controller
///
/// Owned ClusterClasses are watched too, so deleting one re-creates it.
pub fn build_template_controller(client: Client, store: Arc<dyn ResourceStore>) -> ControllerFuture {
    let ctx = Arc::new(Context::new(store));
    let templates: Api<ClusterTemplate> = Api::all(client.clone());
    let classes: Api<ClusterClass> = Api::all(client);

    tracing::info!("- ClusterTemplate controller");

    Box::pin(
        Controller::new(templates, WatcherConfig::default().timeout(WATCH_TIMEOUT_SECS))
            .owns(classes, WatcherConfig::default().timeout(WATCH_TIMEOUT_SECS))
            .shutdown_on_signal()
            .run(reconcile, error_policy, ctx)
            .for_each(log_reconcile_result("ClusterTemplate")),
    )
}

/// Build the tenant-lifecycle controller
///
/// Project events are consumed serially in arrival order.
pub fn build_tenant_controller(
    datamodel: Arc<KubeDatamodel>,
    store: Arc<dyn ResourceStore>,
    templates: Vec<ClusterTemplate>,
    config: TenantConfig,
) -> ControllerFuture {
    let (tx, rx) = mpsc::channel(PROJECT_EVENT_BUFFER);
    let controller = TenantController::new(store, datamodel.clone(), templates, config);

    tracing::info!("- Tenant controller");

    Box::pin(async move {
        let watch = datamodel.spawn_project_events(tx);
        controller.run(rx).await;
        watch.abort();
    })
}

fn log_reconcile_result<T: std::fmt::Debug, E: std::fmt::Display>(
    kind: &'static str,
) -> impl Fn(Result<T, E>) -> std::future::Ready<()> {
    move |result| {
        match result {
            Ok(outcome) => tracing::debug!(kind, ?outcome, "reconciled"),
            Err(e) => tracing::warn!(kind, error = %e, "reconcile failed"),
        }
        std::future::ready(())
    }
}
