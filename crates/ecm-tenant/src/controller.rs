//! Tenant-lifecycle controller
//!
//! Consumes project events one at a time. A new project gets a namespace
//! named after its UID, a PSA secret, the seed templates and a default
//! template. A project marked deleted has its clusters, templates and
//! namespace removed. Templates are only deleted once no Cluster is left,
//! and the teardown is retried with backoff while Clusters terminate.
//! Progress is reported on the project's active-watcher record.

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{debug, error, info, instrument, warn};

use ecm_capi::cluster::cluster_resource;
use ecm_common::crd::ClusterTemplate;
use ecm_common::kube_utils::HasApiResource;
use ecm_common::retry::{retry_with_backoff, RetryConfig};
use ecm_common::store::{ListOptions, ResourceStore};
use ecm_common::{Error, Result};

use crate::datamodel::{Datamodel, Project, ProjectEvent, WatcherStatus};
use crate::default_template::elect_default_template;
use crate::psa::{default_psa_config, ensure_psa_secret};
use crate::seed::seed_templates;

/// Deadline for each call into the datamodel
pub const DATAMODEL_TIMEOUT: Duration = Duration::from_secs(5);

/// Teardown passes made before a project is reported as failed
pub const TEARDOWN_ATTEMPTS: u32 = 8;

/// Backoff between teardown passes: 2s doubling up to 30s
pub fn teardown_retry() -> RetryConfig {
    RetryConfig {
        max_attempts: TEARDOWN_ATTEMPTS,
        initial_delay: Duration::from_secs(2),
        ..RetryConfig::default()
    }
}

/// Tenant controller settings
#[derive(Clone, Debug)]
pub struct TenantConfig {
    /// Template to prefer when electing a namespace's default
    pub default_template: Option<String>,
    /// PSA policy blobs keyed by level
    pub psa: BTreeMap<String, String>,
    /// Deadline for each datamodel call
    pub datamodel_timeout: Duration,
    /// Retry schedule for project teardown
    pub teardown_retry: RetryConfig,
}

impl Default for TenantConfig {
    fn default() -> Self {
        Self {
            default_template: None,
            psa: default_psa_config(),
            datamodel_timeout: DATAMODEL_TIMEOUT,
            teardown_retry: teardown_retry(),
        }
    }
}

/// Sets up and tears down tenant namespaces
pub struct TenantController {
    store: Arc<dyn ResourceStore>,
    datamodel: Arc<dyn Datamodel>,
    templates: Arc<[ClusterTemplate]>,
    config: TenantConfig,
}

impl TenantController {
    /// Create a controller seeding `templates` into every tenant
    pub fn new(
        store: Arc<dyn ResourceStore>,
        datamodel: Arc<dyn Datamodel>,
        templates: Vec<ClusterTemplate>,
        config: TenantConfig,
    ) -> Self {
        Self {
            store,
            datamodel,
            templates: templates.into(),
            config,
        }
    }

    /// Process events in arrival order until the sender side closes
    pub async fn run(&self, mut events: mpsc::Receiver<ProjectEvent>) {
        info!(templates = self.templates.len(), "Tenant controller started");
        while let Some(event) = events.recv().await {
            self.handle(event).await;
        }
        info!("Project event stream closed, tenant controller stopped");
    }

    /// Process one event; failures are logged and reported on the watcher
    pub async fn handle(&self, event: ProjectEvent) {
        let result = match &event {
            ProjectEvent::Add(p) | ProjectEvent::Update(p) if p.deleted => {
                self.cleanup_project(p).await
            }
            ProjectEvent::Add(p) => self.setup_project(p).await,
            ProjectEvent::Update(p) => {
                debug!(project = %p.name, "project updated, nothing to do");
                Ok(())
            }
            ProjectEvent::Delete(p) => {
                debug!(project = %p.name, "project record removed");
                Ok(())
            }
        };

        if let Err(e) = result {
            let p = event.project();
            error!(project = %p.name, uid = %p.uid, error = %e, "project event failed");
        }
    }

    async fn bounded<T>(
        &self,
        operation: &str,
        call: impl Future<Output = Result<T>>,
    ) -> Result<T> {
        tokio::time::timeout(self.config.datamodel_timeout, call)
            .await
            .map_err(|_| {
                Error::datamodel(
                    operation,
                    format!("timed out after {:?}", self.config.datamodel_timeout),
                )
            })?
    }

    async fn report(&self, project: &Project, status: WatcherStatus, message: &str) -> Result<()> {
        self.bounded(
            "set_active_watcher",
            self.datamodel.set_active_watcher(project, status, message),
        )
        .await
    }

    async fn report_failure(&self, project: &Project, message: String) {
        if let Err(e) = self.report(project, WatcherStatus::Error, &message).await {
            warn!(project = %project.name, error = %e, "failed to report project failure");
        }
    }

    /// Provision a new project's namespace
    #[instrument(skip(self, project), fields(project = %project.name, uid = %project.uid))]
    pub async fn setup_project(&self, project: &Project) -> Result<()> {
        self.report(
            project,
            WatcherStatus::InProgress,
            &format!("subscribed to project {}", project.name),
        )
        .await?;

        match self.provision(project.namespace()).await {
            Ok(default) => {
                info!(default_template = %default, "project set up");
                self.report(project, WatcherStatus::Idle, "Successfully created project")
                    .await
            }
            Err(e) => {
                self.report_failure(project, format!("failed to set up project: {e}"))
                    .await;
                Err(e)
            }
        }
    }

    async fn provision(&self, namespace: &str) -> Result<String> {
        let store = self.store.as_ref();
        match store.create_namespace(namespace).await {
            Ok(()) => debug!(%namespace, "created tenant namespace"),
            Err(e) if e.is_already_exists() => {}
            Err(e) => return Err(e),
        }
        ensure_psa_secret(store, namespace, &self.config.psa).await?;
        seed_templates(store, namespace, &self.templates).await?;
        elect_default_template(
            store,
            namespace,
            &self.templates,
            self.config.default_template.as_deref(),
        )
        .await
    }

    /// Remove everything a deleted project owned
    #[instrument(skip(self, project), fields(project = %project.name, uid = %project.uid))]
    pub async fn cleanup_project(&self, project: &Project) -> Result<()> {
        self.report(project, WatcherStatus::InProgress, "Deleting edge clusters")
            .await?;

        if let Err(e) = self.teardown(project.namespace()).await {
            self.report_failure(project, format!("failed to clean up project: {e}"))
                .await;
            return Err(e);
        }

        self.report(project, WatcherStatus::Idle, "Successfully cleaned up project")
            .await?;
        self.bounded(
            "delete_active_watcher",
            self.datamodel.delete_active_watcher(project),
        )
        .await?;
        info!("project cleaned up");
        Ok(())
    }

    async fn teardown(&self, namespace: &str) -> Result<()> {
        retry_with_backoff(&self.config.teardown_retry, "teardown_project", || {
            self.teardown_pass(namespace)
        })
        .await
    }

    async fn teardown_pass(&self, namespace: &str) -> Result<()> {
        let store = self.store.as_ref();
        let clusters = cluster_resource();
        store.delete_collection(&clusters, namespace).await?;

        // the deletion guard rejects template deletes while clusters remain
        let remaining = store
            .list_cached(&clusters, namespace, &ListOptions::default())
            .await?;
        if !remaining.is_empty() {
            return Err(Error::internal_with_context(
                "teardown",
                format!("{} clusters in {namespace} still terminating", remaining.len()),
            ));
        }

        store
            .delete_collection(&ClusterTemplate::api_resource(), namespace)
            .await?;
        match store.delete_namespace(namespace).await {
            Err(e) if !e.is_not_found() => Err(e),
            _ => Ok(()),
        }
    }
}
