//! Tenant datamodel client
//!
//! The platform publishes tenants as `RuntimeProject` objects. The cluster
//! manager registers a global `ProjectWatcher` for itself and reports its
//! progress on each project through a `ProjectActiveWatcher` record.
//!
//! All three resources are cluster-scoped.

use std::collections::HashSet;
use std::fmt;

use async_trait::async_trait;
use chrono::Utc;
use futures::StreamExt;
use kube::api::{Api, DeleteParams, DynamicObject, Patch, PatchParams};
use kube::discovery::ApiResource;
use kube::runtime::watcher::{self, Event};
use kube::runtime::WatchStreamExt;
use kube::{Client, ResourceExt};
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};

use ecm_common::kube_utils::build_api_resource;
use ecm_common::{Result, FIELD_MANAGER};

#[cfg(any(test, feature = "testing"))]
use mockall::automock;

/// Application name the watcher records are keyed by
pub const APP_NAME: &str = "cluster-manager";

/// apiVersion of RuntimeProject
pub const RUNTIME_PROJECT_API_VERSION: &str = "runtimeproject.edge-orchestrator.intel.com/v1";
/// apiVersion of ProjectWatcher
pub const PROJECT_WATCHER_API_VERSION: &str = "projectwatcher.edge-orchestrator.intel.com/v1";
/// apiVersion of ProjectActiveWatcher
pub const PROJECT_ACTIVE_WATCHER_API_VERSION: &str =
    "projectactivewatcher.edge-orchestrator.intel.com/v1";

/// Label carrying a project's display name
pub const DISPLAY_NAME_LABEL: &str = "nexus/display_name";
/// Label linking an active watcher to its project
pub const PROJECT_UID_LABEL: &str = "edge-orchestrator.intel.com/project-uid";
/// Label naming the application that owns a watcher record
pub const APP_LABEL: &str = "edge-orchestrator.intel.com/app";

/// RuntimeProject resource
pub fn runtime_project_resource() -> ApiResource {
    build_api_resource(RUNTIME_PROJECT_API_VERSION, "RuntimeProject")
}

/// ProjectWatcher resource
pub fn project_watcher_resource() -> ApiResource {
    build_api_resource(PROJECT_WATCHER_API_VERSION, "ProjectWatcher")
}

/// ProjectActiveWatcher resource
pub fn project_active_watcher_resource() -> ApiResource {
    build_api_resource(PROJECT_ACTIVE_WATCHER_API_VERSION, "ProjectActiveWatcher")
}

/// Progress reported on an active-watcher record
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WatcherStatus {
    /// Setup or teardown is running
    InProgress,
    /// The last operation finished
    Idle,
    /// The last operation failed
    Error,
}

impl WatcherStatus {
    /// Wire value of the status indicator
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InProgress => "InProgress",
            Self::Idle => "Idle",
            Self::Error => "Error",
        }
    }
}

impl fmt::Display for WatcherStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A tenant project as seen by the cluster manager
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Project {
    /// Project UID; also the tenant namespace name
    pub uid: String,
    /// Display name
    pub name: String,
    /// Set once the platform starts deleting the project
    pub deleted: bool,
}

impl Project {
    /// Namespace holding the project's templates and clusters
    pub fn namespace(&self) -> &str {
        &self.uid
    }

    /// Read a project from a RuntimeProject object
    ///
    /// Objects without a UID are not projects yet and yield `None`.
    pub fn from_runtime_project(obj: &DynamicObject) -> Option<Self> {
        let uid = obj.metadata.uid.clone().filter(|u| !u.is_empty())?;
        let name = obj
            .labels()
            .get(DISPLAY_NAME_LABEL)
            .cloned()
            .unwrap_or_else(|| obj.name_any());
        let deleted = obj
            .data
            .pointer("/spec/deleted")
            .and_then(Value::as_bool)
            .unwrap_or(false);
        Some(Self { uid, name, deleted })
    }
}

/// A change to a project
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ProjectEvent {
    /// First sighting of a project
    Add(Project),
    /// A known project changed
    Update(Project),
    /// The project record is gone
    Delete(Project),
}

impl ProjectEvent {
    /// The project the event is about
    pub fn project(&self) -> &Project {
        match self {
            Self::Add(p) | Self::Update(p) | Self::Delete(p) => p,
        }
    }
}

/// Writes to the tenant datamodel
#[cfg_attr(any(test, feature = "testing"), automock)]
#[async_trait]
pub trait Datamodel: Send + Sync {
    /// Register the application's global project watcher
    async fn register_project_watcher(&self) -> Result<()>;

    /// Create or update the active-watcher record for a project
    async fn set_active_watcher(
        &self,
        project: &Project,
        status: WatcherStatus,
        message: &str,
    ) -> Result<()>;

    /// Remove the active-watcher record for a project
    async fn delete_active_watcher(&self, project: &Project) -> Result<()>;
}

/// Name of the active-watcher record for a project
pub fn active_watcher_name(project_uid: &str) -> String {
    format!("{APP_NAME}-{project_uid}")
}

/// Active-watcher document for server-side apply
pub fn active_watcher_object(project: &Project, status: WatcherStatus, message: &str) -> Value {
    json!({
        "apiVersion": PROJECT_ACTIVE_WATCHER_API_VERSION,
        "kind": "ProjectActiveWatcher",
        "metadata": {
            "name": active_watcher_name(&project.uid),
            "labels": {
                PROJECT_UID_LABEL: project.uid,
                APP_LABEL: APP_NAME,
            },
        },
        "spec": {
            "statusIndicator": status.as_str(),
            "message": message,
            "timestamp": Utc::now().timestamp().max(0) as u64,
        },
    })
}

/// Datamodel backed by custom resources on the management cluster
pub struct KubeDatamodel {
    client: Client,
}

impl KubeDatamodel {
    /// Create a datamodel client
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn api(&self, ar: &ApiResource) -> Api<DynamicObject> {
        Api::all_with(self.client.clone(), ar)
    }

    /// Stream project events into `tx` until the receiver is dropped
    pub fn spawn_project_events(&self, tx: mpsc::Sender<ProjectEvent>) -> JoinHandle<()> {
        let api = self.api(&runtime_project_resource());
        tokio::spawn(async move {
            info!("Starting project watcher");
            let mut tracker = ProjectTracker::default();
            let mut stream = watcher::watcher(api, watcher::Config::default())
                .default_backoff()
                .boxed();

            while let Some(item) = stream.next().await {
                let event = match item {
                    Ok(event) => event,
                    Err(e) => {
                        warn!(error = %e, "Project watch failed, retrying");
                        continue;
                    }
                };
                let Some(event) = tracker.translate(event) else {
                    continue;
                };
                if tx.send(event).await.is_err() {
                    debug!("Project event channel closed, stopping project watcher");
                    break;
                }
            }
            info!("Project watcher stopped");
        })
    }
}

#[async_trait]
impl Datamodel for KubeDatamodel {
    #[instrument(skip(self))]
    async fn register_project_watcher(&self) -> Result<()> {
        let obj = json!({
            "apiVersion": PROJECT_WATCHER_API_VERSION,
            "kind": "ProjectWatcher",
            "metadata": {
                "name": APP_NAME,
                "labels": { APP_LABEL: APP_NAME },
            },
            "spec": {},
        });
        self.api(&project_watcher_resource())
            .patch(
                APP_NAME,
                &PatchParams::apply(FIELD_MANAGER).force(),
                &Patch::Apply(&obj),
            )
            .await?;
        info!("registered project watcher");
        Ok(())
    }

    #[instrument(skip(self, project), fields(project = %project.name, uid = %project.uid))]
    async fn set_active_watcher(
        &self,
        project: &Project,
        status: WatcherStatus,
        message: &str,
    ) -> Result<()> {
        let name = active_watcher_name(&project.uid);
        let obj = active_watcher_object(project, status, message);
        self.api(&project_active_watcher_resource())
            .patch(
                &name,
                &PatchParams::apply(FIELD_MANAGER).force(),
                &Patch::Apply(&obj),
            )
            .await?;
        debug!(%status, message, "active watcher updated");
        Ok(())
    }

    #[instrument(skip(self, project), fields(project = %project.name, uid = %project.uid))]
    async fn delete_active_watcher(&self, project: &Project) -> Result<()> {
        let name = active_watcher_name(&project.uid);
        match self
            .api(&project_active_watcher_resource())
            .delete(&name, &DeleteParams::default())
            .await
        {
            Ok(_) => Ok(()),
            Err(kube::Error::Api(ae)) if ae.code == 404 => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// Turns raw watch events into add/update/delete project events
///
/// A project is an `Add` the first time it is seen and an `Update` after
/// that, including on watch restarts.
#[derive(Debug, Default)]
pub struct ProjectTracker {
    known: HashSet<String>,
}

impl ProjectTracker {
    /// Translate one watch event
    pub fn translate(&mut self, event: Event<DynamicObject>) -> Option<ProjectEvent> {
        match event {
            Event::Apply(obj) | Event::InitApply(obj) => {
                let project = Project::from_runtime_project(&obj)?;
                if self.known.insert(project.uid.clone()) {
                    Some(ProjectEvent::Add(project))
                } else {
                    Some(ProjectEvent::Update(project))
                }
            }
            Event::Delete(obj) => {
                let project = Project::from_runtime_project(&obj)?;
                self.known.remove(&project.uid);
                Some(ProjectEvent::Delete(project))
            }
            Event::Init | Event::InitDone => None,
        }
    }
}
