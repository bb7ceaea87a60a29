//! ClusterTemplate controller
//!
//! Level-triggered: each reconcile reads the template, resolves its provider
//! strategy and converges the provider bundle one "ensure" step at a time:
//!
//! 1. control-plane template
//! 2. prerequisites
//! 3. control-plane machine template (`<template>-controlplane`)
//! 4. infrastructure cluster template
//! 5. ClusterClass, owned by the template
//!
//! An ensure step probes for its document and creates it only when the probe
//! reports `NotFound`. Steps that already exist are never re-created, so a
//! partially failed reconcile simply resumes on the next pass.
//!
//! Every exit path funnels through one [`StatusPatch`] so the published
//! conditions always describe the latest attempt.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use kube::runtime::controller::Action;
use kube::{Resource, ResourceExt};
use tracing::{debug, error, info, instrument, warn};

use ecm_capi::{registry, skeleton, ClusterClass, ProviderRegistry, ProviderStrategy};
use ecm_common::crd::{
    ClusterTemplate, CLUSTER_TEMPLATE_FINALIZER, CONDITION_CLUSTER_CLASS,
    CONDITION_CONTROL_PLANE_MACHINE_TEMPLATE, CONDITION_CONTROL_PLANE_TEMPLATE,
    CONDITION_INFRA_CLUSTER_TEMPLATE, CONDITION_PREREQUISITES,
};
use ecm_common::kube_utils::HasApiResource;
use ecm_common::retry::{retry_on_conflict, RetryConfig};
use ecm_common::store::{create_typed, get_typed, ResourceStore};
use ecm_common::{Error, ErrorKind, Result};

use crate::status::StatusPatch;

/// Reconciler tuning
#[derive(Clone, Debug)]
pub struct ReconcilerConfig {
    /// Requeue interval for a converged template
    pub resync_interval: Duration,
    /// First retry delay after a failed reconcile
    pub backoff_base: Duration,
    /// Upper bound on the retry delay
    pub backoff_max: Duration,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            resync_interval: Duration::from_secs(600),
            backoff_base: Duration::from_secs(5),
            backoff_max: Duration::from_secs(300),
        }
    }
}

/// Shared context for the ClusterTemplate controller
pub struct Context {
    /// Object store used for every read and write
    pub store: Arc<dyn ResourceStore>,
    /// Provider strategies
    pub registry: &'static ProviderRegistry,
    /// Tuning
    pub config: ReconcilerConfig,
    /// Consecutive failures per `namespace/name`
    failures: Mutex<HashMap<String, u32>>,
}

impl Context {
    /// Create a builder for constructing a Context
    pub fn builder(store: Arc<dyn ResourceStore>) -> ContextBuilder {
        ContextBuilder {
            store,
            registry: None,
            config: ReconcilerConfig::default(),
        }
    }

    /// Context with default registry and tuning
    pub fn new(store: Arc<dyn ResourceStore>) -> Self {
        Self::builder(store).build()
    }

    /// Delay before retrying `key` after another failure
    pub fn next_backoff(&self, key: &str) -> Duration {
        let mut failures = self.failures.lock().unwrap_or_else(|e| e.into_inner());
        let n = failures.entry(key.to_string()).or_insert(0);
        let delay = self
            .config
            .backoff_base
            .saturating_mul(1u32 << (*n).min(16));
        *n = n.saturating_add(1);
        delay.min(self.config.backoff_max)
    }

    /// Forget the failure history of `key`
    pub fn reset_backoff(&self, key: &str) {
        self.failures
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(key);
    }
}

/// Builder for [`Context`]
pub struct ContextBuilder {
    store: Arc<dyn ResourceStore>,
    registry: Option<&'static ProviderRegistry>,
    config: ReconcilerConfig,
}

impl ContextBuilder {
    /// Override the provider registry
    pub fn registry(mut self, registry: &'static ProviderRegistry) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Override the tuning
    pub fn config(mut self, config: ReconcilerConfig) -> Self {
        self.config = config;
        self
    }

    /// Build the Context
    pub fn build(self) -> Context {
        Context {
            store: self.store,
            registry: self.registry.unwrap_or_else(registry),
            config: self.config,
            failures: Mutex::new(HashMap::new()),
        }
    }
}

// =============================================================================
// Steps
// =============================================================================

/// One ensure step of the active branch
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Step {
    /// Control-plane template
    ControlPlaneTemplate,
    /// Prerequisite side objects
    Prerequisites,
    /// `-controlplane` machine template
    ControlPlaneMachineTemplate,
    /// Infrastructure cluster template
    InfraClusterTemplate,
    /// ClusterClass
    ClusterClass,
}

impl Step {
    /// Steps in reconcile order
    pub const ORDER: [Step; 5] = [
        Self::ControlPlaneTemplate,
        Self::Prerequisites,
        Self::ControlPlaneMachineTemplate,
        Self::InfraClusterTemplate,
        Self::ClusterClass,
    ];

    /// Status condition tracking this step
    pub fn condition(self) -> &'static str {
        match self {
            Self::ControlPlaneTemplate => CONDITION_CONTROL_PLANE_TEMPLATE,
            Self::Prerequisites => CONDITION_PREREQUISITES,
            Self::ControlPlaneMachineTemplate => CONDITION_CONTROL_PLANE_MACHINE_TEMPLATE,
            Self::InfraClusterTemplate => CONDITION_INFRA_CLUSTER_TEMPLATE,
            Self::ClusterClass => CONDITION_CLUSTER_CLASS,
        }
    }
}

struct Target<'a> {
    store: &'a dyn ResourceStore,
    strategy: ProviderStrategy,
    template: &'a ClusterTemplate,
    namespace: &'a str,
    name: &'a str,
}

impl Target<'_> {
    async fn probe(&self, step: Step) -> Result<()> {
        let (store, ns, name) = (self.store, self.namespace, self.name);
        match step {
            Step::ControlPlaneTemplate => self
                .strategy
                .get_control_plane_template(store, ns, name)
                .await
                .map(drop),
            Step::Prerequisites => self.strategy.get_prerequisites(store, ns, name).await,
            Step::ControlPlaneMachineTemplate => self
                .strategy
                .get_control_plane_machine_template(store, ns, name)
                .await
                .map(drop),
            Step::InfraClusterTemplate => self
                .strategy
                .get_cluster_template(store, ns, name)
                .await
                .map(drop),
            Step::ClusterClass => store
                .get_cached(&ClusterClass::api_resource(), ns, name)
                .await
                .map(drop),
        }
    }

    async fn create(&self, step: Step) -> Result<()> {
        let (store, ns, name) = (self.store, self.namespace, self.name);
        match step {
            Step::ControlPlaneTemplate => {
                let config = self.template.spec.cluster_configuration_or_empty();
                self.strategy
                    .create_control_plane_template(store, ns, name, config)
                    .await
            }
            Step::Prerequisites => self.strategy.create_prerequisites(store, ns, name).await,
            Step::ControlPlaneMachineTemplate => {
                self.strategy
                    .create_control_plane_machine_template(store, ns, name)
                    .await
            }
            Step::InfraClusterTemplate => {
                self.strategy.create_cluster_template(store, ns, name).await
            }
            Step::ClusterClass => {
                let cc = cluster_class_for(self.strategy, self.template)?;
                create_typed(store, &cc).await.map(drop)
            }
        }
    }

    /// Get, and create if missing
    async fn ensure(&self, step: Step) -> Result<()> {
        match self.probe(step).await {
            Ok(()) => return Ok(()),
            Err(e) if !e.is_not_found() => return Err(e),
            Err(_) => {}
        }
        match self.create(step).await {
            Ok(()) => {
                info!(step = ?step, "created");
                Ok(())
            }
            Err(e) if e.is_already_exists() => Ok(()),
            Err(e) => Err(e),
        }
    }
}

/// The ClusterClass for a template: the shared skeleton altered by the
/// strategy, controlled by the template
pub fn cluster_class_for(strategy: ProviderStrategy, ct: &ClusterTemplate) -> Result<ClusterClass> {
    let mut cc = skeleton(&ct.namespace().unwrap_or_default(), &ct.name_any());
    strategy.alter_cluster_class(&mut cc);
    let owner = ct.controller_owner_ref(&()).ok_or_else(|| {
        Error::internal_with_context("reconciler", "cluster template has no uid")
    })?;
    cc.metadata.owner_references = Some(vec![owner]);
    Ok(cc)
}

fn failure_reason(e: &Error) -> &'static str {
    match e.kind() {
        ErrorKind::InvalidConfig => "InvalidConfiguration",
        ErrorKind::Conflict => "Conflict",
        _ => "Failed",
    }
}

// =============================================================================
// Reconcile
// =============================================================================

fn object_key(ct: &ClusterTemplate) -> String {
    format!("{}/{}", ct.namespace().unwrap_or_default(), ct.name_any())
}

/// Reconcile a ClusterTemplate
#[instrument(
    skip(ct, ctx),
    fields(namespace = %ct.namespace().unwrap_or_default(), template = %ct.name_any())
)]
pub async fn reconcile(ct: Arc<ClusterTemplate>, ctx: Arc<Context>) -> Result<Action> {
    let namespace = ct.namespace().unwrap_or_default();
    let name = ct.name_any();
    let key = object_key(&ct);
    let store = ctx.store.as_ref();

    let ct: ClusterTemplate = match get_typed(store, &namespace, &name).await {
        Ok(ct) => ct,
        Err(e) if e.is_not_found() => {
            debug!("template is gone");
            ctx.reset_backoff(&key);
            return Ok(Action::await_change());
        }
        Err(e) => return Err(e),
    };

    let strategy = match ctx.registry.for_template(&ct) {
        Ok(strategy) => strategy,
        Err(e) => {
            warn!(error = %e, "no provider strategy, waiting for the template to change");
            return Ok(Action::await_change());
        }
    };

    let mut status = StatusPatch::new(&ct);
    let target = Target {
        store,
        strategy,
        template: &ct,
        namespace: &namespace,
        name: &name,
    };

    let outcome = if ct.is_deleting() {
        reconcile_deletion(&target).await
    } else {
        reconcile_active(&target, &mut status, &ctx.config).await
    };

    let published = status.publish(store).await;
    if let Err(e) = &published {
        warn!(error = %e, "failed to publish status");
    }

    let action = match outcome {
        Ok(action) => action,
        Err(e) if e.kind() == ErrorKind::InvalidConfig => {
            warn!(error = %e, "invalid configuration, waiting for the template to change");
            Action::await_change()
        }
        Err(e) => return Err(e),
    };
    published?;
    ctx.reset_backoff(&key);
    Ok(action)
}

async fn reconcile_deletion(target: &Target<'_>) -> Result<Action> {
    if !target.template.has_finalizer() {
        return Ok(Action::await_change());
    }
    target
        .strategy
        .delete_prerequisites(target.store, target.namespace, target.name)
        .await?;
    set_finalizer(target.store, target.namespace, target.name, false).await?;
    info!("finalizer removed");
    Ok(Action::await_change())
}

async fn reconcile_active(
    target: &Target<'_>,
    status: &mut StatusPatch,
    config: &ReconcilerConfig,
) -> Result<Action> {
    for (done, step) in (1u32..).zip(Step::ORDER) {
        if let Err(e) = target.ensure(step).await {
            status.mark_false(step.condition(), failure_reason(&e), e.to_string());
            return Err(e);
        }
        status.mark_true(step.condition());
        status.set_step(done);
    }

    if !target.template.has_finalizer() {
        set_finalizer(target.store, target.namespace, target.name, true).await?;
        debug!("finalizer added");
    }
    Ok(Action::requeue(config.resync_interval))
}

/// Add or remove the template finalizer under optimistic concurrency
async fn set_finalizer(
    store: &dyn ResourceStore,
    namespace: &str,
    name: &str,
    present: bool,
) -> Result<()> {
    let ar = ClusterTemplate::api_resource();
    let result = retry_on_conflict(&RetryConfig::conflict(), "set_finalizer", || {
        let ar = &ar;
        async move {
            let mut obj = store.get(ar, namespace, name).await?;
            let finalizers = obj.metadata.finalizers.get_or_insert_with(Vec::new);
            let has = finalizers.iter().any(|f| f == CLUSTER_TEMPLATE_FINALIZER);
            match (present, has) {
                (true, false) => finalizers.push(CLUSTER_TEMPLATE_FINALIZER.to_string()),
                (false, true) => finalizers.retain(|f| f != CLUSTER_TEMPLATE_FINALIZER),
                _ => return Ok(()),
            }
            store.update(ar, &obj).await.map(drop)
        }
    })
    .await;

    match result {
        Err(e) if !present && e.is_not_found() => Ok(()),
        other => other,
    }
}

/// Requeue policy for failed reconciles
///
/// Input errors wait for an edit; everything else backs off exponentially
/// per object.
pub fn error_policy(ct: Arc<ClusterTemplate>, error: &Error, ctx: Arc<Context>) -> Action {
    match error.kind() {
        ErrorKind::InvalidConfig | ErrorKind::Unsupported => Action::await_change(),
        _ => {
            let delay = ctx.next_backoff(&object_key(&ct));
            error!(
                error = %error,
                template = %ct.name_any(),
                retry_in = ?delay,
                "reconciliation failed"
            );
            Action::requeue(delay)
        }
    }
}
