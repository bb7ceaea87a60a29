//! Deferred status writer for ClusterTemplates
//!
//! A [`StatusPatch`] is opened at the start of a reconcile with the status
//! the template had when it was read. Steps record outcomes on it, and the
//! reconciler publishes it exactly once on every exit path.
//!
//! Publishing re-reads the template and overwrites only the fields this
//! controller owns: the five step conditions, `Ready`, `ready`, `step` and
//! `clusterClassRef`. Conditions written by anyone else survive, and a
//! conflict with a concurrent writer is retried against the fresh copy.

use kube::ResourceExt;
use tracing::{debug, instrument};

use ecm_capi::ClusterClass;
use ecm_common::crd::{
    find_condition, set_condition, ClusterClassRef, ClusterTemplate, ClusterTemplateStatus,
    Condition, ConditionStatus, CONDITION_CLUSTER_CLASS, CONDITION_READY, STEP_CONDITIONS,
};
use ecm_common::kube_utils::HasApiResource;
use ecm_common::retry::{retry_on_conflict, RetryConfig};
use ecm_common::store::{get_typed_fresh, update_status_typed, ResourceStore};
use ecm_common::Result;

/// Reason on a step condition whose document exists
pub const REASON_AVAILABLE: &str = "Available";
/// Reason on Ready when every step is done
pub const REASON_READY: &str = "AllStepsReady";
/// Reason on Ready while steps are outstanding
pub const REASON_PROGRESSING: &str = "Progressing";

/// Status accumulated by one reconcile
#[derive(Clone, Debug)]
pub struct StatusPatch {
    namespace: String,
    name: String,
    before: ClusterTemplateStatus,
    conditions: Vec<Condition>,
    step: u32,
    deleting: bool,
}

impl StatusPatch {
    /// Open a patch against the template as read
    pub fn new(ct: &ClusterTemplate) -> Self {
        let before = ct.status.clone().unwrap_or_default();
        Self {
            namespace: ct.namespace().unwrap_or_default(),
            name: ct.name_any(),
            conditions: before.conditions.clone(),
            before,
            step: 0,
            deleting: ct.is_deleting(),
        }
    }

    /// Record that a step's document exists
    pub fn mark_true(&mut self, condition: &str) {
        set_condition(
            &mut self.conditions,
            Condition::new(condition, ConditionStatus::True, REASON_AVAILABLE, ""),
        );
    }

    /// Record that a step failed
    pub fn mark_false(&mut self, condition: &str, reason: &str, message: impl Into<String>) {
        set_condition(
            &mut self.conditions,
            Condition::new(condition, ConditionStatus::False, reason, message),
        );
    }

    /// Record the number of consecutive steps completed
    pub fn set_step(&mut self, step: u32) {
        self.step = step;
    }

    /// A recorded condition
    pub fn condition(&self, type_: &str) -> Option<&Condition> {
        find_condition(&self.conditions, type_)
    }

    fn is_true(&self, type_: &str) -> bool {
        self.condition(type_).is_some_and(Condition::is_true)
    }

    /// The status this patch publishes
    ///
    /// `Ready` is True iff all five step conditions are True. The step
    /// counter and the ClusterClass reference are only kept while the
    /// template is live.
    pub fn desired(&self) -> ClusterTemplateStatus {
        let mut conditions = self.conditions.clone();

        let pending: Vec<&str> = STEP_CONDITIONS
            .iter()
            .copied()
            .filter(|c| !self.is_true(c))
            .collect();
        let ready = if pending.is_empty() {
            Condition::new(CONDITION_READY, ConditionStatus::True, REASON_READY, "")
        } else {
            Condition::new(
                CONDITION_READY,
                ConditionStatus::False,
                REASON_PROGRESSING,
                format!("waiting for: {}", pending.join(", ")),
            )
        };
        let is_ready = ready.is_true();
        set_condition(&mut conditions, ready);

        let cluster_class_ref = (!self.deleting && self.is_true(CONDITION_CLUSTER_CLASS))
            .then(|| ClusterClassRef {
                api_version: ClusterClass::API_VERSION.to_string(),
                kind: ClusterClass::KIND.to_string(),
                name: self.name.clone(),
                namespace: self.namespace.clone(),
            });

        ClusterTemplateStatus {
            conditions,
            ready: is_ready,
            step: (!self.deleting).then_some(self.step),
            cluster_class_ref,
        }
    }

    /// True if publishing would change nothing the controller owns
    fn unchanged(&self, desired: &ClusterTemplateStatus) -> bool {
        let owned_same = owned_conditions().all(|type_| {
            match (
                find_condition(&self.before.conditions, type_),
                find_condition(&desired.conditions, type_),
            ) {
                (Some(a), Some(b)) => a.same_state(b),
                (None, None) => true,
                _ => false,
            }
        });
        owned_same
            && self.before.ready == desired.ready
            && self.before.step == desired.step
            && self.before.cluster_class_ref == desired.cluster_class_ref
    }

    /// Publish the accumulated status
    ///
    /// A template that disappeared in the meantime has nothing to publish.
    #[instrument(skip(self, store), fields(namespace = %self.namespace, template = %self.name))]
    pub async fn publish(&self, store: &dyn ResourceStore) -> Result<()> {
        let desired = self.desired();
        if self.unchanged(&desired) {
            return Ok(());
        }

        let result = retry_on_conflict(&RetryConfig::conflict(), "publish_status", || {
            let desired = &desired;
            async move {
                let mut latest: ClusterTemplate =
                    get_typed_fresh(store, &self.namespace, &self.name).await?;
                let status = latest.status.get_or_insert_with(Default::default);
                for type_ in owned_conditions() {
                    if let Some(c) = find_condition(&desired.conditions, type_) {
                        set_condition(&mut status.conditions, c.clone());
                    }
                }
                status.ready = desired.ready;
                status.step = desired.step;
                status.cluster_class_ref = desired.cluster_class_ref.clone();
                update_status_typed(store, &latest).await
            }
        })
        .await;

        match result {
            Ok(_) => {
                debug!(ready = desired.ready, step = ?desired.step, "status published");
                Ok(())
            }
            Err(e) if e.is_not_found() => Ok(()),
            Err(e) => Err(e),
        }
    }
}

fn owned_conditions() -> impl Iterator<Item = &'static str> {
    STEP_CONDITIONS.into_iter().chain(std::iter::once(CONDITION_READY))
}
