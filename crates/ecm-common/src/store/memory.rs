//! In-memory ResourceStore for tests
//!
//! Models the API-server behavior the controllers depend on:
//!
//! - resourceVersion checks on `update` and `update_status`
//! - `update` ignores status, `update_status` touches only status
//! - deleting an object with finalizers only sets deletionTimestamp; the
//!   object disappears when an update drops its last finalizer
//! - deleting a namespace removes everything in it
//!
//! Faults can be queued per operation and kind with [`MemoryStore::fail_next`].

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::Utc;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
use kube::api::{DynamicObject, TypeMeta};
use kube::discovery::ApiResource;
use kube::ResourceExt;

use super::{IndexFn, ListOptions, ResourceStore};
use crate::kube_utils::gvr_key;
use crate::{Error, Result};

/// Store operations, for fault injection and call accounting
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum StoreOp {
    /// `create`
    Create,
    /// `update`
    Update,
    /// `update_status`
    UpdateStatus,
    /// `delete` and `delete_collection`
    Delete,
    /// `get` and `get_cached`
    Get,
    /// `list_cached` and `list_indexed`
    List,
    /// `create_namespace`
    CreateNamespace,
    /// `delete_namespace`
    DeleteNamespace,
}

type Key = (String, String, String);
type ErrorFn = Box<dyn Fn() -> Error + Send>;

struct Fault {
    op: StoreOp,
    kind: String,
    error: ErrorFn,
}

#[derive(Default)]
struct State {
    objects: BTreeMap<Key, DynamicObject>,
    namespaces: BTreeSet<String>,
    next_version: u64,
    faults: Vec<Fault>,
    calls: HashMap<(StoreOp, String), usize>,
}

impl State {
    fn bump(&mut self) -> String {
        self.next_version += 1;
        self.next_version.to_string()
    }

    /// Pop the first queued fault for `op` on `kind`, recording the call
    fn check(&mut self, op: StoreOp, kind: &str) -> Result<()> {
        *self.calls.entry((op, kind.to_string())).or_default() += 1;
        match self
            .faults
            .iter()
            .position(|f| f.op == op && (f.kind.is_empty() || f.kind == kind))
        {
            Some(i) => Err((self.faults.remove(i).error)()),
            None => Ok(()),
        }
    }
}

/// Thread-safe in-memory store
#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<State>,
    indexers: Mutex<HashMap<(String, String), IndexFn>>,
}

fn key(ar: &ApiResource, namespace: &str, name: &str) -> Key {
    (gvr_key(ar), namespace.to_string(), name.to_string())
}

fn has_finalizers(obj: &DynamicObject) -> bool {
    obj.metadata
        .finalizers
        .as_ref()
        .is_some_and(|f| !f.is_empty())
}

impl MemoryStore {
    /// Empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Empty store behind an `Arc`
    pub fn shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Register a secondary index on `ar`
    pub fn register_index(&self, ar: &ApiResource, name: &str, keys: IndexFn) {
        self.indexers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert((gvr_key(ar), name.to_string()), keys);
    }

    /// Fail the next `op` on `kind` (empty kind matches any) with `error()`
    pub fn fail_next(
        &self,
        op: StoreOp,
        kind: &str,
        error: impl Fn() -> Error + Send + 'static,
    ) {
        self.lock().faults.push(Fault {
            op,
            kind: kind.to_string(),
            error: Box::new(error),
        });
    }

    /// Number of `op` calls made on `kind`
    pub fn calls(&self, op: StoreOp, kind: &str) -> usize {
        self.lock()
            .calls
            .get(&(op, kind.to_string()))
            .copied()
            .unwrap_or(0)
    }

    /// Insert or overwrite an object without any API semantics
    pub fn seed(&self, ar: &ApiResource, obj: DynamicObject) -> DynamicObject {
        let mut state = self.lock();
        let mut obj = obj;
        obj.types.get_or_insert_with(|| TypeMeta {
            api_version: ar.api_version.clone(),
            kind: ar.kind.clone(),
        });
        if obj.metadata.uid.is_none() {
            obj.metadata.uid = Some(format!("uid-{}", state.next_version + 1));
        }
        obj.metadata.resource_version = Some(state.bump());
        let ns = obj.namespace().unwrap_or_default();
        if !ns.is_empty() {
            state.namespaces.insert(ns.clone());
        }
        state
            .objects
            .insert(key(ar, &ns, &obj.name_any()), obj.clone());
        obj
    }

    /// Mutate a stored object in place, bumping its resourceVersion
    ///
    /// Simulates a concurrent writer. Returns false if the object is absent.
    pub fn modify(
        &self,
        ar: &ApiResource,
        namespace: &str,
        name: &str,
        f: impl FnOnce(&mut DynamicObject),
    ) -> bool {
        let mut state = self.lock();
        let version = state.bump();
        match state.objects.get_mut(&key(ar, namespace, name)) {
            Some(obj) => {
                f(obj);
                obj.metadata.resource_version = Some(version);
                true
            }
            None => false,
        }
    }

    /// A stored object, if present
    pub fn object(&self, ar: &ApiResource, namespace: &str, name: &str) -> Option<DynamicObject> {
        self.lock()
            .objects
            .get(&key(ar, namespace, name))
            .cloned()
    }

    /// All objects of `ar` in `namespace`, sorted by name
    pub fn objects(&self, ar: &ApiResource, namespace: &str) -> Vec<DynamicObject> {
        let gvr = gvr_key(ar);
        self.lock()
            .objects
            .iter()
            .filter(|((g, ns, _), _)| *g == gvr && ns == namespace)
            .map(|(_, o)| o.clone())
            .collect()
    }

    /// True if the namespace exists
    pub fn has_namespace(&self, name: &str) -> bool {
        self.lock().namespaces.contains(name)
    }

    fn not_found(ar: &ApiResource, namespace: &str, name: &str) -> Error {
        Error::not_found(&ar.kind, namespace, name)
    }

    /// Apply a write to a stored object under optimistic concurrency
    fn write(
        &self,
        op: StoreOp,
        ar: &ApiResource,
        obj: &DynamicObject,
        merge: impl FnOnce(&DynamicObject, &DynamicObject) -> DynamicObject,
    ) -> Result<DynamicObject> {
        let mut state = self.lock();
        state.check(op, &ar.kind)?;

        let ns = obj.namespace().unwrap_or_default();
        let name = obj.name_any();
        let k = key(ar, &ns, &name);
        let current = state
            .objects
            .get(&k)
            .cloned()
            .ok_or_else(|| Self::not_found(ar, &ns, &name))?;

        if let Some(rv) = obj.metadata.resource_version.as_deref() {
            if current.metadata.resource_version.as_deref() != Some(rv) {
                return Err(Error::conflict(
                    &ar.kind,
                    &name,
                    "the object has been modified; please apply your changes to the latest version and try again",
                ));
            }
        }

        let mut next = merge(&current, obj);
        next.metadata.resource_version = Some(state.bump());

        if next.metadata.deletion_timestamp.is_some() && !has_finalizers(&next) {
            state.objects.remove(&k);
        } else {
            state.objects.insert(k, next.clone());
        }
        Ok(next)
    }

    fn remove(state: &mut State, k: Key) {
        let stamp = state.bump();
        if let Some(obj) = state.objects.get_mut(&k) {
            if has_finalizers(obj) {
                if obj.metadata.deletion_timestamp.is_none() {
                    obj.metadata.deletion_timestamp = Some(Time(Utc::now()));
                    obj.metadata.resource_version = Some(stamp);
                }
                return;
            }
        }
        state.objects.remove(&k);
    }
}

#[async_trait]
impl ResourceStore for MemoryStore {
    async fn create(&self, ar: &ApiResource, obj: &DynamicObject) -> Result<DynamicObject> {
        let mut state = self.lock();
        state.check(StoreOp::Create, &ar.kind)?;

        let ns = obj.namespace().unwrap_or_default();
        let name = obj.name_any();
        let k = key(ar, &ns, &name);
        if state.objects.contains_key(&k) {
            return Err(Error::already_exists(&ar.kind, &ns, &name));
        }

        let mut created = obj.clone();
        created.types = Some(TypeMeta {
            api_version: ar.api_version.clone(),
            kind: ar.kind.clone(),
        });
        created.metadata.uid = Some(format!("uid-{}", state.next_version + 1));
        created.metadata.resource_version = Some(state.bump());
        created.metadata.deletion_timestamp = None;
        state.objects.insert(k, created.clone());
        Ok(created)
    }

    async fn update(&self, ar: &ApiResource, obj: &DynamicObject) -> Result<DynamicObject> {
        self.write(StoreOp::Update, ar, obj, |current, incoming| {
            let mut next = incoming.clone();
            next.types = current.types.clone();
            next.metadata.uid = current.metadata.uid.clone();
            next.metadata.deletion_timestamp = current.metadata.deletion_timestamp.clone();
            match current.data.get("status") {
                Some(status) => {
                    if let Some(map) = next.data.as_object_mut() {
                        map.insert("status".to_string(), status.clone());
                    }
                }
                None => {
                    if let Some(map) = next.data.as_object_mut() {
                        map.remove("status");
                    }
                }
            }
            next
        })
    }

    async fn update_status(
        &self,
        ar: &ApiResource,
        obj: &DynamicObject,
    ) -> Result<DynamicObject> {
        self.write(StoreOp::UpdateStatus, ar, obj, |current, incoming| {
            let mut next = current.clone();
            if let Some(map) = next.data.as_object_mut() {
                match incoming.data.get("status") {
                    Some(status) => {
                        map.insert("status".to_string(), status.clone());
                    }
                    None => {
                        map.remove("status");
                    }
                }
            }
            next
        })
    }

    async fn delete(&self, ar: &ApiResource, namespace: &str, name: &str) -> Result<()> {
        let mut state = self.lock();
        state.check(StoreOp::Delete, &ar.kind)?;
        let k = key(ar, namespace, name);
        if !state.objects.contains_key(&k) {
            return Err(Self::not_found(ar, namespace, name));
        }
        Self::remove(&mut state, k);
        Ok(())
    }

    async fn delete_collection(&self, ar: &ApiResource, namespace: &str) -> Result<()> {
        let mut state = self.lock();
        state.check(StoreOp::Delete, &ar.kind)?;
        let gvr = gvr_key(ar);
        let keys: Vec<Key> = state
            .objects
            .keys()
            .filter(|(g, ns, _)| *g == gvr && ns == namespace)
            .cloned()
            .collect();
        for k in keys {
            Self::remove(&mut state, k);
        }
        Ok(())
    }

    async fn get(&self, ar: &ApiResource, namespace: &str, name: &str) -> Result<DynamicObject> {
        let mut state = self.lock();
        state.check(StoreOp::Get, &ar.kind)?;
        state
            .objects
            .get(&key(ar, namespace, name))
            .cloned()
            .ok_or_else(|| Self::not_found(ar, namespace, name))
    }

    async fn get_cached(
        &self,
        ar: &ApiResource,
        namespace: &str,
        name: &str,
    ) -> Result<DynamicObject> {
        self.get(ar, namespace, name).await
    }

    async fn list_cached(
        &self,
        ar: &ApiResource,
        namespace: &str,
        opts: &ListOptions,
    ) -> Result<Vec<DynamicObject>> {
        let mut state = self.lock();
        state.check(StoreOp::List, &ar.kind)?;
        let gvr = gvr_key(ar);
        Ok(state
            .objects
            .iter()
            .filter(|((g, ns, _), _)| *g == gvr && (namespace.is_empty() || ns == namespace))
            .filter(|(_, o)| opts.matches(o.labels()))
            .map(|(_, o)| o.clone())
            .collect())
    }

    async fn list_indexed(
        &self,
        ar: &ApiResource,
        index: &str,
        key: &str,
    ) -> Result<Vec<DynamicObject>> {
        let keys = self
            .indexers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(&(gvr_key(ar), index.to_string()))
            .cloned()
            .ok_or_else(|| {
                Error::internal_with_context(
                    "store",
                    format!("no index {index} registered for {}", ar.kind),
                )
            })?;
        let all = self.list_cached(ar, "", &ListOptions::default()).await?;
        Ok(all
            .into_iter()
            .filter(|o| keys(o).iter().any(|k| k == key))
            .collect())
    }

    async fn create_namespace(&self, name: &str) -> Result<()> {
        let mut state = self.lock();
        state.check(StoreOp::CreateNamespace, "Namespace")?;
        if !state.namespaces.insert(name.to_string()) {
            return Err(Error::already_exists("Namespace", "", name));
        }
        Ok(())
    }

    async fn delete_namespace(&self, name: &str) -> Result<()> {
        let mut state = self.lock();
        state.check(StoreOp::DeleteNamespace, "Namespace")?;
        if !state.namespaces.remove(name) {
            return Err(Error::not_found("Namespace", "", name));
        }
        state.objects.retain(|(_, ns, _), _| ns != name);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kube_utils::config_map_resource;
    use serde_json::json;

    fn config_map(name: &str, labels: &[(&str, &str)]) -> DynamicObject {
        let mut obj = DynamicObject::new(name, &config_map_resource()).within("tenant");
        obj.metadata.labels = Some(
            labels
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        );
        obj.data = json!({"data": {"k": "v"}});
        obj
    }

    /// Story: a second writer holding a stale copy gets a conflict
    #[tokio::test]
    async fn story_stale_update_conflicts() {
        let store = MemoryStore::new();
        let ar = config_map_resource();
        let created = store.create(&ar, &config_map("cm", &[])).await.unwrap();

        let mut first = created.clone();
        first.data = json!({"data": {"k": "first"}});
        store.update(&ar, &first).await.unwrap();

        let mut second = created;
        second.data = json!({"data": {"k": "second"}});
        let err = store.update(&ar, &second).await.unwrap_err();
        assert!(err.is_conflict());
    }

    /// Story: finalizers hold an object until the last one is removed
    #[tokio::test]
    async fn story_finalizers_defer_deletion() {
        let store = MemoryStore::new();
        let ar = config_map_resource();
        let mut cm = config_map("cm", &[]);
        cm.metadata.finalizers = Some(vec!["example.com/hold".to_string()]);
        store.create(&ar, &cm).await.unwrap();

        store.delete(&ar, "tenant", "cm").await.unwrap();
        let mut held = store.get(&ar, "tenant", "cm").await.unwrap();
        assert!(held.metadata.deletion_timestamp.is_some());

        held.metadata.finalizers = Some(vec![]);
        store.update(&ar, &held).await.unwrap();
        assert!(store
            .get(&ar, "tenant", "cm")
            .await
            .unwrap_err()
            .is_not_found());
    }

    #[tokio::test]
    async fn test_duplicate_create_is_already_exists() {
        let store = MemoryStore::new();
        let ar = config_map_resource();
        store.create(&ar, &config_map("cm", &[])).await.unwrap();
        let err = store.create(&ar, &config_map("cm", &[])).await.unwrap_err();
        assert!(err.is_already_exists());
    }

    #[tokio::test]
    async fn test_update_preserves_status_and_status_update_preserves_spec() {
        let store = MemoryStore::new();
        let ar = config_map_resource();
        let mut obj = config_map("cm", &[]);
        obj.data = json!({"spec": {"a": 1}, "status": {"ready": true}});
        let created = store.create(&ar, &obj).await.unwrap();

        let mut spec_edit = created.clone();
        spec_edit.data = json!({"spec": {"a": 2}, "status": {"ready": false}});
        let updated = store.update(&ar, &spec_edit).await.unwrap();
        assert_eq!(updated.data["status"]["ready"], json!(true));
        assert_eq!(updated.data["spec"]["a"], json!(2));

        let mut status_edit = updated.clone();
        status_edit.data = json!({"spec": {"a": 3}, "status": {"ready": false}});
        let updated = store.update_status(&ar, &status_edit).await.unwrap();
        assert_eq!(updated.data["status"]["ready"], json!(false));
        assert_eq!(updated.data["spec"]["a"], json!(2));
    }

    #[tokio::test]
    async fn test_list_filters_by_namespace_and_labels() {
        let store = MemoryStore::new();
        let ar = config_map_resource();
        store
            .create(&ar, &config_map("a", &[("default", "true")]))
            .await
            .unwrap();
        store.create(&ar, &config_map("b", &[])).await.unwrap();
        let mut other = config_map("c", &[("default", "true")]);
        other.metadata.namespace = Some("other".to_string());
        store.create(&ar, &other).await.unwrap();

        let defaults = store
            .list_cached(&ar, "tenant", &ListOptions::labels("default=true"))
            .await
            .unwrap();
        assert_eq!(defaults.len(), 1);
        assert_eq!(defaults[0].name_any(), "a");

        let everywhere = store
            .list_cached(&ar, "", &ListOptions::labels("default=true"))
            .await
            .unwrap();
        assert_eq!(everywhere.len(), 2);
    }

    #[tokio::test]
    async fn test_index_lookup() {
        let store = MemoryStore::new();
        let ar = config_map_resource();
        store.register_index(
            &ar,
            "by-k",
            Arc::new(|o: &DynamicObject| {
                o.data["data"]["k"]
                    .as_str()
                    .map(|v| vec![v.to_string()])
                    .unwrap_or_default()
            }),
        );
        store.create(&ar, &config_map("cm", &[])).await.unwrap();

        assert_eq!(store.list_indexed(&ar, "by-k", "v").await.unwrap().len(), 1);
        assert!(store.list_indexed(&ar, "by-k", "x").await.unwrap().is_empty());
        assert!(store.list_indexed(&ar, "missing", "v").await.is_err());
    }

    #[tokio::test]
    async fn test_namespace_lifecycle_and_faults() {
        let store = MemoryStore::new();
        store.create_namespace("tenant").await.unwrap();
        assert!(store
            .create_namespace("tenant")
            .await
            .unwrap_err()
            .is_already_exists());

        let ar = config_map_resource();
        store.create(&ar, &config_map("cm", &[])).await.unwrap();
        store.delete_namespace("tenant").await.unwrap();
        assert!(!store.has_namespace("tenant"));
        assert!(store.objects(&ar, "tenant").is_empty());

        store.fail_next(StoreOp::Get, "ConfigMap", || Error::internal("boom"));
        assert!(store.get(&ar, "tenant", "cm").await.is_err());
        assert!(store
            .get(&ar, "tenant", "cm")
            .await
            .unwrap_err()
            .is_not_found());
        assert_eq!(store.calls(StoreOp::Get, "ConfigMap"), 2);
    }
}
