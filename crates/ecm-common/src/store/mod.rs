//! Resource store facade
//!
//! Typed read/write/list over dynamic Kubernetes objects addressed by
//! `ApiResource`. Three operation families:
//!
//! - writes: create, update, update_status, delete, delete_collection
//!   (deletes use foreground propagation)
//! - authoritative reads: `get`
//! - cached reads: `get_cached`, `list_cached`, `list_indexed`, answered from
//!   an informer cache for allow-listed resources and from the API otherwise
//!
//! `update` and `update_status` carry the object's resourceVersion and fail
//! with a `Conflict` error when the object changed since it was read.

mod kube_store;
mod rate_limit;

#[cfg(any(test, feature = "testing"))]
pub mod memory;

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use kube::api::DynamicObject;
use kube::discovery::ApiResource;
use serde::de::DeserializeOwned;
use serde::Serialize;

#[cfg(any(test, feature = "testing"))]
use mockall::automock;

pub use kube_store::{KubeStore, KubeStoreBuilder, StoreConfig};
pub use rate_limit::RateLimiter;

use crate::kube_utils::{from_dynamic, to_dynamic, HasApiResource};
use crate::Result;

/// Computes secondary index keys for an object
pub type IndexFn = Arc<dyn Fn(&DynamicObject) -> Vec<String> + Send + Sync>;

/// Options for list calls
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ListOptions {
    /// Equality-based label selector, `k=v,k2=v2` or bare `k` for existence
    pub label_selector: Option<String>,
}

impl ListOptions {
    /// List objects matching a label selector
    pub fn labels(selector: impl Into<String>) -> Self {
        Self {
            label_selector: Some(selector.into()),
        }
    }

    /// True if `labels` satisfy the selector
    pub fn matches(&self, labels: &BTreeMap<String, String>) -> bool {
        let Some(selector) = self.label_selector.as_deref() else {
            return true;
        };
        selector
            .split(',')
            .map(str::trim)
            .filter(|term| !term.is_empty())
            .all(|term| match term.split_once("!=") {
                Some((k, v)) => labels.get(k.trim()).map(String::as_str) != Some(v.trim()),
                None => match term.split_once('=') {
                    Some((k, v)) => {
                        let v = v.trim_start_matches('=');
                        labels.get(k.trim()).map(String::as_str) == Some(v.trim())
                    }
                    None => labels.contains_key(term),
                },
            })
    }
}

/// Read/write access to Kubernetes objects
#[cfg_attr(any(test, feature = "testing"), automock)]
#[async_trait]
pub trait ResourceStore: Send + Sync {
    /// Create a namespaced object
    async fn create(&self, ar: &ApiResource, obj: &DynamicObject) -> Result<DynamicObject>;

    /// Replace an object; fails with a conflict if its resourceVersion is stale
    async fn update(&self, ar: &ApiResource, obj: &DynamicObject) -> Result<DynamicObject>;

    /// Replace an object's status subresource under optimistic concurrency
    async fn update_status(&self, ar: &ApiResource, obj: &DynamicObject)
        -> Result<DynamicObject>;

    /// Delete an object with foreground propagation
    async fn delete(&self, ar: &ApiResource, namespace: &str, name: &str) -> Result<()>;

    /// Delete every object of a type in a namespace with foreground propagation
    async fn delete_collection(&self, ar: &ApiResource, namespace: &str) -> Result<()>;

    /// Read an object from the API server
    async fn get(&self, ar: &ApiResource, namespace: &str, name: &str) -> Result<DynamicObject>;

    /// Read an object from the cache, falling back to the API server on a miss
    async fn get_cached(
        &self,
        ar: &ApiResource,
        namespace: &str,
        name: &str,
    ) -> Result<DynamicObject>;

    /// List objects in a namespace (empty namespace lists all namespaces)
    async fn list_cached(
        &self,
        ar: &ApiResource,
        namespace: &str,
        opts: &ListOptions,
    ) -> Result<Vec<DynamicObject>>;

    /// List objects whose `index` keys contain `key`
    ///
    /// Implementations may evaluate the index function over every cached
    /// object rather than keep a keyed map.
    async fn list_indexed(
        &self,
        ar: &ApiResource,
        index: &str,
        key: &str,
    ) -> Result<Vec<DynamicObject>>;

    /// Create a namespace
    async fn create_namespace(&self, name: &str) -> Result<()>;

    /// Delete a namespace and, eventually, everything in it
    async fn delete_namespace(&self, name: &str) -> Result<()>;
}

/// Read a typed object through the cache
pub async fn get_typed<K>(store: &dyn ResourceStore, namespace: &str, name: &str) -> Result<K>
where
    K: HasApiResource + DeserializeOwned,
{
    let obj = store.get_cached(&K::api_resource(), namespace, name).await?;
    from_dynamic(obj)
}

/// Read a typed object from the API server
pub async fn get_typed_fresh<K>(
    store: &dyn ResourceStore,
    namespace: &str,
    name: &str,
) -> Result<K>
where
    K: HasApiResource + DeserializeOwned,
{
    let obj = store.get(&K::api_resource(), namespace, name).await?;
    from_dynamic(obj)
}

/// List typed objects through the cache
pub async fn list_typed<K>(
    store: &dyn ResourceStore,
    namespace: &str,
    opts: &ListOptions,
) -> Result<Vec<K>>
where
    K: HasApiResource + DeserializeOwned,
{
    store
        .list_cached(&K::api_resource(), namespace, opts)
        .await?
        .into_iter()
        .map(from_dynamic)
        .collect()
}

/// Create a typed object
pub async fn create_typed<K>(store: &dyn ResourceStore, obj: &K) -> Result<K>
where
    K: HasApiResource + Serialize + DeserializeOwned,
{
    let created = store.create(&K::api_resource(), &to_dynamic(obj)?).await?;
    from_dynamic(created)
}

/// Replace a typed object
pub async fn update_typed<K>(store: &dyn ResourceStore, obj: &K) -> Result<K>
where
    K: HasApiResource + Serialize + DeserializeOwned,
{
    let updated = store.update(&K::api_resource(), &to_dynamic(obj)?).await?;
    from_dynamic(updated)
}

/// Replace a typed object's status
pub async fn update_status_typed<K>(store: &dyn ResourceStore, obj: &K) -> Result<K>
where
    K: HasApiResource + Serialize + DeserializeOwned,
{
    let updated = store
        .update_status(&K::api_resource(), &to_dynamic(obj)?)
        .await?;
    from_dynamic(updated)
}
