//! ResourceStore backed by the Kubernetes API
//!
//! Resources on the cache allow-list are served from reflector stores that
//! are started on first use. Everything else goes straight to the API.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use k8s_openapi::api::core::v1::Namespace;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::api::{Api, DeleteParams, DynamicObject, ListParams, PostParams};
use kube::discovery::ApiResource;
use kube::runtime::reflector::{self, ObjectRef, Store};
use kube::runtime::{watcher, WatchStreamExt};
use kube::{Client, ResourceExt};
use tracing::{debug, instrument, warn};

use super::{IndexFn, ListOptions, RateLimiter, ResourceStore};
use crate::kube_utils::gvr_key;
use crate::{Error, Result};

/// Watch timeout in seconds, below the client read timeout
const WATCH_TIMEOUT_SECS: u32 = 25;

/// Store tuning
#[derive(Clone, Debug)]
pub struct StoreConfig {
    /// Sustained API calls per second; non-positive disables limiting
    pub qps: f32,
    /// Calls allowed in a burst
    pub burst: u32,
    /// Upper bound on waiting for a new cache to sync
    pub cache_sync_timeout: Duration,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            qps: 20.0,
            burst: 30,
            cache_sync_timeout: Duration::from_secs(30),
        }
    }
}

/// Builder for [`KubeStore`]
pub struct KubeStoreBuilder {
    client: Client,
    config: StoreConfig,
    cached: HashMap<String, ApiResource>,
    indexers: HashMap<(String, String), IndexFn>,
}

impl KubeStoreBuilder {
    /// Set tuning parameters
    pub fn config(mut self, config: StoreConfig) -> Self {
        self.config = config;
        self
    }

    /// Serve `ar` from an informer cache
    pub fn cache(mut self, ar: ApiResource) -> Self {
        self.cached.insert(gvr_key(&ar), ar);
        self
    }

    /// Register a secondary index on `ar`
    ///
    /// The index is a key function, not a materialized map: lookups run it
    /// over the whole informer cache of `ar`, so `ar` should also be cached.
    pub fn index(mut self, ar: &ApiResource, name: &str, keys: IndexFn) -> Self {
        self.indexers.insert((gvr_key(ar), name.to_string()), keys);
        self
    }

    /// Build the store
    pub fn build(self) -> KubeStore {
        KubeStore {
            limiter: RateLimiter::new(self.config.qps, self.config.burst),
            client: self.client,
            cache_sync_timeout: self.config.cache_sync_timeout,
            cached: self.cached,
            indexers: self.indexers,
            caches: Mutex::new(HashMap::new()),
        }
    }
}

/// ResourceStore over a live cluster
pub struct KubeStore {
    client: Client,
    limiter: RateLimiter,
    cache_sync_timeout: Duration,
    cached: HashMap<String, ApiResource>,
    indexers: HashMap<(String, String), IndexFn>,
    caches: Mutex<HashMap<String, Store<DynamicObject>>>,
}

impl KubeStore {
    /// Start building a store over `client`
    pub fn builder(client: Client) -> KubeStoreBuilder {
        KubeStoreBuilder {
            client,
            config: StoreConfig::default(),
            cached: HashMap::new(),
            indexers: HashMap::new(),
        }
    }

    fn namespaced(&self, ar: &ApiResource, namespace: &str) -> Api<DynamicObject> {
        Api::namespaced_with(self.client.clone(), namespace, ar)
    }

    /// Cache for `ar`, starting its reflector on first use
    ///
    /// Returns `None` for resources outside the allow-list.
    async fn cache_for(&self, ar: &ApiResource) -> Result<Option<Store<DynamicObject>>> {
        let key = gvr_key(ar);
        if !self.cached.contains_key(&key) {
            return Ok(None);
        }

        let (store, started) = {
            let mut caches = self.caches.lock().unwrap_or_else(|e| e.into_inner());
            match caches.get(&key) {
                Some(store) => (store.clone(), false),
                None => {
                    let store = self.start_reflector(ar);
                    caches.insert(key.clone(), store.clone());
                    (store, true)
                }
            }
        };

        if started {
            debug!(resource = %key, "started informer cache");
        }
        tokio::time::timeout(self.cache_sync_timeout, store.wait_until_ready())
            .await
            .map_err(|_| Error::internal_with_context("store", format!("cache sync timed out for {key}")))?
            .map_err(|e| Error::internal_with_context("store", e.to_string()))?;
        Ok(Some(store))
    }

    fn start_reflector(&self, ar: &ApiResource) -> Store<DynamicObject> {
        let writer = reflector::store::Writer::new(ar.clone());
        let store = writer.as_reader();
        let api: Api<DynamicObject> = Api::all_with(self.client.clone(), ar);
        let key = gvr_key(ar);

        let stream = reflector::reflector(
            writer,
            watcher(api, watcher::Config::default().timeout(WATCH_TIMEOUT_SECS)),
        )
        .default_backoff()
        .touched_objects();

        tokio::spawn(async move {
            stream
                .for_each(|event| {
                    if let Err(e) = event {
                        warn!(resource = %key, error = %e, "informer watch error");
                    }
                    futures::future::ready(())
                })
                .await;
        });

        store
    }

    fn indexer(&self, ar: &ApiResource, index: &str) -> Result<&IndexFn> {
        self.indexers
            .get(&(gvr_key(ar), index.to_string()))
            .ok_or_else(|| {
                Error::internal_with_context(
                    "store",
                    format!("no index {index} registered for {}", ar.kind),
                )
            })
    }
}

#[async_trait]
impl ResourceStore for KubeStore {
    #[instrument(skip(self, obj), fields(kind = %ar.kind, name = %obj.name_any()))]
    async fn create(&self, ar: &ApiResource, obj: &DynamicObject) -> Result<DynamicObject> {
        self.limiter.acquire().await;
        let ns = obj.namespace().unwrap_or_default();
        Ok(self
            .namespaced(ar, &ns)
            .create(&PostParams::default(), obj)
            .await?)
    }

    #[instrument(skip(self, obj), fields(kind = %ar.kind, name = %obj.name_any()))]
    async fn update(&self, ar: &ApiResource, obj: &DynamicObject) -> Result<DynamicObject> {
        self.limiter.acquire().await;
        let ns = obj.namespace().unwrap_or_default();
        Ok(self
            .namespaced(ar, &ns)
            .replace(&obj.name_any(), &PostParams::default(), obj)
            .await?)
    }

    #[instrument(skip(self, obj), fields(kind = %ar.kind, name = %obj.name_any()))]
    async fn update_status(
        &self,
        ar: &ApiResource,
        obj: &DynamicObject,
    ) -> Result<DynamicObject> {
        self.limiter.acquire().await;
        let ns = obj.namespace().unwrap_or_default();
        let body = serde_json::to_vec(obj).map_err(|e| Error::serialization(e.to_string()))?;
        Ok(self
            .namespaced(ar, &ns)
            .replace_status(&obj.name_any(), &PostParams::default(), body)
            .await?)
    }

    #[instrument(skip(self), fields(kind = %ar.kind))]
    async fn delete(&self, ar: &ApiResource, namespace: &str, name: &str) -> Result<()> {
        self.limiter.acquire().await;
        self.namespaced(ar, namespace)
            .delete(name, &DeleteParams::foreground())
            .await?;
        Ok(())
    }

    #[instrument(skip(self), fields(kind = %ar.kind))]
    async fn delete_collection(&self, ar: &ApiResource, namespace: &str) -> Result<()> {
        self.limiter.acquire().await;
        self.namespaced(ar, namespace)
            .delete_collection(&DeleteParams::foreground(), &ListParams::default())
            .await?;
        Ok(())
    }

    async fn get(&self, ar: &ApiResource, namespace: &str, name: &str) -> Result<DynamicObject> {
        self.limiter.acquire().await;
        Ok(self.namespaced(ar, namespace).get(name).await?)
    }

    async fn get_cached(
        &self,
        ar: &ApiResource,
        namespace: &str,
        name: &str,
    ) -> Result<DynamicObject> {
        if let Some(store) = self.cache_for(ar).await? {
            let key = ObjectRef::new_with(name, ar.clone()).within(namespace);
            if let Some(obj) = store.get(&key) {
                return Ok((*obj).clone());
            }
        }
        self.get(ar, namespace, name).await
    }

    async fn list_cached(
        &self,
        ar: &ApiResource,
        namespace: &str,
        opts: &ListOptions,
    ) -> Result<Vec<DynamicObject>> {
        if let Some(store) = self.cache_for(ar).await? {
            return Ok(store
                .state()
                .into_iter()
                .filter(|o| namespace.is_empty() || o.namespace().as_deref() == Some(namespace))
                .filter(|o| opts.matches(o.labels()))
                .map(|o| (*o).clone())
                .collect());
        }

        self.limiter.acquire().await;
        let api: Api<DynamicObject> = if namespace.is_empty() {
            Api::all_with(self.client.clone(), ar)
        } else {
            self.namespaced(ar, namespace)
        };
        let mut params = ListParams::default();
        if let Some(selector) = &opts.label_selector {
            params = params.labels(selector);
        }
        Ok(api.list(&params).await?.items)
    }

    /// Linear scan of the cached objects through the index function
    async fn list_indexed(
        &self,
        ar: &ApiResource,
        index: &str,
        key: &str,
    ) -> Result<Vec<DynamicObject>> {
        let keys = Arc::clone(self.indexer(ar, index)?);
        let all = self.list_cached(ar, "", &ListOptions::default()).await?;
        Ok(all
            .into_iter()
            .filter(|o| keys(o).iter().any(|k| k == key))
            .collect())
    }

    #[instrument(skip(self))]
    async fn create_namespace(&self, name: &str) -> Result<()> {
        self.limiter.acquire().await;
        let api: Api<Namespace> = Api::all(self.client.clone());
        let ns = Namespace {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                ..Default::default()
            },
            ..Default::default()
        };
        api.create(&PostParams::default(), &ns).await?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn delete_namespace(&self, name: &str) -> Result<()> {
        self.limiter.acquire().await;
        let api: Api<Namespace> = Api::all(self.client.clone());
        api.delete(name, &DeleteParams::foreground()).await?;
        Ok(())
    }
}
