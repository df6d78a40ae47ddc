//! In-memory orchestration API.
//!
//! Stores objects per kind, assigns resource versions and records every call
//! so tests can assert exactly which remote operations an apply performed.
//! Faults and latency can be injected per store.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::debug;

use crate::api::{OrchestrationApi, ResourceApi};
use crate::error::ApiError;
use crate::metrics::Verb;
use crate::object::{
    Deployment, Manifest, Namespace, NetworkPolicy, Resource, Service, StatefulSet,
};

/// One recorded remote call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Call {
    pub verb: Verb,
    pub namespace: String,
    pub name: String,
}

#[derive(Debug)]
struct Fault {
    verb: Verb,
    name: Option<String>,
    error: ApiError,
}

/// In-memory store for one resource kind.
pub struct MemoryStore<O: Resource> {
    objects: Mutex<BTreeMap<(String, String), O>>,
    calls: Mutex<Vec<Call>>,
    faults: Mutex<Vec<Fault>>,
    latency_ms: AtomicU64,
    version: AtomicU64,
}

impl<O: Resource> Default for MemoryStore<O> {
    fn default() -> Self {
        Self {
            objects: Mutex::new(BTreeMap::new()),
            calls: Mutex::new(Vec::new()),
            faults: Mutex::new(Vec::new()),
            latency_ms: AtomicU64::new(0),
            version: AtomicU64::new(0),
        }
    }
}

impl<O: Resource> MemoryStore<O> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the next matching call with `error`. A `None` name matches any
    /// object.
    pub async fn fail_next(&self, verb: Verb, name: Option<&str>, error: ApiError) {
        self.faults.lock().await.push(Fault {
            verb,
            name: name.map(str::to_string),
            error,
        });
    }

    /// Delay every call by `latency`.
    pub fn set_latency(&self, latency: Duration) {
        self.latency_ms
            .store(latency.as_millis() as u64, Ordering::SeqCst);
    }

    /// Store an object directly, bypassing call recording.
    pub async fn seed(&self, mut obj: O) -> O {
        obj.meta_mut().resource_version = self.next_version();
        let key = Self::key(&obj.meta().namespace, &obj.meta().name);
        self.objects.lock().await.insert(key, obj.clone());
        obj
    }

    /// Look up an object without recording a call.
    pub async fn object(&self, namespace: &str, name: &str) -> Option<O> {
        self.objects
            .lock()
            .await
            .get(&Self::key(namespace, name))
            .cloned()
    }

    pub async fn len(&self) -> usize {
        self.objects.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.objects.lock().await.is_empty()
    }

    pub async fn calls(&self) -> Vec<Call> {
        self.calls.lock().await.clone()
    }

    /// Number of calls made with `verb`.
    pub async fn count(&self, verb: Verb) -> usize {
        self.calls
            .lock()
            .await
            .iter()
            .filter(|c| c.verb == verb)
            .count()
    }

    /// Number of calls made against `name`, any verb.
    pub async fn count_for(&self, name: &str) -> usize {
        self.calls
            .lock()
            .await
            .iter()
            .filter(|c| c.name == name)
            .count()
    }

    pub async fn reset_calls(&self) {
        self.calls.lock().await.clear();
    }

    fn key(namespace: &str, name: &str) -> (String, String) {
        let namespace = if O::NAMESPACED { namespace } else { "" };
        (namespace.to_string(), name.to_string())
    }

    fn next_version(&self) -> u64 {
        self.version.fetch_add(1, Ordering::SeqCst) + 1
    }

    fn not_found(namespace: &str, name: &str) -> ApiError {
        ApiError::NotFound {
            kind: O::KIND,
            namespace: namespace.to_string(),
            name: name.to_string(),
        }
    }

    /// Records the call, applies latency and returns an injected fault if one
    /// matches.
    async fn enter(&self, verb: Verb, namespace: &str, name: &str) -> Result<(), ApiError> {
        self.calls.lock().await.push(Call {
            verb,
            namespace: namespace.to_string(),
            name: name.to_string(),
        });

        let latency = self.latency_ms.load(Ordering::SeqCst);
        if latency > 0 {
            tokio::time::sleep(Duration::from_millis(latency)).await;
        }

        let mut faults = self.faults.lock().await;
        let hit = faults
            .iter()
            .position(|f| f.verb == verb && f.name.as_deref().is_none_or(|n| n == name));
        match hit {
            Some(i) => {
                let fault = faults.remove(i);
                debug!(kind = %O::KIND, name, verb = verb.as_str(), "injected fault");
                Err(fault.error)
            }
            None => Ok(()),
        }
    }
}

#[async_trait]
impl<O: Resource> ResourceApi<O> for MemoryStore<O> {
    async fn get(&self, namespace: &str, name: &str) -> Result<O, ApiError> {
        self.enter(Verb::Get, namespace, name).await?;
        self.objects
            .lock()
            .await
            .get(&Self::key(namespace, name))
            .cloned()
            .ok_or_else(|| Self::not_found(namespace, name))
    }

    async fn create(&self, mut obj: O) -> Result<O, ApiError> {
        let (namespace, name) = (obj.meta().namespace.clone(), obj.meta().name.clone());
        self.enter(Verb::Create, &namespace, &name).await?;

        let mut objects = self.objects.lock().await;
        let key = Self::key(&namespace, &name);
        if objects.contains_key(&key) {
            return Err(ApiError::AlreadyExists {
                kind: O::KIND,
                namespace,
                name,
            });
        }

        obj.meta_mut().resource_version = self.next_version();
        objects.insert(key, obj.clone());
        Ok(obj)
    }

    async fn update(&self, mut obj: O) -> Result<O, ApiError> {
        let (namespace, name) = (obj.meta().namespace.clone(), obj.meta().name.clone());
        self.enter(Verb::Update, &namespace, &name).await?;

        let mut objects = self.objects.lock().await;
        let key = Self::key(&namespace, &name);
        let Some(current) = objects.get(&key) else {
            return Err(Self::not_found(&namespace, &name));
        };

        let submitted = obj.meta().resource_version;
        if submitted != 0 && submitted != current.meta().resource_version {
            return Err(ApiError::Conflict(format!(
                "{} {}/{} is at version {}, update was based on {}",
                O::KIND,
                namespace,
                name,
                current.meta().resource_version,
                submitted
            )));
        }

        obj.meta_mut().resource_version = self.next_version();
        objects.insert(key, obj.clone());
        Ok(obj)
    }
}

/// In-memory stores for every kind a lease deployment writes.
#[derive(Default)]
pub struct MemoryCluster {
    pub namespaces: MemoryStore<Namespace>,
    pub network_policies: MemoryStore<NetworkPolicy>,
    pub deployments: MemoryStore<Deployment>,
    pub stateful_sets: MemoryStore<StatefulSet>,
    pub services: MemoryStore<Service>,
    pub manifests: MemoryStore<Manifest>,
}

impl MemoryCluster {
    pub fn new() -> Self {
        Self::default()
    }
}

impl OrchestrationApi for MemoryCluster {
    fn namespaces(&self) -> &dyn ResourceApi<Namespace> {
        &self.namespaces
    }

    fn network_policies(&self) -> &dyn ResourceApi<NetworkPolicy> {
        &self.network_policies
    }

    fn deployments(&self) -> &dyn ResourceApi<Deployment> {
        &self.deployments
    }

    fn stateful_sets(&self) -> &dyn ResourceApi<StatefulSet> {
        &self.stateful_sets
    }

    fn services(&self) -> &dyn ResourceApi<Service> {
        &self.services
    }

    fn manifests(&self) -> &dyn ResourceApi<Manifest> {
        &self.manifests
    }
}
