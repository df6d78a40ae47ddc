//! Remote orchestration API seam.

use async_trait::async_trait;

use crate::error::ApiError;
use crate::object::{Deployment, Manifest, Namespace, NetworkPolicy, Resource, Service, StatefulSet};

/// Get/create/update access to one resource kind.
///
/// `namespace` is ignored for cluster-scoped kinds.
#[async_trait]
pub trait ResourceApi<O: Resource>: Send + Sync {
    async fn get(&self, namespace: &str, name: &str) -> Result<O, ApiError>;

    async fn create(&self, obj: O) -> Result<O, ApiError>;

    async fn update(&self, obj: O) -> Result<O, ApiError>;
}

/// Access to every resource kind a lease deployment writes.
pub trait OrchestrationApi: Send + Sync {
    fn namespaces(&self) -> &dyn ResourceApi<Namespace>;
    fn network_policies(&self) -> &dyn ResourceApi<NetworkPolicy>;
    fn deployments(&self) -> &dyn ResourceApi<Deployment>;
    fn stateful_sets(&self) -> &dyn ResourceApi<StatefulSet>;
    fn services(&self) -> &dyn ResourceApi<Service>;
    fn manifests(&self) -> &dyn ResourceApi<Manifest>;
}
