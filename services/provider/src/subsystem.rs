//! Subsystem seams the supervisor wires together.
//!
//! Startup order is fixed by data dependencies: the cluster service needs the
//! balance checker for funding, the bid engine needs the cluster for
//! capacity, and the manifest service needs the cluster's hostname service.

use std::sync::Arc;

use async_trait::async_trait;
use bidplane_id::{Address, DeploymentId};
use bidplane_reconcile::ManifestGroup;
use serde::Serialize;
use tokio::sync::watch;

use crate::lifecycle::Done;
use crate::types::{BidEngineStatus, ClusterStatus, ManifestStatus};

/// Supervised subsystems in startup order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    BalanceChecker,
    Cluster,
    BidEngine,
    Manifest,
}

impl Stage {
    pub const ALL: [Stage; 4] = [
        Stage::BalanceChecker,
        Stage::Cluster,
        Stage::BidEngine,
        Stage::Manifest,
    ];
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::BalanceChecker => "balance checker",
            Self::Cluster => "cluster",
            Self::BidEngine => "bid engine",
            Self::Manifest => "manifest",
        };
        f.write_str(s)
    }
}

/// A long-running component with its own task.
pub trait Subsystem: Send + Sync {
    /// Resolves once the subsystem's task has fully stopped.
    fn done(&self) -> Done;
}

/// Watches the provider account balance.
#[async_trait]
pub trait BalanceChecker: Subsystem {
    /// Whether the account can currently fund lease deposits.
    async fn funded(&self) -> anyhow::Result<bool>;
}

/// Hostname reservations for lease ingress.
#[async_trait]
pub trait HostnameService: Send + Sync {
    /// Check that `owner` could reserve every hostname, without reserving.
    async fn can_reserve(&self, owner: &Address, hostnames: &[String]) -> anyhow::Result<()>;

    async fn reserve(&self, owner: &Address, hostnames: &[String]) -> anyhow::Result<()>;

    async fn release(&self, owner: &Address, hostnames: &[String]) -> anyhow::Result<()>;
}

#[async_trait]
pub trait ClusterService: Subsystem {
    async fn status(&self) -> anyhow::Result<ClusterStatus>;

    fn hostname_service(&self) -> Arc<dyn HostnameService>;
}

#[async_trait]
pub trait BidEngine: Subsystem {
    async fn status(&self) -> anyhow::Result<BidEngineStatus>;
}

/// Accepts manifests submitted by tenants.
#[async_trait]
pub trait ManifestClient: Send + Sync {
    async fn submit(&self, deployment: &DeploymentId, groups: Vec<ManifestGroup>)
        -> anyhow::Result<()>;
}

#[async_trait]
pub trait ManifestService: ManifestClient + Subsystem {
    async fn status(&self) -> anyhow::Result<ManifestStatus>;
}

/// Starts each subsystem. Every started subsystem must stop once `shutdown`
/// flips to `true`.
#[async_trait]
pub trait SubsystemFactory: Send + Sync {
    async fn balance_checker(
        &self,
        shutdown: watch::Receiver<bool>,
    ) -> anyhow::Result<Arc<dyn BalanceChecker>>;

    async fn cluster(
        &self,
        shutdown: watch::Receiver<bool>,
        funding: Arc<dyn BalanceChecker>,
    ) -> anyhow::Result<Arc<dyn ClusterService>>;

    async fn bid_engine(
        &self,
        shutdown: watch::Receiver<bool>,
        cluster: Arc<dyn ClusterService>,
    ) -> anyhow::Result<Arc<dyn BidEngine>>;

    async fn manifest(
        &self,
        shutdown: watch::Receiver<bool>,
        hostnames: Arc<dyn HostnameService>,
    ) -> anyhow::Result<Arc<dyn ManifestService>>;
}
