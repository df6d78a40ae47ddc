//! In-process subsystems for local development and tests.
//!
//! Every subsystem runs a task that idles until shutdown, then lingers for a
//! configurable time before signalling completion. Faults can be injected per
//! stage: failing startup, failing status, or exiting unexpectedly.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use bidplane_id::{Address, DeploymentId, LeaseId};
use bidplane_reconcile::{ApplyContext, LeaseWorkload, ManifestGroup, Settings};
use tokio::sync::{watch, Mutex};
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::inventory::ClusterClient;
use crate::lifecycle::{done_channel, signalled, Done};
use crate::pricing::{BidRequest, PricingError, PricingStrategy};
use crate::subsystem::{
    BalanceChecker, BidEngine, ClusterService, HostnameService, ManifestClient, ManifestService,
    Stage, Subsystem, SubsystemFactory,
};
use crate::types::{BidEngineStatus, ClusterStatus, ManifestStatus, Price};

// =============================================================================
// Task
// =============================================================================

/// Handle to a running dev subsystem task.
#[derive(Debug, Clone)]
pub struct DevTask {
    stage: Stage,
    done: Done,
    crash: Arc<watch::Sender<bool>>,
}

impl DevTask {
    fn spawn(stage: Stage, mut shutdown: watch::Receiver<bool>, linger: Duration) -> Self {
        let (done_tx, done) = done_channel();
        let (crash, mut crashed) = watch::channel(false);

        tokio::spawn(async move {
            tokio::select! {
                _ = signalled(&mut shutdown) => debug!(%stage, "[DEV] shutting down"),
                _ = signalled(&mut crashed) => warn!(%stage, "[DEV] exiting unexpectedly"),
            }
            tokio::time::sleep(linger).await;
            done_tx.fire();
            debug!(%stage, "[DEV] stopped");
        });

        Self {
            stage,
            done,
            crash: Arc::new(crash),
        }
    }

    pub fn stage(&self) -> Stage {
        self.stage
    }

    pub fn done(&self) -> Done {
        self.done.clone()
    }

    /// Make the task exit as if it had failed.
    pub fn crash(&self) {
        self.crash.send_replace(true);
    }
}

/// Fault switches and call counters shared by every dev subsystem.
#[derive(Debug, Default)]
struct Faults {
    status: Mutex<BTreeSet<Stage>>,
    status_calls: Mutex<BTreeMap<Stage, u32>>,
}

impl Faults {
    async fn status(&self, stage: Stage) -> Result<()> {
        *self.status_calls.lock().await.entry(stage).or_default() += 1;
        if self.status.lock().await.contains(&stage) {
            bail!("[DEV] {stage} status unavailable");
        }
        Ok(())
    }
}

// =============================================================================
// Balance Checker
// =============================================================================

pub struct DevBalanceChecker {
    task: DevTask,
    funded: AtomicBool,
}

impl DevBalanceChecker {
    pub fn set_funded(&self, funded: bool) {
        self.funded.store(funded, Ordering::SeqCst);
    }
}

impl Subsystem for DevBalanceChecker {
    fn done(&self) -> Done {
        self.task.done()
    }
}

#[async_trait]
impl BalanceChecker for DevBalanceChecker {
    async fn funded(&self) -> Result<bool> {
        Ok(self.funded.load(Ordering::SeqCst))
    }
}

// =============================================================================
// Hostnames
// =============================================================================

/// First-come hostname reservations with a block list.
pub struct DevHostnames {
    blocked: BTreeSet<String>,
    reserved: Mutex<BTreeMap<String, Address>>,
}

impl DevHostnames {
    pub fn new(blocked: impl IntoIterator<Item = String>) -> Self {
        Self {
            blocked: blocked.into_iter().collect(),
            reserved: Mutex::new(BTreeMap::new()),
        }
    }

    fn check(
        &self,
        reserved: &BTreeMap<String, Address>,
        owner: &Address,
        hostnames: &[String],
    ) -> Result<()> {
        for host in hostnames {
            if self.blocked.contains(host) {
                bail!("hostname {host} is blocked");
            }
            if let Some(holder) = reserved.get(host) {
                if holder != owner {
                    bail!("hostname {host} is in use");
                }
            }
        }
        Ok(())
    }
}

#[async_trait]
impl HostnameService for DevHostnames {
    async fn can_reserve(&self, owner: &Address, hostnames: &[String]) -> Result<()> {
        let reserved = self.reserved.lock().await;
        self.check(&reserved, owner, hostnames)
    }

    async fn reserve(&self, owner: &Address, hostnames: &[String]) -> Result<()> {
        let mut reserved = self.reserved.lock().await;
        self.check(&reserved, owner, hostnames)?;
        for host in hostnames {
            reserved.insert(host.clone(), owner.clone());
        }
        Ok(())
    }

    async fn release(&self, owner: &Address, hostnames: &[String]) -> Result<()> {
        let mut reserved = self.reserved.lock().await;
        for host in hostnames {
            if reserved.get(host) == Some(owner) {
                reserved.remove(host);
            }
        }
        Ok(())
    }
}

fn manifest_hosts(group: &ManifestGroup) -> Vec<String> {
    group
        .services
        .iter()
        .flat_map(|svc| svc.expose.iter())
        .flat_map(|expose| expose.hosts.iter().cloned())
        .collect()
}

// =============================================================================
// Cluster
// =============================================================================

pub struct DevCluster {
    task: DevTask,
    faults: Arc<Faults>,
    client: Arc<dyn ClusterClient>,
    funding: Arc<dyn BalanceChecker>,
    hostnames: Arc<DevHostnames>,
    settings: Settings,
    deploy_timeout: Duration,
    shutdown: watch::Receiver<bool>,
    leases: Mutex<BTreeSet<LeaseId>>,
}

impl DevCluster {
    /// Deploy a won lease: reserve its hostnames and apply its workload.
    pub async fn deploy_lease(&self, lid: &LeaseId, group: &ManifestGroup) -> Result<()> {
        if !self.funding.funded().await? {
            bail!("provider account cannot fund lease {lid}");
        }

        let hosts = manifest_hosts(group);
        self.hostnames.reserve(&lid.owner, &hosts).await?;

        if let Err(e) = self.apply_lease(lid, group).await {
            warn!(lease = %lid, error = %e, "[DEV] lease deployment failed");
            if !self.leases.lock().await.contains(lid) {
                self.hostnames.release(&lid.owner, &hosts).await?;
            }
            return Err(e);
        }

        self.leases.lock().await.insert(lid.clone());
        info!(lease = %lid, "[DEV] lease deployed");
        Ok(())
    }

    async fn apply_lease(&self, lid: &LeaseId, group: &ManifestGroup) -> Result<()> {
        let workload = LeaseWorkload::new(lid, group, &self.settings)?;
        let ctx = ApplyContext::new(self.shutdown.clone()).with_timeout(self.deploy_timeout);
        self.client.deploy(&ctx, &workload).await?;
        Ok(())
    }

    pub async fn leases(&self) -> Vec<LeaseId> {
        self.leases.lock().await.iter().cloned().collect()
    }
}

impl Subsystem for DevCluster {
    fn done(&self) -> Done {
        self.task.done()
    }
}

#[async_trait]
impl ClusterService for DevCluster {
    async fn status(&self) -> Result<ClusterStatus> {
        self.faults.status(Stage::Cluster).await?;
        let inventory = self.client.inventory().await?;
        Ok(ClusterStatus {
            leases: self.leases.lock().await.len() as u32,
            inventory: inventory.status(),
        })
    }

    fn hostname_service(&self) -> Arc<dyn HostnameService> {
        self.hostnames.clone()
    }
}

// =============================================================================
// Bid Engine
// =============================================================================

pub struct DevBidEngine {
    task: DevTask,
    faults: Arc<Faults>,
    orders: AtomicU32,
}

impl Subsystem for DevBidEngine {
    fn done(&self) -> Done {
        self.task.done()
    }
}

#[async_trait]
impl BidEngine for DevBidEngine {
    async fn status(&self) -> Result<BidEngineStatus> {
        self.faults.status(Stage::BidEngine).await?;
        Ok(BidEngineStatus {
            orders: self.orders.load(Ordering::SeqCst),
        })
    }
}

// =============================================================================
// Manifest
// =============================================================================

pub struct DevManifest {
    task: DevTask,
    faults: Arc<Faults>,
    hostnames: Arc<dyn HostnameService>,
    deployments: Mutex<BTreeMap<DeploymentId, Vec<ManifestGroup>>>,
}

impl Subsystem for DevManifest {
    fn done(&self) -> Done {
        self.task.done()
    }
}

#[async_trait]
impl ManifestClient for DevManifest {
    async fn submit(&self, deployment: &DeploymentId, groups: Vec<ManifestGroup>) -> Result<()> {
        let hosts: Vec<String> = groups.iter().flat_map(manifest_hosts).collect();
        self.hostnames.can_reserve(&deployment.owner, &hosts).await?;

        debug!(%deployment, groups = groups.len(), "[DEV] manifest accepted");
        self.deployments
            .lock()
            .await
            .insert(deployment.clone(), groups);
        Ok(())
    }
}

#[async_trait]
impl ManifestService for DevManifest {
    async fn status(&self) -> Result<ManifestStatus> {
        self.faults.status(Stage::Manifest).await?;
        Ok(ManifestStatus {
            deployments: self.deployments.lock().await.len() as u32,
        })
    }
}

// =============================================================================
// Factory
// =============================================================================

/// [`SubsystemFactory`] producing the dev subsystems above.
pub struct DevSubsystems {
    config: Config,
    client: Arc<dyn ClusterClient>,
    linger: Duration,
    fail_start: Option<Stage>,
    faults: Arc<Faults>,
    started: Mutex<Vec<DevTask>>,
    balance: Mutex<Option<Arc<DevBalanceChecker>>>,
    cluster: Mutex<Option<Arc<DevCluster>>>,
}

impl DevSubsystems {
    pub fn new(config: Config, client: Arc<dyn ClusterClient>) -> Self {
        Self {
            config,
            client,
            linger: Duration::ZERO,
            fail_start: None,
            faults: Arc::default(),
            started: Mutex::new(Vec::new()),
            balance: Mutex::new(None),
            cluster: Mutex::new(None),
        }
    }

    /// Fail when asked to start `stage`.
    pub fn failing_at(mut self, stage: Stage) -> Self {
        self.fail_start = Some(stage);
        self
    }

    /// How long each task keeps running after shutdown is signalled.
    pub fn with_linger(mut self, linger: Duration) -> Self {
        self.linger = linger;
        self
    }

    /// Make the status query of `stage` fail from now on.
    pub async fn fail_status(&self, stage: Stage) {
        self.faults.status.lock().await.insert(stage);
    }

    pub async fn status_calls(&self, stage: Stage) -> u32 {
        self.faults
            .status_calls
            .lock()
            .await
            .get(&stage)
            .copied()
            .unwrap_or(0)
    }

    /// Tasks started so far, in start order.
    pub async fn started(&self) -> Vec<DevTask> {
        self.started.lock().await.clone()
    }

    pub async fn task(&self, stage: Stage) -> Option<DevTask> {
        self.started
            .lock()
            .await
            .iter()
            .find(|t| t.stage() == stage)
            .cloned()
    }

    pub async fn balance_handle(&self) -> Option<Arc<DevBalanceChecker>> {
        self.balance.lock().await.clone()
    }

    pub async fn cluster_handle(&self) -> Option<Arc<DevCluster>> {
        self.cluster.lock().await.clone()
    }

    async fn start(&self, stage: Stage, shutdown: watch::Receiver<bool>) -> Result<DevTask> {
        if self.fail_start == Some(stage) {
            return Err(anyhow!("[DEV] {stage} configured to fail"));
        }
        let task = DevTask::spawn(stage, shutdown, self.linger);
        self.started.lock().await.push(task.clone());
        info!(%stage, "[DEV] started");
        Ok(task)
    }
}

#[async_trait]
impl SubsystemFactory for DevSubsystems {
    async fn balance_checker(
        &self,
        shutdown: watch::Receiver<bool>,
    ) -> Result<Arc<dyn BalanceChecker>> {
        let task = self.start(Stage::BalanceChecker, shutdown).await?;
        let balance = Arc::new(DevBalanceChecker {
            task,
            funded: AtomicBool::new(true),
        });
        *self.balance.lock().await = Some(Arc::clone(&balance));
        Ok(balance)
    }

    async fn cluster(
        &self,
        shutdown: watch::Receiver<bool>,
        funding: Arc<dyn BalanceChecker>,
    ) -> Result<Arc<dyn ClusterService>> {
        let task = self.start(Stage::Cluster, shutdown.clone()).await?;
        let cluster = Arc::new(DevCluster {
            task,
            faults: Arc::clone(&self.faults),
            client: Arc::clone(&self.client),
            funding,
            hostnames: Arc::new(DevHostnames::new(self.config.blocked_hostnames.clone())),
            settings: self.config.deployment_settings(),
            deploy_timeout: self.config.manifest_timeout,
            shutdown,
            leases: Mutex::new(BTreeSet::new()),
        });
        *self.cluster.lock().await = Some(Arc::clone(&cluster));
        Ok(cluster)
    }

    async fn bid_engine(
        &self,
        shutdown: watch::Receiver<bool>,
        _cluster: Arc<dyn ClusterService>,
    ) -> Result<Arc<dyn BidEngine>> {
        let task = self.start(Stage::BidEngine, shutdown).await?;
        Ok(Arc::new(DevBidEngine {
            task,
            faults: Arc::clone(&self.faults),
            orders: AtomicU32::new(0),
        }))
    }

    async fn manifest(
        &self,
        shutdown: watch::Receiver<bool>,
        hostnames: Arc<dyn HostnameService>,
    ) -> Result<Arc<dyn ManifestService>> {
        let task = self.start(Stage::Manifest, shutdown).await?;
        Ok(Arc::new(DevManifest {
            task,
            faults: Arc::clone(&self.faults),
            hostnames,
            deployments: Mutex::new(BTreeMap::new()),
        }))
    }
}

// =============================================================================
// Pricing
// =============================================================================

/// Quotes the same price for every request.
#[derive(Debug)]
pub struct FixedPricing {
    price: Price,
    calls: AtomicU32,
    fail: bool,
}

impl FixedPricing {
    pub fn new(price: Price) -> Self {
        Self {
            price,
            calls: AtomicU32::new(0),
            fail: false,
        }
    }

    /// A strategy that refuses to price anything.
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::new(Price::new(0, "uakt"))
        }
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PricingStrategy for FixedPricing {
    async fn calculate_price(&self, req: &BidRequest) -> Result<Price, PricingError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(PricingError::Unpriced(req.gspec.name.clone()));
        }
        Ok(self.price.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn owner(s: &str) -> Address {
        Address::parse(s).unwrap()
    }

    #[tokio::test]
    async fn test_task_stops_on_shutdown_after_linger() {
        let (tx, rx) = watch::channel(false);
        let task = DevTask::spawn(Stage::Cluster, rx, Duration::from_millis(30));
        assert!(!task.done().is_done());

        tx.send_replace(true);
        tokio::time::sleep(Duration::from_millis(5)).await;
        assert!(!task.done().is_done());

        tokio::time::timeout(Duration::from_secs(1), task.done().wait())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_task_crash() {
        let (_tx, rx) = watch::channel(false);
        let task = DevTask::spawn(Stage::BidEngine, rx, Duration::ZERO);
        task.crash();
        tokio::time::timeout(Duration::from_secs(1), task.done().wait())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_hostname_reservations() {
        let hosts = DevHostnames::new(["blocked.example.com".to_string()]);
        let alice = owner("akash1alice");
        let bob = owner("akash1bob");
        let web = vec!["web.example.com".to_string()];

        hosts.reserve(&alice, &web).await.unwrap();
        hosts.can_reserve(&alice, &web).await.unwrap();
        assert!(hosts.can_reserve(&bob, &web).await.is_err());
        assert!(hosts
            .can_reserve(&alice, &["blocked.example.com".to_string()])
            .await
            .is_err());

        hosts.release(&bob, &web).await.unwrap();
        assert!(hosts.can_reserve(&bob, &web).await.is_err());
        hosts.release(&alice, &web).await.unwrap();
        hosts.reserve(&bob, &web).await.unwrap();
    }

    #[tokio::test]
    async fn test_fixed_pricing_counts_calls() {
        let pricing = FixedPricing::new(Price::new(42, "uakt"));
        let req = BidRequest {
            owner: owner("akash1alice"),
            gspec: crate::types::GroupSpec {
                name: "web".into(),
                requirements: Default::default(),
                resources: vec![],
            },
        };
        assert_eq!(pricing.calculate_price(&req).await.unwrap().amount, 42);
        assert_eq!(pricing.calls(), 1);

        let failing = FixedPricing::failing();
        assert!(failing.calculate_price(&req).await.is_err());
        assert_eq!(failing.calls(), 1);
    }
}
