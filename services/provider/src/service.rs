//! Provider supervisor.
//!
//! Starts the four subsystems in dependency order, answers status and
//! admission queries, and tears everything down in a fixed order when any
//! subsystem exits or shutdown is requested.
//!
//! ```text
//!  balance checker ──► cluster ──► bid engine
//!                         │
//!                         └──► (hostnames) ──► manifest
//! ```

use std::sync::Arc;

use async_trait::async_trait;
use bidplane_id::Address;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument, warn};

use crate::config::Config;
use crate::error::ProviderError;
use crate::inventory::{AdjustOptions, ClusterClient};
use crate::lifecycle::{signalled, Done, Lifecycle, LifecycleState};
use crate::pricing::{BidRequest, PricingStrategy};
use crate::reservation::Reservation;
use crate::subsystem::{
    BidEngine, ClusterService, HostnameService, ManifestClient, ManifestService, Stage, Subsystem,
    SubsystemFactory,
};
use crate::types::{GroupSpec, Status, ValidateGroupSpecResult};

// =============================================================================
// Client Traits
// =============================================================================

#[async_trait]
pub trait StatusClient: Send + Sync {
    /// Aggregate status of every subsystem. Fails on the first subsystem
    /// that fails, without querying the rest.
    async fn status(&self) -> Result<Status, ProviderError>;
}

#[async_trait]
pub trait ValidateClient: Send + Sync {
    /// Check that the cluster could host `gspec` and compute the minimum
    /// bid price. Pricing is only consulted once capacity fits.
    async fn validate(
        &self,
        owner: &Address,
        gspec: &GroupSpec,
    ) -> Result<ValidateGroupSpecResult, ProviderError>;
}

/// Everything a front end needs from the provider.
pub trait Client: StatusClient + ValidateClient {
    fn manifest(&self) -> Arc<dyn ManifestClient>;
    fn cluster(&self) -> Arc<dyn ClusterClient>;
    fn hostname(&self) -> Arc<dyn HostnameService>;
    fn cluster_service(&self) -> Arc<dyn ClusterService>;
}

// =============================================================================
// Service
// =============================================================================

pub struct Service {
    config: Config,
    cluster_client: Arc<dyn ClusterClient>,
    pricing: Arc<dyn PricingStrategy>,
    cluster: Arc<dyn ClusterService>,
    bid_engine: Arc<dyn BidEngine>,
    manifest: Arc<dyn ManifestService>,
    lifecycle: Arc<Lifecycle>,
    run_loop: Mutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for Service {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Service").finish_non_exhaustive()
    }
}

impl Service {
    /// Start every subsystem and the supervising run loop.
    ///
    /// If a subsystem fails to start, the ones already running are cancelled
    /// and awaited before the error is returned. `parent` flipping to `true`
    /// stops the service as if [`Service::close`] had been called.
    #[instrument(skip_all, fields(hostname = %config.cluster_public_hostname))]
    pub async fn new(
        parent: watch::Receiver<bool>,
        factory: &dyn SubsystemFactory,
        cluster_client: Arc<dyn ClusterClient>,
        pricing: Arc<dyn PricingStrategy>,
        config: Config,
    ) -> Result<Self, ProviderError> {
        let (cancel, _) = watch::channel(false);

        let balance = match factory.balance_checker(cancel.subscribe()).await {
            Ok(balance) => balance,
            Err(source) => {
                return Err(unwind(&cancel, Stage::BalanceChecker, source, &[]).await);
            }
        };
        debug!(stage = %Stage::BalanceChecker, "started");

        let cluster = match factory.cluster(cancel.subscribe(), balance.clone()).await {
            Ok(cluster) => cluster,
            Err(source) => {
                return Err(unwind(&cancel, Stage::Cluster, source, &[balance.done()]).await);
            }
        };
        debug!(stage = %Stage::Cluster, "started");

        let bid_engine = match factory.bid_engine(cancel.subscribe(), cluster.clone()).await {
            Ok(bid_engine) => bid_engine,
            Err(source) => {
                let started = [cluster.done(), balance.done()];
                return Err(unwind(&cancel, Stage::BidEngine, source, &started).await);
            }
        };
        debug!(stage = %Stage::BidEngine, "started");

        let manifest = match factory
            .manifest(cancel.subscribe(), cluster.hostname_service())
            .await
        {
            Ok(manifest) => manifest,
            Err(source) => {
                let started = [cluster.done(), bid_engine.done(), balance.done()];
                return Err(unwind(&cancel, Stage::Manifest, source, &started).await);
            }
        };
        debug!(stage = %Stage::Manifest, "started");

        let lifecycle = Arc::new(Lifecycle::new());
        let run_loop = tokio::spawn(run(
            Arc::clone(&lifecycle),
            parent,
            cancel,
            RunningSubsystems {
                balance: balance.done(),
                cluster: cluster.done(),
                bid_engine: bid_engine.done(),
                manifest: manifest.done(),
            },
        ));

        lifecycle.transition(LifecycleState::Running);
        info!("provider service started");

        Ok(Self {
            config,
            cluster_client,
            pricing,
            cluster,
            bid_engine,
            manifest,
            lifecycle,
            run_loop: Mutex::new(Some(run_loop)),
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn state(&self) -> LifecycleState {
        self.lifecycle.state()
    }

    /// Resolves once every subsystem has stopped.
    pub fn done(&self) -> Done {
        self.lifecycle.done()
    }

    /// Request shutdown and wait for it to complete. Safe to call more than
    /// once; later calls wait for the same completion.
    pub async fn close(&self) -> Result<(), ProviderError> {
        self.lifecycle.request_shutdown();

        let handle = self.run_loop.lock().await.take();
        match handle {
            Some(handle) => handle.await.map_err(|e| {
                error!(error = %e, "run loop task failed");
                self.lifecycle.complete();
                ProviderError::RunLoop(e.to_string())
            }),
            None => {
                self.lifecycle.done().wait().await;
                Ok(())
            }
        }
    }
}

#[async_trait]
impl StatusClient for Service {
    #[instrument(skip_all)]
    async fn status(&self) -> Result<Status, ProviderError> {
        let cluster = self.cluster.status().await.map_err(|source| ProviderError::Status {
            stage: Stage::Cluster,
            source,
        })?;
        let bidengine = self
            .bid_engine
            .status()
            .await
            .map_err(|source| ProviderError::Status {
                stage: Stage::BidEngine,
                source,
            })?;
        let manifest = self
            .manifest
            .status()
            .await
            .map_err(|source| ProviderError::Status {
                stage: Stage::Manifest,
                source,
            })?;

        Ok(Status {
            cluster,
            bidengine,
            manifest,
            cluster_public_hostname: self.config.cluster_public_hostname.clone(),
        })
    }
}

#[async_trait]
impl ValidateClient for Service {
    #[instrument(skip_all, fields(owner = %owner, group = %gspec.name))]
    async fn validate(
        &self,
        owner: &Address,
        gspec: &GroupSpec,
    ) -> Result<ValidateGroupSpecResult, ProviderError> {
        let req = BidRequest {
            owner: owner.clone(),
            gspec: gspec.clone(),
        };

        let mut inventory = self.cluster_client.inventory().await?;
        let mut reservation = Reservation::new(gspec.clone());
        if let Err(e) = inventory.adjust(&mut reservation, AdjustOptions::dry_run()) {
            debug!(error = %e, "group spec does not fit");
            return Err(e.into());
        }

        let min_bid_price = self.pricing.calculate_price(&req).await?;
        debug!(%min_bid_price, "group spec validated");
        Ok(ValidateGroupSpecResult { min_bid_price })
    }
}

impl Client for Service {
    fn manifest(&self) -> Arc<dyn ManifestClient> {
        self.manifest.clone()
    }

    fn cluster(&self) -> Arc<dyn ClusterClient> {
        Arc::clone(&self.cluster_client)
    }

    fn hostname(&self) -> Arc<dyn HostnameService> {
        self.cluster.hostname_service()
    }

    fn cluster_service(&self) -> Arc<dyn ClusterService> {
        Arc::clone(&self.cluster)
    }
}

// =============================================================================
// Run Loop
// =============================================================================

struct RunningSubsystems {
    balance: Done,
    cluster: Done,
    bid_engine: Done,
    manifest: Done,
}

/// Cancel the stages already started and wait for each, newest dependency
/// first.
async fn unwind(
    cancel: &watch::Sender<bool>,
    stage: Stage,
    source: anyhow::Error,
    started: &[Done],
) -> ProviderError {
    error!(%stage, error = %source, "subsystem failed to start");
    cancel.send_replace(true);
    for done in started {
        done.wait().await;
    }
    ProviderError::Startup { stage, source }
}

async fn run(
    lifecycle: Arc<Lifecycle>,
    mut parent: watch::Receiver<bool>,
    cancel: watch::Sender<bool>,
    subsystems: RunningSubsystems,
) {
    let mut request = lifecycle.shutdown_requested();

    tokio::select! {
        _ = signalled(&mut request) => info!("shutdown requested"),
        _ = signalled(&mut parent) => info!("parent cancelled"),
        _ = subsystems.cluster.wait() => warn!(stage = %Stage::Cluster, "subsystem exited"),
        _ = subsystems.bid_engine.wait() => warn!(stage = %Stage::BidEngine, "subsystem exited"),
        _ = subsystems.manifest.wait() => warn!(stage = %Stage::Manifest, "subsystem exited"),
        _ = subsystems.balance.wait() => warn!(stage = %Stage::BalanceChecker, "subsystem exited"),
    }

    lifecycle.transition(LifecycleState::ShuttingDown);
    cancel.send_replace(true);

    subsystems.cluster.wait().await;
    debug!(stage = %Stage::Cluster, "stopped");
    subsystems.bid_engine.wait().await;
    debug!(stage = %Stage::BidEngine, "stopped");
    subsystems.manifest.wait().await;
    debug!(stage = %Stage::Manifest, "stopped");
    subsystems.balance.wait().await;
    debug!(stage = %Stage::BalanceChecker, "stopped");

    lifecycle.complete();
    info!("shutdown complete");
}
