//! Cluster inventory and the client the supervisor uses to reach the cluster.

use std::sync::Arc;

use async_trait::async_trait;
use bidplane_reconcile::{deploy, ApplyContext, ApplyError, LeaseWorkload, OrchestrationApi};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, instrument};

use crate::reservation::{ReservationError, ReservationGroup};
use crate::types::{Capacity, InventoryStatus, NodeStatus, Resources};

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum InventoryError {
    #[error("insufficient capacity: {0}")]
    InsufficientCapacity(String),

    #[error("invalid group spec: {0}")]
    InvalidGroupSpec(String),

    #[error(transparent)]
    Reservation(#[from] ReservationError),

    #[error("inventory unavailable: {0}")]
    Unavailable(String),
}

/// Options for [`Inventory::adjust`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AdjustOptions {
    /// Check fit and fill the reservation without consuming capacity.
    pub dry_run: bool,
}

impl AdjustOptions {
    pub fn dry_run() -> Self {
        Self { dry_run: true }
    }
}

/// A point-in-time view of cluster capacity.
pub trait Inventory: Send + Sync + std::fmt::Debug {
    /// Fit `reservation` into available capacity, recording the allocation
    /// on the reservation. A dry run leaves the inventory untouched.
    fn adjust(
        &mut self,
        reservation: &mut dyn ReservationGroup,
        opts: AdjustOptions,
    ) -> Result<(), InventoryError>;

    fn status(&self) -> InventoryStatus;
}

/// The cluster as seen by the supervisor: capacity snapshots and lease
/// deployment.
#[async_trait]
pub trait ClusterClient: Send + Sync {
    /// Take a snapshot of current inventory. Adjusting the snapshot never
    /// affects the cluster's own accounting.
    async fn inventory(&self) -> Result<Box<dyn Inventory>, InventoryError>;

    async fn deploy(&self, ctx: &ApplyContext, workload: &LeaseWorkload)
        -> Result<(), ApplyError>;
}

// =============================================================================
// Node Inventory
// =============================================================================

/// Overcommit ratios applied to node allocatable capacity.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CommitLevels {
    pub cpu: f64,
    pub memory: f64,
    pub storage: f64,
}

impl Default for CommitLevels {
    fn default() -> Self {
        Self {
            cpu: 1.0,
            memory: 1.0,
            storage: 1.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Node {
    pub name: String,
    pub allocatable: Capacity,
    #[serde(default)]
    pub allocated: Capacity,
}

impl Node {
    pub fn new(name: impl Into<String>, allocatable: Capacity) -> Self {
        Self {
            name: name.into(),
            allocatable,
            allocated: Capacity::default(),
        }
    }

    fn available(&self, levels: &CommitLevels) -> Capacity {
        let scale = |v: u64, level: f64| (v as f64 * level) as u64;
        Capacity {
            cpu_millis: scale(self.allocatable.cpu_millis, levels.cpu),
            memory_bytes: scale(self.allocatable.memory_bytes, levels.memory),
            storage_bytes: scale(self.allocatable.storage_bytes, levels.storage),
        }
        .saturating_sub(&self.allocated)
    }
}

/// First-fit inventory over a fixed node list.
#[derive(Debug, Clone, Default)]
pub struct NodeInventory {
    nodes: Vec<Node>,
    levels: CommitLevels,
}

impl NodeInventory {
    pub fn new(nodes: Vec<Node>) -> Self {
        Self {
            nodes,
            levels: CommitLevels::default(),
        }
    }

    pub fn with_commit_levels(mut self, levels: CommitLevels) -> Self {
        self.levels = levels;
        self
    }

    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }
}

impl Inventory for NodeInventory {
    fn adjust(
        &mut self,
        reservation: &mut dyn ReservationGroup,
        opts: AdjustOptions,
    ) -> Result<(), InventoryError> {
        let gspec = reservation.resources();
        if gspec.resources.is_empty() {
            return Err(InventoryError::InvalidGroupSpec(format!(
                "group {} requests no resources",
                gspec.name
            )));
        }

        let mut nodes = self.nodes.clone();
        let mut allocated: Vec<Resources> = Vec::with_capacity(gspec.resources.len());
        let mut placement: Vec<String> = Vec::new();

        for (idx, unit) in gspec.resources.iter().enumerate() {
            let demand = unit.resources.capacity().ok_or_else(|| {
                InventoryError::InvalidGroupSpec(format!(
                    "group {} unit {idx} storage size overflows",
                    gspec.name
                ))
            })?;
            if demand == Capacity::default() {
                return Err(InventoryError::InvalidGroupSpec(format!(
                    "group {} unit {idx} requests zero resources",
                    gspec.name
                )));
            }

            for replica in 0..unit.count {
                let node = nodes
                    .iter_mut()
                    .find(|n| n.available(&self.levels).fits(&demand))
                    .ok_or_else(|| {
                        InventoryError::InsufficientCapacity(format!(
                            "group {} unit {idx} replica {replica} needs {}m cpu, {} bytes memory, {} bytes storage",
                            gspec.name, demand.cpu_millis, demand.memory_bytes, demand.storage_bytes
                        ))
                    })?;
                node.allocated = node.allocated.saturating_add(&demand);
                placement.push(node.name.clone());
            }
            allocated.push(unit.resources.clone());
        }

        reservation.set_allocated_resources(allocated)?;
        reservation.set_cluster_params(serde_json::json!({ "nodes": placement }));

        if opts.dry_run {
            debug!(group = %reservation.resources().name, "dry run fit");
        } else {
            self.nodes = nodes;
        }
        Ok(())
    }

    fn status(&self) -> InventoryStatus {
        InventoryStatus {
            nodes: self
                .nodes
                .iter()
                .map(|n| NodeStatus {
                    name: n.name.clone(),
                    allocatable: n.allocatable,
                    available: n.available(&self.levels),
                })
                .collect(),
        }
    }
}

// =============================================================================
// Platform Client
// =============================================================================

/// [`ClusterClient`] backed by an orchestration API and a node inventory.
pub struct PlatformClient<A> {
    api: Arc<A>,
    inventory: Arc<Mutex<NodeInventory>>,
}

impl<A: OrchestrationApi> PlatformClient<A> {
    pub fn new(api: Arc<A>, inventory: NodeInventory) -> Self {
        Self {
            api,
            inventory: Arc::new(Mutex::new(inventory)),
        }
    }

    pub fn api(&self) -> &Arc<A> {
        &self.api
    }

    /// Commit a reservation against the live inventory.
    pub async fn reserve(
        &self,
        reservation: &mut dyn ReservationGroup,
    ) -> Result<(), InventoryError> {
        self.inventory
            .lock()
            .await
            .adjust(reservation, AdjustOptions::default())
    }
}

#[async_trait]
impl<A: OrchestrationApi + 'static> ClusterClient for PlatformClient<A> {
    async fn inventory(&self) -> Result<Box<dyn Inventory>, InventoryError> {
        let snapshot = self.inventory.lock().await.clone();
        Ok(Box::new(snapshot))
    }

    #[instrument(skip_all, fields(lease = %workload.lease_id))]
    async fn deploy(
        &self,
        ctx: &ApplyContext,
        workload: &LeaseWorkload,
    ) -> Result<(), ApplyError> {
        deploy(ctx, self.api.as_ref(), workload).await
    }
}
