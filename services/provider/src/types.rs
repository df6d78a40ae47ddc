//! Marketplace and status types shared across the provider.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

// =============================================================================
// Group Spec
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageUnit {
    pub name: String,
    pub bytes: u64,
}

/// Resources of one replica.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resources {
    pub cpu_millis: u64,
    pub memory_bytes: u64,
    #[serde(default)]
    pub storage: Vec<StorageUnit>,
    #[serde(default)]
    pub endpoints: u32,
}

impl Resources {
    /// Total bytes across every volume, or `None` if the sum overflows.
    pub fn storage_bytes(&self) -> Option<u64> {
        self.storage
            .iter()
            .try_fold(0u64, |acc, s| acc.checked_add(s.bytes))
    }

    /// Demand of one replica, or `None` if it cannot be represented.
    pub fn capacity(&self) -> Option<Capacity> {
        Some(Capacity {
            cpu_millis: self.cpu_millis,
            memory_bytes: self.memory_bytes,
            storage_bytes: self.storage_bytes()?,
        })
    }
}

/// `count` replicas of `resources`, offered at up to `price` each.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceUnit {
    pub resources: Resources,
    pub count: u32,
    pub price: Price,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlacementRequirements {
    #[serde(default)]
    pub attributes: BTreeMap<String, String>,
}

/// Declared resource demand of one workload group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupSpec {
    pub name: String,
    #[serde(default)]
    pub requirements: PlacementRequirements,
    pub resources: Vec<ResourceUnit>,
}

// =============================================================================
// Price
// =============================================================================

/// An amount in the smallest unit of `denom` (e.g. `uakt`).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Price {
    pub denom: String,
    pub amount: u128,
}

impl Price {
    pub fn new(amount: u128, denom: impl Into<String>) -> Self {
        Self {
            denom: denom.into(),
            amount,
        }
    }

    /// Parses `"{amount}{denom}"`, e.g. `5000000uakt`.
    pub fn parse(s: &str) -> Option<Self> {
        let split = s.find(|c: char| !c.is_ascii_digit())?;
        let (amount, denom) = s.split_at(split);
        Some(Self::new(amount.parse().ok()?, denom))
    }
}

impl std::fmt::Display for Price {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}{}", self.amount, self.denom)
    }
}

/// Outcome of admission control for a group spec.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidateGroupSpecResult {
    pub min_bid_price: Price,
}

// =============================================================================
// Capacity and Status
// =============================================================================

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Capacity {
    pub cpu_millis: u64,
    pub memory_bytes: u64,
    pub storage_bytes: u64,
}

impl Capacity {
    pub fn fits(&self, demand: &Capacity) -> bool {
        self.cpu_millis >= demand.cpu_millis
            && self.memory_bytes >= demand.memory_bytes
            && self.storage_bytes >= demand.storage_bytes
    }

    pub fn saturating_sub(&self, other: &Capacity) -> Capacity {
        Capacity {
            cpu_millis: self.cpu_millis.saturating_sub(other.cpu_millis),
            memory_bytes: self.memory_bytes.saturating_sub(other.memory_bytes),
            storage_bytes: self.storage_bytes.saturating_sub(other.storage_bytes),
        }
    }

    pub fn saturating_add(&self, other: &Capacity) -> Capacity {
        Capacity {
            cpu_millis: self.cpu_millis.saturating_add(other.cpu_millis),
            memory_bytes: self.memory_bytes.saturating_add(other.memory_bytes),
            storage_bytes: self.storage_bytes.saturating_add(other.storage_bytes),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeStatus {
    pub name: String,
    pub allocatable: Capacity,
    pub available: Capacity,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InventoryStatus {
    pub nodes: Vec<NodeStatus>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterStatus {
    pub leases: u32,
    pub inventory: InventoryStatus,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BidEngineStatus {
    pub orders: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestStatus {
    pub deployments: u32,
}

/// Aggregate provider status, assembled fresh on every query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Status {
    pub cluster: ClusterStatus,
    pub bidengine: BidEngineStatus,
    pub manifest: ManifestStatus,
    pub cluster_public_hostname: String,
}
