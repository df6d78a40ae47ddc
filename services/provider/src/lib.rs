//! Provider control plane.
//!
//! The [`Service`] supervises the four provider subsystems (balance checker,
//! cluster, bid engine and manifest), answers status and admission queries,
//! and shuts everything down in a fixed order. Lease deployment flows from
//! the cluster service through a [`ClusterClient`] into
//! [`bidplane_reconcile::deploy`].
//!
//! ## Architecture
//!
//! - **Supervisor**: ordered startup with unwind, run loop, ordered shutdown
//! - **Inventory**: capacity snapshots used for admission control
//! - **Subsystems**: trait seams so real and dev implementations swap freely

pub mod config;
pub mod dev;
mod error;
mod inventory;
mod lifecycle;
mod pricing;
mod reservation;
mod service;
mod subsystem;
mod types;

pub use config::Config;
pub use error::ProviderError;
pub use inventory::{
    AdjustOptions, ClusterClient, CommitLevels, Inventory, InventoryError, Node, NodeInventory,
    PlatformClient,
};
pub use lifecycle::{done_channel, signalled, Done, DoneSender, Lifecycle, LifecycleState};
pub use pricing::{BidRequest, PricingError, PricingStrategy};
pub use reservation::{Reservation, ReservationError, ReservationGroup};
pub use service::{Client, Service, StatusClient, ValidateClient};
pub use subsystem::{
    BalanceChecker, BidEngine, ClusterService, HostnameService, ManifestClient, ManifestService,
    Stage, Subsystem, SubsystemFactory,
};
pub use types::*;
