//! Reservations: a tentative claim on cluster capacity for one group spec.

use thiserror::Error;

use crate::types::{GroupSpec, Resources};

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ReservationError {
    #[error("reservation for group {0} already has allocated resources")]
    AlreadyAllocated(String),
}

/// What the inventory sees of a reservation while adjusting capacity.
pub trait ReservationGroup: Send {
    /// The demand being reserved.
    fn resources(&self) -> &GroupSpec;

    /// Record the concrete per-unit allocation. May be set at most once.
    fn set_allocated_resources(&mut self, allocated: Vec<Resources>)
        -> Result<(), ReservationError>;

    fn allocated_resources(&self) -> Option<&[Resources]>;

    /// Attach cluster-specific parameters, e.g. the node each unit landed on.
    fn set_cluster_params(&mut self, params: serde_json::Value);

    fn cluster_params(&self) -> Option<&serde_json::Value>;
}

/// Default [`ReservationGroup`].
#[derive(Debug, Clone)]
pub struct Reservation {
    resources: GroupSpec,
    adjusted: Option<Vec<Resources>>,
    cluster_params: Option<serde_json::Value>,
}

impl Reservation {
    pub fn new(resources: GroupSpec) -> Self {
        Self {
            resources,
            adjusted: None,
            cluster_params: None,
        }
    }
}

impl ReservationGroup for Reservation {
    fn resources(&self) -> &GroupSpec {
        &self.resources
    }

    fn set_allocated_resources(
        &mut self,
        allocated: Vec<Resources>,
    ) -> Result<(), ReservationError> {
        if self.adjusted.is_some() {
            return Err(ReservationError::AlreadyAllocated(
                self.resources.name.clone(),
            ));
        }
        self.adjusted = Some(allocated);
        Ok(())
    }

    fn allocated_resources(&self) -> Option<&[Resources]> {
        self.adjusted.as_deref()
    }

    fn set_cluster_params(&mut self, params: serde_json::Value) {
        self.cluster_params = Some(params);
    }

    fn cluster_params(&self) -> Option<&serde_json::Value> {
        self.cluster_params.as_ref()
    }
}
