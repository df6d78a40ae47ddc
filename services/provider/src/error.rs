//! Supervisor errors.

use thiserror::Error;

use crate::inventory::InventoryError;
use crate::pricing::PricingError;
use crate::subsystem::Stage;

#[derive(Debug, Error)]
pub enum ProviderError {
    /// A subsystem failed to start. Stages started before it have already
    /// been shut down and awaited.
    #[error("starting {stage}: {source}")]
    Startup {
        stage: Stage,
        #[source]
        source: anyhow::Error,
    },

    #[error("{stage} status: {source}")]
    Status {
        stage: Stage,
        #[source]
        source: anyhow::Error,
    },

    #[error(transparent)]
    Inventory(#[from] InventoryError),

    #[error(transparent)]
    Pricing(#[from] PricingError),

    /// The supervisor run loop task did not finish cleanly.
    #[error("run loop failed: {0}")]
    RunLoop(String),
}

impl ProviderError {
    /// The stage a startup or status error came from.
    pub fn stage(&self) -> Option<Stage> {
        match self {
            Self::Startup { stage, .. } | Self::Status { stage, .. } => Some(*stage),
            _ => None,
        }
    }
}
