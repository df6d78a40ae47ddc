//! Bid pricing seam.

use async_trait::async_trait;
use bidplane_id::Address;
use thiserror::Error;

use crate::types::{GroupSpec, Price};

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PricingError {
    #[error("no price configured for {0}")]
    Unpriced(String),

    #[error("price calculation failed: {0}")]
    Failed(String),
}

/// An order to price: who asked, for what.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BidRequest {
    pub owner: Address,
    pub gspec: GroupSpec,
}

/// Computes the minimum price the provider will bid for a request.
#[async_trait]
pub trait PricingStrategy: Send + Sync {
    async fn calculate_price(&self, req: &BidRequest) -> Result<Price, PricingError>;
}
