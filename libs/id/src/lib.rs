//! # bidplane-id
//!
//! Identifiers for marketplace objects handled by the provider.
//!
//! ## ID Format
//!
//! Identifiers are hierarchical and slash separated. A lease is identified by
//! the deployment owner, the deployment/group/order sequence numbers and the
//! provider that won the order:
//!
//! - `akash1owner/42` (deployment)
//! - `akash1owner/42/1` (group)
//! - `akash1owner/42/1/3/akash1provider` (lease)
//!
//! Every lease maps to exactly one orchestration namespace, see
//! [`LeaseId::namespace`].

mod error;
mod macros;
mod types;

pub use error::IdError;
pub use types::*;
