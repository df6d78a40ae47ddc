//! Reconciliation of lease workloads against the orchestration platform.
//!
//! The platform offers per-object get/create/update and nothing more: no
//! multi-object transaction and no server-side apply. This library layers an
//! idempotent protocol on top of that:
//!
//! - **Desired state** comes from a [`Builder`], a pure translation of lease
//!   intent into platform objects.
//! - **Current state** is fetched from the platform at the start of every
//!   apply; nothing is cached between calls.
//! - **Convergence** is reached by re-applying. Every apply is safe to repeat.
//!
//! # Invariants
//!
//! - A get that answers not-found leads to exactly one create, any other get
//!   leads to exactly one update.
//! - Remote errors are returned unmodified and never retried here.
//! - Every remote call observes the caller's [`ApplyContext`].

mod api;
mod apply;
pub mod builder;
mod context;
mod deploy;
mod error;
pub mod memory;
pub mod metrics;
mod object;
mod workload;

pub use api::{OrchestrationApi, ResourceApi};
pub use apply::{
    apply, apply_deployment, apply_manifest, apply_namespace, apply_network_policies,
    apply_service, apply_stateful_set, Builder, NetworkPolicyBuilder,
};
pub use context::ApplyContext;
pub use deploy::{deploy, LeaseWorkload, ServiceWorkload, Workload};
pub use error::{ApiError, ApplyError, BuilderError};
pub use object::*;
pub use workload::*;
