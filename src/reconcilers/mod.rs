//! Reconcilers for the OcmAgent CRD
//!
//! This module contains the business logic of a reconciliation pass:
//! - The engine walking the resource manager registry
//! - The OcmAgent lifecycle (validation, finalizer, status)
//! - Conflict retry and per-pass cancellation

pub mod engine;
mod invocation;
pub mod ocm_agent;
mod retry;

pub use invocation::Invocation;
pub use ocm_agent::Outcome;
pub use retry::RetryPolicy;
