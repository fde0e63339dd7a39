//! OCM Agent Kubernetes Operator
//!
//! This operator deploys the OCM Agent from an `OcmAgent` custom resource and
//! keeps the ConfigMap, Secret, Service and Deployment it needs converged,
//! removing them again when the `OcmAgent` is deleted.

pub mod config;
pub mod constants;
pub mod controllers;
pub mod crd;
pub mod error;
pub mod metrics;
pub mod reconcilers;
pub mod resources;
pub mod store;

pub use error::{Error, Result};
