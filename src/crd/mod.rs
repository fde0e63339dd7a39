//! Custom Resource Definitions for the OCM Agent Operator

mod ocm_agent;

pub use ocm_agent::*;

use kube::CustomResourceExt;

use crate::error::Result;

/// Generate all CRD YAML manifests
pub fn generate_crds() -> Result<Vec<String>> {
    Ok(vec![serde_yaml::to_string(&OcmAgent::crd())?])
}
