//! Resource managers for the objects owned by an OcmAgent
//!
//! Every managed kind has one [`ResourceManager`]: `build` produces the desired
//! object from the OcmAgent, `changed` compares a fetched object against it and
//! returns a merged copy when the managed fields drift. The reconcilers only
//! ever see the uniform [`ManagedObject`] / [`Diff`] pair and never need to
//! know what a kind cares about.

mod configmap;
mod deployment;
mod registry;
mod secret;
mod service;

pub use configmap::ConfigMapManager;
pub use deployment::DeploymentManager;
pub use registry::Registry;
pub use secret::{parse_pull_secret_token, SecretManager};
pub use service::ServiceManager;

use std::collections::BTreeMap;
use std::fmt;

use async_trait::async_trait;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{ConfigMap, Secret, Service};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, OwnerReference};
use kube::ResourceExt;

use crate::config::OperatorConfig;
use crate::constants::OCM_AGENT_NAME;
use crate::crd::OcmAgent;
use crate::error::{Error, Result};
use crate::reconcilers::Invocation;
use crate::store::{ObjectKey, ObjectStore};

/// The fixed set of kinds the operator manages
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ResourceKind {
    ConfigMap,
    Secret,
    Service,
    Deployment,
}

impl ResourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceKind::ConfigMap => "ConfigMap",
            ResourceKind::Secret => "Secret",
            ResourceKind::Service => "Service",
            ResourceKind::Deployment => "Deployment",
        }
    }

    pub fn api_version(&self) -> &'static str {
        match self {
            ResourceKind::ConfigMap | ResourceKind::Secret | ResourceKind::Service => "v1",
            ResourceKind::Deployment => "apps/v1",
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A managed object, typed by kind
#[derive(Debug, Clone, PartialEq)]
pub enum ManagedObject {
    ConfigMap(ConfigMap),
    Secret(Secret),
    Service(Service),
    Deployment(Deployment),
}

impl ManagedObject {
    pub fn kind(&self) -> ResourceKind {
        match self {
            ManagedObject::ConfigMap(_) => ResourceKind::ConfigMap,
            ManagedObject::Secret(_) => ResourceKind::Secret,
            ManagedObject::Service(_) => ResourceKind::Service,
            ManagedObject::Deployment(_) => ResourceKind::Deployment,
        }
    }

    pub fn metadata(&self) -> &ObjectMeta {
        match self {
            ManagedObject::ConfigMap(o) => &o.metadata,
            ManagedObject::Secret(o) => &o.metadata,
            ManagedObject::Service(o) => &o.metadata,
            ManagedObject::Deployment(o) => &o.metadata,
        }
    }

    pub fn metadata_mut(&mut self) -> &mut ObjectMeta {
        match self {
            ManagedObject::ConfigMap(o) => &mut o.metadata,
            ManagedObject::Secret(o) => &mut o.metadata,
            ManagedObject::Service(o) => &mut o.metadata,
            ManagedObject::Deployment(o) => &mut o.metadata,
        }
    }

    pub fn name(&self) -> Option<&str> {
        self.metadata().name.as_deref().filter(|n| !n.is_empty())
    }

    /// Namespace and name of the object; both must be set
    pub fn key(&self) -> Result<ObjectKey> {
        let name = self.name().ok_or(Error::MissingName(self.kind()))?;
        let namespace = self
            .metadata()
            .namespace
            .as_deref()
            .filter(|ns| !ns.is_empty())
            .ok_or_else(|| Error::build(self.kind(), format!("object '{}' has no namespace", name)))?;
        Ok(ObjectKey::new(namespace, name))
    }

    /// `Kind/name`, for logs and status
    pub fn display_name(&self) -> String {
        format!("{}/{}", self.kind(), self.name().unwrap_or("<unnamed>"))
    }

    pub fn owner_references(&self) -> &[OwnerReference] {
        self.metadata().owner_references.as_deref().unwrap_or_default()
    }

    /// Point the object at its controlling owner. Only used on objects that
    /// are about to be created.
    pub fn set_controller(&mut self, owner: OwnerReference) {
        self.metadata_mut().owner_references = Some(vec![owner]);
    }
}

/// Outcome of comparing an observed object against the desired one
#[derive(Debug, Clone, PartialEq)]
pub enum Diff {
    /// Managed fields already match
    Unchanged,
    /// Managed fields drifted; carries the observed object with them overwritten
    Changed(ManagedObject),
}

/// Inputs available to [`ResourceManager::build`] beyond the OcmAgent itself
pub struct BuildContext<'a> {
    pub store: &'a dyn ObjectStore,
    pub config: &'a OperatorConfig,
    pub invocation: &'a Invocation,
}

/// Build/compare contract implemented once per managed kind
#[async_trait]
pub trait ResourceManager: Send + Sync {
    /// Kind this manager produces
    fn kind(&self) -> ResourceKind;

    /// Build the desired object. Naming depends only on the OcmAgent and
    /// static rules.
    async fn build(&self, agent: &OcmAgent, ctx: &BuildContext<'_>) -> Result<ManagedObject>;

    /// Stable namespace/name of the object this manager owns
    async fn locate(&self, agent: &OcmAgent, ctx: &BuildContext<'_>) -> Result<ObjectKey> {
        self.build(agent, ctx).await?.key()
    }

    /// Compare only the managed fields and return a merged object on drift
    fn changed(&self, observed: &ManagedObject, desired: &ManagedObject) -> Result<Diff>;
}

/// Error for a Changed call handed the wrong kind
pub(crate) fn kind_mismatch(
    expected: ResourceKind,
    observed: &ManagedObject,
    desired: &ManagedObject,
) -> Error {
    let actual = if observed.kind() != expected {
        observed.kind()
    } else {
        desired.kind()
    };
    Error::KindMismatch { expected, actual }
}

/// Namespace every managed object of this agent lives in
pub(crate) fn agent_namespace(agent: &OcmAgent, kind: ResourceKind) -> Result<String> {
    agent
        .namespace()
        .filter(|ns| !ns.is_empty())
        .ok_or_else(|| Error::build(kind, format!("OcmAgent '{}' has no namespace", agent.name_any())))
}

/// Labels selecting the agent pods
pub(crate) fn agent_labels() -> BTreeMap<String, String> {
    BTreeMap::from([("app".to_string(), OCM_AGENT_NAME.to_string())])
}

pub(crate) fn require_name(kind: ResourceKind, field: &str, value: &str) -> Result<String> {
    if value.trim().is_empty() {
        return Err(Error::build(kind, format!("spec.{} must not be empty", field)));
    }
    Ok(value.to_string())
}
