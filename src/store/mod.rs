//! Object store clients
//!
//! [`ObjectStore`] is the only way the reconcilers touch the cluster. The
//! Kubernetes-backed implementation converts between [`ManagedObject`] and the
//! typed `k8s-openapi` objects; the in-memory one backs the tests.

mod kube_store;
#[cfg(any(test, feature = "testing"))]
mod memory;

pub use kube_store::KubeStore;
#[cfg(any(test, feature = "testing"))]
pub use memory::{InMemoryStore, Operation, StoreCall};

use std::fmt;

use async_trait::async_trait;
use kube::ResourceExt;

use crate::crd::{OcmAgent, OcmAgentStatus};
use crate::error::{Error, Result, StoreError};
use crate::resources::{ManagedObject, ResourceKind};

/// Namespace and name of an object
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectKey {
    pub namespace: String,
    pub name: String,
}

impl ObjectKey {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    /// Key of a namespaced resource
    pub fn for_resource<K: ResourceExt>(obj: &K) -> Result<Self> {
        let namespace = obj
            .namespace()
            .ok_or_else(|| Error::validation(format!("{} has no namespace", obj.name_any())))?;
        Ok(Self::new(namespace, obj.name_any()))
    }
}

impl fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// Client for the store holding managed objects and OcmAgents.
///
/// Implementations must be safe to share between concurrently running
/// reconciliations.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Fetch a managed object
    async fn get(&self, kind: ResourceKind, key: &ObjectKey)
        -> std::result::Result<ManagedObject, StoreError>;

    /// Create a managed object; fails with `AlreadyExists` on a name collision
    async fn create(&self, object: &ManagedObject)
        -> std::result::Result<ManagedObject, StoreError>;

    /// Replace a managed object; fails with `Conflict` when its resource
    /// version is stale
    async fn update(&self, object: &ManagedObject)
        -> std::result::Result<ManagedObject, StoreError>;

    /// Delete a managed object
    async fn delete(&self, object: &ManagedObject) -> std::result::Result<(), StoreError>;

    /// Fetch an OcmAgent
    async fn get_agent(&self, key: &ObjectKey) -> std::result::Result<OcmAgent, StoreError>;

    /// Replace an OcmAgent (metadata and spec)
    async fn update_agent(&self, agent: &OcmAgent) -> std::result::Result<OcmAgent, StoreError>;

    /// Merge-patch the status of an OcmAgent, returning the agent at its new resourceVersion
    async fn patch_agent_status(
        &self,
        key: &ObjectKey,
        status: &OcmAgentStatus,
    ) -> std::result::Result<OcmAgent, StoreError>;
}

pub(crate) fn store_key(object: &ManagedObject) -> std::result::Result<ObjectKey, StoreError> {
    object.key().map_err(|e| StoreError::Backend(e.to_string()))
}
