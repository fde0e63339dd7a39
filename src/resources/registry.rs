//! Ordered registry of resource managers
//!
//! Registration order is the creation order: dependencies come before the
//! objects that consume them. Removal walks the registry backwards.

use std::fmt;
use std::sync::Arc;

use super::{
    ConfigMapManager, DeploymentManager, ResourceKind, ResourceManager, SecretManager,
    ServiceManager,
};
use crate::error::{Error, Result};

#[derive(Clone, Default)]
pub struct Registry {
    managers: Vec<Arc<dyn ResourceManager>>,
}

impl Registry {
    /// Build a registry, rejecting a kind registered twice
    pub fn new(managers: Vec<Arc<dyn ResourceManager>>) -> Result<Self> {
        let mut seen: Vec<ResourceKind> = Vec::with_capacity(managers.len());
        for manager in &managers {
            let kind = manager.kind();
            if seen.contains(&kind) {
                return Err(Error::config(format!(
                    "resource kind {} registered more than once",
                    kind
                )));
            }
            seen.push(kind);
        }
        Ok(Self { managers })
    }

    /// The managers for an OCM Agent deployment: the ConfigMap and Secret the
    /// pods mount, the Service in front of them, then the Deployment itself.
    pub fn ocm_agent() -> Self {
        Self {
            managers: vec![
                Arc::new(ConfigMapManager::new()),
                Arc::new(SecretManager::new()),
                Arc::new(ServiceManager::new()),
                Arc::new(DeploymentManager::new()),
            ],
        }
    }

    /// Managers in creation order
    pub fn creation_order(&self) -> impl Iterator<Item = &Arc<dyn ResourceManager>> {
        self.managers.iter()
    }

    /// Managers in removal order
    pub fn removal_order(&self) -> impl Iterator<Item = &Arc<dyn ResourceManager>> {
        self.managers.iter().rev()
    }

    pub fn kinds(&self) -> Vec<ResourceKind> {
        self.managers.iter().map(|m| m.kind()).collect()
    }

    pub fn len(&self) -> usize {
        self.managers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.managers.is_empty()
    }
}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registry").field("kinds", &self.kinds()).finish()
    }
}
