//! Agent configuration ConfigMap

use std::collections::BTreeMap;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::ConfigMap;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

use super::{
    agent_namespace, kind_mismatch, require_name, BuildContext, Diff, ManagedObject,
    ResourceKind, ResourceManager,
};
use crate::constants::{OCM_AGENT_CONFIG_SERVICES_KEY, OCM_AGENT_CONFIG_URL_KEY};
use crate::crd::OcmAgent;
use crate::error::Result;

/// Holds the service list and OCM URL the agent reads at startup
#[derive(Debug, Default, Clone, Copy)]
pub struct ConfigMapManager;

impl ConfigMapManager {
    pub fn new() -> Self {
        Self
    }

    fn desired(&self, agent: &OcmAgent) -> Result<ConfigMap> {
        let kind = ResourceKind::ConfigMap;
        Ok(ConfigMap {
            metadata: ObjectMeta {
                name: Some(require_name(kind, "ocmAgentConfig", &agent.spec.ocm_agent_config)?),
                namespace: Some(agent_namespace(agent, kind)?),
                ..Default::default()
            },
            data: Some(BTreeMap::from([
                (
                    OCM_AGENT_CONFIG_SERVICES_KEY.to_string(),
                    agent.spec.services.join(","),
                ),
                (
                    OCM_AGENT_CONFIG_URL_KEY.to_string(),
                    agent.spec.ocm_base_url.clone(),
                ),
            ])),
            ..Default::default()
        })
    }
}

#[async_trait]
impl ResourceManager for ConfigMapManager {
    fn kind(&self) -> ResourceKind {
        ResourceKind::ConfigMap
    }

    async fn build(&self, agent: &OcmAgent, _ctx: &BuildContext<'_>) -> Result<ManagedObject> {
        Ok(ManagedObject::ConfigMap(self.desired(agent)?))
    }

    fn changed(&self, observed: &ManagedObject, desired: &ManagedObject) -> Result<Diff> {
        let (ManagedObject::ConfigMap(current), ManagedObject::ConfigMap(expected)) =
            (observed, desired)
        else {
            return Err(kind_mismatch(self.kind(), observed, desired));
        };

        if current.data == expected.data {
            return Ok(Diff::Unchanged);
        }

        let mut updated = current.clone();
        updated.data = expected.data.clone();
        Ok(Diff::Changed(ManagedObject::ConfigMap(updated)))
    }
}
