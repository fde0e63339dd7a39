//! Agent Service

use async_trait::async_trait;
use k8s_openapi::api::core::v1::{Service, ServicePort, ServiceSpec};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;

use super::{
    agent_labels, agent_namespace, kind_mismatch, BuildContext, Diff, ManagedObject,
    ResourceKind, ResourceManager,
};
use crate::constants::{OCM_AGENT_PORT_NAME, OCM_AGENT_SERVICE_NAME, OCM_AGENT_SERVICE_PORT};
use crate::crd::OcmAgent;
use crate::error::Result;

/// Exposes the agent pods inside the cluster
#[derive(Debug, Default, Clone, Copy)]
pub struct ServiceManager;

impl ServiceManager {
    pub fn new() -> Self {
        Self
    }

    fn desired(&self, agent: &OcmAgent) -> Result<Service> {
        Ok(Service {
            metadata: ObjectMeta {
                name: Some(OCM_AGENT_SERVICE_NAME.to_string()),
                namespace: Some(agent_namespace(agent, ResourceKind::Service)?),
                ..Default::default()
            },
            spec: Some(ServiceSpec {
                selector: Some(agent_labels()),
                ports: Some(vec![ServicePort {
                    name: Some(OCM_AGENT_PORT_NAME.to_string()),
                    port: OCM_AGENT_SERVICE_PORT,
                    target_port: Some(IntOrString::Int(OCM_AGENT_SERVICE_PORT)),
                    protocol: Some("TCP".to_string()),
                    ..Default::default()
                }]),
                ..Default::default()
            }),
            ..Default::default()
        })
    }
}

#[async_trait]
impl ResourceManager for ServiceManager {
    fn kind(&self) -> ResourceKind {
        ResourceKind::Service
    }

    async fn build(&self, agent: &OcmAgent, _ctx: &BuildContext<'_>) -> Result<ManagedObject> {
        Ok(ManagedObject::Service(self.desired(agent)?))
    }

    fn changed(&self, observed: &ManagedObject, desired: &ManagedObject) -> Result<Diff> {
        let (ManagedObject::Service(current), ManagedObject::Service(expected)) =
            (observed, desired)
        else {
            return Err(kind_mismatch(self.kind(), observed, desired));
        };

        let current_spec = current.spec.clone().unwrap_or_default();
        let expected_spec = expected.spec.clone().unwrap_or_default();

        if current_spec.selector == expected_spec.selector
            && current_spec.ports == expected_spec.ports
        {
            return Ok(Diff::Unchanged);
        }

        // clusterIP, type and friends are allocated by the API server and stay as observed.
        let mut updated = current.clone();
        let spec = updated.spec.get_or_insert_with(ServiceSpec::default);
        spec.selector = expected_spec.selector;
        spec.ports = expected_spec.ports;
        Ok(Diff::Changed(ManagedObject::Service(updated)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resources::testing::agent;

    fn observed_from_api() -> Service {
        let mut svc = ServiceManager::new().desired(&agent()).unwrap();
        svc.metadata.resource_version = Some("11".to_string());
        let spec = svc.spec.as_mut().unwrap();
        spec.cluster_ip = Some("172.30.12.4".to_string());
        spec.type_ = Some("ClusterIP".to_string());
        svc
    }

    #[test]
    fn desired_selects_agent_pods() {
        let svc = ServiceManager::new().desired(&agent()).unwrap();
        let spec = svc.spec.unwrap();
        assert_eq!(spec.selector, Some(agent_labels()));
        let ports = spec.ports.unwrap();
        assert_eq!(ports.len(), 1);
        assert_eq!(ports[0].port, OCM_AGENT_SERVICE_PORT);
    }

    #[test]
    fn api_defaults_do_not_count_as_drift() {
        let manager = ServiceManager::new();
        let desired = ManagedObject::Service(manager.desired(&agent()).unwrap());
        let observed = ManagedObject::Service(observed_from_api());
        assert_eq!(manager.changed(&observed, &desired).unwrap(), Diff::Unchanged);
    }

    #[test]
    fn port_drift_keeps_cluster_ip() {
        let manager = ServiceManager::new();
        let desired = ManagedObject::Service(manager.desired(&agent()).unwrap());
        let mut drifted = observed_from_api();
        drifted.spec.as_mut().unwrap().ports.as_mut().unwrap()[0].port = 9999;
        let observed = ManagedObject::Service(drifted);

        let Diff::Changed(ManagedObject::Service(merged)) =
            manager.changed(&observed, &desired).unwrap()
        else {
            panic!("expected a Service change");
        };
        let spec = merged.spec.unwrap();
        assert_eq!(spec.ports.unwrap()[0].port, OCM_AGENT_SERVICE_PORT);
        assert_eq!(spec.cluster_ip.as_deref(), Some("172.30.12.4"));
        assert_eq!(merged.metadata.resource_version.as_deref(), Some("11"));
    }
}
