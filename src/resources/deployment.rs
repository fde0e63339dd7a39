//! Agent Deployment
//!
//! Only the container images, replica count, node affinity, and tolerations
//! are managed. Everything else on an observed Deployment (revision
//! annotations, strategy defaults, status) belongs to the cluster.

use async_trait::async_trait;
use k8s_openapi::api::apps::v1::{Deployment, DeploymentSpec};
use k8s_openapi::api::core::v1::{
    Affinity, Container, ContainerPort, NodeAffinity, NodeSelectorRequirement, NodeSelectorTerm,
    PodSpec, PodTemplateSpec, PreferredSchedulingTerm, Toleration, Volume, VolumeMount,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta};
use serde_json::json;

use super::{
    agent_labels, agent_namespace, kind_mismatch, require_name, BuildContext, Diff,
    ManagedObject, ResourceKind, ResourceManager,
};
use crate::constants::*;
use crate::crd::OcmAgent;
use crate::error::Result;

const KIND: ResourceKind = ResourceKind::Deployment;

/// Mode for the mounted token and config files
const VOLUME_DEFAULT_MODE: i32 = 0o600;

/// Runs the agent pods
#[derive(Debug, Default, Clone, Copy)]
pub struct DeploymentManager;

impl DeploymentManager {
    pub fn new() -> Self {
        Self
    }

    fn desired(&self, agent: &OcmAgent) -> Result<Deployment> {
        let token_secret = require_name(KIND, "tokenSecret", &agent.spec.token_secret)?;
        let config_map = require_name(KIND, "ocmAgentConfig", &agent.spec.ocm_agent_config)?;
        let labels = agent_labels();

        let mut volumes: Vec<Volume> = serde_json::from_value(json!([
            {
                "name": token_secret,
                "secret": { "secretName": token_secret, "defaultMode": VOLUME_DEFAULT_MODE },
            },
            {
                "name": config_map,
                "configMap": { "name": config_map, "defaultMode": VOLUME_DEFAULT_MODE },
            },
        ]))?;
        let mut volume_mounts = vec![
            VolumeMount {
                name: token_secret.clone(),
                mount_path: format!("{}/{}", OCM_AGENT_SECRET_MOUNT_PATH, token_secret),
                ..Default::default()
            },
            VolumeMount {
                name: config_map.clone(),
                mount_path: format!("{}/{}", OCM_AGENT_CONFIG_MOUNT_PATH, config_map),
                ..Default::default()
            },
        ];
        // Keep ordering stable so identical specs serialize identically.
        volumes.sort_by(|a, b| a.name.cmp(&b.name));
        volume_mounts.sort_by(|a, b| a.name.cmp(&b.name));

        Ok(Deployment {
            metadata: ObjectMeta {
                name: Some(OCM_AGENT_NAME.to_string()),
                namespace: Some(agent_namespace(agent, KIND)?),
                labels: Some(labels.clone()),
                ..Default::default()
            },
            spec: Some(DeploymentSpec {
                replicas: Some(agent.spec.replicas),
                selector: LabelSelector {
                    match_labels: Some(labels.clone()),
                    ..Default::default()
                },
                template: PodTemplateSpec {
                    metadata: Some(ObjectMeta {
                        labels: Some(labels),
                        ..Default::default()
                    }),
                    spec: Some(PodSpec {
                        volumes: Some(volumes),
                        service_account_name: Some(OCM_AGENT_SERVICE_ACCOUNT.to_string()),
                        affinity: Some(infra_affinity()),
                        tolerations: Some(infra_tolerations()),
                        containers: vec![Container {
                            name: OCM_AGENT_NAME.to_string(),
                            image: Some(agent.spec.ocm_agent_image.clone()),
                            command: Some(agent_command(&token_secret, &config_map)),
                            volume_mounts: Some(volume_mounts),
                            ports: Some(vec![ContainerPort {
                                container_port: OCM_AGENT_PORT,
                                name: Some(OCM_AGENT_PORT_NAME.to_string()),
                                ..Default::default()
                            }]),
                            ..Default::default()
                        }],
                        ..Default::default()
                    }),
                },
                ..Default::default()
            }),
            ..Default::default()
        })
    }
}

/// Prefer infra nodes without requiring them
fn infra_affinity() -> Affinity {
    Affinity {
        node_affinity: Some(NodeAffinity {
            preferred_during_scheduling_ignored_during_execution: Some(vec![
                PreferredSchedulingTerm {
                    preference: NodeSelectorTerm {
                        match_expressions: Some(vec![NodeSelectorRequirement {
                            key: INFRA_NODE_ROLE_KEY.to_string(),
                            operator: "Exists".to_string(),
                            values: None,
                        }]),
                        ..Default::default()
                    },
                    weight: 1,
                },
            ]),
            ..Default::default()
        }),
        ..Default::default()
    }
}

fn infra_tolerations() -> Vec<Toleration> {
    vec![Toleration {
        key: Some(INFRA_NODE_ROLE_KEY.to_string()),
        operator: Some("Exists".to_string()),
        effect: Some("NoSchedule".to_string()),
        ..Default::default()
    }]
}

/// Command line of the agent; every value is read from a mounted file
fn agent_command(token_secret: &str, config_map: &str) -> Vec<String> {
    let access_token = format!(
        "{}/{}/{}",
        OCM_AGENT_SECRET_MOUNT_PATH, token_secret, OCM_AGENT_ACCESS_TOKEN_SECRET_KEY
    );
    let services = format!(
        "{}/{}/{}",
        OCM_AGENT_CONFIG_MOUNT_PATH, config_map, OCM_AGENT_CONFIG_SERVICES_KEY
    );
    let url = format!(
        "{}/{}/{}",
        OCM_AGENT_CONFIG_MOUNT_PATH, config_map, OCM_AGENT_CONFIG_URL_KEY
    );

    vec![
        OCM_AGENT_COMMAND.to_string(),
        "serve".to_string(),
        format!("--access-token=@{}", access_token),
        format!("--services=@{}", services),
        format!("--ocm-url=@{}", url),
    ]
}

fn pod_spec(deployment: &Deployment) -> Option<&PodSpec> {
    deployment.spec.as_ref()?.template.spec.as_ref()
}

fn container_image<'a>(pod: Option<&'a PodSpec>, name: &str) -> Option<&'a str> {
    pod?.containers
        .iter()
        .find(|c| c.name == name)
        .and_then(|c| c.image.as_deref())
}

#[async_trait]
impl ResourceManager for DeploymentManager {
    fn kind(&self) -> ResourceKind {
        KIND
    }

    async fn build(&self, agent: &OcmAgent, _ctx: &BuildContext<'_>) -> Result<ManagedObject> {
        Ok(ManagedObject::Deployment(self.desired(agent)?))
    }

    fn changed(&self, observed: &ManagedObject, desired: &ManagedObject) -> Result<Diff> {
        let (ManagedObject::Deployment(current), ManagedObject::Deployment(expected)) =
            (observed, desired)
        else {
            return Err(kind_mismatch(KIND, observed, desired));
        };

        let current_pod = pod_spec(current);
        let expected_pod = pod_spec(expected);
        let mut changed = false;

        for name in [OCM_AGENT_NAME] {
            match container_image(current_pod, name) {
                None | Some("") => changed = true,
                image => changed |= image != container_image(expected_pod, name),
            }
        }

        let replicas = |d: &Deployment| d.spec.as_ref().and_then(|s| s.replicas);
        changed |= replicas(current) != replicas(expected);
        changed |= current_pod.and_then(|p| p.affinity.as_ref())
            != expected_pod.and_then(|p| p.affinity.as_ref());
        changed |= current_pod.and_then(|p| p.tolerations.as_ref())
            != expected_pod.and_then(|p| p.tolerations.as_ref());

        if !changed {
            return Ok(Diff::Unchanged);
        }

        let mut updated = current.clone();
        let Some(expected_spec) = expected.spec.as_ref() else {
            return Ok(Diff::Changed(ManagedObject::Deployment(updated)));
        };
        let spec = updated
            .spec
            .get_or_insert_with(|| expected_spec.clone());
        spec.replicas = expected_spec.replicas;
        let pod = spec.template.spec.get_or_insert_with(PodSpec::default);
        if let Some(expected_pod) = expected_pod {
            pod.affinity = expected_pod.affinity.clone();
            pod.tolerations = expected_pod.tolerations.clone();
            merge_containers(&mut pod.containers, &expected_pod.containers);
        }
        Ok(Diff::Changed(ManagedObject::Deployment(updated)))
    }
}

/// Bring the managed containers' images in line, keeping whatever the
/// server filled in on containers that already exist
fn merge_containers(current: &mut Vec<Container>, expected: &[Container]) {
    for want in expected {
        match current.iter_mut().find(|c| c.name == want.name) {
            Some(have) => have.image = want.image.clone(),
            None => current.push(want.clone()),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::*;
    use crate::resources::testing::agent;

    /// What the API server hands back: defaults filled in and a revision stamped on
    fn observed_from_api() -> Deployment {
        let mut dep = DeploymentManager::new().desired(&agent()).unwrap();
        dep.metadata.resource_version = Some("300".to_string());
        dep.metadata.annotations = Some(BTreeMap::from([(
            "deployment.kubernetes.io/revision".to_string(),
            "3".to_string(),
        )]));
        let pod = dep.spec.as_mut().unwrap().template.spec.as_mut().unwrap();
        pod.dns_policy = Some("ClusterFirst".to_string());
        pod.containers[0].termination_message_path = Some("/dev/termination-log".to_string());
        dep
    }

    fn changed(observed: Deployment) -> Diff {
        let manager = DeploymentManager::new();
        let desired = ManagedObject::Deployment(manager.desired(&agent()).unwrap());
        manager
            .changed(&ManagedObject::Deployment(observed), &desired)
            .unwrap()
    }

    #[test]
    fn desired_wires_volumes_and_command() {
        let dep = DeploymentManager::new().desired(&agent()).unwrap();
        let pod = pod_spec(&dep).unwrap();

        let volumes = pod.volumes.as_ref().unwrap();
        let names: Vec<_> = volumes.iter().map(|v| v.name.as_str()).collect();
        assert_eq!(names, vec!["ocm-access-token", "ocm-agent-cm"]);
        assert!(volumes[0].secret.is_some());
        assert!(volumes[1].config_map.is_some());

        let command = pod.containers[0].command.as_ref().unwrap();
        assert_eq!(command[1], "serve");
        assert_eq!(
            command[2],
            "--access-token=@/secrets/ocm-access-token/access_token"
        );
        assert_eq!(command[3], "--services=@/configs/ocm-agent-cm/services");
        assert_eq!(command[4], "--ocm-url=@/configs/ocm-agent-cm/serviceURL");
        assert_eq!(dep.spec.as_ref().unwrap().replicas, Some(1));
    }

    #[test]
    fn server_side_defaults_are_not_drift() {
        assert_eq!(changed(observed_from_api()), Diff::Unchanged);
    }

    #[test]
    fn image_drift_is_detected_and_revision_kept() {
        let mut observed = observed_from_api();
        observed.spec.as_mut().unwrap().template.spec.as_mut().unwrap().containers[0].image =
            Some("quay.io/app-sre/ocm-agent:old".to_string());

        let Diff::Changed(ManagedObject::Deployment(merged)) = changed(observed) else {
            panic!("expected a Deployment change");
        };
        assert_eq!(
            container_image(pod_spec(&merged), OCM_AGENT_NAME),
            Some("quay.io/app-sre/ocm-agent:v1")
        );
        assert_eq!(
            merged.metadata.annotations.as_ref().unwrap()["deployment.kubernetes.io/revision"],
            "3"
        );
        assert_eq!(
            pod_spec(&merged).unwrap().dns_policy.as_deref(),
            Some("ClusterFirst")
        );
    }

    #[test]
    fn image_update_keeps_container_defaults() {
        let mut observed = observed_from_api();
        let container =
            &mut observed.spec.as_mut().unwrap().template.spec.as_mut().unwrap().containers[0];
        container.image = Some("quay.io/app-sre/ocm-agent:old".to_string());
        container.image_pull_policy = Some("IfNotPresent".to_string());

        let Diff::Changed(ManagedObject::Deployment(merged)) = changed(observed) else {
            panic!("expected a Deployment change");
        };
        let containers = &pod_spec(&merged).unwrap().containers;
        assert_eq!(containers.len(), 1);
        assert_eq!(
            containers[0].image.as_deref(),
            Some("quay.io/app-sre/ocm-agent:v1")
        );
        assert_eq!(
            containers[0].termination_message_path.as_deref(),
            Some("/dev/termination-log")
        );
        assert_eq!(containers[0].image_pull_policy.as_deref(), Some("IfNotPresent"));
    }

    #[test]
    fn missing_container_counts_as_changed() {
        let mut observed = observed_from_api();
        observed.spec.as_mut().unwrap().template.spec.as_mut().unwrap().containers[0].name =
            "sidecar".to_string();
        assert!(matches!(changed(observed), Diff::Changed(_)));
    }

    #[test]
    fn missing_container_is_added_next_to_others() {
        let mut observed = observed_from_api();
        observed.spec.as_mut().unwrap().template.spec.as_mut().unwrap().containers[0].name =
            "sidecar".to_string();

        let Diff::Changed(ManagedObject::Deployment(merged)) = changed(observed) else {
            panic!("expected a Deployment change");
        };
        let names: Vec<_> = pod_spec(&merged)
            .unwrap()
            .containers
            .iter()
            .map(|c| c.name.as_str())
            .collect();
        assert_eq!(names, vec!["sidecar", OCM_AGENT_NAME]);
    }

    #[test]
    fn replica_and_toleration_drift_are_detected() {
        let mut scaled = observed_from_api();
        scaled.spec.as_mut().unwrap().replicas = Some(3);
        let Diff::Changed(ManagedObject::Deployment(merged)) = changed(scaled) else {
            panic!("expected a Deployment change");
        };
        assert_eq!(merged.spec.unwrap().replicas, Some(1));

        let mut untolerated = observed_from_api();
        untolerated
            .spec
            .as_mut()
            .unwrap()
            .template
            .spec
            .as_mut()
            .unwrap()
            .tolerations = None;
        assert!(matches!(changed(untolerated), Diff::Changed(_)));
    }
}
