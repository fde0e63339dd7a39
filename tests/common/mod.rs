//! Shared fixtures for the integration tests

#![allow(dead_code)]

use std::collections::BTreeMap;
use std::sync::Arc;

use k8s_openapi::api::core::v1::Secret;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use k8s_openapi::ByteString;
use tokio_util::sync::CancellationToken;

use ocm_agent_operator::config::{OperatorConfig, PullSecretConfig};
use ocm_agent_operator::controllers::Context;
use ocm_agent_operator::crd::{OcmAgent, OcmAgentSpec};
use ocm_agent_operator::reconcilers::RetryPolicy;
use ocm_agent_operator::resources::{ManagedObject, Registry};
use ocm_agent_operator::store::{InMemoryStore, ObjectKey, ObjectStore};

pub const NAMESPACE: &str = "openshift-ocm-agent-operator";

pub const PULL_SECRET: &str =
    r#"{"auths":{"cloud.openshift.com":{"auth":"b2NtLXRva2Vu","email":"sre@example.com"}}}"#;

pub fn agent_key() -> ObjectKey {
    ObjectKey::new(NAMESPACE, "agent")
}

pub fn agent() -> OcmAgent {
    OcmAgent {
        metadata: ObjectMeta {
            name: Some("agent".to_string()),
            namespace: Some(NAMESPACE.to_string()),
            uid: Some("5f0c3b7e-agent".to_string()),
            generation: Some(1),
            ..Default::default()
        },
        spec: OcmAgentSpec {
            ocm_agent_image: "quay.io/app-sre/ocm-agent:v1".to_string(),
            token_secret: "ocm-access-token".to_string(),
            ocm_agent_config: "ocm-agent-cm".to_string(),
            services: vec!["svc-a".to_string(), "svc-b".to_string()],
            ocm_base_url: "http://x".to_string(),
            replicas: 1,
        },
        status: None,
    }
}

pub fn pull_secret() -> ManagedObject {
    let config = PullSecretConfig::default();
    ManagedObject::Secret(Secret {
        metadata: ObjectMeta {
            name: Some(config.name.clone()),
            namespace: Some(config.namespace.clone()),
            ..Default::default()
        },
        data: Some(BTreeMap::from([(
            config.key,
            ByteString(PULL_SECRET.as_bytes().to_vec()),
        )])),
        ..Default::default()
    })
}

/// Zero-delay retries so conflict tests run instantly
pub fn test_config() -> OperatorConfig {
    OperatorConfig {
        conflict_retry: RetryPolicy::immediate(4),
        ..Default::default()
    }
}

pub fn context(store: &Arc<InMemoryStore>, registry: Registry) -> Context {
    let store: Arc<dyn ObjectStore> = store.clone();
    Context::new(store, registry, test_config(), CancellationToken::new())
}

/// Store seeded with the cluster pull secret
pub async fn seeded_store() -> Arc<InMemoryStore> {
    let store = Arc::new(InMemoryStore::new());
    store.insert(pull_secret()).await;
    store
}
