//! OCM access token Secret
//!
//! The token is not part of the OcmAgent spec; it is resolved on every build
//! from the cluster pull secret, so a build can fail on that lookup.

use std::collections::BTreeMap;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Secret;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use k8s_openapi::ByteString;
use serde_json::Value;
use tracing::debug;

use super::{
    agent_namespace, kind_mismatch, require_name, BuildContext, Diff, ManagedObject,
    ResourceKind, ResourceManager,
};
use crate::config::PullSecretConfig;
use crate::constants::OCM_AGENT_ACCESS_TOKEN_SECRET_KEY;
use crate::crd::OcmAgent;
use crate::error::{Error, Result, StoreError};
use crate::store::ObjectKey;

const KIND: ResourceKind = ResourceKind::Secret;

/// Holds the access token the agent authenticates to OCM with
#[derive(Debug, Default, Clone, Copy)]
pub struct SecretManager;

impl SecretManager {
    pub fn new() -> Self {
        Self
    }

    fn key_for(agent: &OcmAgent) -> Result<ObjectKey> {
        Ok(ObjectKey::new(
            agent_namespace(agent, KIND)?,
            require_name(KIND, "tokenSecret", &agent.spec.token_secret)?,
        ))
    }

    fn desired(agent: &OcmAgent, token: String) -> Result<Secret> {
        let key = Self::key_for(agent)?;
        Ok(Secret {
            metadata: ObjectMeta {
                name: Some(key.name),
                namespace: Some(key.namespace),
                ..Default::default()
            },
            data: Some(BTreeMap::from([(
                OCM_AGENT_ACCESS_TOKEN_SECRET_KEY.to_string(),
                ByteString(token.into_bytes()),
            )])),
            ..Default::default()
        })
    }

    async fn fetch_access_token(&self, ctx: &BuildContext<'_>) -> Result<String> {
        let pull_secret = &ctx.config.pull_secret;
        let key = pull_secret.object_key();
        debug!(pull_secret = %key, "Resolving access token from pull secret");

        let found = ctx
            .invocation
            .guard(ctx.store.get(KIND, &key))
            .await
            .map_err(|e| match e {
                StoreError::NotFound(_) => {
                    Error::build(KIND, format!("pull secret '{}' not found", key))
                }
                other => Error::Store(other),
            })?;

        let actual = found.kind();
        let ManagedObject::Secret(secret) = found else {
            return Err(Error::KindMismatch {
                expected: KIND,
                actual,
            });
        };

        let raw = secret
            .data
            .as_ref()
            .and_then(|data| data.get(&pull_secret.key))
            .ok_or_else(|| {
                Error::build(
                    KIND,
                    format!("pull secret missing required key '{}'", pull_secret.key),
                )
            })?;

        parse_pull_secret_token(&raw.0, pull_secret)
    }
}

/// Extract `auths[<registry>].auth` from a docker config JSON document
pub fn parse_pull_secret_token(raw: &[u8], pull_secret: &PullSecretConfig) -> Result<String> {
    let docker_config: Value = serde_json::from_slice(raw)
        .map_err(|e| Error::build(KIND, format!("pull secret is not valid JSON: {}", e)))?;

    let auths = docker_config
        .get("auths")
        .ok_or_else(|| Error::build(KIND, "unable to find auths section in pull secret"))?;

    let registry = auths.get(&pull_secret.auth_registry).ok_or_else(|| {
        Error::build(
            KIND,
            format!(
                "unable to find pull secret auth key '{}' in pull secret",
                pull_secret.auth_registry
            ),
        )
    })?;

    match registry.get("auth") {
        Some(Value::String(token)) => Ok(token.clone()),
        Some(other) => Ok(other.to_string()),
        None => Err(Error::build(
            KIND,
            "unable to find access auth token in pull secret",
        )),
    }
}

#[async_trait]
impl ResourceManager for SecretManager {
    fn kind(&self) -> ResourceKind {
        KIND
    }

    async fn build(&self, agent: &OcmAgent, ctx: &BuildContext<'_>) -> Result<ManagedObject> {
        // Validate naming before paying for the lookup.
        Self::key_for(agent)?;
        let token = self.fetch_access_token(ctx).await?;
        Ok(ManagedObject::Secret(Self::desired(agent, token)?))
    }

    async fn locate(&self, agent: &OcmAgent, _ctx: &BuildContext<'_>) -> Result<ObjectKey> {
        Self::key_for(agent)
    }

    fn changed(&self, observed: &ManagedObject, desired: &ManagedObject) -> Result<Diff> {
        let (ManagedObject::Secret(current), ManagedObject::Secret(expected)) = (observed, desired)
        else {
            return Err(kind_mismatch(KIND, observed, desired));
        };

        if current.data == expected.data {
            return Ok(Diff::Unchanged);
        }

        let mut updated = current.clone();
        updated.data = expected.data.clone();
        Ok(Diff::Changed(ManagedObject::Secret(updated)))
    }
}
