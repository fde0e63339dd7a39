//! Kubernetes API backed object store

use std::fmt::Debug;

use async_trait::async_trait;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{ConfigMap, Secret, Service};
use k8s_openapi::NamespaceResourceScope;
use kube::api::{DeleteParams, Patch, PatchParams, PostParams, Preconditions};
use kube::{Api, Client, Resource, ResourceExt};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::json;
use tracing::debug;

use super::{store_key, ObjectKey, ObjectStore};
use crate::constants::FIELD_MANAGER;
use crate::crd::{OcmAgent, OcmAgentStatus};
use crate::error::StoreError;
use crate::resources::{ManagedObject, ResourceKind};

type StoreResult<T> = std::result::Result<T, StoreError>;

/// Object store talking to the Kubernetes API server
#[derive(Clone)]
pub struct KubeStore {
    client: Client,
}

impl KubeStore {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn api<K>(&self, namespace: &str) -> Api<K>
    where
        K: Resource<Scope = NamespaceResourceScope>,
        <K as Resource>::DynamicType: Default,
    {
        Api::namespaced(self.client.clone(), namespace)
    }

    async fn create_typed<K>(&self, namespace: &str, object: &K) -> StoreResult<K>
    where
        K: Resource<Scope = NamespaceResourceScope, DynamicType = ()>
            + Clone
            + Debug
            + Serialize
            + DeserializeOwned,
    {
        Ok(self
            .api::<K>(namespace)
            .create(&PostParams::default(), object)
            .await?)
    }

    async fn replace_typed<K>(&self, namespace: &str, object: &K) -> StoreResult<K>
    where
        K: Resource<Scope = NamespaceResourceScope, DynamicType = ()>
            + Clone
            + Debug
            + Serialize
            + DeserializeOwned,
    {
        Ok(self
            .api::<K>(namespace)
            .replace(&object.name_any(), &PostParams::default(), object)
            .await?)
    }

    async fn delete_typed<K>(&self, namespace: &str, object: &K) -> StoreResult<()>
    where
        K: Resource<Scope = NamespaceResourceScope, DynamicType = ()>
            + Clone
            + Debug
            + DeserializeOwned,
    {
        // Only delete the exact object that was observed.
        let params = DeleteParams {
            preconditions: object.uid().map(|uid| Preconditions {
                uid: Some(uid),
                resource_version: None,
            }),
            ..DeleteParams::background()
        };
        self.api::<K>(namespace)
            .delete(&object.name_any(), &params)
            .await?;
        Ok(())
    }
}

#[async_trait]
impl ObjectStore for KubeStore {
    async fn get(&self, kind: ResourceKind, key: &ObjectKey) -> StoreResult<ManagedObject> {
        debug!(kind = %kind, key = %key, "GET");
        let ns = key.namespace.as_str();
        let name = key.name.as_str();
        Ok(match kind {
            ResourceKind::ConfigMap => {
                ManagedObject::ConfigMap(self.api::<ConfigMap>(ns).get(name).await?)
            }
            ResourceKind::Secret => {
                ManagedObject::Secret(self.api::<Secret>(ns).get(name).await?)
            }
            ResourceKind::Service => {
                ManagedObject::Service(self.api::<Service>(ns).get(name).await?)
            }
            ResourceKind::Deployment => {
                ManagedObject::Deployment(self.api::<Deployment>(ns).get(name).await?)
            }
        })
    }

    async fn create(&self, object: &ManagedObject) -> StoreResult<ManagedObject> {
        let key = store_key(object)?;
        let ns = key.namespace.as_str();
        Ok(match object {
            ManagedObject::ConfigMap(o) => {
                ManagedObject::ConfigMap(self.create_typed(ns, o).await?)
            }
            ManagedObject::Secret(o) => ManagedObject::Secret(self.create_typed(ns, o).await?),
            ManagedObject::Service(o) => ManagedObject::Service(self.create_typed(ns, o).await?),
            ManagedObject::Deployment(o) => {
                ManagedObject::Deployment(self.create_typed(ns, o).await?)
            }
        })
    }

    async fn update(&self, object: &ManagedObject) -> StoreResult<ManagedObject> {
        let key = store_key(object)?;
        let ns = key.namespace.as_str();
        Ok(match object {
            ManagedObject::ConfigMap(o) => {
                ManagedObject::ConfigMap(self.replace_typed(ns, o).await?)
            }
            ManagedObject::Secret(o) => ManagedObject::Secret(self.replace_typed(ns, o).await?),
            ManagedObject::Service(o) => ManagedObject::Service(self.replace_typed(ns, o).await?),
            ManagedObject::Deployment(o) => {
                ManagedObject::Deployment(self.replace_typed(ns, o).await?)
            }
        })
    }

    async fn delete(&self, object: &ManagedObject) -> StoreResult<()> {
        let key = store_key(object)?;
        let ns = key.namespace.as_str();
        match object {
            ManagedObject::ConfigMap(o) => self.delete_typed(ns, o).await,
            ManagedObject::Secret(o) => self.delete_typed(ns, o).await,
            ManagedObject::Service(o) => self.delete_typed(ns, o).await,
            ManagedObject::Deployment(o) => self.delete_typed(ns, o).await,
        }
    }

    async fn get_agent(&self, key: &ObjectKey) -> StoreResult<OcmAgent> {
        Ok(self.api::<OcmAgent>(&key.namespace).get(&key.name).await?)
    }

    async fn update_agent(&self, agent: &OcmAgent) -> StoreResult<OcmAgent> {
        let namespace = agent
            .namespace()
            .ok_or_else(|| StoreError::Backend(format!("{} has no namespace", agent.name_any())))?;
        self.replace_typed(&namespace, agent).await
    }

    async fn patch_agent_status(
        &self,
        key: &ObjectKey,
        status: &OcmAgentStatus,
    ) -> StoreResult<OcmAgent> {
        let patch = json!({ "status": status });
        Ok(self
            .api::<OcmAgent>(&key.namespace)
            .patch_status(&key.name, &PatchParams::apply(FIELD_MANAGER), &Patch::Merge(patch))
            .await?)
    }
}
