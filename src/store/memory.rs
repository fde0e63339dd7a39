//! In-memory object store
//!
//! Behaves like the API server where the reconcilers can tell the difference:
//! resource versions are bumped on every write and stale replaces are rejected
//! with a conflict, and a deletion-requested OcmAgent disappears once its last
//! finalizer is removed. Every call is recorded, and failures can be injected
//! per operation and kind.

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::Utc;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, Time};
use kube::ResourceExt;
use tokio::sync::Mutex;

use super::{store_key, ObjectKey, ObjectStore};
use crate::crd::{OcmAgent, OcmAgentStatus};
use crate::error::StoreError;
use crate::resources::{ManagedObject, ResourceKind};

type StoreResult<T> = std::result::Result<T, StoreError>;

/// Store operations, for call filtering and fault injection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Get,
    Create,
    Update,
    Delete,
    GetAgent,
    UpdateAgent,
    PatchAgentStatus,
}

/// One recorded store call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreCall {
    Get(ResourceKind, ObjectKey),
    Create(ResourceKind, ObjectKey),
    Update(ResourceKind, ObjectKey),
    Delete(ResourceKind, ObjectKey),
    GetAgent(ObjectKey),
    UpdateAgent(ObjectKey),
    PatchAgentStatus(ObjectKey),
}

impl StoreCall {
    pub fn operation(&self) -> Operation {
        match self {
            StoreCall::Get(..) => Operation::Get,
            StoreCall::Create(..) => Operation::Create,
            StoreCall::Update(..) => Operation::Update,
            StoreCall::Delete(..) => Operation::Delete,
            StoreCall::GetAgent(_) => Operation::GetAgent,
            StoreCall::UpdateAgent(_) => Operation::UpdateAgent,
            StoreCall::PatchAgentStatus(_) => Operation::PatchAgentStatus,
        }
    }

    pub fn kind(&self) -> Option<ResourceKind> {
        match self {
            StoreCall::Get(kind, _)
            | StoreCall::Create(kind, _)
            | StoreCall::Update(kind, _)
            | StoreCall::Delete(kind, _) => Some(*kind),
            _ => None,
        }
    }

    /// Create, update or delete of a managed object
    pub fn is_managed_write(&self) -> bool {
        matches!(
            self,
            StoreCall::Create(..) | StoreCall::Update(..) | StoreCall::Delete(..)
        )
    }
}

struct Fault {
    operation: Operation,
    kind: Option<ResourceKind>,
    remaining: usize,
    error: fn() -> StoreError,
}

#[derive(Default)]
struct State {
    objects: BTreeMap<(ResourceKind, ObjectKey), ManagedObject>,
    agents: BTreeMap<ObjectKey, OcmAgent>,
    calls: Vec<StoreCall>,
    faults: Vec<Fault>,
    revision: u64,
}

impl State {
    fn next_revision(&mut self) -> String {
        self.revision += 1;
        self.revision.to_string()
    }

    /// Stamp a fresh resource version, and a uid on first write
    fn stamp(&mut self, meta: &mut ObjectMeta) {
        let revision = self.next_revision();
        if meta.uid.is_none() {
            meta.uid = Some(format!("uid-{}", revision));
        }
        meta.resource_version = Some(revision);
    }

    fn record(&mut self, call: StoreCall) -> StoreResult<()> {
        let operation = call.operation();
        let kind = call.kind();
        self.calls.push(call);

        let fault = self.faults.iter_mut().find(|f| {
            f.remaining > 0 && f.operation == operation && (f.kind.is_none() || f.kind == kind)
        });
        match fault {
            Some(fault) => {
                fault.remaining -= 1;
                Err((fault.error)())
            }
            None => Ok(()),
        }
    }
}

fn check_version(stored: &ObjectMeta, incoming: &ObjectMeta, what: &str) -> StoreResult<()> {
    match &incoming.resource_version {
        Some(rv) if stored.resource_version.as_ref() != Some(rv) => Err(StoreError::Conflict(
            format!("the object {} has been modified; please apply your changes to the latest version", what),
        )),
        _ => Ok(()),
    }
}

#[derive(Default)]
pub struct InMemoryStore {
    state: Mutex<State>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Put a managed object in place without recording a call, as an
    /// outside writer would
    pub async fn insert(&self, object: ManagedObject) -> ManagedObject {
        let mut state = self.state.lock().await;
        let mut object = object;
        state.stamp(object.metadata_mut());
        let key = object.key().unwrap_or_else(|_| ObjectKey::new("", ""));
        state.objects.insert((object.kind(), key), object.clone());
        object
    }

    /// Put an OcmAgent in place without recording a call
    pub async fn insert_agent(&self, agent: OcmAgent) -> OcmAgent {
        let mut state = self.state.lock().await;
        let mut agent = agent;
        state.stamp(&mut agent.metadata);
        let key = ObjectKey::new(agent.namespace().unwrap_or_default(), agent.name_any());
        state.agents.insert(key, agent.clone());
        agent
    }

    /// Ask for an OcmAgent to be deleted, as `kubectl delete` would: erased
    /// at once when it has no finalizers, otherwise marked for deletion
    pub async fn request_agent_deletion(&self, key: &ObjectKey) {
        let mut state = self.state.lock().await;
        let erase = match state.agents.get_mut(key) {
            Some(agent) if agent.finalizers().is_empty() => true,
            Some(agent) => {
                agent
                    .metadata
                    .deletion_timestamp
                    .get_or_insert_with(|| Time(Utc::now()));
                false
            }
            None => false,
        };
        if erase {
            state.agents.remove(key);
        }
    }

    pub async fn object(&self, kind: ResourceKind, key: &ObjectKey) -> Option<ManagedObject> {
        self.state
            .lock()
            .await
            .objects
            .get(&(kind, key.clone()))
            .cloned()
    }

    pub async fn objects(&self) -> Vec<ManagedObject> {
        self.state.lock().await.objects.values().cloned().collect()
    }

    pub async fn agent(&self, key: &ObjectKey) -> Option<OcmAgent> {
        self.state.lock().await.agents.get(key).cloned()
    }

    pub async fn calls(&self) -> Vec<StoreCall> {
        self.state.lock().await.calls.clone()
    }

    /// Creates, updates and deletes of managed objects, in call order
    pub async fn managed_writes(&self) -> Vec<StoreCall> {
        self.state
            .lock()
            .await
            .calls
            .iter()
            .filter(|c| c.is_managed_write())
            .cloned()
            .collect()
    }

    pub async fn clear_calls(&self) {
        self.state.lock().await.calls.clear();
    }

    /// Make the next `times` calls of `operation` (optionally for one kind) fail
    pub async fn fail_next(
        &self,
        operation: Operation,
        kind: Option<ResourceKind>,
        times: usize,
        error: fn() -> StoreError,
    ) {
        self.state.lock().await.faults.push(Fault {
            operation,
            kind,
            remaining: times,
            error,
        });
    }

    /// Make the next `times` updates of `kind` fail with a conflict
    pub async fn inject_conflicts(&self, kind: ResourceKind, times: usize) {
        self.fail_next(Operation::Update, Some(kind), times, || {
            StoreError::Conflict("injected conflict".to_string())
        })
        .await;
    }
}

#[async_trait]
impl ObjectStore for InMemoryStore {
    async fn get(&self, kind: ResourceKind, key: &ObjectKey) -> StoreResult<ManagedObject> {
        let mut state = self.state.lock().await;
        state.record(StoreCall::Get(kind, key.clone()))?;
        state
            .objects
            .get(&(kind, key.clone()))
            .cloned()
            .ok_or_else(|| StoreError::NotFound(format!("{} {}", kind, key)))
    }

    async fn create(&self, object: &ManagedObject) -> StoreResult<ManagedObject> {
        let key = store_key(object)?;
        let kind = object.kind();
        let mut state = self.state.lock().await;
        state.record(StoreCall::Create(kind, key.clone()))?;

        let slot = (kind, key);
        if state.objects.contains_key(&slot) {
            return Err(StoreError::AlreadyExists(format!("{} {}", kind, slot.1)));
        }
        let mut created = object.clone();
        created.metadata_mut().uid = None;
        state.stamp(created.metadata_mut());
        state.objects.insert(slot, created.clone());
        Ok(created)
    }

    async fn update(&self, object: &ManagedObject) -> StoreResult<ManagedObject> {
        let key = store_key(object)?;
        let kind = object.kind();
        let mut state = self.state.lock().await;
        state.record(StoreCall::Update(kind, key.clone()))?;

        let slot = (kind, key);
        let stored = state
            .objects
            .get(&slot)
            .ok_or_else(|| StoreError::NotFound(format!("{} {}", kind, slot.1)))?;
        check_version(stored.metadata(), object.metadata(), &slot.1.to_string())?;

        let mut updated = object.clone();
        updated.metadata_mut().uid = stored.metadata().uid.clone();
        state.stamp(updated.metadata_mut());
        state.objects.insert(slot, updated.clone());
        Ok(updated)
    }

    async fn delete(&self, object: &ManagedObject) -> StoreResult<()> {
        let key = store_key(object)?;
        let kind = object.kind();
        let mut state = self.state.lock().await;
        state.record(StoreCall::Delete(kind, key.clone()))?;

        state
            .objects
            .remove(&(kind, key.clone()))
            .map(|_| ())
            .ok_or_else(|| StoreError::NotFound(format!("{} {}", kind, key)))
    }

    async fn get_agent(&self, key: &ObjectKey) -> StoreResult<OcmAgent> {
        let mut state = self.state.lock().await;
        state.record(StoreCall::GetAgent(key.clone()))?;
        state
            .agents
            .get(key)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(format!("OcmAgent {}", key)))
    }

    async fn update_agent(&self, agent: &OcmAgent) -> StoreResult<OcmAgent> {
        let key = ObjectKey::new(agent.namespace().unwrap_or_default(), agent.name_any());
        let mut state = self.state.lock().await;
        state.record(StoreCall::UpdateAgent(key.clone()))?;

        let stored = state
            .agents
            .get(&key)
            .ok_or_else(|| StoreError::NotFound(format!("OcmAgent {}", key)))?;
        check_version(&stored.metadata, &agent.metadata, &key.to_string())?;

        let mut updated = agent.clone();
        updated.metadata.uid = stored.metadata.uid.clone();
        updated.metadata.deletion_timestamp = stored.metadata.deletion_timestamp.clone();
        updated.status = stored.status.clone();
        state.stamp(&mut updated.metadata);

        if updated.metadata.deletion_timestamp.is_some() && updated.finalizers().is_empty() {
            state.agents.remove(&key);
        } else {
            state.agents.insert(key, updated.clone());
        }
        Ok(updated)
    }

    async fn patch_agent_status(
        &self,
        key: &ObjectKey,
        status: &OcmAgentStatus,
    ) -> StoreResult<OcmAgent> {
        let mut state = self.state.lock().await;
        state.record(StoreCall::PatchAgentStatus(key.clone()))?;

        let revision = state.next_revision();
        let agent = state
            .agents
            .get_mut(key)
            .ok_or_else(|| StoreError::NotFound(format!("OcmAgent {}", key)))?;
        agent.status = Some(status.clone());
        agent.metadata.resource_version = Some(revision);
        Ok(agent.clone())
    }
}
