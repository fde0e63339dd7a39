//! Integration tests for the OcmAgent lifecycle
//!
//! These tests run whole reconciliation passes against the in-memory store:
//! finalizer handling, status, deletion, and the create / no-op / update
//! sequence for a spec edit.

mod common;

use std::sync::Arc;

use kube::ResourceExt;

use ocm_agent_operator::constants::FINALIZER_NAME;
use ocm_agent_operator::controllers::Context;
use ocm_agent_operator::error::{Error, StoreError};
use ocm_agent_operator::reconcilers::{ocm_agent, Invocation, Outcome};
use ocm_agent_operator::resources::{ManagedObject, Registry, ResourceKind};
use ocm_agent_operator::store::{InMemoryStore, ObjectKey, ObjectStore, Operation, StoreCall};

use common::{agent, agent_key, context, seeded_store, NAMESPACE};

// ============================================================================
// Test Helpers
// ============================================================================

fn key(name: &str) -> ObjectKey {
    ObjectKey::new(NAMESPACE, name)
}

async fn has_finalizer(store: &InMemoryStore) -> bool {
    store
        .agent(&agent_key())
        .await
        .map(|a| a.finalizers().iter().any(|f| f == FINALIZER_NAME))
        .unwrap_or(false)
}

async fn phase(store: &InMemoryStore) -> Option<String> {
    store
        .agent(&agent_key())
        .await
        .and_then(|a| a.status)
        .and_then(|s| s.phase)
}

async fn reconcile(ctx: &Context) -> ocm_agent_operator::Result<Outcome> {
    ocm_agent::reconcile(ctx, &agent_key(), &Invocation::unbounded()).await
}

// ============================================================================
// Scenario: create, no-op, edit
// ============================================================================

#[tokio::test]
async fn spec_edit_results_in_a_single_config_update() {
    let store = seeded_store().await;
    store.insert_agent(agent()).await;
    let ctx = context(&store, Registry::ocm_agent());

    // First pass creates one object per kind, in order.
    assert_eq!(reconcile(&ctx).await.unwrap(), Outcome::Reconciled);
    assert_eq!(
        store.managed_writes().await,
        vec![
            StoreCall::Create(ResourceKind::ConfigMap, key("ocm-agent-cm")),
            StoreCall::Create(ResourceKind::Secret, key("ocm-access-token")),
            StoreCall::Create(ResourceKind::Service, key("ocm-agent")),
            StoreCall::Create(ResourceKind::Deployment, key("ocm-agent")),
        ]
    );

    // Second pass with the same spec writes nothing at all.
    store.clear_calls().await;
    assert_eq!(reconcile(&ctx).await.unwrap(), Outcome::Reconciled);
    let writes: Vec<_> = store
        .calls()
        .await
        .into_iter()
        .filter(|c| !matches!(c.operation(), Operation::Get | Operation::GetAgent))
        .collect();
    assert!(writes.is_empty(), "unexpected writes: {:?}", writes);

    // Third pass after narrowing the services updates only the ConfigMap.
    let mut edited = store.agent(&agent_key()).await.unwrap();
    edited.spec.services = vec!["svc-a".to_string()];
    store.update_agent(&edited).await.unwrap();
    store.clear_calls().await;

    assert_eq!(reconcile(&ctx).await.unwrap(), Outcome::Reconciled);
    assert_eq!(
        store.managed_writes().await,
        vec![StoreCall::Update(ResourceKind::ConfigMap, key("ocm-agent-cm"))]
    );
    let Some(ManagedObject::ConfigMap(cm)) = store
        .object(ResourceKind::ConfigMap, &key("ocm-agent-cm"))
        .await
    else {
        panic!("expected ConfigMap");
    };
    assert_eq!(cm.data.unwrap()["services"], "svc-a");
}

// ============================================================================
// Finalizer discipline
// ============================================================================

#[tokio::test]
async fn finalizer_and_ready_status_follow_a_successful_pass() {
    let store = seeded_store().await;
    store.insert_agent(agent()).await;
    let ctx = context(&store, Registry::ocm_agent());

    reconcile(&ctx).await.unwrap();

    assert!(has_finalizer(&store).await);
    let status = store.agent(&agent_key()).await.unwrap().status.unwrap();
    assert_eq!(status.phase.as_deref(), Some("Ready"));
    assert_eq!(status.observed_generation, Some(1));
    assert_eq!(
        status.managed_resources,
        vec![
            "ConfigMap/ocm-agent-cm",
            "Secret/ocm-access-token",
            "Service/ocm-agent",
            "Deployment/ocm-agent",
        ]
    );
}

#[tokio::test]
async fn failed_pass_adds_no_finalizer() {
    // Without the pull secret the Secret cannot be built.
    let store = Arc::new(InMemoryStore::new());
    store.insert_agent(agent()).await;
    let ctx = context(&store, Registry::ocm_agent());

    let err = reconcile(&ctx).await.unwrap_err();

    assert!(matches!(err, Error::Build { kind: ResourceKind::Secret, .. }));
    assert!(!has_finalizer(&store).await);
    assert_eq!(phase(&store).await.as_deref(), Some("Failed"));
}

#[tokio::test]
async fn deletion_removes_resources_then_releases_the_agent() {
    let store = seeded_store().await;
    store.insert_agent(agent()).await;
    let ctx = context(&store, Registry::ocm_agent());
    reconcile(&ctx).await.unwrap();

    store.request_agent_deletion(&agent_key()).await;
    store.clear_calls().await;

    assert_eq!(reconcile(&ctx).await.unwrap(), Outcome::CleanedUp);
    assert_eq!(
        store.managed_writes().await,
        vec![
            StoreCall::Delete(ResourceKind::Deployment, key("ocm-agent")),
            StoreCall::Delete(ResourceKind::Service, key("ocm-agent")),
            StoreCall::Delete(ResourceKind::Secret, key("ocm-access-token")),
            StoreCall::Delete(ResourceKind::ConfigMap, key("ocm-agent-cm")),
        ]
    );
    // Releasing the finalizer let the agent go.
    assert!(store.agent(&agent_key()).await.is_none());
    assert_eq!(reconcile(&ctx).await.unwrap(), Outcome::Absent);
}

#[tokio::test]
async fn failed_cleanup_keeps_the_finalizer() {
    let store = seeded_store().await;
    store.insert_agent(agent()).await;
    let ctx = context(&store, Registry::ocm_agent());
    reconcile(&ctx).await.unwrap();

    store.request_agent_deletion(&agent_key()).await;
    store
        .fail_next(Operation::Delete, Some(ResourceKind::Service), 1, || {
            StoreError::Backend("forbidden".to_string())
        })
        .await;

    let err = reconcile(&ctx).await.unwrap_err();
    assert!(matches!(err, Error::Store(StoreError::Backend(_))));
    assert!(has_finalizer(&store).await);
    assert_eq!(phase(&store).await.as_deref(), Some("Failed"));

    // The retry picks up where the failed pass stopped.
    store.clear_calls().await;
    assert_eq!(reconcile(&ctx).await.unwrap(), Outcome::CleanedUp);
    assert_eq!(
        store.managed_writes().await,
        vec![
            StoreCall::Delete(ResourceKind::Service, key("ocm-agent")),
            StoreCall::Delete(ResourceKind::Secret, key("ocm-access-token")),
            StoreCall::Delete(ResourceKind::ConfigMap, key("ocm-agent-cm")),
        ]
    );
    assert!(store.agent(&agent_key()).await.is_none());
}

/// Index of a call in the recorded sequence
async fn position(store: &InMemoryStore, call: &StoreCall) -> usize {
    store
        .calls()
        .await
        .iter()
        .position(|c| c == call)
        .unwrap_or_else(|| panic!("{:?} was not called", call))
}

#[tokio::test]
async fn single_pass_after_ready_releases_the_agent() {
    let store = seeded_store().await;
    store.insert_agent(agent()).await;
    let ctx = context(&store, Registry::ocm_agent());
    reconcile(&ctx).await.unwrap();
    assert_eq!(phase(&store).await.as_deref(), Some("Ready"));

    store.request_agent_deletion(&agent_key()).await;
    store.clear_calls().await;

    // Terminating is written first, which moves the resourceVersion; the
    // finalizer release in the same pass must still go through.
    assert_eq!(reconcile(&ctx).await.unwrap(), Outcome::CleanedUp);
    let status_write = position(&store, &StoreCall::PatchAgentStatus(agent_key())).await;
    let release = position(&store, &StoreCall::UpdateAgent(agent_key())).await;
    assert!(status_write < release);
    assert!(store.agent(&agent_key()).await.is_none());
}

#[tokio::test]
async fn cleanup_retry_after_a_failure_releases_the_agent() {
    let store = seeded_store().await;
    store.insert_agent(agent()).await;
    let ctx = context(&store, Registry::ocm_agent());
    reconcile(&ctx).await.unwrap();

    store.request_agent_deletion(&agent_key()).await;
    store
        .fail_next(Operation::Delete, Some(ResourceKind::Secret), 1, || {
            StoreError::Backend("etcd unavailable".to_string())
        })
        .await;
    reconcile(&ctx).await.unwrap_err();
    assert_eq!(phase(&store).await.as_deref(), Some("Failed"));
    store.clear_calls().await;

    // Failed -> Terminating rewrites the status before the finalizer goes.
    assert_eq!(reconcile(&ctx).await.unwrap(), Outcome::CleanedUp);
    let status_write = position(&store, &StoreCall::PatchAgentStatus(agent_key())).await;
    let release = position(&store, &StoreCall::UpdateAgent(agent_key())).await;
    assert!(status_write < release);
    assert_eq!(
        store.managed_writes().await,
        vec![
            StoreCall::Delete(ResourceKind::Secret, key("ocm-access-token")),
            StoreCall::Delete(ResourceKind::ConfigMap, key("ocm-agent-cm")),
        ]
    );
    assert!(store.agent(&agent_key()).await.is_none());
}

#[tokio::test]
async fn deletion_without_finalizer_still_cleans_up() {
    let store = seeded_store().await;
    let mut deleting = agent();
    deleting.metadata.finalizers = Some(vec!["example.com/other".to_string()]);
    store.insert_agent(deleting).await;
    store.request_agent_deletion(&agent_key()).await;
    let ctx = context(&store, Registry::ocm_agent());

    assert_eq!(reconcile(&ctx).await.unwrap(), Outcome::CleanedUp);

    // Someone else's finalizer is left alone.
    let remaining = store.agent(&agent_key()).await.unwrap();
    assert_eq!(remaining.finalizers(), &["example.com/other".to_string()]);
    assert!(!store
        .calls()
        .await
        .contains(&StoreCall::UpdateAgent(agent_key())));
}

// ============================================================================
// Validation and absence
// ============================================================================

#[tokio::test]
async fn invalid_spec_is_rejected_before_any_write() {
    let store = seeded_store().await;
    let mut invalid = agent();
    invalid.spec.ocm_base_url = "ftp://x".to_string();
    store.insert_agent(invalid).await;
    let ctx = context(&store, Registry::ocm_agent());

    let err = reconcile(&ctx).await.unwrap_err();

    assert!(matches!(err, Error::Validation(_)));
    assert!(store.managed_writes().await.is_empty());
    assert!(!has_finalizer(&store).await);
    let status = store.agent(&agent_key()).await.unwrap().status.unwrap();
    assert_eq!(status.phase.as_deref(), Some("Failed"));
    assert!(status.message.unwrap().contains("ocmBaseUrl"));
}

#[tokio::test]
async fn missing_agent_is_a_no_op() {
    let store = seeded_store().await;
    let ctx = context(&store, Registry::ocm_agent());

    assert_eq!(reconcile(&ctx).await.unwrap(), Outcome::Absent);
    assert_eq!(store.calls().await, vec![StoreCall::GetAgent(agent_key())]);
}

#[tokio::test]
async fn repeated_failure_does_not_rewrite_status() {
    let store = Arc::new(InMemoryStore::new());
    store.insert_agent(agent()).await;
    let ctx = context(&store, Registry::ocm_agent());
    reconcile(&ctx).await.unwrap_err();
    store.clear_calls().await;

    reconcile(&ctx).await.unwrap_err();

    assert!(!store
        .calls()
        .await
        .contains(&StoreCall::PatchAgentStatus(agent_key())));
}
