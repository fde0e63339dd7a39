//! OcmAgent lifecycle
//!
//! Handles the business logic for one OcmAgent pass:
//! - Spec validation
//! - EnsurePresent / EnsureAbsent of the managed objects
//! - Finalizer bookkeeping
//! - Status updates

use chrono::Utc;
use kube::ResourceExt;
use tracing::{debug, info, warn};

use super::{engine, Invocation};
use crate::constants::FINALIZER_NAME;
use crate::controllers::Context;
use crate::crd::{Condition, OcmAgent, OcmAgentStatus};
use crate::error::{Error, Result};
use crate::metrics;
use crate::store::ObjectKey;

/// What a pass ended up doing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// The OcmAgent no longer exists
    Absent,
    /// Managed objects are in place and the finalizer is set
    Reconciled,
    /// Managed objects are gone and the finalizer was released
    CleanedUp,
}

/// Validate the OcmAgent spec
pub fn validate(agent: &OcmAgent) -> Result<()> {
    let spec = &agent.spec;

    if spec.ocm_agent_image.trim().is_empty() {
        return Err(Error::validation("ocmAgentImage must be specified"));
    }
    if spec.token_secret.trim().is_empty() {
        return Err(Error::validation("tokenSecret must be specified"));
    }
    if spec.ocm_agent_config.trim().is_empty() {
        return Err(Error::validation("ocmAgentConfig must be specified"));
    }

    if !(spec.ocm_base_url.starts_with("http://") || spec.ocm_base_url.starts_with("https://")) {
        return Err(Error::validation(format!(
            "Invalid ocmBaseUrl '{}': must be an http:// or https:// URL",
            spec.ocm_base_url
        )));
    }

    if spec.replicas < 0 {
        return Err(Error::validation(format!(
            "Invalid replicas {}: must not be negative",
            spec.replicas
        )));
    }

    if spec.services.is_empty() {
        return Err(Error::validation("At least one service must be specified"));
    }
    if spec.services.iter().any(|s| s.trim().is_empty()) {
        return Err(Error::validation("Service names must not be empty"));
    }

    Ok(())
}

/// Run one pass for the OcmAgent at `key`
pub async fn reconcile(ctx: &Context, key: &ObjectKey, invocation: &Invocation) -> Result<Outcome> {
    let agent = match invocation.guard(ctx.store.get_agent(key)).await {
        Ok(agent) => agent,
        Err(e) if e.is_not_found() => {
            debug!(key = %key, "OcmAgent not found, nothing to reconcile");
            metrics::OCM_AGENT_RESOURCE_ABSENT.set(1.0);
            return Ok(Outcome::Absent);
        }
        Err(e) => return Err(e.into()),
    };
    metrics::OCM_AGENT_RESOURCE_ABSENT.set(0.0);

    if agent.metadata.deletion_timestamp.is_some() {
        cleanup(ctx, key, agent, invocation).await
    } else {
        apply(ctx, key, agent, invocation).await
    }
}

async fn apply(
    ctx: &Context,
    key: &ObjectKey,
    agent: OcmAgent,
    invocation: &Invocation,
) -> Result<Outcome> {
    info!(
        name = %key.name,
        namespace = %key.namespace,
        generation = agent.metadata.generation.unwrap_or(0),
        "Reconciling OcmAgent"
    );

    if let Err(e) = validate(&agent) {
        warn!(error = %e, "Validation failed");
        record_failure(ctx, key, &agent, &e, invocation).await;
        return Err(e);
    }

    let managed = match engine::ensure_present(ctx, &agent, invocation).await {
        Ok(managed) => managed,
        Err(e) => {
            record_failure(ctx, key, &agent, &e, invocation).await;
            return Err(e);
        }
    };

    let agent = add_finalizer(ctx, agent, invocation).await?;

    let status = OcmAgentStatus {
        phase: Some("Ready".to_string()),
        message: Some(format!("{} managed resources in place", managed.len())),
        observed_generation: agent.metadata.generation,
        last_reconcile_time: Some(Utc::now()),
        managed_resources: managed,
        conditions: vec![ready_condition("True", "Reconciled", "All managed resources are in place")],
    };
    write_status(ctx, key, &agent, status, invocation).await?;

    Ok(Outcome::Reconciled)
}

async fn cleanup(
    ctx: &Context,
    key: &ObjectKey,
    agent: OcmAgent,
    invocation: &Invocation,
) -> Result<Outcome> {
    info!(name = %key.name, namespace = %key.namespace, "Cleaning up OcmAgent");

    // The agent may be erased as soon as the finalizer goes, so report
    // progress first.
    let terminating = OcmAgentStatus {
        phase: Some("Terminating".to_string()),
        message: Some("Removing managed resources".to_string()),
        observed_generation: agent.metadata.generation,
        last_reconcile_time: Some(Utc::now()),
        managed_resources: current_managed_resources(&agent),
        conditions: vec![ready_condition("False", "Terminating", "OcmAgent is being deleted")],
    };
    // The status write moves the resourceVersion, so carry the returned agent
    // forward for the finalizer update.
    let agent = match write_status(ctx, key, &agent, terminating, invocation).await {
        Ok(updated) => updated,
        Err(e) => {
            warn!(error = %e, "Failed to record Terminating status");
            agent
        }
    };

    if let Err(e) = engine::ensure_absent(ctx, &agent, invocation).await {
        record_failure(ctx, key, &agent, &e, invocation).await;
        return Err(e);
    }

    remove_finalizer(ctx, agent, invocation).await?;
    metrics::CLEANUPS.with_label_values(&["OcmAgent"]).inc();

    Ok(Outcome::CleanedUp)
}

/// Persist the finalizer if it is not there yet
async fn add_finalizer(ctx: &Context, agent: OcmAgent, invocation: &Invocation) -> Result<OcmAgent> {
    if agent.finalizers().iter().any(|f| f == FINALIZER_NAME) {
        return Ok(agent);
    }

    let mut updated = agent;
    updated.finalizers_mut().push(FINALIZER_NAME.to_string());
    debug!(finalizer = FINALIZER_NAME, "Adding finalizer");
    Ok(invocation.guard(ctx.store.update_agent(&updated)).await?)
}

/// Release the finalizer if it is still there
async fn remove_finalizer(ctx: &Context, agent: OcmAgent, invocation: &Invocation) -> Result<()> {
    if !agent.finalizers().iter().any(|f| f == FINALIZER_NAME) {
        return Ok(());
    }

    let mut updated = agent;
    updated.finalizers_mut().retain(|f| f != FINALIZER_NAME);
    debug!(finalizer = FINALIZER_NAME, "Removing finalizer");
    invocation.guard(ctx.store.update_agent(&updated)).await?;
    Ok(())
}

/// Merge-patch the status, unless nothing but timestamps would change
///
/// Returns the agent as it stands after the write.
async fn write_status(
    ctx: &Context,
    key: &ObjectKey,
    agent: &OcmAgent,
    status: OcmAgentStatus,
    invocation: &Invocation,
) -> Result<OcmAgent> {
    if let Some(current) = &agent.status {
        if !current.differs_from(&status) {
            debug!("Status unchanged, skipping update");
            return Ok(agent.clone());
        }
    }
    Ok(invocation
        .guard(ctx.store.patch_agent_status(key, &status))
        .await?)
}

/// Best-effort Failed status after a failed pass
async fn record_failure(
    ctx: &Context,
    key: &ObjectKey,
    agent: &OcmAgent,
    error: &Error,
    invocation: &Invocation,
) {
    let message = error.to_string();
    let status = OcmAgentStatus {
        phase: Some("Failed".to_string()),
        message: Some(message.clone()),
        observed_generation: agent.metadata.generation,
        last_reconcile_time: Some(Utc::now()),
        managed_resources: current_managed_resources(agent),
        conditions: vec![ready_condition("False", failure_reason(error), &message)],
    };
    if let Err(e) = write_status(ctx, key, agent, status, invocation).await {
        warn!(error = %e, "Failed to record Failed status");
    }
}

fn current_managed_resources(agent: &OcmAgent) -> Vec<String> {
    agent
        .status
        .as_ref()
        .map(|s| s.managed_resources.clone())
        .unwrap_or_default()
}

fn failure_reason(error: &Error) -> &'static str {
    match error {
        Error::Validation(_) => "ValidationFailed",
        Error::Build { .. } => "BuildFailed",
        Error::ConflictRetriesExhausted { .. } => "ConflictRetriesExhausted",
        _ => "ReconcileFailed",
    }
}

fn ready_condition(status: &str, reason: &str, message: &str) -> Condition {
    Condition {
        type_: "Ready".to_string(),
        status: status.to_string(),
        last_transition_time: Utc::now(),
        reason: Some(reason.to_string()),
        message: Some(message.to_string()),
    }
}
