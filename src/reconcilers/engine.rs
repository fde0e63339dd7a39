//! EnsurePresent / EnsureAbsent over the resource manager registry
//!
//! Kinds are handled strictly one after another. A failing kind stops the
//! pass; kinds applied before it stay applied and become no-ops on the next
//! pass.

use kube::{Resource, ResourceExt};
use tracing::{debug, info, warn};

use super::Invocation;
use crate::controllers::Context;
use crate::crd::OcmAgent;
use crate::error::{Error, Result, StoreError};
use crate::metrics;
use crate::resources::{Diff, ManagedObject, ResourceManager};

/// Create or converge every managed object, in registration order.
///
/// Returns the `Kind/name` of each managed object.
pub async fn ensure_present(
    ctx: &Context,
    agent: &OcmAgent,
    invocation: &Invocation,
) -> Result<Vec<String>> {
    let build_ctx = ctx.build_context(invocation);
    let mut managed = Vec::with_capacity(ctx.registry.len());

    for manager in ctx.registry.creation_order() {
        let desired = manager.build(agent, &build_ctx).await?;
        managed.push(desired.display_name());
        ensure_object(ctx, agent, manager.as_ref(), desired, invocation).await?;
    }

    Ok(managed)
}

/// Delete every managed object owned by the agent, in reverse registration
/// order. Objects that are already gone count as deleted.
pub async fn ensure_absent(ctx: &Context, agent: &OcmAgent, invocation: &Invocation) -> Result<()> {
    let build_ctx = ctx.build_context(invocation);

    for manager in ctx.registry.removal_order() {
        let kind = manager.kind();
        let key = manager.locate(agent, &build_ctx).await?;

        let observed = match invocation.guard(ctx.store.get(kind, &key)).await {
            Ok(observed) => observed,
            Err(e) if e.is_not_found() => {
                debug!(kind = %kind, key = %key, "Object already absent");
                continue;
            }
            Err(e) => return Err(e.into()),
        };

        if !owned_by(&observed, agent) {
            warn!(
                kind = %kind,
                key = %key,
                "Leaving object in place, it is not controlled by this OcmAgent"
            );
            continue;
        }

        match invocation.guard(ctx.store.delete(&observed)).await {
            Ok(()) => {
                info!(kind = %kind, name = %key.name, namespace = %key.namespace, "Deleted object");
                metrics::RESOURCE_WRITES
                    .with_label_values(&[kind.as_str(), "delete"])
                    .inc();
            }
            Err(e) if e.is_not_found() => {
                debug!(kind = %kind, key = %key, "Object vanished before delete");
            }
            Err(e) => return Err(e.into()),
        }
    }

    Ok(())
}

/// Fetch-compare-write one object, retrying the whole cycle on conflicts
async fn ensure_object(
    ctx: &Context,
    agent: &OcmAgent,
    manager: &dyn ResourceManager,
    desired: ManagedObject,
    invocation: &Invocation,
) -> Result<()> {
    let kind = manager.kind();
    let policy = ctx.config.conflict_retry;
    let mut attempt: u32 = 0;

    loop {
        attempt += 1;
        match apply_once(ctx, agent, manager, &desired, invocation).await {
            Err(Error::Store(StoreError::Conflict(message))) => {
                let Some(delay) = policy.next_retry(attempt) else {
                    warn!(
                        kind = %kind,
                        name = desired.name().unwrap_or_default(),
                        attempts = attempt,
                        "Giving up after repeated write conflicts"
                    );
                    return Err(Error::ConflictRetriesExhausted {
                        kind,
                        name: desired.name().unwrap_or_default().to_string(),
                        attempts: attempt,
                    });
                };
                metrics::CONFLICT_RETRIES
                    .with_label_values(&[kind.as_str()])
                    .inc();
                debug!(
                    kind = %kind,
                    attempt = attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %message,
                    "Write conflict, retrying"
                );
                invocation.pause(delay).await?;
            }
            other => return other,
        }
    }
}

async fn apply_once(
    ctx: &Context,
    agent: &OcmAgent,
    manager: &dyn ResourceManager,
    desired: &ManagedObject,
    invocation: &Invocation,
) -> Result<()> {
    let kind = manager.kind();
    let key = desired.key()?;

    let observed = match invocation.guard(ctx.store.get(kind, &key)).await {
        Ok(observed) => observed,
        Err(e) if e.is_not_found() => {
            let mut object = desired.clone();
            let mut owner = agent.controller_owner_ref(&()).ok_or_else(|| {
                Error::build(
                    kind,
                    format!("OcmAgent '{}' has no uid to own objects", agent.name_any()),
                )
            })?;
            owner.block_owner_deletion = Some(true);
            object.set_controller(owner);

            info!(
                kind = %kind,
                name = %key.name,
                namespace = %key.namespace,
                "Creating object which does not exist"
            );
            invocation.guard(ctx.store.create(&object)).await?;
            metrics::RESOURCE_WRITES
                .with_label_values(&[kind.as_str(), "create"])
                .inc();
            return Ok(());
        }
        Err(e) => return Err(e.into()),
    };

    match manager.changed(&observed, desired)? {
        Diff::Unchanged => {
            debug!(kind = %kind, key = %key, "Object is up to date");
            Ok(())
        }
        Diff::Changed(merged) => {
            info!(
                kind = %kind,
                name = %key.name,
                namespace = %key.namespace,
                "Updating object due to differences detected"
            );
            invocation.guard(ctx.store.update(&merged)).await?;
            metrics::RESOURCE_WRITES
                .with_label_values(&[kind.as_str(), "update"])
                .inc();
            Ok(())
        }
    }
}

/// Whether the object's controller reference points at this agent
fn owned_by(object: &ManagedObject, agent: &OcmAgent) -> bool {
    object.owner_references().iter().any(|owner| {
        owner.kind == OcmAgent::kind(&()) && {
            match agent.uid() {
                Some(uid) => owner.uid == uid,
                None => owner.name == agent.name_any(),
            }
        }
    })
}
