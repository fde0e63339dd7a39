//! OcmAgent controller
//!
//! Watches OcmAgent resources, plus the ConfigMaps, Secrets, Services and
//! Deployments they control, and triggers reconciliation.

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{ConfigMap, Secret, Service};
use kube::{
    api::ListParams,
    runtime::{
        controller::{Action, Controller},
        watcher::Config as WatcherConfig,
    },
    Api, Client, ResourceExt,
};
use tracing::{error, info, instrument};

use crate::controllers::Context;
use crate::crd::OcmAgent;
use crate::error::{Error, Result, StoreError};
use crate::metrics;
use crate::reconcilers::{ocm_agent as ocm_agent_reconciler, Outcome};
use crate::store::ObjectKey;

const KIND: &str = "OcmAgent";

/// Run the OcmAgent controller
pub async fn run(client: Client, context: Arc<Context>) {
    let api: Api<OcmAgent> = Api::all(client.clone());

    // Verify CRD is installed
    if let Err(e) = api.list(&ListParams::default().limit(1)).await {
        error!("OcmAgent CRD not installed: {}", e);
        return;
    }

    info!("Starting OcmAgent controller");

    Controller::new(api, WatcherConfig::default())
        .owns(Api::<ConfigMap>::all(client.clone()), WatcherConfig::default())
        .owns(Api::<Secret>::all(client.clone()), WatcherConfig::default())
        .owns(Api::<Service>::all(client.clone()), WatcherConfig::default())
        .owns(Api::<Deployment>::all(client), WatcherConfig::default())
        .shutdown_on_signal()
        .run(reconcile, error_policy, context)
        .for_each(|result| async move {
            match result {
                Ok((obj, _action)) => {
                    info!(
                        name = %obj.name,
                        namespace = obj.namespace.as_deref().unwrap_or("default"),
                        "Reconciled OcmAgent"
                    );
                }
                Err(e) => {
                    error!(error = %e, "Reconciliation error");
                    metrics::RECONCILIATION_ERRORS.with_label_values(&[KIND]).inc();
                }
            }
        })
        .await;
}

/// Main reconciliation function
#[instrument(skip(ctx), fields(name = %obj.name_any(), namespace = obj.namespace()))]
async fn reconcile(obj: Arc<OcmAgent>, ctx: Arc<Context>) -> Result<Action> {
    let _timer = metrics::RECONCILE_DURATION
        .with_label_values(&[KIND])
        .start_timer();
    metrics::RECONCILIATIONS.with_label_values(&[KIND]).inc();

    // Re-read the agent through the store; the cached copy may be stale.
    let key = ObjectKey::for_resource(&*obj)?;
    let invocation = ctx.invocation();

    match ocm_agent_reconciler::reconcile(&ctx, &key, &invocation).await? {
        Outcome::Absent => info!("OcmAgent is gone"),
        Outcome::Reconciled => info!("OcmAgent resources are in place"),
        Outcome::CleanedUp => info!("OcmAgent resources removed"),
    }

    Ok(Action::await_change())
}

/// Error policy for the controller
fn error_policy(obj: Arc<OcmAgent>, error: &Error, _ctx: Arc<Context>) -> Action {
    let name = obj.name_any();
    error!(
        name = %name,
        error = %error,
        "Reconciliation failed, scheduling retry"
    );

    Action::requeue(requeue_after(error))
}

/// Requeue delay by error class
fn requeue_after(error: &Error) -> Duration {
    match error {
        Error::Config(_) | Error::Validation(_) | Error::Build { .. } | Error::MissingName(_) => {
            Duration::from_secs(300)
        }
        Error::KindMismatch { .. } => Duration::from_secs(600),
        Error::ConflictRetriesExhausted { .. } | Error::Store(StoreError::Conflict(_)) => {
            Duration::from_secs(5)
        }
        _ => Duration::from_secs(30),
    }
}
