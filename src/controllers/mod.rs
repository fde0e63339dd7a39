//! Kubernetes controller for the OcmAgent CRD
//!
//! This module contains the controller that watches OcmAgents and the objects
//! they own, and triggers reconciliation.

mod ocm_agent_controller;

pub use ocm_agent_controller::run as run_ocm_agent_controller;

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::config::OperatorConfig;
use crate::reconcilers::Invocation;
use crate::resources::{BuildContext, Registry};
use crate::store::ObjectStore;

/// Shared context for every reconciliation
pub struct Context {
    /// Store client for managed objects and OcmAgents
    pub store: Arc<dyn ObjectStore>,
    /// Resource managers in creation order
    pub registry: Registry,
    pub config: OperatorConfig,
    /// Cancelled on process shutdown
    pub shutdown: CancellationToken,
}

impl Context {
    /// Create a new context
    pub fn new(
        store: Arc<dyn ObjectStore>,
        registry: Registry,
        config: OperatorConfig,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            store,
            registry,
            config,
            shutdown,
        }
    }

    /// Cancellation and deadline for a new pass
    pub fn invocation(&self) -> Invocation {
        Invocation::new(self.shutdown.child_token(), self.config.reconcile_timeout)
    }

    pub fn build_context<'a>(&'a self, invocation: &'a Invocation) -> BuildContext<'a> {
        BuildContext {
            store: self.store.as_ref(),
            config: &self.config,
            invocation,
        }
    }
}
