//! # Reconciliation Engine
//!
//! The event-to-action pipeline: the dispatcher subscribes to the watch
//! stream and feeds the work queue, worker loops drain it, and the state
//! machine turns each item into backend operations and a status commit.

pub mod dispatcher;
pub mod queue;
pub mod state;
pub mod store;

use crate::config::BackendConfig;
use crate::provisioner::ProvisionerRegistry;
use std::sync::Arc;
use store::{ResourceStore, SecretStore};

/// Shared dependencies handed to every worker
pub struct Context {
    pub config: BackendConfig,
    pub registry: ProvisionerRegistry,
    pub resources: Arc<dyn ResourceStore>,
    pub secrets: Arc<dyn SecretStore>,
}

impl std::fmt::Debug for Context {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Context")
            .field("config", &self.config)
            .field("registry", &self.registry)
            .finish()
    }
}
