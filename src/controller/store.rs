//! # Store Seams
//!
//! Traits over the two external collaborators the reconciliation engine
//! writes to: the resource store holding `Database` objects and the secret
//! store holding credential secrets. The kube-backed implementations are
//! the only ones used in production; the test suite substitutes in-memory
//! fakes.

use crate::crd::Database;
use anyhow::{Context as _, Result};
use async_trait::async_trait;
use k8s_openapi::api::core::v1::Secret;
use kube::api::{Patch, PatchParams, PostParams};
use kube::{Api, Client, ResourceExt};

/// Field manager recorded on status patches and secret writes
const MANAGER: &str = "database-controller";

/// Point read/write access to Database resources
///
/// `put` writes the resource's status back keyed by namespace+name; the
/// state machine treats that write as fire-and-forget.
#[async_trait]
pub trait ResourceStore: Send + Sync {
    async fn get(&self, namespace: &str, name: &str) -> Result<Option<Database>>;
    async fn put(&self, db: &Database) -> Result<()>;
}

/// Namespaced secret access
#[async_trait]
pub trait SecretStore: Send + Sync {
    async fn get(&self, namespace: &str, name: &str) -> Result<Option<Secret>>;
    async fn create(&self, namespace: &str, secret: &Secret) -> Result<()>;
    async fn update(&self, namespace: &str, secret: &Secret) -> Result<()>;
}

/// Resource store backed by the cluster API
#[derive(Clone)]
pub struct KubeResourceStore {
    client: Client,
}

impl std::fmt::Debug for KubeResourceStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KubeResourceStore").finish()
    }
}

impl KubeResourceStore {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn api(&self, namespace: &str) -> Api<Database> {
        Api::namespaced(self.client.clone(), namespace)
    }
}

#[async_trait]
impl ResourceStore for KubeResourceStore {
    async fn get(&self, namespace: &str, name: &str) -> Result<Option<Database>> {
        self.api(namespace)
            .get_opt(name)
            .await
            .with_context(|| format!("failed to get database {namespace}/{name}"))
    }

    async fn put(&self, db: &Database) -> Result<()> {
        let namespace = db.namespace().unwrap_or_default();
        let name = db.name_any();
        let patch = serde_json::json!({ "status": db.status });
        self.api(&namespace)
            .patch_status(&name, &PatchParams::apply(MANAGER), &Patch::Merge(patch))
            .await
            .with_context(|| format!("failed to update status of {namespace}/{name}"))?;
        Ok(())
    }
}

/// Secret store backed by the cluster API
#[derive(Clone)]
pub struct KubeSecretStore {
    client: Client,
}

impl std::fmt::Debug for KubeSecretStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KubeSecretStore").finish()
    }
}

impl KubeSecretStore {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn api(&self, namespace: &str) -> Api<Secret> {
        Api::namespaced(self.client.clone(), namespace)
    }
}

#[async_trait]
impl SecretStore for KubeSecretStore {
    async fn get(&self, namespace: &str, name: &str) -> Result<Option<Secret>> {
        self.api(namespace)
            .get_opt(name)
            .await
            .with_context(|| format!("failed to get secret {namespace}/{name}"))
    }

    async fn create(&self, namespace: &str, secret: &Secret) -> Result<()> {
        self.api(namespace)
            .create(&PostParams::default(), secret)
            .await
            .with_context(|| format!("failed to create secret in {namespace}"))?;
        Ok(())
    }

    async fn update(&self, namespace: &str, secret: &Secret) -> Result<()> {
        let name = secret.name_any();
        self.api(namespace)
            .replace(&name, &PostParams::default(), secret)
            .await
            .with_context(|| format!("failed to update secret {namespace}/{name}"))?;
        Ok(())
    }
}
