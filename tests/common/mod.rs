//! Shared fixtures: in-memory stores and a recording provisioner that
//! stand in for the cluster API and the backend servers.

#![allow(dead_code, reason = "not every test binary uses every fixture")]

use anyhow::{bail, Result};
use async_trait::async_trait;
use database_controller::controller::store::{ResourceStore, SecretStore};
use database_controller::controller::Context;
use database_controller::provisioner::{
    select_server, Provisioned, ProvisionError, Provisioner, ProvisionerRegistry,
};
use database_controller::{BackendConfig, BackendServer, Database, DatabaseSpec, DatabaseStatus};
use k8s_openapi::api::core::v1::Secret;
use k8s_openapi::ByteString;
use kube::ResourceExt;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};

/// In-memory Database store tracking every status write
#[derive(Debug, Default)]
pub struct MemoryResourceStore {
    objects: Mutex<HashMap<(String, String), Database>>,
    writes: Mutex<u32>,
}

impl MemoryResourceStore {
    pub fn stored(&self, namespace: &str, name: &str) -> Option<Database> {
        self.objects
            .lock()
            .unwrap()
            .get(&(namespace.to_string(), name.to_string()))
            .cloned()
    }

    pub fn write_count(&self) -> u32 {
        *self.writes.lock().unwrap()
    }
}

#[async_trait]
impl ResourceStore for MemoryResourceStore {
    async fn get(&self, namespace: &str, name: &str) -> Result<Option<Database>> {
        Ok(self.stored(namespace, name))
    }

    async fn put(&self, db: &Database) -> Result<()> {
        let key = (db.namespace().unwrap_or_default(), db.name_any());
        self.objects.lock().unwrap().insert(key, db.clone());
        *self.writes.lock().unwrap() += 1;
        Ok(())
    }
}

/// In-memory Secret store that normalizes `string_data` into `data` the
/// way the API server does
#[derive(Debug, Default)]
pub struct MemorySecretStore {
    secrets: Mutex<HashMap<(String, String), Secret>>,
}

impl MemorySecretStore {
    pub fn insert(&self, namespace: &str, name: &str, data: BTreeMap<String, Vec<u8>>) {
        let secret = Secret {
            metadata: kube::core::ObjectMeta {
                name: Some(name.to_string()),
                namespace: Some(namespace.to_string()),
                ..Default::default()
            },
            data: Some(
                data.into_iter()
                    .map(|(key, value)| (key, ByteString(value)))
                    .collect(),
            ),
            ..Default::default()
        };
        self.secrets
            .lock()
            .unwrap()
            .insert((namespace.to_string(), name.to_string()), secret);
    }

    pub fn stored(&self, namespace: &str, name: &str) -> Option<Secret> {
        self.secrets
            .lock()
            .unwrap()
            .get(&(namespace.to_string(), name.to_string()))
            .cloned()
    }

    /// Decoded data map of a stored secret
    pub fn stored_data(&self, namespace: &str, name: &str) -> BTreeMap<String, String> {
        let secret = self.stored(namespace, name).expect("secret not found");
        normalized_data(&secret)
    }
}

fn normalized_data(secret: &Secret) -> BTreeMap<String, String> {
    let mut data: BTreeMap<String, String> = secret
        .data
        .clone()
        .unwrap_or_default()
        .into_iter()
        .map(|(key, value)| (key, String::from_utf8_lossy(&value.0).into_owned()))
        .collect();
    for (key, value) in secret.string_data.clone().unwrap_or_default() {
        data.insert(key, value);
    }
    data
}

#[async_trait]
impl SecretStore for MemorySecretStore {
    async fn get(&self, namespace: &str, name: &str) -> Result<Option<Secret>> {
        Ok(self.stored(namespace, name))
    }

    async fn create(&self, namespace: &str, secret: &Secret) -> Result<()> {
        let name = secret.name_any();
        let key = (namespace.to_string(), name.clone());
        let mut secrets = self.secrets.lock().unwrap();
        if secrets.contains_key(&key) {
            bail!("secret {namespace}/{name} already exists");
        }
        secrets.insert(key, canonicalize(secret));
        Ok(())
    }

    async fn update(&self, namespace: &str, secret: &Secret) -> Result<()> {
        let name = secret.name_any();
        let key = (namespace.to_string(), name.clone());
        let mut secrets = self.secrets.lock().unwrap();
        if !secrets.contains_key(&key) {
            bail!("secret {namespace}/{name} not found");
        }
        secrets.insert(key, canonicalize(secret));
        Ok(())
    }
}

/// Apply the API server's string_data-into-data merge
fn canonicalize(secret: &Secret) -> Secret {
    let mut merged = secret.clone();
    let mut data = merged.data.take().unwrap_or_default();
    for (key, value) in merged.string_data.take().unwrap_or_default() {
        data.insert(key, ByteString(value.into_bytes()));
    }
    merged.data = Some(data);
    merged
}

/// Shared call log for [`RecordingProvisioner`]
#[derive(Debug, Clone, Default)]
pub struct CallLog {
    pub provisions: Arc<Mutex<Vec<String>>>,
    pub deprovisions: Arc<Mutex<Vec<String>>>,
}

impl CallLog {
    pub fn provision_count(&self) -> usize {
        self.provisions.lock().unwrap().len()
    }

    pub fn deprovision_count(&self) -> usize {
        self.deprovisions.lock().unwrap().len()
    }
}

/// Provisioner double that records calls and selects servers with the
/// production first-match rule
#[derive(Debug)]
pub struct RecordingProvisioner {
    engine: &'static str,
    log: CallLog,
    fail_with: Option<String>,
}

impl RecordingProvisioner {
    pub fn new(engine: &'static str, log: CallLog) -> Self {
        Self {
            engine,
            log,
            fail_with: None,
        }
    }

    pub fn failing(engine: &'static str, log: CallLog, message: &str) -> Self {
        Self {
            engine,
            log,
            fail_with: Some(message.to_string()),
        }
    }
}

#[async_trait]
impl Provisioner for RecordingProvisioner {
    fn engine(&self) -> &'static str {
        self.engine
    }

    async fn provision(
        &self,
        db: &Database,
        pool: &[BackendServer],
        _secrets: &dyn SecretStore,
    ) -> Result<Provisioned, ProvisionError> {
        self.log
            .provisions
            .lock()
            .unwrap()
            .push(db.spec.class.clone());
        if let Some(message) = &self.fail_with {
            return Err(ProvisionError::Connection(message.clone()));
        }
        let server = select_server(pool, &db.spec.class)
            .ok_or(ProvisionError::NoAvailableProviders)?;
        Ok(Provisioned {
            server: server.name.clone(),
        })
    }

    async fn deprovision(
        &self,
        _db: &Database,
        server: &BackendServer,
    ) -> Result<(), ProvisionError> {
        self.log
            .deprovisions
            .lock()
            .unwrap()
            .push(server.name.clone());
        Ok(())
    }
}

pub fn server(name: &str, class: &str) -> BackendServer {
    BackendServer {
        name: name.to_string(),
        url: format!("mysql://root:pw@{name}.db:3306"),
        class: class.to_string(),
    }
}

pub fn database(namespace: &str, name: &str, spec: DatabaseSpec) -> Database {
    let mut db = Database::new(name, spec);
    db.metadata.namespace = Some(namespace.to_string());
    db
}

pub fn mysql_spec(secret_name: &str, class: &str) -> DatabaseSpec {
    DatabaseSpec {
        r#type: "mysql".to_string(),
        secret_name: secret_name.to_string(),
        class: class.to_string(),
    }
}

pub fn with_status(mut db: Database, status: DatabaseStatus) -> Database {
    db.status = Some(status);
    db
}

pub struct Fixture {
    pub ctx: Context,
    pub resources: Arc<MemoryResourceStore>,
    pub secrets: Arc<MemorySecretStore>,
    pub log: CallLog,
}

/// Context wired to in-memory stores and recording provisioners for the
/// "mysql" and "postgresql" engines
pub fn fixture(config: BackendConfig) -> Fixture {
    let log = CallLog::default();
    let mut registry = ProvisionerRegistry::new();
    registry.register(Box::new(RecordingProvisioner::new("mysql", log.clone())));
    registry.register(Box::new(RecordingProvisioner::new(
        "postgresql",
        log.clone(),
    )));
    build_fixture(config, registry, log)
}

/// Fixture whose provisioners fail every provision call
pub fn failing_fixture(config: BackendConfig, message: &str) -> Fixture {
    let log = CallLog::default();
    let mut registry = ProvisionerRegistry::new();
    registry.register(Box::new(RecordingProvisioner::failing(
        "mysql",
        log.clone(),
        message,
    )));
    build_fixture(config, registry, log)
}

fn build_fixture(config: BackendConfig, registry: ProvisionerRegistry, log: CallLog) -> Fixture {
    let resources = Arc::new(MemoryResourceStore::default());
    let secrets = Arc::new(MemorySecretStore::default());
    let resource_store: Arc<dyn ResourceStore> = resources.clone();
    let secret_store: Arc<dyn SecretStore> = secrets.clone();
    let ctx = Context {
        config,
        registry,
        resources: resource_store,
        secrets: secret_store,
    };
    Fixture {
        ctx,
        resources,
        secrets,
        log,
    }
}
