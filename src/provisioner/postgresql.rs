//! # PostgreSQL Provisioner
//!
//! Provisions a database and owning role on a configured PostgreSQL server.
//!
//! Deprovisioning has to survive live connections: the database is first
//! closed to new connections, existing backends are terminated, and only
//! then is it dropped, followed by the role. `sslmode=disable` is the fixed
//! connection default.

use crate::config::BackendServer;
use crate::controller::store::SecretStore;
use crate::crd::Database;
use crate::password;
use crate::secrets::{self, DATABASE_URL_KEY};
use async_trait::async_trait;
use kube::ResourceExt;
use std::collections::BTreeMap;
use tokio_postgres::config::SslMode;
use tokio_postgres::{Client, NoTls};
use tracing::{debug, info};

use super::{
    backing_name, select_server, AdminEndpoint, Provisioned, ProvisionError, Provisioner,
};

const DEFAULT_PORT: u16 = 5432;

#[derive(Debug, Clone, Copy)]
pub struct PostgresProvisioner;

#[async_trait]
impl Provisioner for PostgresProvisioner {
    fn engine(&self) -> &'static str {
        "postgresql"
    }

    async fn provision(
        &self,
        db: &Database,
        pool: &[BackendServer],
        secrets_store: &dyn SecretStore,
    ) -> Result<Provisioned, ProvisionError> {
        let server = select_server(pool, &db.spec.class)
            .ok_or(ProvisionError::NoAvailableProviders)?;
        let endpoint = AdminEndpoint::parse(&server.url)?;
        let namespace = db.namespace().unwrap_or_default();
        let name = db.name_any();
        let dbname = backing_name(&namespace, &name);

        let client = connect(&endpoint).await?;
        create_sequence(&client, db, &namespace, &dbname, &endpoint, secrets_store).await?;

        info!(namespace = %namespace, name = %name, server = %server.name,
            "provisioned PostgreSQL database \"{dbname}\"");
        Ok(Provisioned {
            server: server.name.clone(),
        })
    }

    async fn deprovision(
        &self,
        db: &Database,
        server: &BackendServer,
    ) -> Result<(), ProvisionError> {
        let endpoint = AdminEndpoint::parse(&server.url)?;
        let namespace = db.namespace().unwrap_or_default();
        let name = db.name_any();
        let dbname = backing_name(&namespace, &name);

        let client = connect(&endpoint).await?;
        drop_sequence(&client, &dbname).await?;

        info!(namespace = %namespace, name = %name, server = %server.name,
            "dropped PostgreSQL database \"{dbname}\"");
        Ok(())
    }
}

/// Open an admin connection to the maintenance database named in the
/// server URL path
///
/// The connection task ends when the returned client is dropped, so every
/// exit path closes the connection.
async fn connect(endpoint: &AdminEndpoint) -> Result<Client, ProvisionError> {
    let mut config = tokio_postgres::Config::new();
    config
        .host(&endpoint.host)
        .port(endpoint.port.unwrap_or(DEFAULT_PORT))
        .user(&endpoint.user)
        .password(&endpoint.password)
        .dbname(&endpoint.dbname)
        .ssl_mode(SslMode::Disable);

    let (client, connection) = config
        .connect(NoTls)
        .await
        .map_err(|err| ProvisionError::Connection(err.to_string()))?;

    tokio::spawn(async move {
        if let Err(err) = connection.await {
            debug!(error = %err, "PostgreSQL connection terminated");
        }
    });

    Ok(client)
}

async fn create_sequence(
    client: &Client,
    db: &Database,
    namespace: &str,
    dbname: &str,
    endpoint: &AdminEndpoint,
    secrets_store: &dyn SecretStore,
) -> Result<(), ProvisionError> {
    let generated = password::generate()?;

    client
        .batch_execute(&format!(
            "CREATE ROLE \"{dbname}\" LOGIN PASSWORD '{}'",
            &*generated
        ))
        .await
        .map_err(|err| ProvisionError::CreateUser(err.to_string()))?;

    client
        .batch_execute(&format!(
            "CREATE DATABASE \"{dbname}\" OWNER \"{dbname}\" TEMPLATE \"template0\""
        ))
        .await
        .map_err(|err| ProvisionError::CreateDatabase(err.to_string()))?;

    client
        .batch_execute(&format!("GRANT ALL ON DATABASE \"{dbname}\" TO \"{dbname}\""))
        .await
        .map_err(|err| ProvisionError::GrantPrivileges(err.to_string()))?;

    let fields = secret_fields(dbname, &generated, endpoint);
    secrets::materialize(secrets_store, namespace, &db.spec.secret_name, fields)
        .await
        .map_err(|err| ProvisionError::CreateSecret(err.to_string()))?;

    Ok(())
}

/// Drop the database out from under any connected clients, then the role
async fn drop_sequence(client: &Client, dbname: &str) -> Result<(), ProvisionError> {
    client
        .execute(
            "UPDATE pg_database SET datallowconn=false WHERE datname=$1",
            &[&dbname],
        )
        .await
        .map_err(|err| ProvisionError::DropDatabase(err.to_string()))?;

    client
        .query(
            "SELECT pg_terminate_backend(pid) FROM pg_stat_activity WHERE datname=$1",
            &[&dbname],
        )
        .await
        .map_err(|err| ProvisionError::DropDatabase(err.to_string()))?;

    client
        .batch_execute(&format!("DROP DATABASE \"{dbname}\""))
        .await
        .map_err(|err| ProvisionError::DropDatabase(err.to_string()))?;

    client
        .batch_execute(&format!("DROP ROLE \"{dbname}\""))
        .await
        .map_err(|err| ProvisionError::DropUser(err.to_string()))?;

    Ok(())
}

/// Secret payload: composite URL only; PostgreSQL secrets carry no
/// decomposed fields
fn secret_fields(
    dbname: &str,
    password: &str,
    endpoint: &AdminEndpoint,
) -> BTreeMap<String, String> {
    let mut fields = BTreeMap::new();
    fields.insert(
        DATABASE_URL_KEY.to_string(),
        format!(
            "postgresql://{dbname}:{password}@{}/{dbname}",
            endpoint.authority()
        ),
    );
    fields
}
