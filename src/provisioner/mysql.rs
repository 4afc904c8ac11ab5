//! # MySQL Provisioner
//!
//! Provisions a schema and matching role on a configured MySQL server.
//!
//! The grant statement doubles as user creation (`IDENTIFIED BY`), so the
//! create sequence is two statements: `CREATE DATABASE` then `GRANT`. The
//! grant target escapes underscores because MySQL treats the database part
//! of a grant as a pattern.

use crate::config::BackendServer;
use crate::controller::store::SecretStore;
use crate::crd::Database;
use crate::password;
use crate::secrets::{self, DATABASE_URL_KEY};
use async_trait::async_trait;
use kube::ResourceExt;
use mysql_async::prelude::Queryable;
use mysql_async::{Conn, OptsBuilder};
use std::collections::BTreeMap;
use tracing::{debug, info};

use super::{
    backing_name, select_server, AdminEndpoint, Provisioned, ProvisionError, Provisioner,
};

const DEFAULT_PORT: u16 = 3306;

#[derive(Debug, Clone, Copy)]
pub struct MySqlProvisioner;

#[async_trait]
impl Provisioner for MySqlProvisioner {
    fn engine(&self) -> &'static str {
        "mysql"
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

        let mut conn = connect(&endpoint).await?;
        let outcome = create_sequence(
            &mut conn,
            db,
            &namespace,
            &dbname,
            &endpoint,
            secrets_store,
        )
        .await;
        close(conn).await;
        outcome?;

        info!(namespace = %namespace, name = %name, server = %server.name,
            "provisioned MySQL database \"{dbname}\"");
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

        let mut conn = connect(&endpoint).await?;
        let outcome = drop_sequence(&mut conn, &dbname).await;
        close(conn).await;
        outcome?;

        info!(namespace = %namespace, name = %name, server = %server.name,
            "dropped MySQL database \"{dbname}\"");
        Ok(())
    }
}

async fn connect(endpoint: &AdminEndpoint) -> Result<Conn, ProvisionError> {
    let opts = OptsBuilder::default()
        .ip_or_hostname(endpoint.host.clone())
        .tcp_port(endpoint.port.unwrap_or(DEFAULT_PORT))
        .user(Some(endpoint.user.clone()))
        .pass(Some(endpoint.password.clone()));
    Conn::new(opts)
        .await
        .map_err(|err| ProvisionError::Connection(err.to_string()))
}

async fn close(conn: Conn) {
    if let Err(err) = conn.disconnect().await {
        debug!(error = %err, "MySQL disconnect failed");
    }
}

async fn create_sequence(
    conn: &mut Conn,
    db: &Database,
    namespace: &str,
    dbname: &str,
    endpoint: &AdminEndpoint,
    secrets_store: &dyn SecretStore,
) -> Result<(), ProvisionError> {
    let generated = password::generate()?;

    conn.query_drop(format!("CREATE DATABASE `{dbname}`"))
        .await
        .map_err(|err| ProvisionError::CreateDatabase(err.to_string()))?;

    conn.query_drop(grant_statement(dbname, &generated))
        .await
        .map_err(|err| ProvisionError::CreateUser(err.to_string()))?;

    let fields = secret_fields(dbname, &generated, endpoint);
    secrets::materialize(secrets_store, namespace, &db.spec.secret_name, fields)
        .await
        .map_err(|err| ProvisionError::CreateSecret(err.to_string()))?;

    Ok(())
}

async fn drop_sequence(conn: &mut Conn, dbname: &str) -> Result<(), ProvisionError> {
    conn.query_drop(format!("DROP DATABASE `{dbname}`"))
        .await
        .map_err(|err| ProvisionError::DropDatabase(err.to_string()))?;

    conn.query_drop(format!("DROP USER `{dbname}`@'%'"))
        .await
        .map_err(|err| ProvisionError::DropUser(err.to_string()))?;

    Ok(())
}

/// Grant statement creating the role alongside its privileges
///
/// The grant target is a pattern, so literal underscores in the schema name
/// must be escaped there; the user name is taken literally.
fn grant_statement(dbname: &str, password: &str) -> String {
    let escaped = dbname.replace('_', "\\_");
    format!("GRANT ALL PRIVILEGES ON `{escaped}`.* TO `{dbname}`@'%' IDENTIFIED BY '{password}'")
}

/// Secret payload: composite URL plus decomposed connection fields
fn secret_fields(
    dbname: &str,
    password: &str,
    endpoint: &AdminEndpoint,
) -> BTreeMap<String, String> {
    let mut fields = BTreeMap::new();
    fields.insert(
        DATABASE_URL_KEY.to_string(),
        format!("mysql://{dbname}:{password}@{}/{dbname}", endpoint.authority()),
    );
    fields.insert("database-host".to_string(), endpoint.host.clone());
    fields.insert(
        "database-port".to_string(),
        endpoint.port.unwrap_or(DEFAULT_PORT).to_string(),
    );
    fields.insert("database-name".to_string(), dbname.to_string());
    fields.insert("database-user".to_string(), dbname.to_string());
    fields.insert("database-password".to_string(), password.to_string());
    fields
}
