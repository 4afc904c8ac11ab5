//! # Database Custom Resource
//!
//! CRD types for the `Database` resource.
//!
//! A `Database` declares a request for a schema/role pair on one of the
//! configured backend servers. The controller fulfils the request and
//! publishes connection credentials under `spec.secretName` in the same
//! namespace. Only `status` is ever written by the controller.
//!
//! # Example
//!
//! ```yaml
//! apiVersion: provisioning.io/v1
//! kind: Database
//! metadata:
//!   name: orders
//!   namespace: team-a
//! spec:
//!   type: mysql
//!   secretName: orders-db
//!   class: default
//! ```

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Database Custom Resource Definition
///
/// `spec.type` selects the backend engine, `spec.class` selects among the
/// configured servers for that engine, and `spec.secretName` names the
/// secret that will receive the connection details.
#[derive(CustomResource, Debug, Clone, Default, Deserialize, Serialize, JsonSchema)]
#[kube(
    kind = "Database",
    group = "provisioning.io",
    version = "v1",
    namespaced,
    status = "DatabaseStatus",
    printcolumn = r#"{"name":"Type", "type":"string", "jsonPath":".spec.type"}"#,
    printcolumn = r#"{"name":"Phase", "type":"string", "jsonPath":".status.phase"}"#,
    printcolumn = r#"{"name":"Server", "type":"string", "jsonPath":".status.server"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct DatabaseSpec {
    /// Backend engine: "mysql" or "postgresql"
    #[serde(default)]
    pub r#type: String,
    /// Name of the secret (in the resource's namespace) to publish
    /// connection credentials into
    #[serde(default)]
    pub secret_name: String,
    /// Server pool selector; an empty class is treated as "default"
    #[serde(default)]
    pub class: String,
}

/// Status of a Database resource
///
/// The phase is the terminal/non-terminal marker; `error` carries the
/// failure message for phase "error"; `server` records which configured
/// backend fulfilled the request and is required by the deletion path.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct DatabaseStatus {
    #[serde(default)]
    pub phase: DatabasePhase,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server: Option<String>,
}

/// Lifecycle phase of a Database resource
///
/// `Pending` serializes as the empty string so that resources created
/// without a status field and resources explicitly marked pending compare
/// equal on the wire.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
pub enum DatabasePhase {
    #[default]
    #[serde(rename = "")]
    Pending,
    #[serde(rename = "error")]
    Error,
    #[serde(rename = "done")]
    Done,
}

impl DatabasePhase {
    /// True for phases that mark a resource as terminally processed
    pub fn is_terminal(self) -> bool {
        matches!(self, DatabasePhase::Error | DatabasePhase::Done)
    }
}

impl Database {
    /// Effective phase, treating a missing status as pending
    pub fn phase(&self) -> DatabasePhase {
        self.status.as_ref().map(|s| s.phase).unwrap_or_default()
    }

    /// Server name recorded by a successful provisioning run
    pub fn provisioned_server(&self) -> Option<&str> {
        self.status.as_ref().and_then(|s| s.server.as_deref())
    }
}
