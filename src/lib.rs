//! # Database Controller
//!
//! A Kubernetes controller that provisions per-application databases on
//! shared MySQL and PostgreSQL servers.
//!
//! ## Overview
//!
//! The controller watches `Database` custom resources and, for each one:
//!
//! 1. **Selects a backend** - first configured server whose class matches the resource's class
//! 2. **Provisions** - creates a schema/role pair named `{namespace}_{name}` (hyphens become underscores)
//! 3. **Publishes credentials** - writes a connection URL (and, for MySQL, decomposed fields) into the declared secret
//! 4. **Commits status** - transitions the resource to phase `done` or `error`
//!
//! Deleting a provisioned resource tears the schema and role down on the
//! server recorded in `status.server`.
//!
//! Failed attempts are terminal for that delivery: the error lands in
//! `status.error` and the controller waits for the resource owner to
//! re-apply the object rather than retrying on its own.

pub mod config;
pub mod controller;
pub mod crd;
pub mod observability;
pub mod password;
pub mod provisioner;
pub mod secrets;
pub mod server;

pub use config::{BackendConfig, BackendServer};
pub use controller::Context;
pub use crd::{Database, DatabasePhase, DatabaseSpec, DatabaseStatus};
