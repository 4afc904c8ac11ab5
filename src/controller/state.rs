//! # Resource State Machine
//!
//! Drives a `Database` resource from pending to a terminal phase on add,
//! and tears its backend objects down on delete.
//!
//! Every transition into "error" or "done" is committed back to the
//! resource store exactly once per handled event. The commit itself is
//! fire-and-forget: a failed write is logged and counted but never
//! retried, and the next watch delivery observes whatever status the store
//! actually holds.

use crate::controller::Context;
use crate::crd::{Database, DatabasePhase, DatabaseStatus};
use crate::observability::metrics;
use crate::provisioner::backing_name;
use kube::ResourceExt;
use regex::Regex;
use std::sync::LazyLock;
use tracing::{debug, info, warn};

// Unanchored: any string containing a run of this shape is accepted.
// See DESIGN.md for the open question on tightening it.
static NAME_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new("[a-z][a-z0-9-]+").expect("name pattern must compile")
});

/// True when the value contains a run matching `[a-z][a-z0-9-]+`
pub fn valid_object_name(value: &str) -> bool {
    NAME_PATTERN.is_match(value)
}

/// Handle an add (or replayed/updated) notification
pub async fn handle_add(ctx: &Context, mut db: Database) {
    let namespace = db.namespace().unwrap_or_default();
    let name = db.name_any();

    // Skip if this database has already been terminally processed
    if db.phase().is_terminal() {
        debug!(namespace = %namespace, name = %name, phase = ?db.phase(),
            "already processed; ignoring add");
        return;
    }

    if db.spec.secret_name.is_empty() {
        commit_error(ctx, &mut db, "secretName not found in spec".to_string()).await;
        return;
    }

    if db.spec.class.is_empty() {
        db.spec.class = "default".to_string();
    }

    if !valid_object_name(&namespace) {
        commit_error(ctx, &mut db, "invalid namespace name".to_string()).await;
        return;
    }

    if !valid_object_name(&name) {
        commit_error(
            ctx,
            &mut db,
            "invalid name: must only contain a-z, 0-9 and '-'".to_string(),
        )
        .await;
        return;
    }

    info!(namespace = %namespace, name = %name, "provisioning new database");

    let engine = db.spec.r#type.clone();
    let Some(provisioner) = ctx.registry.get(&engine) else {
        warn!(namespace = %namespace, name = %name, engine = %engine,
            "provisioning failed: unrecognised database type");
        commit_error(ctx, &mut db, "unrecognised database type".to_string()).await;
        return;
    };

    let pool = ctx.config.pool(&engine);
    match provisioner
        .provision(&db, pool, ctx.secrets.as_ref())
        .await
    {
        Ok(provisioned) => {
            metrics::record_database_created(&engine, &provisioned.server, &backing_name(&namespace, &name));
            commit_done(ctx, &mut db, provisioned.server).await;
        }
        Err(err) => {
            warn!(namespace = %namespace, name = %name, error = %err, "provisioning failed");
            metrics::record_creation_failure(&engine, &backing_name(&namespace, &name));
            commit_error(ctx, &mut db, err.to_string()).await;
        }
    }
}

/// Handle a delete notification
///
/// The object is already gone from the store, so every failure here is
/// logged and abandoned; there is no status left to update and no retry.
pub async fn handle_delete(ctx: &Context, db: Database) {
    let namespace = db.namespace().unwrap_or_default();
    let name = db.name_any();

    // Skip if this database was never provisioned
    if db.phase() != DatabasePhase::Done {
        debug!(namespace = %namespace, name = %name, phase = ?db.phase(),
            "not provisioned; ignoring delete");
        return;
    }

    if !valid_object_name(&namespace) {
        warn!(namespace = %namespace, name = %name, "delete ignored: invalid namespace");
        return;
    }
    if !valid_object_name(&name) {
        warn!(namespace = %namespace, name = %name, "delete ignored: invalid name");
        return;
    }

    info!(namespace = %namespace, name = %name, "dropping database");

    let engine = db.spec.r#type.clone();
    let Some(provisioner) = ctx.registry.get(&engine) else {
        warn!(namespace = %namespace, name = %name, engine = %engine,
            "delete ignored: unrecognised database type");
        return;
    };

    let server_name = db.provisioned_server().unwrap_or_default().to_string();
    let Some(server) = ctx
        .config
        .pool(&engine)
        .iter()
        .find(|candidate| candidate.name == server_name)
    else {
        warn!(namespace = %namespace, name = %name, server = %server_name,
            "delete failed: server not found in config");
        return;
    };

    if let Err(err) = provisioner.deprovision(&db, server).await {
        warn!(namespace = %namespace, name = %name, server = %server.name, error = %err,
            "deprovisioning failed");
        metrics::record_deletion_failure(&engine, &backing_name(&namespace, &name));
        return;
    }

    metrics::record_database_deleted(&engine, &server.name, &backing_name(&namespace, &name));
}

async fn commit_error(ctx: &Context, db: &mut Database, message: String) {
    let status = db.status.get_or_insert_with(DatabaseStatus::default);
    status.phase = DatabasePhase::Error;
    status.error = Some(message);
    commit(ctx, db).await;
}

async fn commit_done(ctx: &Context, db: &mut Database, server: String) {
    let status = db.status.get_or_insert_with(DatabaseStatus::default);
    status.phase = DatabasePhase::Done;
    status.server = Some(server);
    commit(ctx, db).await;
}

/// Fire-and-forget status write: log and count failures, never retry
async fn commit(ctx: &Context, db: &Database) {
    if let Err(err) = ctx.resources.put(db).await {
        warn!(
            namespace = %db.namespace().unwrap_or_default(),
            name = %db.name_any(),
            error = %err,
            "status write failed"
        );
        metrics::record_status_write_failure();
    }
}
