//! # Metrics
//!
//! Prometheus metrics for monitoring the controller.
//!
//! ## Metrics Exposed
//!
//! - `database_controller_database_created` - Creation timestamp per provisioned database
//! - `database_controller_database_deleted` - Deletion timestamp per dropped database
//! - `database_controller_database_creation_failures_total` - Total number of failed provisioning attempts
//! - `database_controller_database_deletion_failures_total` - Total number of failed deprovisioning attempts
//! - `database_controller_status_write_failures_total` - Total number of dropped status writes
//! - `database_controller_work_queue_depth` - Current number of queued watch events

use anyhow::Result;
use prometheus::{GaugeVec, IntCounter, IntCounterVec, IntGauge, Opts, Registry};
use std::sync::LazyLock;
use std::time::{SystemTime, UNIX_EPOCH};

pub(crate) static REGISTRY: LazyLock<Registry> = LazyLock::new(Registry::new);

const DATABASE_LABELS: &[&str] = &["database_engine", "database_server", "database_name"];
const FAILURE_LABELS: &[&str] = &["database_engine", "database_name"];

static DATABASE_CREATED: LazyLock<GaugeVec> = LazyLock::new(|| {
    GaugeVec::new(
        Opts::new(
            "database_controller_database_created",
            "Creation timestamp",
        ),
        DATABASE_LABELS,
    )
    .expect("Failed to create DATABASE_CREATED metric - this should never happen")
});

static DATABASE_DELETED: LazyLock<GaugeVec> = LazyLock::new(|| {
    GaugeVec::new(
        Opts::new(
            "database_controller_database_deleted",
            "Deletion timestamp",
        ),
        DATABASE_LABELS,
    )
    .expect("Failed to create DATABASE_DELETED metric - this should never happen")
});

static CREATION_FAILURES_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        Opts::new(
            "database_controller_database_creation_failures_total",
            "Total number of database creation failures",
        ),
        FAILURE_LABELS,
    )
    .expect("Failed to create CREATION_FAILURES_TOTAL metric - this should never happen")
});

static DELETION_FAILURES_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        Opts::new(
            "database_controller_database_deletion_failures_total",
            "Total number of database deletion failures",
        ),
        FAILURE_LABELS,
    )
    .expect("Failed to create DELETION_FAILURES_TOTAL metric - this should never happen")
});

static STATUS_WRITE_FAILURES_TOTAL: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "database_controller_status_write_failures_total",
        "Total number of resource status writes that were dropped",
    )
    .expect("Failed to create STATUS_WRITE_FAILURES_TOTAL metric - this should never happen")
});

static WORK_QUEUE_DEPTH: LazyLock<IntGauge> = LazyLock::new(|| {
    IntGauge::new(
        "database_controller_work_queue_depth",
        "Current number of queued watch events",
    )
    .expect("Failed to create WORK_QUEUE_DEPTH metric - this should never happen")
});

/// Register all metrics with the controller registry
pub fn register_metrics() -> Result<()> {
    REGISTRY.register(Box::new(DATABASE_CREATED.clone()))?;
    REGISTRY.register(Box::new(DATABASE_DELETED.clone()))?;
    REGISTRY.register(Box::new(CREATION_FAILURES_TOTAL.clone()))?;
    REGISTRY.register(Box::new(DELETION_FAILURES_TOTAL.clone()))?;
    REGISTRY.register(Box::new(STATUS_WRITE_FAILURES_TOTAL.clone()))?;
    REGISTRY.register(Box::new(WORK_QUEUE_DEPTH.clone()))?;
    Ok(())
}

fn now_seconds() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_secs_f64())
        .unwrap_or_default()
}

/// Record the creation timestamp of a provisioned database
pub fn record_database_created(engine: &str, server: &str, database: &str) {
    DATABASE_CREATED
        .with_label_values(&[engine, server, database])
        .set(now_seconds());
}

/// Record the deletion timestamp of a dropped database
pub fn record_database_deleted(engine: &str, server: &str, database: &str) {
    DATABASE_DELETED
        .with_label_values(&[engine, server, database])
        .set(now_seconds());
}

/// Count a failed provisioning attempt
pub fn record_creation_failure(engine: &str, database: &str) {
    CREATION_FAILURES_TOTAL
        .with_label_values(&[engine, database])
        .inc();
}

/// Count a failed deprovisioning attempt
pub fn record_deletion_failure(engine: &str, database: &str) {
    DELETION_FAILURES_TOTAL
        .with_label_values(&[engine, database])
        .inc();
}

/// Count a status write that was logged and dropped
pub fn record_status_write_failure() {
    STATUS_WRITE_FAILURES_TOTAL.inc();
}

/// Track the work queue depth
pub fn set_queue_depth(depth: usize) {
    WORK_QUEUE_DEPTH.set(i64::try_from(depth).unwrap_or(i64::MAX));
}
