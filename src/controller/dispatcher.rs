//! # Dispatcher
//!
//! Wires the watch stream to the work queue and runs the worker pool.
//!
//! Startup blocks until the reflector's local cache mirror has completed
//! its initial sync; missing the startup window is fatal and the process
//! exits without having provisioned anything. Shutdown flips readiness,
//! closes the queue and lets each worker finish its current item; no
//! in-flight backend operation is cancelled.

use crate::controller::queue::{Event, QueueItem, WorkQueue};
use crate::controller::{state, Context};
use crate::crd::Database;
use crate::server::ServerState;
use anyhow::{bail, Context as _, Result};
use futures::TryStreamExt;
use kube::{Api, Client};
use kube_runtime::reflector::store::Writer;
use kube_runtime::{reflector, watcher, WatchStreamExt};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tokio::time::timeout;
use tracing::{debug, info, warn};

/// Startup window for the initial cache sync
const CACHE_SYNC_TIMEOUT: Duration = Duration::from_secs(60);

/// Run the controller until a shutdown signal arrives
pub async fn run(
    client: Client,
    ctx: Arc<Context>,
    workers: usize,
    server_state: Arc<ServerState>,
) -> Result<()> {
    let api: Api<Database> = Api::all(client);
    let (reader, writer) = reflector::store();
    let queue = Arc::new(WorkQueue::new());

    // The router must be polling before the cache can sync
    let router = tokio::spawn(route_events(api, writer, Arc::clone(&queue)));

    match timeout(CACHE_SYNC_TIMEOUT, reader.wait_until_ready()).await {
        Err(_) => bail!("timed out waiting for initial cache sync"),
        Ok(Err(err)) => bail!("watch stream failed before cache sync: {err}"),
        Ok(Ok(())) => {}
    }
    info!(workers, "cache synchronised; starting workers");
    server_state.is_ready.store(true, Ordering::Relaxed);

    let mut pool = JoinSet::new();
    for id in 0..workers.max(1) {
        pool.spawn(worker_loop(id, Arc::clone(&queue), Arc::clone(&ctx)));
    }

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for shutdown signal")?;
    info!("shutdown signal received; draining workers");
    server_state.is_ready.store(false, Ordering::Relaxed);
    queue.close();
    router.abort();
    while pool.join_next().await.is_some() {}
    info!("controller stopped");
    Ok(())
}

/// Convert watch notifications into queue items
///
/// `Apply` covers both adds and modifications; both route to [`Event::Add`]
/// because terminal phases make replays no-ops, which preserves the
/// no-in-place-update semantics. Watch errors are retried with backoff
/// inside the stream; they are logged here and the stream continues.
async fn route_events(api: Api<Database>, writer: Writer<Database>, queue: Arc<WorkQueue>) {
    let stream = reflector(writer, watcher(api, watcher::Config::default())).default_backoff();
    let mut stream = std::pin::pin!(stream);
    loop {
        match stream.try_next().await {
            Ok(Some(event)) => match event {
                watcher::Event::Apply(db) | watcher::Event::InitApply(db) => {
                    enqueue(&queue, Event::Add, db);
                }
                watcher::Event::Delete(db) => {
                    enqueue(&queue, Event::Delete, db);
                }
                watcher::Event::Init | watcher::Event::InitDone => {}
            },
            Ok(None) => {
                warn!("watch stream ended");
                break;
            }
            Err(err) => {
                warn!(error = %err, "watch stream error");
            }
        }
    }
}

fn enqueue(queue: &WorkQueue, event: Event, resource: Database) {
    let item = QueueItem::new(event, resource);
    let key = item.key();
    if !queue.push(item) {
        debug!(namespace = %key.namespace, name = %key.name, event = ?key.event,
            "coalesced duplicate event");
    }
}

async fn worker_loop(id: usize, queue: Arc<WorkQueue>, ctx: Arc<Context>) {
    debug!(worker = id, "worker started");
    while let Some(item) = queue.recv().await {
        let key = item.key();
        match item.event {
            Event::Add => state::handle_add(&ctx, item.resource).await,
            Event::Delete => state::handle_delete(&ctx, item.resource).await,
        }
        // done regardless of outcome: failures wait for a fresh delivery
        queue.done(&key);
    }
    debug!(worker = id, "worker stopped");
}
