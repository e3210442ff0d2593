// src/lib.rs

pub mod cli;
pub mod client;
pub mod config;
pub mod dag;
pub mod engine;
pub mod errors;
pub mod fs;
pub mod logging;
pub mod model;
pub mod query;
pub mod storage;
pub mod types;

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::cli::CliArgs;
use crate::client::{HttpPostClient, TaskClient};
use crate::config::loader::load_and_validate;
use crate::config::model::ConfigFile;
use crate::engine::{EngineContext, Feed, TaskGroup, TaskGroupController};
use crate::model::{FeedEvent, TaskGroupDefinition};
use crate::query::TaskQuery;
use crate::storage::{FileTaskStorage, MemoryTaskStorage, TaskStorage};
use crate::types::StorageBackend;

/// High-level entry point used by `main.rs`.
///
/// This wires together:
/// - config loading
/// - storage and the worker client
/// - the controller (bootstrap, optional `--group` import)
/// - a feed logger
/// - Ctrl-C handling
pub async fn run(args: CliArgs) -> Result<()> {
    let cfg = load_and_validate(&args.config)
        .with_context(|| format!("loading config {}", args.config))?;

    let storage = open_storage(&cfg)?;
    let client: Arc<dyn TaskClient> = Arc::new(HttpPostClient::from_config(&cfg.client)?);
    let controller = TaskGroupController::from_config(storage, &cfg);

    let restored = controller.bootstrap(Arc::clone(&client)).await?;
    debug!(groups = restored, "stored groups restored");

    if let Some(path) = &args.group {
        import_group(&controller, Path::new(path), Arc::clone(&client), args.dry_run)?;
    }

    if args.dry_run {
        print_dry_run(&cfg, &controller);
        return Ok(());
    }

    if let Some(feed) = controller.subscribe() {
        tokio::spawn(log_feed(feed));
    }

    controller.operate();
    if controller.spawn_reevaluation_sweep(controller.settings().reevaluate_interval) {
        debug!(interval = ?controller.settings().reevaluate_interval, "re-evaluation sweep started");
    }
    info!(groups = controller.groups().len(), "taskcrew running; press Ctrl-C to stop");

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for Ctrl+C")?;
    info!("shutdown requested");

    controller.shutdown().await?;
    Ok(())
}

fn open_storage(cfg: &ConfigFile) -> Result<Arc<dyn TaskStorage>> {
    let storage: Arc<dyn TaskStorage> = match cfg.storage.backend {
        StorageBackend::Memory => Arc::new(MemoryTaskStorage::new()),
        StorageBackend::File => Arc::new(
            FileTaskStorage::open(&cfg.storage.path)
                .with_context(|| format!("opening storage at {}", cfg.storage.path))?,
        ),
    };
    info!(backend = ?cfg.storage.backend, "storage ready");
    Ok(storage)
}

/// Read a [`TaskGroupDefinition`] and register it.
///
/// With `dry_run` the group is only printed. An id that is already stored is
/// skipped so restarting with the same `--group` is safe.
fn import_group(
    controller: &Arc<TaskGroupController>,
    path: &Path,
    client: Arc<dyn TaskClient>,
    dry_run: bool,
) -> Result<()> {
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("reading group definition {}", path.display()))?;
    let definition: TaskGroupDefinition = serde_json::from_str(&contents)
        .with_context(|| format!("parsing group definition {}", path.display()))?;
    let (record, tasks) = definition.into_parts();

    if controller.group(&record.id).is_some() {
        warn!(group = %record.id, "group already exists; skipping import");
        return Ok(());
    }

    let group_id = record.id.clone();
    if dry_run {
        // Preview in a throwaway group so nothing is persisted.
        let (feed, _rx) = Feed::channel(1);
        let ctx = EngineContext::new(
            Arc::new(MemoryTaskStorage::new()),
            feed,
            controller.settings().clone(),
        );
        let group = TaskGroup::standalone(record, ctx);
        group.prepare(tasks, client);
        print_group(&group);
        return Ok(());
    }

    controller.add_group(record, tasks, client)?;
    info!(group = %group_id, "group imported");
    Ok(())
}

async fn log_feed(mut feed: mpsc::Receiver<FeedEvent>) {
    while let Some(event) = feed.recv().await {
        match event {
            FeedEvent::Task(e) => debug!(
                kind = ?e.kind,
                task = %e.task.id,
                group = %e.task.task_group_id,
                complete = e.task.is_complete,
                busy = e.task.busy_executing,
                "task event"
            ),
            FeedEvent::TaskGroup(e) => debug!(
                kind = ?e.kind,
                group = %e.task_group.id,
                paused = e.task_group.is_paused,
                "task group event"
            ),
        }
    }
}

/// Simple dry-run output: print groups, tasks, parents and eligibility.
fn print_dry_run(cfg: &ConfigFile, controller: &TaskGroupController) {
    println!("taskcrew dry-run");
    println!("  storage.backend = {:?}", cfg.storage.backend);
    println!("  client.worker_base_url = {}", cfg.client.worker_base_url);
    println!();

    let query = TaskQuery::new(controller.storage());
    let groups = controller.groups();
    println!("groups ({}):", groups.len());
    for group in groups {
        print_group(&group);
        if let Ok(progress) = query.group_progress(&group.id()) {
            println!("      progress: {:.0}%", progress * 100.0);
        }
    }

    debug!("dry-run complete (no execution)");
}

fn print_group(group: &TaskGroup) {
    let record = group.record();
    println!("  - {} ({})", record.name, record.id);
    if record.is_paused {
        println!("      paused: true");
    }
    for op in group.operators() {
        let task = op.task();
        let state = if task.is_complete {
            "complete"
        } else if op.can_execute() {
            "ready"
        } else {
            "waiting"
        };
        println!("      {} [{}] worker={} {}", task.name, task.id, task.worker, state);
        if !task.parent_ids.is_empty() {
            println!("        parents: {:?}", task.parent_ids);
        }
    }
}
