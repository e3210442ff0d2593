// tests/group_lifecycle.rs

mod common;

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use taskcrew::engine::TaskGroupController;
use taskcrew::errors::CrewError;
use taskcrew::model::{FeedEvent, TaskGroupRecord, UpdateKind};
use taskcrew::storage::{FileTaskStorage, TaskStorage};
use taskcrew_test_utils::builders::{TaskBuilder, memory_controller, test_settings};
use taskcrew_test_utils::scripted_client::ScriptedClient;
use taskcrew_test_utils::{init_tracing, wait_until, with_timeout};

use common::{task_of, wait_complete};

#[tokio::test]
async fn add_task_rejects_bad_edges() {
    init_tracing();
    let (controller, storage) = memory_controller();
    let client = Arc::new(ScriptedClient::new());
    // "t" waits on a task that does not exist yet.
    let t = TaskBuilder::new("G", "T", "w").id("t").parent("n").build();
    let group = controller
        .add_group(TaskGroupRecord::new("G", "g"), vec![t], client.clone())
        .unwrap();

    let duplicate = TaskBuilder::new("G", "T again", "w").id("t").build();
    assert!(matches!(
        group.add_task(duplicate, client.clone()),
        Err(CrewError::DuplicateTask(_))
    ));

    let selfish = TaskBuilder::new("G", "S", "w").id("s").parent("s").build();
    assert!(matches!(
        group.add_task(selfish, client.clone()),
        Err(CrewError::CycleDetected(_))
    ));

    let missing = TaskBuilder::new("G", "M", "w").parent("ghost").build();
    assert!(matches!(
        group.add_task(missing, client.clone()),
        Err(CrewError::MissingParent { .. })
    ));

    // n -> t already exists, so t -> n would close a loop.
    let closing = TaskBuilder::new("G", "N", "w").id("n").parent("t").build();
    assert!(matches!(
        group.add_task(closing, client.clone()),
        Err(CrewError::CycleDetected(_))
    ));

    assert_eq!(group.len(), 1);
    assert_eq!(storage.all_tasks_in_group("G").unwrap().len(), 1);
    controller.shutdown().await.unwrap();
}

#[tokio::test]
async fn add_task_finds_cycles_through_descendants() {
    init_tracing();
    let (controller, _storage) = memory_controller();
    let client = Arc::new(ScriptedClient::new());
    // "t" waits on "n", which arrives later.
    let t = TaskBuilder::new("G", "T", "w").id("t").parent("n").build();
    let group = controller
        .add_group(TaskGroupRecord::new("G", "g"), vec![t], client.clone())
        .unwrap();

    let u = TaskBuilder::new("G", "U", "w").id("u").parent("t").build();
    group.add_task(u, client.clone()).unwrap();
    let v = TaskBuilder::new("G", "V", "w").id("v").parent("u").build();
    group.add_task(v, client.clone()).unwrap();

    // n -> t -> u -> v, so n waiting on v closes a loop three hops down.
    let closing = TaskBuilder::new("G", "N", "w").id("n").parent("v").build();
    assert!(matches!(
        group.add_task(closing, client.clone()),
        Err(CrewError::CycleDetected(_))
    ));
    assert_eq!(group.len(), 3);

    let root = TaskBuilder::new("G", "N", "w").id("n").build();
    group.add_task(root, client.clone()).unwrap();
    assert_eq!(group.operator("n").unwrap().children(), vec!["t".to_string()]);

    // Wide fan-out under one parent stays acyclic.
    for i in 0..50 {
        let leaf = TaskBuilder::new("G", &format!("leaf-{i}"), "w").parent("n").build();
        group.add_task(leaf, client.clone()).unwrap();
    }
    assert_eq!(group.operator("n").unwrap().children().len(), 51);

    controller.shutdown().await.unwrap();
}

#[tokio::test]
async fn added_task_is_linked_both_ways() {
    init_tracing();
    let (controller, _storage) = memory_controller();
    let client = Arc::new(ScriptedClient::new());
    let waiting = TaskBuilder::new("G", "Waiting", "w").id("w").parent("late").build();
    let group = controller
        .add_group(TaskGroupRecord::new("G", "g"), vec![waiting], client.clone())
        .unwrap();

    let late = TaskBuilder::new("G", "Late", "w").id("late").build();
    group.add_task(late, client.clone()).unwrap();

    assert_eq!(group.operator("late").unwrap().children(), vec!["w".to_string()]);
    with_timeout(wait_complete(&group, "w")).await;
    assert_eq!(client.posted_names(), vec!["Late", "Waiting"]);

    controller.shutdown().await.unwrap();
}

#[tokio::test]
async fn cyclic_groups_are_rejected_on_creation() {
    let (controller, storage) = memory_controller();
    let client = Arc::new(ScriptedClient::new());
    let a = TaskBuilder::new("G", "A", "w").id("a").parent("b").build();
    let b = TaskBuilder::new("G", "B", "w").id("b").parent("a").build();

    let result = controller.add_group(TaskGroupRecord::new("G", "g"), vec![a, b], client);

    assert!(matches!(result, Err(CrewError::CycleDetected(_))));
    assert!(controller.group("G").is_none());
    assert!(storage.find_task_group("G").unwrap().is_none());
}

#[tokio::test]
async fn removing_a_group_waits_for_in_flight_work() {
    init_tracing();
    let (controller, storage) = memory_controller();
    let client = Arc::new(ScriptedClient::new().with_delay(Duration::from_millis(200)));
    let a = TaskBuilder::new("G", "A", "w").build();
    let b = TaskBuilder::new("G", "B", "w").parent(&a.id).build();
    let group = controller
        .add_group(TaskGroupRecord::new("G", "g"), vec![a.clone(), b.clone()], client.clone())
        .unwrap();

    let started = wait_until(Duration::from_secs(2), || client.count_for("A") == 1).await;
    assert!(started);
    with_timeout(controller.remove_group("G")).await.unwrap();

    assert!(controller.group("G").is_none());
    assert!(group.is_deleting());
    assert!(storage.find_task_group("G").unwrap().is_none());
    assert!(storage.all_tasks_in_group("G").unwrap().is_empty());
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(client.count_for("B"), 0);
    assert!(matches!(
        controller.remove_group("G").await,
        Err(CrewError::TaskGroupNotFound(_))
    ));
}

#[tokio::test]
async fn seeded_reset_keeps_only_seeds() {
    init_tracing();
    let (controller, storage) = memory_controller();
    let client = Arc::new(ScriptedClient::new());
    let seed = TaskBuilder::new("G", "Seed", "w")
        .seed(true)
        .attempts(0)
        .complete(json!("old"))
        .build();
    let derived = TaskBuilder::new("G", "Derived", "w")
        .parent(&seed.id)
        .attempts(0)
        .complete(json!("old"))
        .build();
    let group = controller
        .add_group(TaskGroupRecord::new("G", "g"), vec![seed.clone(), derived.clone()], client.clone())
        .unwrap();

    group.reset(2).await.unwrap();
    with_timeout(wait_complete(&group, &seed.id)).await;

    assert!(group.task(&derived.id).is_none());
    assert!(storage.find_task(&derived.id).unwrap().is_none());
    let seed_now = task_of(&group, &seed.id);
    assert_eq!(seed_now.remaining_attempts, 1);
    assert!(seed_now.errors.is_empty());
    assert_eq!(client.posted_names(), vec!["Seed"]);

    controller.shutdown().await.unwrap();
}

#[tokio::test]
async fn pause_and_retry_apply_to_every_task() {
    init_tracing();
    let (controller, storage) = memory_controller();
    let client = Arc::new(ScriptedClient::new().fail("A", "down"));
    let a = TaskBuilder::new("G", "A", "w").build();
    let done = TaskBuilder::new("G", "Done", "w").attempts(0).complete(json!(1)).build();
    let group = controller
        .add_group(TaskGroupRecord::new("G", "g"), vec![a.clone(), done.clone()], client.clone())
        .unwrap();
    with_timeout(common::wait_exhausted(&group, &a.id)).await;

    let record = group.pause(true).await.unwrap();
    assert!(record.is_paused);
    assert!(storage.find_task_group("G").unwrap().unwrap().is_paused);
    assert!(group.tasks().iter().all(|t| t.is_paused));

    group.retry(3).await.unwrap();
    assert_eq!(task_of(&group, &a.id).remaining_attempts, 3);
    assert_eq!(task_of(&group, &done.id).remaining_attempts, 0);
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(client.count_for("A"), 1);

    group.pause(false).await.unwrap();
    let retried = wait_until(Duration::from_secs(2), || client.count_for("A") >= 2).await;
    assert!(retried);

    controller.shutdown().await.unwrap();
}

#[tokio::test]
async fn feed_reports_group_and_task_changes() {
    init_tracing();
    let (controller, _storage) = memory_controller();
    let mut feed = controller.subscribe().expect("first subscriber");
    assert!(controller.subscribe().is_none());

    let client = Arc::new(ScriptedClient::new());
    let a = TaskBuilder::new("G", "A", "w").build();
    let group = controller
        .add_group(TaskGroupRecord::new("G", "g"), vec![a.clone()], client)
        .unwrap();
    with_timeout(wait_complete(&group, &a.id)).await;
    tokio::time::sleep(Duration::from_millis(50)).await;
    controller.update_group("G", "renamed").unwrap();

    let mut events = Vec::new();
    while let Ok(event) = feed.try_recv() {
        events.push(event);
    }
    assert!(matches!(
        &events[0],
        FeedEvent::TaskGroup(e) if e.kind == UpdateKind::Create && e.task_group.id == "G"
    ));
    assert!(events.iter().any(|e| matches!(
        e,
        FeedEvent::Task(t) if t.task.id == a.id && t.task.is_complete
    )));
    assert!(matches!(
        events.last(),
        Some(FeedEvent::TaskGroup(e)) if e.task_group.name == "renamed"
    ));

    controller.shutdown().await.unwrap();
}

#[tokio::test]
async fn file_storage_survives_a_restart() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let client = Arc::new(ScriptedClient::new());
    let a = TaskBuilder::new("G", "A", "w").paused(true).build();
    let b = TaskBuilder::new("G", "B", "w").parent(&a.id).build();

    {
        let storage: Arc<dyn TaskStorage> = Arc::new(FileTaskStorage::open(dir.path()).unwrap());
        let controller = TaskGroupController::new(storage.clone(), test_settings());
        controller
            .add_group(TaskGroupRecord::new("G", "g"), vec![a.clone(), b.clone()], client.clone())
            .unwrap();
        controller.shutdown().await.unwrap();

        // Simulate a crash in the middle of an execution.
        let mut stuck = storage.find_task(&a.id).unwrap().unwrap();
        stuck.busy_executing = true;
        storage.save_task(&stuck).unwrap();
    }

    let storage: Arc<dyn TaskStorage> = Arc::new(FileTaskStorage::open(dir.path()).unwrap());
    let controller = TaskGroupController::new(storage, test_settings());
    assert_eq!(controller.bootstrap(client.clone()).await.unwrap(), 1);

    let group = controller.group("G").expect("restored");
    assert_eq!(group.len(), 2);
    assert!(!task_of(&group, &a.id).busy_executing);
    assert_eq!(group.operator(&a.id).unwrap().children(), vec![b.id.clone()]);

    controller.operate();
    group
        .update_task(&a.id, taskcrew::model::TaskUpdate::paused(false))
        .await
        .unwrap();
    with_timeout(wait_complete(&group, &b.id)).await;
    assert_eq!(client.posted_names(), vec!["A", "B"]);

    controller.shutdown().await.unwrap();
}
