// tests/engine_throttle.rs

mod common;

use std::sync::Arc;
use std::time::Duration;

use taskcrew::engine::EngineSettings;
use taskcrew::model::TaskGroupRecord;
use taskcrew_test_utils::builders::{TaskBuilder, memory_controller_with, test_settings};
use taskcrew_test_utils::scripted_client::ScriptedClient;
use taskcrew_test_utils::{init_tracing, wait_until, with_timeout};

use common::wait_complete;

fn one_per_worker() -> EngineSettings {
    EngineSettings {
        max_in_flight_per_worker: 1,
        ..test_settings()
    }
}

#[tokio::test]
async fn dispatch_to_one_worker_is_capped() {
    init_tracing();
    let (controller, _storage) = memory_controller_with(one_per_worker());
    let client = Arc::new(ScriptedClient::new().with_delay(Duration::from_millis(200)));
    let a = TaskBuilder::new("G", "A", "w").build();
    let b = TaskBuilder::new("G", "B", "w").build();
    let other = TaskBuilder::new("G", "Other", "v").build();

    let group = controller
        .add_group(
            TaskGroupRecord::new("G", "g"),
            vec![a.clone(), b.clone(), other.clone()],
            client.clone(),
        )
        .unwrap();

    // A different worker is not held back by "w".
    let started = wait_until(Duration::from_millis(150), || {
        client.count_for("Other") == 1 && client.count_for("A") + client.count_for("B") == 1
    })
    .await;
    assert!(started);
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(client.count_for("A") + client.count_for("B"), 1);

    with_timeout(async {
        wait_complete(&group, &a.id).await;
        wait_complete(&group, &b.id).await;
    })
    .await;
    assert_eq!(client.posts().len(), 3);

    controller.shutdown().await.unwrap();
}

#[tokio::test]
async fn task_waiting_for_a_slot_is_not_posted_after_removal() {
    init_tracing();
    let (controller, _storage) = memory_controller_with(one_per_worker());
    let client = Arc::new(ScriptedClient::new().with_delay(Duration::from_millis(300)));
    let a = TaskBuilder::new("G", "A", "w").build();
    let b = TaskBuilder::new("G", "B", "w").build();

    controller
        .add_group(TaskGroupRecord::new("G", "g"), vec![a, b], client.clone())
        .unwrap();
    assert!(wait_until(Duration::from_secs(1), || client.posts().len() == 1).await);

    with_timeout(controller.remove_group("G")).await.unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;

    assert_eq!(client.posts().len(), 1, "posted: {:?}", client.posted_names());
    assert!(controller.group("G").is_none());
}

#[tokio::test]
async fn task_waiting_for_a_slot_is_not_posted_after_pause() {
    init_tracing();
    let (controller, _storage) = memory_controller_with(one_per_worker());
    let client = Arc::new(ScriptedClient::new().with_delay(Duration::from_millis(300)));
    let a = TaskBuilder::new("G", "A", "w").build();
    let b = TaskBuilder::new("G", "B", "w").build();

    let group = controller
        .add_group(TaskGroupRecord::new("G", "g"), vec![a, b], client.clone())
        .unwrap();
    assert!(wait_until(Duration::from_secs(1), || client.posts().len() == 1).await);

    with_timeout(group.pause(true)).await.unwrap();
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(client.posts().len(), 1, "posted: {:?}", client.posted_names());

    group.pause(false).await.unwrap();
    let resumed = wait_until(Duration::from_secs(2), || client.posts().len() == 2).await;
    assert!(resumed);

    controller.shutdown().await.unwrap();
}
