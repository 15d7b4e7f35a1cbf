//! Sync reconciler and sync service integration tests

mod common;

use common::{id_of, rec, RemoteMode, TestStack};
use companion_offline::local_db::record::{is_temp_id, FIELD_PENDING_SYNC};
use companion_offline::local_db::schema;
use companion_offline::offline::{ErrorKind, ListOptions, OperationKind, OperationStatus};
use companion_offline::sync::{SyncOutcome, SyncService, SyncStatus, SyncSummary};
use pretty_assertions::assert_eq;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

#[tokio::test]
async fn test_offline_memory_reaches_server_after_reconnect() {
    let stack = TestStack::new();
    stack.go_offline();

    let created = stack.gateway.create("Memory", rec(json!({"title": "Beach trip"}))).await.unwrap();
    let temp = id_of(&created);
    assert!(is_temp_id(&temp));
    assert_eq!(created["title"], "Beach trip");

    let listed = stack.gateway.list("Memory", &ListOptions::default()).await.unwrap();
    assert!(listed.iter().any(|m| id_of(m) == temp));

    stack.go_online();
    let summary = assert_ok!(stack.reconciler.run_sync().await);
    assert_eq!(summary.outcome, SyncOutcome::Completed);
    assert_eq!(summary.processed, 1);
    assert_queue_len!(stack.queue, 0);

    let listed = stack.gateway.list("Memory", &ListOptions::default()).await.unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(id_of(&listed[0]), "srv_1");
    assert_eq!(listed[0]["title"], "Beach trip");
    assert!(stack.gateway.get("Memory", &temp).await.unwrap().is_none());
}

#[tokio::test]
async fn test_no_duplicate_records_after_reconciliation() {
    let stack = TestStack::new();
    stack.go_offline();
    for title in ["One", "Two", "Three"] {
        stack.gateway.create("Memory", rec(json!({ "title": title }))).await.unwrap();
    }

    stack.go_online();
    stack.reconciler.run_sync().await.unwrap();

    let local = stack.store.get_all(schema::MEMORIES).await.unwrap();
    assert_eq!(local.len(), 3);
    assert!(local.iter().all(|m| !is_temp_id(&id_of(m))));
    let mut titles: Vec<_> = local.iter().map(|m| m["title"].as_str().unwrap().to_string()).collect();
    titles.sort();
    assert_eq!(titles, vec!["One", "Three", "Two"]);
}

#[tokio::test]
async fn test_replay_of_drained_queue_is_noop() {
    let stack = TestStack::new();
    stack.go_offline();
    stack.gateway.create("Memory", rec(json!({"title": "Once"}))).await.unwrap();

    stack.go_online();
    stack.reconciler.run_sync().await.unwrap();
    let calls_after_first = stack.remote.calls().len();

    let second = stack.reconciler.run_sync().await.unwrap();
    assert_eq!(second.processed, 0);
    assert_eq!(second.remaining, 0);
    assert_eq!(stack.remote.calls().len(), calls_after_first);
    assert_eq!(stack.remote.records("Memory").len(), 1);
}

#[tokio::test]
async fn test_operation_fails_after_three_attempts() {
    let stack = TestStack::new();
    stack.go_offline();
    stack.gateway.create("Memory", rec(json!({"title": "Never"}))).await.unwrap();

    // Connectivity reported, but every remote call fails.
    stack.network.set_online(true);
    for attempt in 1..=3u32 {
        let summary = stack.reconciler.run_sync().await.unwrap();
        assert_eq!(summary.failed, 1, "attempt {}", attempt);
        assert_eq!(summary.exhausted, usize::from(attempt == 3));
    }

    let failed = stack.queue.failed().await.unwrap();
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].status, OperationStatus::Failed);
    assert_eq!(failed[0].retry_count, 3);
    assert!(failed[0].last_error.is_some());

    let summary = stack.reconciler.run_sync().await.unwrap();
    assert_eq!(summary.failed, 0);
    assert_eq!(stack.remote.calls_to("create Memory"), 3);
    assert_eq!(stack.queue.all().await.unwrap().len(), 1);

    // Parked failures keep the status visible until they are retried.
    let status = stack.reconciler.status().await.unwrap();
    assert_eq!(status.status, SyncStatus::Error);
    let last_error = status.last_error.unwrap_or_default();
    assert_contains!(last_error, "awaiting retry");

    stack.go_online();
    stack.queue.retry_failed().await.unwrap();
    stack.reconciler.run_sync().await.unwrap();
    assert_eq!(stack.reconciler.status().await.unwrap().status, SyncStatus::Synced);
}

#[tokio::test]
async fn test_failed_operation_can_be_retried_manually() {
    let stack = TestStack::with_max_attempts(1);
    stack.go_offline();
    stack.gateway.create("Memory", rec(json!({"title": "Later"}))).await.unwrap();

    stack.network.set_online(true);
    let summary = stack.reconciler.run_sync().await.unwrap();
    assert_eq!(summary.exhausted, 1);
    assert_eq!(stack.reconciler.status().await.unwrap().status, SyncStatus::Error);

    stack.remote.set_mode(RemoteMode::Online);
    assert_eq!(stack.queue.retry_failed().await.unwrap(), 1);
    let summary = stack.reconciler.run_sync().await.unwrap();
    assert_eq!(summary.processed, 1);
    assert!(stack.queue.is_empty().await.unwrap());
}

#[tokio::test]
async fn test_two_offline_updates_merge_into_one_record() {
    let stack = TestStack::new();
    stack.remote.seed("CarePlan", vec![json!({"id": "p1", "title": "Daily", "steps": 2})]);
    stack.gateway.get("CarePlan", "p1").await.unwrap();

    stack.go_offline();
    stack.gateway.update("CarePlan", "p1", rec(json!({"title": "Daily walk"}))).await.unwrap();
    stack.gateway.update("CarePlan", "p1", rec(json!({"steps": 3}))).await.unwrap();

    let local = stack.store.get(schema::CARE_PLANS, "p1").await.unwrap().unwrap();
    assert_eq!(local["title"], "Daily walk");
    assert_eq!(local["steps"], 3);

    let pending = stack.queue.pending().await.unwrap();
    assert_eq!(pending.len(), 2);
    assert!(pending.iter().all(|op| op.kind == OperationKind::Update));

    stack.go_online();
    let summary = stack.reconciler.run_sync().await.unwrap();
    assert_eq!(summary.processed, 2);

    let remote = &stack.remote.records("CarePlan")[0];
    assert_eq!(remote["title"], "Daily walk");
    assert_eq!(remote["steps"], 3);
    let local = stack.store.get(schema::CARE_PLANS, "p1").await.unwrap().unwrap();
    assert!(local.get(FIELD_PENDING_SYNC).is_none());
}

#[tokio::test]
async fn test_online_update_waits_behind_queued_edits() {
    let stack = TestStack::new();
    stack.remote.seed("CarePlan", vec![json!({"id": "p1", "title": "Daily"})]);
    stack.gateway.get("CarePlan", "p1").await.unwrap();

    stack.go_offline();
    stack.gateway.update("CarePlan", "p1", rec(json!({"title": "Old edit"}))).await.unwrap();

    stack.go_online();
    let merged = stack.gateway.update("CarePlan", "p1", rec(json!({"title": "New edit"}))).await.unwrap();
    assert_eq!(merged["title"], "New edit");
    assert_eq!(stack.remote.calls_to("update CarePlan"), 0);
    assert_queue_len!(stack.queue, 2);

    let summary = stack.reconciler.run_sync().await.unwrap();
    assert_eq!(summary.processed, 2);
    assert_eq!(stack.remote.records("CarePlan")[0]["title"], "New edit");
    let local = stack.store.get(schema::CARE_PLANS, "p1").await.unwrap().unwrap();
    assert_eq!(local["title"], "New edit");
    assert!(local.get(FIELD_PENDING_SYNC).is_none());
}

#[tokio::test]
async fn test_online_delete_waits_behind_queued_edits() {
    let stack = TestStack::new();
    stack.remote.seed("SafeZone", vec![json!({"id": "z1", "name": "Garden"})]);
    stack.gateway.get("SafeZone", "z1").await.unwrap();

    stack.go_offline();
    stack.gateway.update("SafeZone", "z1", rec(json!({"name": "Back garden"}))).await.unwrap();

    stack.go_online();
    stack.gateway.delete("SafeZone", "z1").await.unwrap();
    assert_eq!(stack.remote.calls_to("delete SafeZone"), 0);
    assert!(stack.store.get(schema::SAFE_ZONES, "z1").await.unwrap().is_none());

    let summary = stack.reconciler.run_sync().await.unwrap();
    assert_eq!((summary.processed, summary.failed), (2, 0));
    assert!(stack.remote.records("SafeZone").is_empty());
}

#[tokio::test]
async fn test_child_record_references_are_resolved() {
    let stack = TestStack::new();
    stack.go_offline();

    let conversation = stack.gateway.create("Conversation", rec(json!({"title": "Morning chat"}))).await.unwrap();
    let conversation_id = id_of(&conversation);
    let message = stack
        .gateway
        .create("Message", rec(json!({"conversation_id": conversation_id, "text": "Good morning"})))
        .await
        .unwrap();
    let message_temp = id_of(&message);

    stack.go_online();
    let summary = stack.reconciler.run_sync().await.unwrap();
    assert_eq!(summary.processed, 2);

    let server_conversation = id_of(&stack.remote.records("Conversation")[0]);
    assert_eq!(stack.remote.records("Message")[0]["conversation_id"], server_conversation.as_str());

    let messages = stack.store.get_all(schema::MESSAGES).await.unwrap();
    assert_eq!(messages.len(), 1);
    assert_ne!(id_of(&messages[0]), message_temp);
    assert_eq!(messages[0]["conversation_id"], server_conversation.as_str());
}

#[tokio::test]
async fn test_operations_on_unconfirmed_record_are_deferred() {
    let stack = TestStack::new();
    stack.go_offline();
    let created = stack.gateway.create("Memory", rec(json!({"title": "Draft"}))).await.unwrap();
    let temp = id_of(&created);
    stack.gateway.update("Memory", &temp, rec(json!({"title": "Final"}))).await.unwrap();

    // The create fails once; the update must wait rather than burn attempts.
    stack.go_online();
    stack.remote.fail_next(1);
    let first = stack.reconciler.run_sync().await.unwrap();
    assert_eq!(first.failed, 1);
    assert_eq!(first.skipped, 1);

    let pending = stack.queue.pending().await.unwrap();
    let update = pending.iter().find(|op| op.kind == OperationKind::Update).unwrap();
    assert_eq!(update.retry_count, 0);
    let local = stack.store.get(schema::MEMORIES, &temp).await.unwrap().unwrap();
    assert_eq!(local["title"], "Final");

    let second = stack.reconciler.run_sync().await.unwrap();
    assert_eq!(second.processed, 2);
    assert_eq!(stack.remote.records("Memory")[0]["title"], "Final");

    let local = stack.store.get_all(schema::MEMORIES).await.unwrap();
    assert_eq!(local.len(), 1);
    assert_eq!(id_of(&local[0]), "srv_1");
    assert_eq!(local[0]["title"], "Final");
    assert!(local[0].get(FIELD_PENDING_SYNC).is_none());
}

#[tokio::test]
async fn test_offline_edits_survive_create_confirmation() {
    let stack = TestStack::new();
    stack.go_offline();
    let created = stack.gateway.create("Memory", rec(json!({"title": "Draft"}))).await.unwrap();
    stack
        .gateway
        .update("Memory", &id_of(&created), rec(json!({"title": "Final", "mood": "happy"})))
        .await
        .unwrap();

    // Create lands, the follow-up update does not.
    stack.go_online();
    stack.remote.fail_matching("update Memory", 1);
    let first = stack.reconciler.run_sync().await.unwrap();
    assert_eq!((first.processed, first.failed), (1, 1));
    assert_eq!(stack.remote.records("Memory")[0]["title"], "Draft");

    let local = stack.store.get(schema::MEMORIES, "srv_1").await.unwrap().unwrap();
    assert_eq!(local["title"], "Final");
    assert_eq!(local["mood"], "happy");
    assert_eq!(local[FIELD_PENDING_SYNC], true);

    let second = stack.reconciler.run_sync().await.unwrap();
    assert_eq!(second.processed, 1);
    assert_eq!(stack.remote.records("Memory")[0]["title"], "Final");
    let local = stack.store.get(schema::MEMORIES, "srv_1").await.unwrap().unwrap();
    assert_eq!(local["title"], "Final");
    assert!(local.get(FIELD_PENDING_SYNC).is_none());
}

#[tokio::test]
async fn test_child_waits_for_unconfirmed_parent() {
    let stack = TestStack::new();
    stack.go_offline();
    let conversation = stack.gateway.create("Conversation", rec(json!({"title": "Evening chat"}))).await.unwrap();
    stack
        .gateway
        .create("Message", rec(json!({"conversation_id": id_of(&conversation), "text": "Hello"})))
        .await
        .unwrap();

    stack.go_online();
    stack.remote.fail_next(1);
    let first = stack.reconciler.run_sync().await.unwrap();
    assert_eq!((first.processed, first.failed, first.skipped), (0, 1, 1));
    assert_eq!(stack.remote.calls_to("create Message"), 0);
    assert!(stack.remote.records("Message").is_empty());

    let second = stack.reconciler.run_sync().await.unwrap();
    assert_eq!(second.processed, 2);
    let parent = id_of(&stack.remote.records("Conversation")[0]);
    assert_eq!(stack.remote.records("Message")[0]["conversation_id"], parent.as_str());
}

#[tokio::test]
async fn test_create_without_server_id_is_not_replayed() {
    let stack = TestStack::new();
    stack.go_offline();
    stack.gateway.create("Memory", rec(json!({"title": "Picnic"}))).await.unwrap();

    stack.go_online();
    stack.remote.set_omit_ids(true);
    let first = stack.reconciler.run_sync().await.unwrap();
    assert_eq!((first.failed, first.exhausted), (1, 1));

    let failed = stack.queue.failed().await.unwrap();
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].error_kind, Some(ErrorKind::Rejected));

    stack.reconciler.run_sync().await.unwrap();
    assert_eq!(stack.remote.calls_to("create Memory"), 1);
}

#[tokio::test]
async fn test_sync_while_offline_does_nothing() {
    let stack = TestStack::new();
    stack.go_offline();
    stack.gateway.create("Memory", rec(json!({"title": "Waiting"}))).await.unwrap();

    let summary = stack.reconciler.run_sync().await.unwrap();
    assert_eq!(summary.outcome, SyncOutcome::Offline);
    assert_queue_len!(stack.queue, 1);
}

#[tokio::test]
async fn test_concurrent_sync_requests_run_once() {
    let stack = TestStack::new();
    stack.go_offline();
    stack.gateway.create("Memory", rec(json!({"title": "Only once"}))).await.unwrap();

    stack.go_online();
    stack.remote.set_latency(Duration::from_millis(50));
    let (first, second) = tokio::join!(stack.reconciler.run_sync(), stack.reconciler.run_sync());

    let outcomes = [first.unwrap().outcome, second.unwrap().outcome];
    assert!(outcomes.contains(&SyncOutcome::Completed));
    assert!(outcomes.contains(&SyncOutcome::AlreadyRunning));
    assert_eq!(stack.remote.calls_to("create Memory"), 1);
}

#[tokio::test]
async fn test_sync_metadata_and_subscribers() {
    let stack = TestStack::new();
    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel::<SyncSummary>();
    stack.reconciler.subscribe(move |summary| {
        let _ = tx.send(summary.clone());
    });

    stack.go_offline();
    stack.gateway.create("Memory", rec(json!({"title": "A"}))).await.unwrap();
    stack.gateway.create("Memory", rec(json!({"title": "B"}))).await.unwrap();
    stack.go_online();
    stack.reconciler.run_sync().await.unwrap();

    let summary = rx.recv().await.unwrap();
    assert_eq!(summary.processed, 2);

    let metadata = stack.reconciler.status().await.unwrap();
    assert_eq!(metadata.status, SyncStatus::Synced);
    assert_eq!(metadata.total_synced, 2);
    assert!(metadata.last_sync_at.is_some());
    assert_eq!(stack.reconciler.metrics().total_syncs, 1);
}

async fn wait_for_empty_queue(stack: &TestStack) -> bool {
    for _ in 0..100 {
        if stack.queue.is_empty().await.unwrap() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    false
}

#[tokio::test]
async fn test_service_syncs_when_connectivity_returns() {
    let stack = TestStack::new();
    stack.go_offline();
    stack.gateway.create("Memory", rec(json!({"title": "Auto"}))).await.unwrap();

    let mut service = SyncService::new(Arc::clone(&stack.reconciler), stack.network.clone(), None);
    assert_ok!(service.start());
    assert_err!(service.start());
    tokio::time::sleep(Duration::from_millis(20)).await;

    stack.go_online();
    assert!(wait_for_empty_queue(&stack).await, "queue was not drained by the background sync");

    service.stop().await;
    assert!(!service.is_running());
}

#[tokio::test]
async fn test_stop_lets_running_pass_finish() {
    let stack = TestStack::new();
    stack.go_offline();
    stack.gateway.create("Memory", rec(json!({"title": "In flight"}))).await.unwrap();

    let mut service = SyncService::new(Arc::clone(&stack.reconciler), stack.network.clone(), None);
    service.start().unwrap();
    tokio::time::sleep(Duration::from_millis(20)).await;

    stack.remote.set_latency(Duration::from_millis(150));
    stack.go_online();
    tokio::time::sleep(Duration::from_millis(40)).await;
    assert!(stack.reconciler.is_syncing());

    service.stop().await;
    assert!(!stack.reconciler.is_syncing());
    assert_queue_len!(stack.queue, 0);

    stack.reconciler.run_sync().await.unwrap();
    assert_eq!(stack.remote.calls_to("create Memory"), 1);
}

#[tokio::test]
async fn test_service_respects_auto_sync_flag() {
    let stack = TestStack::new();
    stack.reconciler.metadata().set_auto_sync(false).await.unwrap();
    stack.go_offline();
    stack.gateway.create("Memory", rec(json!({"title": "Manual only"}))).await.unwrap();

    let mut service = SyncService::new(Arc::clone(&stack.reconciler), stack.network.clone(), None);
    service.start().unwrap();
    tokio::time::sleep(Duration::from_millis(20)).await;
    stack.go_online();
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_queue_len!(stack.queue, 1);

    let summary = service.sync_now().await.unwrap();
    assert_eq!(summary.processed, 1);
    assert_queue_len!(stack.queue, 0);
}
