mod common;

use std::time::Duration;

use common::{FakeStore, engine, engine_with, message};
use mailmirror::models::{CheckField, MailItem};
use mailmirror::{SyncOutcome, SyncReport};

fn completed(outcome: SyncOutcome) -> SyncReport {
    match outcome {
        SyncOutcome::Completed(report) => report,
        SyncOutcome::AlreadyRunning => panic!("sync unexpectedly skipped"),
    }
}

async fn cached_ids(engine: &mailmirror::MailEngine, folder: &str) -> Vec<u32> {
    let mut ids = engine.database().folder_ids(folder).await.unwrap();
    ids.sort_unstable();
    ids
}

#[tokio::test]
async fn test_sync_mirrors_remote_ids() {
    let store = FakeStore::with_folders(&["INBOX"]);
    for i in 0..3 {
        store.deliver(
            "INBOX",
            message("Alice <alice@example.com>", &format!("Note {}", i), "hi", i),
        );
    }
    let (_dir, engine) = engine(&store).await;

    let report = completed(engine.sync("INBOX").await.unwrap());
    assert_eq!(report.stored, 3);
    assert_eq!(report.bodies, 3);
    assert_eq!(cached_ids(&engine, "INBOX").await, store.uids("INBOX"));
    assert!(engine.database().incomplete_ids("INBOX").await.unwrap().is_empty());

    store.update(|s| {
        s.folders.get_mut("INBOX").unwrap().remove(&2);
    });
    let report = completed(engine.sync("INBOX").await.unwrap());
    assert_eq!(report.removed, 1);
    assert_eq!(report.stored, 0);
    assert_eq!(cached_ids(&engine, "INBOX").await, vec![1, 3]);
}

#[tokio::test]
async fn test_concurrent_sync_is_a_noop() {
    let store = FakeStore::with_folders(&["INBOX"]);
    for i in 0..3 {
        store.deliver("INBOX", message("a@example.com", &format!("Note {}", i), "hi", i));
    }
    store.update(|s| s.uid_delay = Some(Duration::from_millis(200)));
    let (_dir, engine) = engine(&store).await;

    let (first, second) = tokio::join!(engine.sync("INBOX"), engine.sync("INBOX"));
    let outcomes = [first.unwrap(), second.unwrap()];
    let skipped = outcomes
        .iter()
        .filter(|o| **o == SyncOutcome::AlreadyRunning)
        .count();

    assert_eq!(skipped, 1);
    assert_eq!(store.state.lock().unwrap().header_fetches, 1);
    assert!(engine.currently_syncing().is_empty());
}

#[tokio::test]
async fn test_blocked_sender_goes_to_spam() {
    let store = FakeStore::with_folders(&["INBOX", "INBOX.Spam"]);
    let (_dir, engine) = engine(&store).await;
    assert_eq!(
        engine.block_sender("Spammer <spammer@bad.example>").await.unwrap(),
        0
    );

    store.deliver("INBOX", message("Spammer <spammer@bad.example>", "Lunch", "x", 1));
    let kept = store.deliver("INBOX", message("Friend <friend@good.example>", "Lunch", "x", 2));

    let report = completed(engine.sync("INBOX").await.unwrap());
    assert_eq!(report.spam, 1);
    assert!(report.routed.contains("INBOX.Spam"));
    assert_eq!(cached_ids(&engine, "INBOX").await, vec![kept]);
    assert_eq!(cached_ids(&engine, "INBOX").await, store.uids("INBOX"));
    assert_eq!(store.uids("INBOX.Spam").len(), 1);

    completed(engine.sync("INBOX.Spam").await.unwrap());
    assert_eq!(cached_ids(&engine, "INBOX.Spam").await, store.uids("INBOX.Spam"));
}

#[tokio::test]
async fn test_whitelist_beats_spam_keywords() {
    let store = FakeStore::with_folders(&["INBOX", "INBOX.Spam"]);
    let (_dir, engine) = engine(&store).await;
    engine.whitelist_sender("friend@good.example").await.unwrap();

    let friend = store.deliver("INBOX", message("friend@good.example", "Casino night", "x", 1));
    store.deliver("INBOX", message("other@bad.example", "Casino night", "x", 2));

    let report = completed(engine.sync("INBOX").await.unwrap());
    assert_eq!(report.spam, 1);
    assert_eq!(cached_ids(&engine, "INBOX").await, vec![friend]);
}

#[tokio::test]
async fn test_spam_stays_without_spam_folder() {
    let store = FakeStore::with_folders(&["INBOX"]);
    let uid = store.deliver("INBOX", message("x@bad.example", "Bitcoin offer", "x", 1));
    let (_dir, engine) = engine(&store).await;

    let report = completed(engine.sync("INBOX").await.unwrap());
    assert_eq!(report.spam, 0);
    assert_eq!(cached_ids(&engine, "INBOX").await, vec![uid]);
}

#[tokio::test]
async fn test_rule_routes_before_filters() {
    let store = FakeStore::with_folders(&["INBOX", "INBOX.Bills", "INBOX.Spam"]);
    let (_dir, engine) = engine(&store).await;
    engine
        .add_rule("invoice", "INBOX.Bills", CheckField::Subject)
        .await
        .unwrap();
    engine.block_sender("billing@acme.example").await.unwrap();

    store.deliver("INBOX", message("billing@acme.example", "Invoice 12", "x", 1));
    let report = completed(engine.sync("INBOX").await.unwrap());

    assert!(report.routed.contains("INBOX.Bills"));
    assert_eq!(report.spam, 0);
    assert!(cached_ids(&engine, "INBOX").await.is_empty());
    assert_eq!(store.uids("INBOX.Bills").len(), 1);
}

#[tokio::test]
async fn test_routed_folder_synced_after_inbox() {
    let store = FakeStore::with_folders(&["INBOX", "INBOX.Bills"]);
    let (_dir, engine) = engine_with(&store, |config| config.sync.follow_routed = true).await;
    engine
        .add_rule("invoice", "INBOX.Bills", CheckField::Subject)
        .await
        .unwrap();

    store.deliver("INBOX", message("billing@acme.example", "Invoice 12", "x", 1));
    let report = completed(engine.sync("INBOX").await.unwrap());
    assert!(report.routed.contains("INBOX.Bills"));

    let mut cached = Vec::new();
    for _ in 0..200 {
        cached = cached_ids(&engine, "INBOX.Bills").await;
        if !cached.is_empty() && engine.currently_syncing().is_empty() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(cached, store.uids("INBOX.Bills"));
    assert_eq!(store.state.lock().unwrap().connects, 2);
}

#[tokio::test]
async fn test_routing_falls_back_to_copy_and_delete() {
    let store = FakeStore::with_folders(&["INBOX", "INBOX.Bills"]);
    store.update(|s| s.fail_move = true);
    let (_dir, engine) = engine(&store).await;
    engine
        .add_rule("invoice", "INBOX.Bills", CheckField::Subject)
        .await
        .unwrap();

    store.deliver("INBOX", message("billing@acme.example", "Invoice 12", "x", 1));
    let report = completed(engine.sync("INBOX").await.unwrap());

    assert_eq!(report.moved, 1);
    assert!(store.uids("INBOX").is_empty());
    assert_eq!(store.uids("INBOX.Bills").len(), 1);
}

#[tokio::test]
async fn test_failed_routing_keeps_message_in_inbox() {
    let store = FakeStore::with_folders(&["INBOX", "INBOX.Bills"]);
    store.update(|s| {
        s.fail_move = true;
        s.fail_copy = true;
    });
    let (_dir, engine) = engine(&store).await;
    engine
        .add_rule("invoice", "INBOX.Bills", CheckField::Subject)
        .await
        .unwrap();

    let uid = store.deliver("INBOX", message("billing@acme.example", "Invoice 12", "x", 1));
    let report = completed(engine.sync("INBOX").await.unwrap());

    assert!(report.routed.is_empty());
    assert!(report.errors >= 1);
    assert_eq!(cached_ids(&engine, "INBOX").await, vec![uid]);
}

#[tokio::test]
async fn test_ads_create_missing_folder() {
    let store = FakeStore::with_folders(&["INBOX"]);
    store.deliver("INBOX", message("shop@deals.example", "Nyhetsbrev vecka 3", "x", 1));
    let (_dir, engine) = engine(&store).await;

    let report = completed(engine.sync("INBOX").await.unwrap());
    assert_eq!(report.ads, 1);
    assert!(report.routed.contains("INBOX.Reklam"));
    assert_eq!(store.uids("INBOX.Reklam").len(), 1);
    assert!(cached_ids(&engine, "INBOX").await.is_empty());
}

#[tokio::test]
async fn test_body_backfill_resumes_after_failure() {
    let store = FakeStore::with_folders(&["INBOX"]);
    store.deliver("INBOX", message("a@example.com", "One", "first", 1));
    store.deliver("INBOX", message("a@example.com", "Two", "second", 2));
    store.update(|s| s.fail_fetch_full = true);
    let (_dir, engine) = engine(&store).await;

    let report = completed(engine.sync("INBOX").await.unwrap());
    assert_eq!(report.stored, 2);
    assert_eq!(report.bodies, 0);
    assert_eq!(engine.database().incomplete_ids("INBOX").await.unwrap().len(), 2);

    store.update(|s| s.fail_fetch_full = false);
    let report = completed(engine.sync("INBOX").await.unwrap());
    assert_eq!(report.stored, 0);
    assert_eq!(report.bodies, 2);
    assert!(engine.database().incomplete_ids("INBOX").await.unwrap().is_empty());
}

#[tokio::test]
async fn test_zero_id_is_never_cached() {
    let store = FakeStore::with_folders(&["INBOX"]);
    let good = store.deliver("INBOX", message("a@example.com", "Fine", "x", 1));
    store.update(|s| {
        s.folders
            .get_mut("INBOX")
            .unwrap()
            .insert(0, message("a@example.com", "Broken", "x", 2));
    });
    let (_dir, engine) = engine(&store).await;

    completed(engine.sync("INBOX").await.unwrap());
    assert_eq!(cached_ids(&engine, "INBOX").await, vec![good]);
}

#[tokio::test]
async fn test_unreachable_store_keeps_cache() {
    let store = FakeStore::with_folders(&["INBOX"]);
    let uid = store.deliver("INBOX", message("a@example.com", "Kept", "x", 1));
    let (_dir, engine) = engine(&store).await;
    completed(engine.sync("INBOX").await.unwrap());

    store.update(|s| s.fail_connect = true);
    let report = completed(engine.sync("INBOX").await.unwrap());
    assert_eq!(report.errors, 1);
    assert_eq!(cached_ids(&engine, "INBOX").await, vec![uid]);
}

#[tokio::test]
async fn test_flags_refreshed_into_overlays() {
    let store = FakeStore::with_folders(&["INBOX"]);
    let mut seen = message("a@example.com", "Seen one", "x", 1);
    seen.seen = true;
    let mut flagged = message("a@example.com", "Flagged one", "x", 2);
    flagged.flagged = true;
    let seen_uid = store.deliver("INBOX", seen);
    let flagged_uid = store.deliver("INBOX", flagged);
    let (_dir, engine) = engine(&store).await;

    let report = completed(engine.sync("INBOX").await.unwrap());
    assert_eq!(report.flags, 2);

    let page = engine
        .query(&mailmirror::View::Folder("INBOX".to_string()), 1)
        .await
        .unwrap();
    for thread in &page.threads {
        let uid = thread.members[0].message.uid();
        if uid == seen_uid {
            assert!(!thread.unread);
            assert!(!thread.starred);
        } else {
            assert_eq!(uid, flagged_uid);
            assert!(thread.unread);
            assert!(thread.starred);
        }
    }
}
