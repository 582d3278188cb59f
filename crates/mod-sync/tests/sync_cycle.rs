#![allow(clippy::unwrap_used, clippy::expect_used)]

mod common;

use std::sync::atomic::Ordering;

use common::{Harness, START};
use harvest_domain::*;
use harvest_error::SyncError;
use harvest_sync::{StartOutcome, SyncConfig, TickOutcome};

async fn tick(h: &Harness) -> TickOutcome {
    let (_, task) = h.tasks.pop().expect("a tick is queued");
    h.engine.process_batch(task.connection_id()).await
}

#[tokio::test]
async fn later_name_fills_in_and_count_accumulates() {
    let h = Harness::with_defaults();
    h.mailbox.push("m1", "jane@x.com", START);
    h.mailbox.push("m2", "Jane Doe <jane@x.com>", START + 1);
    let conn = h.connect().await;

    h.sync(&conn.id).await;

    let contact = h.store.get_contact(&conn.id, "jane@x.com").await.unwrap().unwrap();
    assert_eq!(contact.name, "Jane Doe");
    assert_eq!(contact.email_count, 2);
    assert_eq!(contact.first_contact_at, START);
}

#[tokio::test]
async fn capped_page_is_resumed_before_moving_on() {
    let h = Harness::new(250, SyncConfig::default());
    h.mailbox.fill(300);
    let conn = h.connect().await;

    let started = h.engine.start_cycle(&conn.id).await.unwrap();
    assert_eq!(started, StartOutcome::Started { total: 300 });

    assert_eq!(
        tick(&h).await,
        TickOutcome::Continued { processed: 200, new_addresses: 200 }
    );
    let after_first = h.reload(&conn.id).await;
    assert_eq!(after_first.sync_page_token, None);
    assert_eq!(after_first.messages_processed, Some(200));

    assert_eq!(
        tick(&h).await,
        TickOutcome::Continued { processed: 50, new_addresses: 50 }
    );
    assert_eq!(h.reload(&conn.id).await.sync_page_token, Some("p1".to_string()));

    assert_eq!(
        tick(&h).await,
        TickOutcome::Completed { processed: 50, new_addresses: 50 }
    );
    assert_eq!(
        *h.mailbox.list_calls.lock().unwrap(),
        vec![None, None, Some("p1".to_string())]
    );

    let done = h.reload(&conn.id).await;
    assert_eq!(done.status, SyncStatus::Idle);
    assert_eq!(done.messages_processed, Some(300));
    assert_eq!(done.sync_page_token, None);
    assert_eq!(done.sync_started_at, None);
    assert!(done.last_sync_at.is_some());
    assert_eq!(h.tasks.len(), 0);
}

#[tokio::test]
async fn start_while_syncing_changes_nothing() {
    let h = Harness::with_defaults();
    h.mailbox.fill(3);
    let conn = h.connect().await;

    h.engine.start_cycle(&conn.id).await.unwrap();
    let before = h.reload(&conn.id).await;

    let again = h.engine.start_cycle(&conn.id).await.unwrap();
    assert_eq!(again, StartOutcome::AlreadyRunning);
    assert_eq!(again.message(), "Sync already in progress");
    assert_eq!(h.reload(&conn.id).await, before);
    assert_eq!(h.tasks.len(), 1);
}

#[tokio::test]
async fn listing_failure_ends_cycle_and_keeps_earlier_work() {
    let h = Harness::new(5, SyncConfig::default());
    h.mailbox.fill(10);
    let conn = h.connect().await;
    h.engine.start_cycle(&conn.id).await.unwrap();

    assert!(matches!(tick(&h).await, TickOutcome::Continued { processed: 5, .. }));

    h.mailbox.fail_listing(true);
    let outcome = tick(&h).await;
    assert!(matches!(outcome, TickOutcome::Failed(SyncError::Provider(_))));

    let failed = h.reload(&conn.id).await;
    assert_eq!(failed.status, SyncStatus::Error);
    assert!(failed.last_error.unwrap().contains("backend error"));
    assert_eq!(failed.sync_page_token, None);
    assert_eq!(h.tasks.len(), 0);
    assert_eq!(h.store.count_synced(&conn.id).await.unwrap(), 5);
    assert_eq!(h.store.list_contacts(&conn.id).await.unwrap().len(), 5);
}

#[tokio::test]
async fn retry_after_error_picks_up_remaining_messages() {
    let h = Harness::new(5, SyncConfig::default());
    h.mailbox.fill(10);
    let conn = h.connect().await;
    h.engine.start_cycle(&conn.id).await.unwrap();
    tick(&h).await;
    h.mailbox.fail_listing(true);
    tick(&h).await;

    h.mailbox.fail_listing(false);
    h.sync(&conn.id).await;

    let done = h.reload(&conn.id).await;
    assert_eq!(done.status, SyncStatus::Idle);
    assert_eq!(done.last_error, None);
    assert_eq!(done.messages_processed, Some(10));
    assert_eq!(h.store.count_synced(&conn.id).await.unwrap(), 10);
    for i in 0..10 {
        assert_eq!(h.mailbox.fetch_count(&format!("m{i}")), 1);
    }
}

#[tokio::test]
async fn refresh_failure_at_start_moves_to_error() {
    let h = Harness::with_defaults();
    let mut new = Harness::new_connection(SyncSchedule::Manual);
    new.credential.expires_at = 0;
    let conn = h.engine.create_connection(new).await.unwrap();
    *h.credentials.fail.lock().unwrap() = true;

    let err = h.engine.start_cycle(&conn.id).await.unwrap_err();
    assert!(matches!(err, SyncError::Auth(_)));

    let failed = h.reload(&conn.id).await;
    assert_eq!(failed.status, SyncStatus::Error);
    assert_eq!(failed.last_error.as_deref(), Some("token refresh failed: invalid_grant"));
    assert_eq!(h.tasks.len(), 0);
}

#[tokio::test]
async fn expired_token_is_refreshed_once_and_stored() {
    let h = Harness::with_defaults();
    h.mailbox.fill(3);
    let mut new = Harness::new_connection(SyncSchedule::Manual);
    new.credential.expires_at = START - 1;
    let conn = h.engine.create_connection(new).await.unwrap();

    h.engine.start_cycle(&conn.id).await.unwrap();
    let stored = h.reload(&conn.id).await.credential;
    assert_eq!(stored.access_token, "fresh-1");
    assert_eq!(stored.refresh_token, "refresh");
    assert_eq!(stored.expires_at, START + 3_600_000);

    h.drain().await;
    assert_eq!(h.credentials.refreshes.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn rerun_without_new_mail_changes_nothing() {
    let h = Harness::new(10, SyncConfig::default());
    h.mailbox.fill(30);
    h.mailbox.push("m30", "user0@x.com", START + 100);
    let conn = h.connect().await;

    h.sync(&conn.id).await;
    let first = h.reload(&conn.id).await;
    let contacts = h.store.list_contacts(&conn.id).await.unwrap();

    h.sync(&conn.id).await;
    let second = h.reload(&conn.id).await;
    assert_eq!(second.messages_processed, first.messages_processed);
    assert_eq!(second.messages_processed, Some(31));
    assert_eq!(h.store.list_contacts(&conn.id).await.unwrap(), contacts);
    assert_eq!(h.store.count_synced(&conn.id).await.unwrap(), 31);
    assert_eq!(h.mailbox.fetched.lock().unwrap().len(), 31);
}

#[tokio::test]
async fn failed_message_gets_no_witness_and_is_retried_later() {
    let h = Harness::with_defaults();
    h.mailbox.fill(5);
    h.mailbox.fail_message("m2", true);
    let conn = h.connect().await;

    h.sync(&conn.id).await;
    let done = h.reload(&conn.id).await;
    assert_eq!(done.status, SyncStatus::Idle);
    assert_eq!(h.store.count_synced(&conn.id).await.unwrap(), 4);
    assert!(h.store.get_contact(&conn.id, "user2@x.com").await.unwrap().is_none());

    h.mailbox.fail_message("m2", false);
    h.sync(&conn.id).await;
    assert_eq!(h.store.count_synced(&conn.id).await.unwrap(), 5);
    assert!(h.store.get_contact(&conn.id, "user2@x.com").await.unwrap().is_some());
    assert_eq!(h.mailbox.fetch_count("m1"), 1);
    assert_eq!(h.mailbox.fetch_count("m2"), 1);
}

#[tokio::test]
async fn capped_page_that_only_fails_stops_without_moving_the_watermark() {
    let h = Harness::new(250, SyncConfig::default());
    h.mailbox.fill(250);
    for i in 0..200 {
        h.mailbox.fail_message(&format!("m{i}"), true);
    }
    let conn = h.connect().await;

    h.engine.start_cycle(&conn.id).await.unwrap();
    let outcome = tick(&h).await;
    assert!(matches!(outcome, TickOutcome::Failed(SyncError::Provider(_))));

    let stopped = h.reload(&conn.id).await;
    assert_eq!(stopped.status, SyncStatus::Error);
    assert_eq!(stopped.last_error.as_deref(), Some("200 messages failed in page"));
    assert_eq!(stopped.last_sync_at, None);
    assert_eq!(stopped.sync_page_token, None);
    assert_eq!(h.store.count_synced(&conn.id).await.unwrap(), 0);
    assert_eq!(h.mailbox.fetch_count("m200"), 0);
    assert_eq!(h.tasks.len(), 0);

    for i in 0..200 {
        h.mailbox.fail_message(&format!("m{i}"), false);
    }
    h.sync(&conn.id).await;
    let done = h.reload(&conn.id).await;
    assert_eq!(done.status, SyncStatus::Idle);
    assert_eq!(h.store.count_synced(&conn.id).await.unwrap(), 250);
    assert_eq!(h.mailbox.fetch_count("m249"), 1);
}

#[tokio::test]
async fn contact_store_failure_ends_the_cycle() {
    let h = Harness::with_defaults();
    h.mailbox.fill(5);
    let conn = h.connect().await;
    h.contacts.fail_after(0);

    h.engine.start_cycle(&conn.id).await.unwrap();
    let outcome = tick(&h).await;
    assert!(matches!(outcome, TickOutcome::Failed(SyncError::Store(_))));

    let stopped = h.reload(&conn.id).await;
    assert_eq!(stopped.status, SyncStatus::Error);
    assert_eq!(stopped.last_error.as_deref(), Some("contacts table unavailable"));
    assert_eq!(stopped.last_sync_at, None);
    assert_eq!(h.store.count_synced(&conn.id).await.unwrap(), 0);
    assert_eq!(h.tasks.len(), 0);

    h.contacts.recover();
    h.sync(&conn.id).await;
    assert_eq!(h.reload(&conn.id).await.status, SyncStatus::Idle);
    assert_eq!(h.store.list_contacts(&conn.id).await.unwrap().len(), 5);
}

#[tokio::test]
async fn messages_harvested_before_a_store_failure_are_not_counted_twice() {
    let h = Harness::with_defaults();
    h.mailbox.push("m0", "ann@x.com", START);
    h.mailbox.push("m1", "bob@y.com", START + 1);
    let conn = h.connect().await;

    h.engine.start_cycle(&conn.id).await.unwrap();
    h.contacts.fail_after(1);
    let outcome = tick(&h).await;
    assert!(matches!(outcome, TickOutcome::Failed(SyncError::Store(_))));
    assert_eq!(h.store.count_synced(&conn.id).await.unwrap(), 1);

    h.contacts.recover();
    h.sync(&conn.id).await;
    let ann = h.store.get_contact(&conn.id, "ann@x.com").await.unwrap().unwrap();
    assert_eq!(ann.email_count, 1);
    assert!(h.store.get_contact(&conn.id, "bob@y.com").await.unwrap().is_some());
}

#[tokio::test]
async fn blocked_domain_is_witnessed_but_not_harvested() {
    let h = Harness::with_defaults();
    h.mailbox.push("m1", "Promo <deals@Spam.com>", START);
    h.mailbox.push("m2", "Bob <bob@ok.com>", START + 1);
    let conn = h.connect().await;
    let blocked = h.engine.add_filtered_domain(&conn.id, " @SPAM.com ").await.unwrap();
    assert_eq!(blocked.domain, "spam.com");

    h.sync(&conn.id).await;

    let contacts = h.store.list_contacts(&conn.id).await.unwrap();
    assert_eq!(contacts.len(), 1);
    assert_eq!(contacts[0].email, "bob@ok.com");
    assert_eq!(h.store.count_synced(&conn.id).await.unwrap(), 2);
}

#[tokio::test]
async fn repeated_id_in_page_is_fetched_once() {
    let h = Harness::with_defaults();
    h.mailbox.push("m1", "a@x.com", START);
    h.mailbox.push("m1", "a@x.com", START);
    let conn = h.connect().await;

    h.sync(&conn.id).await;

    assert_eq!(h.mailbox.fetch_count("m1"), 1);
    let contact = h.store.get_contact(&conn.id, "a@x.com").await.unwrap().unwrap();
    assert_eq!(contact.email_count, 1);
}

#[tokio::test]
async fn progress_never_goes_backwards() {
    let config = SyncConfig {
        batch_size: 7,
        ..SyncConfig::default()
    };
    let h = Harness::new(20, config);
    h.mailbox.fill(45);
    let conn = h.connect().await;
    h.engine.start_cycle(&conn.id).await.unwrap();

    let mut last = 0;
    let mut ticks = 0;
    while let Some((delay, task)) = h.tasks.pop() {
        h.clock.advance(delay);
        h.engine.process_batch(task.connection_id()).await;
        ticks += 1;

        let progress = h.engine.progress(&conn.id).await.unwrap();
        assert!(progress.processed >= last);
        assert!(progress.percent <= 100);
        assert!(progress.processed <= progress.total);
        last = progress.processed;
    }
    assert_eq!(last, 45);
    assert!(ticks >= 45 / 7);
}

#[tokio::test]
async fn cancel_stops_the_chain() {
    let h = Harness::new(10, SyncConfig::default());
    h.mailbox.fill(50);
    let conn = h.connect().await;
    h.engine.start_cycle(&conn.id).await.unwrap();
    tick(&h).await;

    assert!(h.engine.cancel_cycle(&conn.id).await.unwrap());
    assert_eq!(tick(&h).await, TickOutcome::Aborted);
    assert_eq!(h.tasks.len(), 0);

    let cancelled = h.reload(&conn.id).await;
    assert_eq!(cancelled.status, SyncStatus::Idle);
    assert_eq!(cancelled.progress_message.as_deref(), Some("Sync cancelled by user"));
    assert_eq!(cancelled.sync_page_token, None);
    assert_eq!(cancelled.messages_processed, Some(10));
    assert_eq!(cancelled.last_sync_at, None);

    assert!(!h.engine.cancel_cycle(&conn.id).await.unwrap());
}

#[tokio::test]
async fn tick_for_deleted_connection_is_dropped() {
    let h = Harness::with_defaults();
    h.mailbox.fill(3);
    let conn = h.connect().await;
    h.engine.start_cycle(&conn.id).await.unwrap();
    h.store.delete_connection(&conn.id).await.unwrap();

    assert_eq!(tick(&h).await, TickOutcome::Aborted);
    assert!(h.mailbox.fetched.lock().unwrap().is_empty());
}

#[tokio::test]
async fn new_mail_after_completion_is_picked_up() {
    let h = Harness::with_defaults();
    h.mailbox.fill(2);
    let conn = h.connect().await;
    h.sync(&conn.id).await;

    h.mailbox.push("late", "Ann <ann@y.org>", START + 50);
    h.sync(&conn.id).await;

    let done = h.reload(&conn.id).await;
    assert_eq!(done.messages_processed, Some(3));
    assert_eq!(done.total_messages_to_sync, Some(3));
    assert!(h.store.get_contact(&conn.id, "ann@y.org").await.unwrap().is_some());
}
