//! End-to-end sync scenarios over the scripted platform mock and the
//! in-memory store fake.

mod support;

use support::{MemoryStore, MockPlatform, PEPPER, message, forum, thread_ref, ts_ago};

use forum_mirror::error::SyncError;
use forum_mirror::identity::IdentityHasher;
use forum_mirror::store::{StaffRole, Store};
use forum_mirror::sync::{Reconciler, SyncOptions, SyncOrchestrator, Traversal};

use chrono::{Duration, Utc};
use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration as StdDuration;
use tokio_util::sync::CancellationToken;

struct Harness {
    platform: Arc<MockPlatform>,
    store: Arc<MemoryStore>,
    cancel: CancellationToken,
}

impl Harness {
    fn new() -> Self {
        Self {
            platform: Arc::new(MockPlatform::new()),
            store: Arc::new(MemoryStore::new()),
            cancel: CancellationToken::new(),
        }
    }

    fn orchestrator(&self) -> SyncOrchestrator {
        let reconciler = Arc::new(Reconciler::new(
            self.store.clone() as Arc<dyn Store>,
            IdentityHasher::new(PEPPER),
            None,
        ));
        let traversal = Traversal::new(self.platform.clone(), self.cancel.clone())
            .with_page_delay(StdDuration::ZERO);
        SyncOrchestrator::new(
            self.platform.clone(),
            self.store.clone(),
            reconciler,
            traversal,
        )
    }

    /// One guild, one forum channel `General`, one thread `How do I X?`
    /// whose starter M1 (id 100) is followed by M2 (reply to M1) and M3.
    fn seed_basic_forum(&self) {
        self.platform.add_guild(1, "Acme");
        self.platform.add_forum(1, forum(1, 10, "General"));
        self.platform
            .add_active_thread(1, thread_ref(10, 100, "How do I X?", ts_ago(50)));
        self.platform
            .push_message(message(100, 100, 7001, "How do I X, exactly?", None, ts_ago(50)));
        self.platform
            .push_message(message(100, 101, 7002, "Like this.", Some(100), ts_ago(49)));
        self.platform
            .push_message(message(100, 102, 7003, "Thanks, both!", None, ts_ago(48)));
    }
}

#[tokio::test]
async fn s1_first_run_full_sync() {
    let harness = Harness::new();
    harness.seed_basic_forum();

    let stats = harness
        .orchestrator()
        .run(&SyncOptions::default())
        .await
        .expect("first run succeeds");

    assert_eq!((stats.guilds, stats.channels, stats.threads), (1, 1, 1));
    assert_eq!(stats.posts, 2, "two replies reconciled");
    assert_eq!(stats.errors, 0);

    let channel = harness.store.channel(10).expect("channel mirrored");
    assert_eq!(channel.slug, "general");

    let thread = harness.store.thread(100).expect("thread mirrored");
    assert_eq!(thread.slug, "how-do-i-x");
    assert_eq!(thread.reply_count, 2);
    assert_eq!(thread.tags, vec!["help".to_string()]);

    // Starter plus two replies.
    let posts = harness.store.posts_in_thread(100);
    assert_eq!(posts.len(), 3);

    let hasher = IdentityHasher::new(PEPPER);
    let m2 = harness.store.post(101).expect("reply stored");
    assert_eq!(m2.reply_to_id, Some(100));
    assert_eq!(m2.reply_to_author_alias.as_deref(), Some(hasher.alias(7001).as_str()));

    let cursor = harness.store.cursor();
    assert!(!cursor.is_first_run);
}

#[tokio::test]
async fn s2_delta_sync_picks_up_new_reply() {
    let harness = Harness::new();
    harness.seed_basic_forum();
    harness
        .orchestrator()
        .run(&SyncOptions::default())
        .await
        .expect("first run succeeds");

    let first_cursor = harness.store.cursor();
    let snapshot_before = harness.store.snapshot();

    // A reply lands after the first run's watermark.
    harness.platform.push_message(message(
        100,
        103,
        7002,
        "One more detail.",
        Some(101),
        Utc::now() + Duration::seconds(5),
    ));

    harness
        .orchestrator()
        .run(&SyncOptions::default())
        .await
        .expect("delta run succeeds");

    let m4 = harness.store.post(103).expect("new reply mirrored");
    assert_eq!(m4.reply_to_id, Some(101));

    let thread = harness.store.thread(100).expect("thread present");
    assert_eq!(thread.reply_count, 3);

    // Pre-existing rows are untouched.
    let (_, _, posts_before) = snapshot_before;
    for before in posts_before {
        let after = harness.store.post(before.id).expect("row kept");
        assert_eq!(after, before, "post {} changed during delta", before.id);
    }

    let second_cursor = harness.store.cursor();
    assert!(second_cursor.last_sync >= first_cursor.last_sync, "cursor monotonicity");
    assert!(!second_cursor.is_first_run);
}

#[tokio::test]
async fn s3_out_of_order_arrivals_resolve_references() {
    let harness = Harness::new();
    harness.platform.add_guild(1, "Acme");
    harness.platform.add_forum(1, forum(1, 10, "General"));
    harness
        .platform
        .add_active_thread(1, thread_ref(10, 200, "Scrambled", ts_ago(40)));

    // Starter, then replies injected in arrival order M3, M1, M2 where
    // M2 references M1 and M3 references M2.
    harness
        .platform
        .push_message(message(200, 200, 7001, "starter", None, ts_ago(40)));
    harness
        .platform
        .push_message(message(200, 203, 7003, "M3", Some(202), ts_ago(37)));
    harness
        .platform
        .push_message(message(200, 201, 7001, "M1", None, ts_ago(39)));
    harness
        .platform
        .push_message(message(200, 202, 7002, "M2", Some(201), ts_ago(38)));

    harness
        .orchestrator()
        .run(&SyncOptions::default())
        .await
        .expect("sync succeeds");

    assert_eq!(harness.store.posts_in_thread(200).len(), 4);
    assert_eq!(harness.store.post(202).unwrap().reply_to_id, Some(201));
    assert_eq!(harness.store.post(203).unwrap().reply_to_id, Some(202));
}

#[tokio::test]
async fn deferred_repair_fills_references_once_referent_lands() {
    let harness = Harness::new();
    let reconciler = Reconciler::new(
        harness.store.clone() as Arc<dyn Store>,
        IdentityHasher::new(PEPPER),
        None,
    );

    let m1 = message(300, 301, 7001, "first", None, ts_ago(20));
    let m2 = message(300, 302, 7002, "second", Some(301), ts_ago(19));

    // Referrer lands before its referent: both reply fields stay null.
    reconciler.reconcile_post(300, &m2).await.expect("upsert m2");
    assert_eq!(harness.store.post(302).unwrap().reply_to_id, None);

    reconciler.reconcile_post(300, &m1).await.expect("upsert m1");
    reconciler
        .repair_deferred_references(&[m1, m2])
        .await
        .expect("repair pass");

    let repaired = harness.store.post(302).unwrap();
    assert_eq!(repaired.reply_to_id, Some(301));
    assert_eq!(
        repaired.reply_to_author_alias.as_deref(),
        Some(IdentityHasher::new(PEPPER).alias(7001).as_str())
    );
}

#[tokio::test]
async fn s4_pii_is_redacted_in_stored_bodies() {
    let harness = Harness::new();
    harness.platform.add_guild(1, "Acme");
    harness.platform.add_forum(1, forum(1, 10, "General"));
    harness
        .platform
        .add_active_thread(1, thread_ref(10, 500, "Contact thread", ts_ago(30)));
    harness.platform.push_message(message(
        500,
        500,
        7001,
        "Contact me at alice@example.com or 555-123-4567, SSN 123-45-6789, \
         card 4111 1111 1111 1111",
        None,
        ts_ago(30),
    ));

    harness
        .orchestrator()
        .run(&SyncOptions::default())
        .await
        .expect("sync succeeds");

    let body = harness.store.thread(500).unwrap().body_html;
    for marker in [
        "[Email Redacted]",
        "[Phone Redacted]",
        "[SSN Redacted]",
        "[Card Number Redacted]",
    ] {
        assert!(body.contains(marker), "missing {marker} in {body}");
    }
    for leaked in ["alice@example.com", "555-123-4567", "123-45-6789", "4111"] {
        assert!(!body.contains(leaked), "leaked {leaked} in {body}");
    }
}

#[tokio::test]
async fn sync_is_idempotent_across_repeated_full_runs() {
    let harness = Harness::new();
    harness.seed_basic_forum();

    harness
        .orchestrator()
        .run(&SyncOptions::default())
        .await
        .expect("first run succeeds");
    let snapshot_before = harness.store.snapshot();
    let writes_before = harness.store.write_count();

    harness
        .orchestrator()
        .run(&SyncOptions {
            force_full: true,
            ..SyncOptions::default()
        })
        .await
        .expect("second run succeeds");

    assert_eq!(harness.store.snapshot(), snapshot_before, "rows changed");
    assert_eq!(
        harness.store.write_count(),
        writes_before,
        "unchanged state must write nothing"
    );
}

#[tokio::test]
async fn s6_cancellation_persists_partial_progress_and_keeps_cursor() {
    let harness = Harness::new();
    harness.platform.add_guild(1, "Acme");
    harness.platform.add_forum(1, forum(1, 10, "General"));
    harness
        .platform
        .add_active_thread(1, thread_ref(10, 400, "Long thread", ts_ago(200)));
    harness
        .platform
        .push_message(message(400, 400, 7001, "starter", None, ts_ago(200)));
    for index in 0..250u64 {
        harness.platform.push_message(message(
            400,
            401 + index,
            7002,
            &format!("reply {index}"),
            None,
            ts_ago(199) + Duration::seconds(index as i64),
        ));
    }

    // Cancellation arrives while the first page is in flight; the page
    // completes and its writes flush.
    *harness.platform.cancel_after_first_page.lock().unwrap() = Some(harness.cancel.clone());

    let result = harness.orchestrator().run(&SyncOptions::default()).await;
    assert!(matches!(result, Err(SyncError::Cancelled)));

    let persisted = harness.store.posts_in_thread(400).len();
    assert_eq!(persisted, 101, "starter plus the first page of replies");

    let thread = harness.store.thread(400).expect("thread persisted");
    assert!(thread.reply_count <= 250, "stale but never above the truth");

    let cursor = harness.store.cursor();
    assert!(cursor.is_first_run, "cursor untouched by a cancelled run");

    // Re-run with a fresh token: completes without duplicates.
    *harness.platform.cancel_after_first_page.lock().unwrap() = None;
    let fresh = Harness {
        platform: harness.platform.clone(),
        store: harness.store.clone(),
        cancel: CancellationToken::new(),
    };
    fresh
        .orchestrator()
        .run(&SyncOptions::default())
        .await
        .expect("rerun succeeds");

    assert_eq!(fresh.store.posts_in_thread(400).len(), 251);
    assert_eq!(fresh.store.thread(400).unwrap().reply_count, 250);
    assert!(!fresh.store.cursor().is_first_run);
}

#[tokio::test]
async fn orchestrator_failure_leaves_cursor_untouched() {
    let harness = Harness::new();
    harness.seed_basic_forum();
    harness.platform.fail_guilds.store(true, Ordering::SeqCst);

    let result = harness.orchestrator().run(&SyncOptions::default()).await;
    assert!(result.is_err());

    let cursor = harness.store.cursor();
    assert!(cursor.is_first_run);
    assert_eq!(cursor, forum_mirror::store::SyncCursor::default());
}

#[tokio::test]
async fn rate_limited_channel_is_skipped_but_run_completes() {
    let harness = Harness::new();
    harness.seed_basic_forum();
    harness.platform.add_forum(1, forum(1, 20, "Busy"));
    harness.platform.rate_limit_channel(20);

    let stats = harness
        .orchestrator()
        .run(&SyncOptions::default())
        .await
        .expect("run completes despite 429");

    assert_eq!(stats.errors, 1);
    assert!(harness.store.thread(100).is_some(), "healthy channel mirrored");
    assert!(!harness.store.cursor().is_first_run, "clean return advances cursor");
}

#[tokio::test]
async fn staff_tag_is_appended_to_author_alias() {
    let harness = Harness::new();
    harness.seed_basic_forum();

    let hasher = IdentityHasher::new(PEPPER);
    let alias = hasher.alias(7001);
    harness.store.insert_staff(StaffRole {
        user_id_hash: alias.clone(),
        public_tag: "MOD".into(),
        added_by: "test".into(),
        added_at: Utc::now(),
    });

    harness
        .orchestrator()
        .run(&SyncOptions::default())
        .await
        .expect("sync succeeds");

    let thread = harness.store.thread(100).unwrap();
    assert_eq!(thread.author_alias, format!("{}:MOD", &alias[..8]));
}

#[tokio::test]
async fn slug_collisions_get_a_deterministic_suffix() {
    let harness = Harness::new();
    harness.platform.add_guild(1, "Acme");
    harness.platform.add_forum(1, forum(1, 10, "General"));
    harness
        .platform
        .add_active_thread(1, thread_ref(10, 600, "Same Title", ts_ago(30)));
    harness
        .platform
        .add_active_thread(1, thread_ref(10, 700, "Same Title!!", ts_ago(29)));
    harness
        .platform
        .push_message(message(600, 600, 7001, "first", None, ts_ago(30)));
    harness
        .platform
        .push_message(message(700, 700, 7002, "second", None, ts_ago(29)));

    // One thread per run keeps slug assignment deterministic.
    for thread_id in [600, 700] {
        harness
            .orchestrator()
            .run(&SyncOptions {
                force_full: true,
                thread: Some(thread_id),
                ..SyncOptions::default()
            })
            .await
            .expect("scoped sync succeeds");
    }

    assert_eq!(harness.store.thread(600).unwrap().slug, "same-title");
    assert_eq!(
        harness.store.thread(700).unwrap().slug,
        format!("same-title-{:06x}", 700u64 & 0xff_ffff)
    );
}

#[tokio::test]
async fn limit_and_skip_existing_bound_the_run() {
    let harness = Harness::new();
    harness.platform.add_guild(1, "Acme");
    harness.platform.add_forum(1, forum(1, 10, "General"));
    for thread_id in [800u64, 900u64] {
        harness.platform.add_active_thread(
            1,
            thread_ref(10, thread_id, &format!("Thread {thread_id}"), ts_ago(30)),
        );
        harness
            .platform
            .push_message(message(thread_id, thread_id, 7001, "starter", None, ts_ago(30)));
    }

    harness
        .orchestrator()
        .run(&SyncOptions {
            limit: Some(1),
            ..SyncOptions::default()
        })
        .await
        .expect("limited run succeeds");
    let mirrored_first = harness.store.thread(800).is_some() as usize
        + harness.store.thread(900).is_some() as usize;
    assert_eq!(mirrored_first, 1, "limit caps threads processed");

    harness
        .orchestrator()
        .run(&SyncOptions {
            force_full: true,
            skip_existing: true,
            ..SyncOptions::default()
        })
        .await
        .expect("skip-existing run succeeds");
    assert!(harness.store.thread(800).is_some());
    assert!(harness.store.thread(900).is_some());
}

#[tokio::test]
async fn bot_authored_threads_and_replies_are_skipped() {
    let harness = Harness::new();
    harness.platform.add_guild(1, "Acme");
    harness.platform.add_forum(1, forum(1, 10, "General"));
    harness
        .platform
        .add_active_thread(1, thread_ref(10, 910, "Bot thread", ts_ago(30)));
    harness
        .platform
        .add_active_thread(1, thread_ref(10, 920, "Human thread", ts_ago(30)));

    let mut bot_starter = message(910, 910, 8000, "automated", None, ts_ago(30));
    bot_starter.author_is_bot = true;
    harness.platform.push_message(bot_starter);

    harness
        .platform
        .push_message(message(920, 920, 7001, "hello", None, ts_ago(30)));
    let mut bot_reply = message(920, 921, 8000, "beep", None, ts_ago(29));
    bot_reply.author_is_bot = true;
    harness.platform.push_message(bot_reply);

    harness
        .orchestrator()
        .run(&SyncOptions::default())
        .await
        .expect("sync succeeds");

    assert!(harness.store.thread(910).is_none(), "bot starter skips thread");
    assert!(harness.store.post(921).is_none(), "bot reply skipped");
    assert_eq!(harness.store.thread(920).unwrap().reply_count, 0);
}
