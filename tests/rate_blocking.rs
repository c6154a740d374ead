//! Rate-based blocking scenarios: threshold behavior and whitelist
//! immunity.

mod common;

use common::{addr, context_in, record, EventProbe};
use vigild::blocker::UnblockOutcome;
use vigild::events::{Event, EventKind};

#[tokio::test]
async fn blocks_at_exactly_the_attempt_threshold() {
    let dir = tempfile::tempdir().unwrap();
    let ctx = context_in(dir.path()).await;
    let blocks = EventProbe::install(&ctx, EventKind::Block);
    let rate_events = EventProbe::install(&ctx, EventKind::RateLimitExceeded);

    // Threshold is 3: two attempts stay quiet.
    ctx.engine.process(&record("1.2.3.4", 22)).await;
    ctx.engine.process(&record("1.2.3.4", 22)).await;
    assert_eq!(blocks.len(), 0);
    assert!(!ctx.lists.is_blocked(addr("1.2.3.4")));

    // The third attempt crosses the threshold exactly.
    ctx.engine.process(&record("1.2.3.4", 22)).await;
    assert_eq!(blocks.len(), 1);
    assert_eq!(rate_events.len(), 1);
    assert!(ctx.lists.is_blocked(addr("1.2.3.4")));

    match &blocks.snapshot()[0] {
        Event::Block {
            addr: blocked,
            duration_secs,
            ..
        } => {
            assert_eq!(*blocked, addr("1.2.3.4"));
            assert_eq!(*duration_secs, 60);
        }
        other => panic!("unexpected event: {:?}", other),
    }

    // The store holds exactly one record for the address.
    let persisted = ctx.db.blocks().get("1.2.3.4").await.unwrap().unwrap();
    assert_eq!(persisted.duration_secs, 60);
    assert_eq!(ctx.db.blocks().count().await.unwrap(), 1);
}

#[tokio::test]
async fn separate_addresses_do_not_share_windows() {
    let dir = tempfile::tempdir().unwrap();
    let ctx = context_in(dir.path()).await;
    let blocks = EventProbe::install(&ctx, EventKind::Block);

    ctx.engine.process(&record("1.2.3.4", 22)).await;
    ctx.engine.process(&record("5.6.7.8", 22)).await;
    ctx.engine.process(&record("1.2.3.4", 22)).await;
    ctx.engine.process(&record("5.6.7.8", 22)).await;

    assert_eq!(blocks.len(), 0);
    assert_eq!(ctx.engine.window_len(addr("1.2.3.4")), 2);
    assert_eq!(ctx.engine.window_len(addr("5.6.7.8")), 2);
}

#[tokio::test]
async fn whitelisted_source_is_never_counted_or_blocked() {
    let dir = tempfile::tempdir().unwrap();
    let ctx = context_in(dir.path()).await;
    ctx.lists.whitelist_add(addr("8.8.8.8")).unwrap();

    let blocks = EventProbe::install(&ctx, EventKind::Block);
    let attempts = EventProbe::install(&ctx, EventKind::ConnectionAttempt);

    for _ in 0..100 {
        ctx.engine.process(&record("8.8.8.8", 22)).await;
    }

    assert_eq!(blocks.len(), 0);
    assert_eq!(attempts.len(), 0);
    assert_eq!(ctx.engine.window_len(addr("8.8.8.8")), 0);
    assert!(!ctx.lists.is_blocked(addr("8.8.8.8")));
    assert_eq!(ctx.db.blocks().count().await.unwrap(), 0);
}

#[tokio::test]
async fn block_then_unblock_restores_store_state() {
    let dir = tempfile::tempdir().unwrap();
    let ctx = context_in(dir.path()).await;

    for _ in 0..3 {
        ctx.engine.process(&record("9.9.9.9", 22)).await;
    }
    assert_eq!(ctx.db.blocks().count().await.unwrap(), 1);

    assert_eq!(
        ctx.blocker.unblock(addr("9.9.9.9")).await,
        UnblockOutcome::Removed
    );
    assert_eq!(ctx.db.blocks().count().await.unwrap(), 0);
    assert!(!ctx.lists.is_blocked(addr("9.9.9.9")));

    // Unblocking again is a quiet success.
    assert_eq!(
        ctx.blocker.unblock(addr("9.9.9.9")).await,
        UnblockOutcome::NotBlocked
    );
}

#[tokio::test]
async fn one_connection_attempt_event_per_accepted_line() {
    let dir = tempfile::tempdir().unwrap();
    let ctx = context_in(dir.path()).await;
    let attempts = EventProbe::install(&ctx, EventKind::ConnectionAttempt);

    ctx.engine.process(&record("4.4.4.4", 443)).await;
    assert_eq!(attempts.len(), 1);
}
