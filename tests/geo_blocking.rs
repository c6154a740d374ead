//! Geo-country blocking through the enforcement pipeline.

mod common;

use common::{addr, context_with, record, test_config, EventProbe};
use tokio_util::sync::CancellationToken;
use vigild::events::{Event, EventKind};

fn seed_geo(dir: &std::path::Path) {
    let zones = dir.join("GeoBlock").join("zones");
    std::fs::create_dir_all(&zones).unwrap();
    std::fs::write(zones.join("xx.zone"), "203.0.113.0/24\n").unwrap();
    std::fs::write(zones.join("yy.zone"), "198.51.100.0/24\n").unwrap();
    std::fs::write(
        dir.join("GeoBlock").join("blocked_countries.txt"),
        "# embargo list\nXX\n",
    )
    .unwrap();
}

#[tokio::test]
async fn blocked_country_triggers_geo_then_block() {
    let dir = tempfile::tempdir().unwrap();
    seed_geo(dir.path());
    let ctx = context_with(test_config(dir.path()), CancellationToken::new()).await;

    let geo_events = EventProbe::install(&ctx, EventKind::GeoBlock);
    let blocks = EventProbe::install(&ctx, EventKind::Block);

    ctx.engine.process(&record("203.0.113.5", 22)).await;

    assert_eq!(geo_events.len(), 1);
    match &geo_events.snapshot()[0] {
        Event::GeoBlock {
            addr: blocked,
            country,
            ..
        } => {
            assert_eq!(*blocked, addr("203.0.113.5"));
            assert_eq!(country, "XX");
        }
        other => panic!("unexpected event: {:?}", other),
    }

    assert_eq!(blocks.len(), 1);
    match &blocks.snapshot()[0] {
        Event::Block { duration_secs, .. } => assert_eq!(*duration_secs, 60),
        other => panic!("unexpected event: {:?}", other),
    }

    assert!(ctx.lists.is_blocked(addr("203.0.113.5")));
    assert!(ctx.db.blocks().get("203.0.113.5").await.unwrap().is_some());

    // A geo decision does not consume the rate window.
    assert_eq!(ctx.engine.window_len(addr("203.0.113.5")), 0);
}

#[tokio::test]
async fn unblocked_country_only_counts() {
    let dir = tempfile::tempdir().unwrap();
    seed_geo(dir.path());
    let ctx = context_with(test_config(dir.path()), CancellationToken::new()).await;
    let geo_events = EventProbe::install(&ctx, EventKind::GeoBlock);

    // YY resolves but is not in the blocked list.
    ctx.engine.process(&record("198.51.100.9", 22)).await;

    assert_eq!(geo_events.len(), 0);
    assert!(!ctx.lists.is_blocked(addr("198.51.100.9")));
    assert_eq!(ctx.engine.window_len(addr("198.51.100.9")), 1);
    assert_eq!(ctx.geo.country_of(addr("198.51.100.9")), "YY");
}
