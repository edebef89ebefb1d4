//! Node state table, freshness tiers and node-table polling.

mod common;

use chrono::{Duration, TimeZone, Utc};
use meshtrack::meshtastic::node_table::NodeTableReader;
use meshtrack::tracker::ingest::poll_node_table_once;
use meshtrack::tracker::{Freshness, NodeStateTable, Telemetry};

#[test]
fn test_freshness_tiers() {
    let table = NodeStateTable::new();
    let now = Utc.timestamp_opt(1_717_003_600, 0).unwrap();
    table.upsert_at(common::event("a", 1), Telemetry::default(), now - Duration::minutes(31));
    table.upsert_at(common::event("b", 1), Telemetry::default(), now - Duration::minutes(29));
    table.upsert_at(common::event("c", 1), Telemetry::default(), now - Duration::minutes(5));

    let tiers: Vec<(String, Freshness)> = table
        .snapshot_at(now)
        .into_iter()
        .map(|r| (r.event.node_id, r.freshness))
        .collect();
    assert_eq!(
        tiers,
        vec![
            ("a".to_string(), Freshness::Stale),
            ("b".to_string(), Freshness::Warning),
            ("c".to_string(), Freshness::Fresh),
        ]
    );
}

#[test]
fn test_second_upsert_wins() {
    let table = NodeStateTable::new();
    table.upsert(common::event("0x1a", 100), Telemetry::default());
    let mut second = common::event("0x1a", 200);
    second.latitude = 10.0;
    table.upsert(second.clone(), Telemetry::default());
    assert_eq!(table.len(), 1);
    assert_eq!(table.get("0x1a"), Some(second));
}

#[tokio::test]
async fn test_node_table_poll_feeds_tracker() {
    let (dir, tracker) = common::temp_tracker();
    let path = dir.path().join("nodes.json");
    std::fs::write(
        &path,
        r#"{
            "!a1": {
                "user": {"longName": "Alpha"},
                "position": {"latitude": 55.75, "longitude": 37.61, "altitude": 120, "time": 1717000000},
                "deviceMetrics": {"batteryLevel": 99.6, "voltage": 4.126},
                "lastHeard": 1717000005
            },
            "!b2": {"user": {"longName": "No position"}}
        }"#,
    )
    .unwrap();

    let mut reader = NodeTableReader::new(&path);
    let count = poll_node_table_once(&mut reader, &tracker).await;
    assert_eq!(count, 1);

    let rows = tracker.nodes().snapshot();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].event.display_name(), "Alpha");
    assert_eq!(rows[0].telemetry.battery, Some(100));
    assert_eq!(rows[0].telemetry.voltage, Some(4.13));
    assert_eq!(rows[0].last_seen.timestamp(), 1_717_000_005);
    assert_eq!(tracker.store().load("!a1").unwrap().len(), 1);

    // Unchanged position: refreshed in memory, no new track point
    let count = poll_node_table_once(&mut reader, &tracker).await;
    assert_eq!(count, 1);
    assert_eq!(tracker.store().load("!a1").unwrap().len(), 1);
}

#[tokio::test]
async fn test_unreadable_node_table_is_skipped() {
    let (dir, tracker) = common::temp_tracker();
    let path = dir.path().join("nodes.json");
    std::fs::write(&path, "[1, 2").unwrap();
    let count = poll_node_table_once(&mut NodeTableReader::new(&path), &tracker).await;
    assert_eq!(count, 0);
    assert!(tracker.nodes().is_empty());
}

#[tokio::test]
async fn test_failed_poll_does_not_duplicate_track_points() {
    let (dir, tracker) = common::temp_tracker();
    let path = dir.path().join("nodes.json");
    let doc = r#"{"!a1": {"position": {"latitude": 55.75, "longitude": 37.61, "time": 1717000000}}}"#;
    std::fs::write(&path, doc).unwrap();

    let mut reader = NodeTableReader::new(&path);
    assert_eq!(poll_node_table_once(&mut reader, &tracker).await, 1);

    // Export caught half written
    std::fs::write(&path, &doc[..20]).unwrap();
    assert_eq!(poll_node_table_once(&mut reader, &tracker).await, 0);

    std::fs::write(&path, doc).unwrap();
    assert_eq!(poll_node_table_once(&mut reader, &tracker).await, 1);
    assert_eq!(tracker.store().load("!a1").unwrap().len(), 1);
}
