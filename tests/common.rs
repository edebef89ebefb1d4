//! Shared helpers for integration tests.
#![allow(dead_code)]

use chrono::{TimeZone, Utc};
use meshtrack::storage::TrackStore;
use meshtrack::tracker::{PositionEvent, Tracker};
use tempfile::TempDir;

pub const ID_LINE: &str =
    "DEBUG | 12:00:01 42 [Router] Update DB node 0x1a2b3c4d, rx_time=1717000000";
pub const CALLSIGN_LINE: &str =
    "INFO  | 12:00:01 42 [Router] Uncompressed device_callsign 'ALPHA'";
pub const POSITION_LINE: &str =
    "INFO  | 12:00:01 42 [Router] Position reply: time=1717000000 lat=557558000 lon=376173000";

pub fn position_line(time: u64, lat: i64, lon: i64) -> String {
    format!("Position reply: time={} lat={} lon={}", time, lat, lon)
}

pub fn event(id: &str, epoch: i64) -> PositionEvent {
    PositionEvent {
        node_id: id.to_string(),
        callsign: Some("ALPHA".to_string()),
        latitude: 55.7558,
        longitude: 37.6173,
        timestamp: Utc.timestamp_opt(epoch, 0).unwrap(),
    }
}

/// Tracker over a fresh temp data directory. Keep the `TempDir` alive.
pub fn temp_tracker() -> (TempDir, Tracker) {
    let dir = tempfile::tempdir().unwrap();
    let store = TrackStore::new(dir.path()).unwrap();
    (dir, Tracker::new(store, 16))
}
