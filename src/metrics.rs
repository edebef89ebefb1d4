//! Process-wide ingest counters, reported by `GET /api/status`.
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, OnceLock};

static LINES_RECEIVED: AtomicU64 = AtomicU64::new(0);
static FIELDS_EXTRACTED: AtomicU64 = AtomicU64::new(0);
static DECODE_ERRORS: AtomicU64 = AtomicU64::new(0);
static EVENTS_EMITTED: AtomicU64 = AtomicU64::new(0);
static ACCUMULATOR_EXPIRED: AtomicU64 = AtomicU64::new(0);
static STORAGE_FAILURES: AtomicU64 = AtomicU64::new(0);
static NODE_TABLE_POLLS: AtomicU64 = AtomicU64::new(0);

static NODE_EVENTS: OnceLock<Mutex<HashMap<String, u64>>> = OnceLock::new();

pub fn inc_lines_received() {
    LINES_RECEIVED.fetch_add(1, Ordering::Relaxed);
}
pub fn inc_fields_extracted() {
    FIELDS_EXTRACTED.fetch_add(1, Ordering::Relaxed);
}
pub fn inc_decode_errors() {
    DECODE_ERRORS.fetch_add(1, Ordering::Relaxed);
}
pub fn inc_accumulator_expired() {
    ACCUMULATOR_EXPIRED.fetch_add(1, Ordering::Relaxed);
}
pub fn inc_storage_failures() {
    STORAGE_FAILURES.fetch_add(1, Ordering::Relaxed);
}
pub fn inc_node_table_polls() {
    NODE_TABLE_POLLS.fetch_add(1, Ordering::Relaxed);
}

fn node_events_lock() -> &'static Mutex<HashMap<String, u64>> {
    NODE_EVENTS.get_or_init(|| Mutex::new(HashMap::new()))
}

/// Count a completed position event for `node_id`. Returns the node's new total.
pub fn record_event(node_id: &str) -> u64 {
    EVENTS_EMITTED.fetch_add(1, Ordering::Relaxed);
    let mut guard = node_events_lock()
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner());
    let count = guard.entry(node_id.to_string()).or_default();
    *count = count.saturating_add(1);
    *count
}

pub fn node_events_snapshot() -> HashMap<String, u64> {
    node_events_lock()
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
        .clone()
}

#[derive(Debug, Default, Clone, Serialize)]
pub struct Snapshot {
    pub lines_received: u64,
    pub fields_extracted: u64,
    pub decode_errors: u64,
    pub events_emitted: u64,
    pub accumulator_expired: u64,
    pub storage_failures: u64,
    pub node_table_polls: u64,
}

pub fn snapshot() -> Snapshot {
    Snapshot {
        lines_received: LINES_RECEIVED.load(Ordering::Relaxed),
        fields_extracted: FIELDS_EXTRACTED.load(Ordering::Relaxed),
        decode_errors: DECODE_ERRORS.load(Ordering::Relaxed),
        events_emitted: EVENTS_EMITTED.load(Ordering::Relaxed),
        accumulator_expired: ACCUMULATOR_EXPIRED.load(Ordering::Relaxed),
        storage_failures: STORAGE_FAILURES.load(Ordering::Relaxed),
        node_table_polls: NODE_TABLE_POLLS.load(Ordering::Relaxed),
    }
}
