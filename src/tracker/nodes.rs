//! Last known state per node.
//!
//! Records are never removed; a node that stops reporting simply drifts from
//! `fresh` to `warning` to `stale`.

use super::{PositionEvent, Telemetry};
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::RwLock;

/// Minutes without an update before a node is flagged `warning`.
pub const WARNING_AFTER_MINUTES: i64 = 15;
/// Minutes without an update before a node is flagged `stale`.
pub const STALE_AFTER_MINUTES: i64 = 30;

/// How recently a node was heard from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Freshness {
    Fresh,
    Warning,
    Stale,
}

impl Freshness {
    /// Classify the time since the last update: under 15 minutes is fresh,
    /// 15 to 30 minutes is warning, beyond 30 minutes is stale.
    pub fn classify(elapsed: Duration) -> Self {
        if elapsed < Duration::minutes(WARNING_AFTER_MINUTES) {
            Freshness::Fresh
        } else if elapsed <= Duration::minutes(STALE_AFTER_MINUTES) {
            Freshness::Warning
        } else {
            Freshness::Stale
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Freshness::Fresh => "fresh",
            Freshness::Warning => "warning",
            Freshness::Stale => "stale",
        }
    }
}

#[derive(Debug, Clone)]
struct NodeRecord {
    event: PositionEvent,
    telemetry: Telemetry,
    last_seen: DateTime<Utc>,
}

/// One row of [`NodeStateTable::snapshot`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NodeSnapshot {
    pub event: PositionEvent,
    pub telemetry: Telemetry,
    pub last_seen: DateTime<Utc>,
    pub freshness: Freshness,
}

/// Shared node id → latest event mapping.
///
/// The lock is only held while the map itself is read or written; callers copy
/// out what they need before doing any I/O.
#[derive(Debug, Default)]
pub struct NodeStateTable {
    nodes: RwLock<HashMap<String, NodeRecord>>,
}

impl NodeStateTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `event` as the node's latest state, seen now.
    pub fn upsert(&self, event: PositionEvent, telemetry: Telemetry) {
        self.upsert_at(event, telemetry, Utc::now());
    }

    /// Record `event` as the node's latest state with an explicit `last_seen`.
    pub fn upsert_at(&self, event: PositionEvent, telemetry: Telemetry, last_seen: DateTime<Utc>) {
        let mut nodes = self
            .nodes
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        nodes.insert(
            event.node_id.clone(),
            NodeRecord {
                event,
                telemetry,
                last_seen,
            },
        );
    }

    pub fn snapshot(&self) -> Vec<NodeSnapshot> {
        self.snapshot_at(Utc::now())
    }

    /// Copy of all records, classified against `now`, ordered by node id.
    pub fn snapshot_at(&self, now: DateTime<Utc>) -> Vec<NodeSnapshot> {
        let nodes = self
            .nodes
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let mut rows: Vec<NodeSnapshot> = nodes
            .values()
            .map(|r| NodeSnapshot {
                event: r.event.clone(),
                telemetry: r.telemetry.clone(),
                last_seen: r.last_seen,
                freshness: Freshness::classify(now - r.last_seen),
            })
            .collect();
        drop(nodes);
        rows.sort_by(|a, b| a.event.node_id.cmp(&b.event.node_id));
        rows
    }

    pub fn get(&self, node_id: &str) -> Option<PositionEvent> {
        self.nodes
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(node_id)
            .map(|r| r.event.clone())
    }

    pub fn len(&self) -> usize {
        self.nodes
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
