//! Node table exported by the Meshtastic interface library.
//!
//! The file is a JSON object keyed by node id, one entry per node as the
//! library keeps it in memory:
//!
//! ```json
//! {
//!   "!1a2b3c4d": {
//!     "user": {"id": "!1a2b3c4d", "longName": "Alpha Base", "shortName": "ALPH"},
//!     "position": {"latitude": 55.7558, "longitude": 37.6173, "altitude": 150, "time": 1717000000},
//!     "deviceMetrics": {"batteryLevel": 87.4, "voltage": 4.0512},
//!     "lastHeard": 1717000012
//!   }
//! }
//! ```
//!
//! Only this contract is read; unknown keys are ignored. Entries without a
//! usable position are skipped.

use crate::errors::StorageError;
use crate::tracker::extract::{epoch_to_utc, COORD_SCALE};
use crate::tracker::{PositionEvent, Telemetry};
use chrono::{DateTime, Utc};
use log::debug;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeTableEntry {
    #[serde(default)]
    pub user: Option<NodeUser>,
    #[serde(default)]
    pub position: Option<NodePosition>,
    #[serde(default)]
    pub device_metrics: Option<DeviceMetrics>,
    #[serde(default)]
    pub last_heard: Option<u64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeUser {
    pub id: Option<String>,
    pub long_name: Option<String>,
    pub short_name: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodePosition {
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    /// Raw integer readings, used when the float fields are missing.
    #[serde(rename = "latitudeI")]
    pub latitude_i: Option<i64>,
    #[serde(rename = "longitudeI")]
    pub longitude_i: Option<i64>,
    pub altitude: Option<i32>,
    pub time: Option<u64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceMetrics {
    pub battery_level: Option<f64>,
    pub voltage: Option<f64>,
}

/// One validated node-table row.
#[derive(Debug, Clone, PartialEq)]
pub struct NodeUpdate {
    pub event: PositionEvent,
    pub telemetry: Telemetry,
    pub last_seen: DateTime<Utc>,
}

impl NodeTableEntry {
    /// Convert to an event, or `None` when the entry has no usable position.
    pub fn to_update(&self, node_id: &str, now: DateTime<Utc>) -> Option<NodeUpdate> {
        let pos = self.position.as_ref()?;
        let latitude = pos
            .latitude
            .or_else(|| pos.latitude_i.map(|v| v as f64 / COORD_SCALE))?;
        let longitude = pos
            .longitude
            .or_else(|| pos.longitude_i.map(|v| v as f64 / COORD_SCALE))?;
        if !latitude.is_finite()
            || !longitude.is_finite()
            || !(-90.0..=90.0).contains(&latitude)
            || !(-180.0..=180.0).contains(&longitude)
        {
            debug!(
                "Skipping node {}: coordinates out of range ({}, {})",
                node_id, latitude, longitude
            );
            return None;
        }

        let last_seen = self.last_heard.and_then(|t| epoch_to_utc(t).ok()).unwrap_or(now);
        let timestamp = pos.time.and_then(|t| epoch_to_utc(t).ok()).unwrap_or(last_seen);
        let callsign = self.user.as_ref().and_then(|u| {
            u.long_name
                .as_deref()
                .or(u.short_name.as_deref())
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
        });
        let metrics = self.device_metrics.clone().unwrap_or_default();

        Some(NodeUpdate {
            event: PositionEvent {
                node_id: node_id.to_string(),
                callsign,
                latitude,
                longitude,
                timestamp,
            },
            telemetry: Telemetry {
                altitude: pos.altitude,
                battery: metrics
                    .battery_level
                    .filter(|b| b.is_finite() && *b >= 0.0)
                    .map(|b| b.round() as u32),
                voltage: metrics
                    .voltage
                    .filter(|v| v.is_finite())
                    .map(|v| (v * 100.0).round() / 100.0),
            },
            last_seen,
        })
    }
}

/// Parse a node table document into validated updates, ordered by node id.
pub fn parse_node_table(json: &str, now: DateTime<Utc>) -> Result<Vec<NodeUpdate>, serde_json::Error> {
    let table: HashMap<String, NodeTableEntry> = serde_json::from_str(json)?;
    let mut updates: Vec<NodeUpdate> = table
        .iter()
        .filter_map(|(id, entry)| {
            let update = entry.to_update(id, now);
            if update.is_none() {
                debug!("Node {} has no usable position; skipped", id);
            }
            update
        })
        .collect();
    updates.sort_by(|a, b| a.event.node_id.cmp(&b.event.node_id));
    Ok(updates)
}

/// Re-reads the exported table and reports which nodes moved since the last poll.
pub struct NodeTableReader {
    path: PathBuf,
    last_positions: HashMap<String, (f64, f64, DateTime<Utc>)>,
}

/// Result of one poll: every valid row plus a flag telling whether the
/// position differs from the previous poll.
#[derive(Debug, Clone, PartialEq)]
pub struct PolledNode {
    pub update: NodeUpdate,
    pub moved: bool,
}

impl NodeTableReader {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            last_positions: HashMap::new(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the table once. A missing file yields no rows.
    pub fn poll(&mut self, now: DateTime<Utc>) -> Result<Vec<PolledNode>, StorageError> {
        match std::fs::read_to_string(&self.path) {
            Ok(content) => self.apply(&content, now),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
            Err(e) => Err(StorageError::io(&self.path, e)),
        }
    }

    /// [`poll`](Self::poll) for async callers. The file is read with
    /// `tokio::fs`; the reader itself never leaves the calling task.
    pub async fn poll_async(
        &mut self,
        now: DateTime<Utc>,
    ) -> Result<Vec<PolledNode>, StorageError> {
        let read = tokio::fs::read_to_string(&self.path).await;
        match read {
            Ok(content) => self.apply(&content, now),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
            Err(e) => Err(StorageError::io(&self.path, e)),
        }
    }

    /// Diff one table document against the previous poll.
    ///
    /// A document that fails to parse leaves the remembered positions as
    /// they were.
    pub fn apply(
        &mut self,
        content: &str,
        now: DateTime<Utc>,
    ) -> Result<Vec<PolledNode>, StorageError> {
        let updates =
            parse_node_table(content, now).map_err(|e| StorageError::json(&self.path, e))?;
        Ok(updates
            .into_iter()
            .map(|update| {
                let key = (
                    update.event.latitude,
                    update.event.longitude,
                    update.event.timestamp,
                );
                let moved = self
                    .last_positions
                    .insert(update.event.node_id.clone(), key)
                    .map_or(true, |prev| prev != key);
                PolledNode { update, moved }
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.timestamp_opt(1_717_000_100, 0).unwrap()
    }

    #[test]
    fn full_entry_maps_all_fields() {
        let json = r#"{
            "!1a2b3c4d": {
                "num": 439041101,
                "user": {"id": "!1a2b3c4d", "longName": "Alpha Base", "shortName": "ALPH"},
                "position": {"latitude": 55.7558, "longitude": 37.6173, "altitude": 150, "time": 1717000000},
                "deviceMetrics": {"batteryLevel": 87.4, "voltage": 4.0512},
                "lastHeard": 1717000012
            }
        }"#;
        let rows = parse_node_table(json, now()).unwrap();
        assert_eq!(rows.len(), 1);
        let row = &rows[0];
        assert_eq!(row.event.node_id, "!1a2b3c4d");
        assert_eq!(row.event.callsign.as_deref(), Some("Alpha Base"));
        assert_eq!(row.event.timestamp.timestamp(), 1_717_000_000);
        assert_eq!(row.last_seen.timestamp(), 1_717_000_012);
        assert_eq!(row.telemetry.altitude, Some(150));
        assert_eq!(row.telemetry.battery, Some(87));
        assert_eq!(row.telemetry.voltage, Some(4.05));
    }

    #[test]
    fn entries_without_position_are_skipped() {
        let json = r#"{
            "!a": {"user": {"longName": "No Fix"}},
            "!b": {"position": {}},
            "!c": {"position": {"latitude": 91.0, "longitude": 0.0}},
            "!d": {"position": {"latitudeI": 557558000, "longitudeI": 376173000}}
        }"#;
        let rows = parse_node_table(json, now()).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].event.node_id, "!d");
        assert!((rows[0].event.latitude - 55.7558).abs() < 1e-9);
        assert_eq!(rows[0].event.callsign, None);
        assert_eq!(rows[0].last_seen, now());
    }

    #[test]
    fn reader_flags_only_changed_positions() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nodes.json");
        let mut reader = NodeTableReader::new(&path);
        assert!(reader.poll(now()).unwrap().is_empty());

        let doc = r#"{"!a": {"position": {"latitude": 1.0, "longitude": 2.0, "time": 100}}}"#;
        std::fs::write(&path, doc).unwrap();
        assert!(reader.poll(now()).unwrap()[0].moved);
        assert!(!reader.poll(now()).unwrap()[0].moved);

        let doc = r#"{"!a": {"position": {"latitude": 1.5, "longitude": 2.0, "time": 160}}}"#;
        std::fs::write(&path, doc).unwrap();
        assert!(reader.poll(now()).unwrap()[0].moved);
    }

    #[test]
    fn malformed_file_is_a_json_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nodes.json");
        std::fs::write(&path, "{not json").unwrap();
        let mut reader = NodeTableReader::new(&path);
        assert!(matches!(reader.poll(now()), Err(StorageError::Json { .. })));
    }

    #[test]
    fn bad_document_keeps_previous_positions() {
        let mut reader = NodeTableReader::new("nodes.json");
        let doc = r#"{"!a": {"position": {"latitude": 1.0, "longitude": 2.0, "time": 100}}}"#;
        assert!(reader.apply(doc, now()).unwrap()[0].moved);
        assert!(reader.apply("{truncated", now()).is_err());
        assert!(!reader.apply(doc, now()).unwrap()[0].moved);
    }
}
