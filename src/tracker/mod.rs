//! # Tracker core
//!
//! Turns a stream of console lines (or node-table polls) into per-node position
//! state:
//!
//! ```text
//! line ──► extract ──► SessionAssembler ──► PositionEvent ──┬─► NodeStateTable
//!                                                           ├─► TrackStore
//!                                                           └─► live feed
//! ```
//!
//! - [`extract`] - stateless field extraction from a single line
//! - [`assembler`] - the accumulator that stitches fields into events
//! - [`nodes`] - last known state per node with freshness tiers
//! - [`ingest`] - background tasks wiring sources to sinks
//! - [`table`] - plain-text rendering of the node table

pub mod assembler;
pub mod extract;
pub mod ingest;
pub mod nodes;
pub mod table;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub use assembler::SessionAssembler;
pub use ingest::Tracker;
pub use nodes::{Freshness, NodeSnapshot, NodeStateTable};

/// A completed position report for one node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PositionEvent {
    pub node_id: String,
    /// Human readable label. `None` when the source did not provide one.
    pub callsign: Option<String>,
    pub latitude: f64,
    pub longitude: f64,
    pub timestamp: DateTime<Utc>,
}

/// Device metrics that only the node-table source carries.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Telemetry {
    pub altitude: Option<i32>,
    /// Battery level in percent, rounded.
    pub battery: Option<u32>,
    /// Battery voltage rounded to two decimals.
    pub voltage: Option<f64>,
}

impl PositionEvent {
    /// Name shown to users: callsign when present and non-empty, otherwise the id.
    pub fn display_name(&self) -> &str {
        match self.callsign.as_deref() {
            Some(c) if !c.trim().is_empty() => c,
            _ => &self.node_id,
        }
    }
}
