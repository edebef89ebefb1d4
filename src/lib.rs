//! # Meshtrack - Position Tracker for Meshtastic Networks
//!
//! Meshtrack follows the position reports of Meshtastic/LoRa mesh radio nodes.
//! It reads the debug console of a locally attached radio (or a node table
//! exported by the Meshtastic interface library), keeps the last known state of
//! every node, persists per-node tracks and serves everything over a small
//! HTTP API.
//!
//! ## Features
//!
//! - **Console Parsing**: Reassembles position reports from the three console lines
//!   (`Update DB node`, `Uncompressed device_callsign`, `Position reply`) the firmware
//!   prints for every received position.
//! - **Node Table Polling**: Reads the interface library's node table export, including
//!   battery and voltage metrics.
//! - **Freshness**: Nodes are flagged fresh, warning (15 min) or stale (30 min).
//! - **Tracks**: Append-only JSON history per node, optional GPX mirror, synthetic
//!   track extension for testing map clients.
//! - **HTTP API**: Locations, simulation, route export, status and serial connect.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use meshtrack::storage::TrackStore;
//! use meshtrack::tracker::{ingest, SessionAssembler, Tracker};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let tracker = Tracker::new(TrackStore::new("./data")?, 256);
//!     let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
//!     tx.send("Update DB node 0x1a2b3c4d".to_string())?;
//!     tx.send("Uncompressed device_callsign 'ALPHA'".to_string())?;
//!     tx.send("Position reply: time=1717000000 lat=557558000 lon=376173000".to_string())?;
//!     drop(tx);
//!     ingest::run_line_ingest(rx, tracker.clone(), SessionAssembler::new()).await;
//!     println!("{} nodes", tracker.nodes().len());
//!     Ok(())
//! }
//! ```
//!
//! ## Module Organization
//!
//! - [`tracker`] - field extraction, session assembly, node state and ingest tasks
//! - [`meshtastic`] - serial/replay line sources and the node table reader
//! - [`storage`] - track persistence, simulation and route export
//! - [`api`] - HTTP endpoints
//! - [`config`] - configuration management
//! - [`validation`] - node id checks for anything that becomes a file name
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────┐
//! │    HTTP API     │ ← Locations, simulation, export
//! └─────────────────┘
//!          │
//! ┌─────────────────┐
//! │     Tracker     │ ← Assembler, node table, live feed
//! └─────────────────┘
//!     │         │
//! ┌────────┐ ┌─────────┐
//! │ Serial │ │ Storage │
//! └────────┘ └─────────┘
//! ```

pub mod api;
pub mod config;
pub mod errors;
pub mod logutil;
pub mod meshtastic;
pub mod metrics;
pub mod storage;
pub mod tracker;
pub mod validation;
