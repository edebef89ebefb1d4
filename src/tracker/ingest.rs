//! Background ingest: wires line sources and node-table polls to the sinks.
//!
//! A completed [`PositionEvent`] fans out to three places: the
//! [`NodeStateTable`], the [`TrackStore`] (on a blocking thread) and the live
//! broadcast feed. Storage failures are logged and counted; ingest carries on.

use super::{NodeStateTable, PositionEvent, SessionAssembler, Telemetry};
use crate::logutil::escape_log;
use crate::meshtastic::node_table::NodeTableReader;
use crate::metrics;
use crate::storage::TrackStore;
use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{broadcast, mpsc};

/// Shared sinks for completed position events.
#[derive(Clone)]
pub struct Tracker {
    nodes: Arc<NodeStateTable>,
    store: TrackStore,
    feed: broadcast::Sender<PositionEvent>,
}

impl Tracker {
    pub fn new(store: TrackStore, feed_capacity: usize) -> Self {
        let (feed, _) = broadcast::channel(feed_capacity.max(1));
        Self {
            nodes: Arc::new(NodeStateTable::new()),
            store,
            feed,
        }
    }

    pub fn nodes(&self) -> &Arc<NodeStateTable> {
        &self.nodes
    }

    pub fn store(&self) -> &TrackStore {
        &self.store
    }

    /// Live feed of completed events. Slow receivers see `Lagged`.
    pub fn subscribe(&self) -> broadcast::Receiver<PositionEvent> {
        self.feed.subscribe()
    }

    /// Apply one event to every sink.
    ///
    /// `last_seen` defaults to now. With `persist` false the node table is
    /// refreshed but no track point is written and nothing is broadcast.
    pub async fn record(
        &self,
        event: PositionEvent,
        telemetry: Telemetry,
        last_seen: Option<DateTime<Utc>>,
        persist: bool,
    ) {
        self.nodes.upsert_at(
            event.clone(),
            telemetry,
            last_seen.unwrap_or_else(Utc::now),
        );
        if !persist {
            return;
        }

        let store = self.store.clone();
        let to_store = event.clone();
        match tokio::task::spawn_blocking(move || store.record_event(&to_store)).await {
            Ok(Ok(count)) => debug!("Track of {} now has {} points", event.node_id, count),
            Ok(Err(e)) => {
                metrics::inc_storage_failures();
                warn!("Failed to persist position of {}: {}", event.node_id, e);
            }
            Err(e) => {
                metrics::inc_storage_failures();
                warn!("Track writer for {} panicked: {}", event.node_id, e);
            }
        }

        let total = metrics::record_event(&event.node_id);
        debug!("Node {} has {} events this run", event.node_id, total);
        // No subscribers is not an error
        let _ = self.feed.send(event);
    }
}

/// Drain console lines through `assembler` until every sender is dropped.
pub async fn run_line_ingest(
    mut rx: mpsc::UnboundedReceiver<String>,
    tracker: Tracker,
    mut assembler: SessionAssembler,
) {
    while let Some(line) = rx.recv().await {
        metrics::inc_lines_received();
        match assembler.push_line(&line, Instant::now()) {
            Ok(Some(event)) => {
                info!(
                    "Position from {} ({}): {:.6}, {:.6} at {}",
                    event.node_id,
                    escape_log(event.display_name()),
                    event.latitude,
                    event.longitude,
                    event.timestamp.to_rfc3339()
                );
                tracker.record(event, Telemetry::default(), None, true).await;
            }
            Ok(None) => {}
            // Already counted and logged by the assembler
            Err(_) => {}
        }
    }
    info!("Line ingest finished: all line sources closed");
}

/// Poll the node table once. Returns the number of valid rows.
///
/// A failed read or parse is logged and leaves `reader` as it was, so the
/// next poll still knows which nodes already have a track point.
pub async fn poll_node_table_once(reader: &mut NodeTableReader, tracker: &Tracker) -> usize {
    metrics::inc_node_table_polls();
    let rows = match reader.poll_async(Utc::now()).await {
        Ok(rows) => rows,
        Err(e) => {
            warn!("Failed to read node table {}: {}", reader.path().display(), e);
            return 0;
        }
    };
    let count = rows.len();
    for row in rows {
        tracker
            .record(
                row.update.event,
                row.update.telemetry,
                Some(row.update.last_seen),
                row.moved,
            )
            .await;
    }
    count
}

/// Poll the node table every `interval` for the life of the process.
pub async fn run_node_table_poller(
    mut reader: NodeTableReader,
    interval: Duration,
    tracker: Tracker,
) {
    info!(
        "Polling node table {} every {:?}",
        reader.path().display(),
        interval
    );
    let mut ticker = tokio::time::interval(interval.max(Duration::from_secs(1)));
    loop {
        ticker.tick().await;
        let count = poll_node_table_once(&mut reader, &tracker).await;
        debug!("Node table poll: {} nodes with position", count);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn event(id: &str) -> PositionEvent {
        PositionEvent {
            node_id: id.to_string(),
            callsign: Some("ALPHA".into()),
            latitude: 55.7558,
            longitude: 37.6173,
            timestamp: Utc.timestamp_opt(1_717_000_000, 0).unwrap(),
        }
    }

    #[tokio::test]
    async fn record_updates_all_sinks() {
        let dir = tempfile::tempdir().unwrap();
        let tracker = Tracker::new(TrackStore::new(dir.path()).unwrap(), 8);
        let mut feed = tracker.subscribe();

        tracker
            .record(event("0x1a"), Telemetry::default(), None, true)
            .await;

        assert_eq!(tracker.nodes().len(), 1);
        assert_eq!(tracker.store().load("0x1a").unwrap().len(), 1);
        assert_eq!(feed.recv().await.unwrap().node_id, "0x1a");
    }

    #[test]
    fn record_without_persist_only_refreshes_table() {
        let dir = tempfile::tempdir().unwrap();
        let tracker = Tracker::new(TrackStore::new(dir.path()).unwrap(), 8);
        let mut feed = tracker.subscribe();
        let seen = Utc.timestamp_opt(1_717_000_500, 0).unwrap();
        tokio_test::block_on(tracker.record(
            event("0x1a"),
            Telemetry::default(),
            Some(seen),
            false,
        ));
        assert_eq!(tracker.nodes().snapshot_at(seen)[0].last_seen, seen);
        assert!(tracker.store().load("0x1a").unwrap().is_empty());
        assert!(feed.try_recv().is_err());
    }

    #[tokio::test]
    async fn invalid_id_is_kept_in_memory_but_not_persisted() {
        let dir = tempfile::tempdir().unwrap();
        let tracker = Tracker::new(TrackStore::new(dir.path()).unwrap(), 8);
        tracker
            .record(event("../escape"), Telemetry::default(), None, true)
            .await;
        assert!(tracker.nodes().get("../escape").is_some());
        assert!(!dir.path().join("escape.json").exists());
    }

    #[tokio::test]
    async fn line_ingest_emits_one_event_per_triple() {
        let dir = tempfile::tempdir().unwrap();
        let tracker = Tracker::new(TrackStore::new(dir.path()).unwrap(), 8);
        let (tx, rx) = mpsc::unbounded_channel();
        for line in [
            "Update DB node 0x1a2b3c4d",
            "Uncompressed device_callsign 'ALPHA'",
            "Position reply: time=1717000000 lat=557558000 lon=376173000",
            "Position reply: time=oops lat=1 lon=2",
        ] {
            tx.send(line.to_string()).unwrap();
        }
        drop(tx);

        run_line_ingest(rx, tracker.clone(), SessionAssembler::new()).await;

        let rows = tracker.nodes().snapshot();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].event.callsign.as_deref(), Some("ALPHA"));
        assert_eq!(tracker.store().load("0x1a2b3c4d").unwrap().len(), 1);
    }
}
