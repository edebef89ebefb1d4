//! End-to-end: captured console log → reader thread → ingest → sinks.

mod common;

use meshtrack::meshtastic::{spawn_line_reader, ConnectionStatus, ReplayLineSource};
use meshtrack::tracker::{ingest, SessionAssembler};
use std::sync::Arc;
use tokio::sync::{mpsc, watch};

const CAPTURE: &str = "\
INFO  | 12:00:00 1 Booting Meshtastic firmware\r
DEBUG | 12:00:01 2 [Router] Update DB node 0x1a2b3c4d, rx_time=1717000000\r
INFO  | 12:00:01 2 [Router] Uncompressed device_callsign 'ALPHA'\r
INFO  | 12:00:01 2 [Router] Position reply: time=1717000000 lat=557558000 lon=376173000\r
\r
INFO  | 12:00:05 3 [Router] Position reply: time=garbage lat=1 lon=2\r
DEBUG | 12:05:01 4 [Router] Update DB node 0x1a2b3c4d, rx_time=1717000300\r
INFO  | 12:05:01 4 [Router] Position reply: time=1717000300 lat=557560000 lon=376180000\r
INFO  | 12:05:01 4 [Router] Uncompressed device_callsign 'ALPHA'\r
DEBUG | 12:06:00 5 [Router] Update DB node 0x00ff00ff\r
";

#[tokio::test]
async fn test_replayed_capture_builds_track() {
    let (dir, tracker) = common::temp_tracker();
    let capture = dir.path().join("console.log");
    std::fs::write(&capture, CAPTURE).unwrap();

    let mut feed = tracker.subscribe();
    let (tx, rx) = mpsc::unbounded_channel();
    let (status_tx, status_rx) = watch::channel(ConnectionStatus::Disconnected);
    let source = ReplayLineSource::open(&capture).unwrap();
    let reader = spawn_line_reader(Box::new(source), tx, Arc::new(status_tx), false).unwrap();

    ingest::run_line_ingest(rx, tracker.clone(), SessionAssembler::new()).await;
    reader.join().unwrap();

    assert_eq!(*status_rx.borrow(), ConnectionStatus::Disconnected);
    let rows = tracker.nodes().snapshot();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].event.timestamp.timestamp(), 1_717_000_300);

    let track = tracker.store().load("0x1a2b3c4d").unwrap();
    assert_eq!(track.len(), 2);
    assert!((track[1].lat - 55.756).abs() < 1e-9);

    assert_eq!(feed.recv().await.unwrap().timestamp.timestamp(), 1_717_000_000);
    assert_eq!(feed.recv().await.unwrap().timestamp.timestamp(), 1_717_000_300);
}
