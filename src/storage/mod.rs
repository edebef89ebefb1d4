//! # Storage Module - Track and Route Persistence
//!
//! File-based, JSON serialized persistence for node tracks:
//!
//! ```text
//! data/
//! ├── tracks/         ← <node_id>.json, one array of {lat, lng, time} per node
//! │   └── Emu_<id>.json   ← derived tracks written by simulate_extend
//! └── routes/         ← <node_id>_route.json, produced by other tools (read-only here)
//! ```
//!
//! ## Concurrency
//!
//! Every track write is a read-modify-write performed while holding an
//! exclusive `fs2` lock on a per-node lock file, and the new content replaces
//! the old through a temp file + rename. Writers for different nodes never
//! contend; writers for the same node are serialized.
//!
//! All methods here block on file I/O. Async callers go through
//! `tokio::task::spawn_blocking`.

pub mod gpx;

use crate::config::{SimulationConfig, StorageConfig};
use crate::errors::StorageError;
use crate::tracker::PositionEvent;
use crate::validation::{filename_fragment, validate_node_id};
use chrono::{DateTime, Utc};
use fs2::FileExt;
use log::debug;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fs::{self, File, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

/// One historical position of a node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackPoint {
    pub lat: f64,
    pub lng: f64,
    #[serde(with = "time_compat")]
    pub time: DateTime<Utc>,
}

impl TrackPoint {
    pub fn from_event(event: &PositionEvent) -> Self {
        TrackPoint {
            lat: event.latitude,
            lng: event.longitude,
            time: event.timestamp,
        }
    }
}

/// Result of [`TrackStore::simulate_extend`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DerivedTrack {
    /// Key of the derived track (`Emu_<id>`).
    pub key: String,
    /// File name written under the tracks directory.
    pub file: String,
    /// Total points in the derived track.
    pub points: usize,
}

/// Per-node track files plus the read-only route directory.
#[derive(Debug, Clone)]
pub struct TrackStore {
    tracks_dir: PathBuf,
    routes_dir: PathBuf,
    gpx_dir: Option<PathBuf>,
    simulation: SimulationConfig,
}

impl TrackStore {
    /// Store rooted at `data_dir` with default layout and simulation settings.
    pub fn new(data_dir: impl AsRef<Path>) -> Result<Self, StorageError> {
        let data_dir = data_dir.as_ref();
        Self::open(
            data_dir.join("tracks"),
            data_dir.join("routes"),
            None,
            SimulationConfig::default(),
        )
    }

    pub fn from_config(
        storage: &StorageConfig,
        simulation: &SimulationConfig,
    ) -> Result<Self, StorageError> {
        let data_dir = Path::new(&storage.data_dir);
        Self::open(
            data_dir.join(&storage.tracks_dir),
            data_dir.join(&storage.routes_dir),
            storage.gpx_dir.as_ref().map(PathBuf::from),
            simulation.clone(),
        )
    }

    fn open(
        tracks_dir: PathBuf,
        routes_dir: PathBuf,
        gpx_dir: Option<PathBuf>,
        simulation: SimulationConfig,
    ) -> Result<Self, StorageError> {
        for dir in [Some(&tracks_dir), Some(&routes_dir), gpx_dir.as_ref()]
            .into_iter()
            .flatten()
        {
            fs::create_dir_all(dir).map_err(|e| StorageError::io(dir, e))?;
        }
        Ok(TrackStore {
            tracks_dir,
            routes_dir,
            gpx_dir,
            simulation,
        })
    }

    pub fn tracks_dir(&self) -> &Path {
        &self.tracks_dir
    }

    pub fn routes_dir(&self) -> &Path {
        &self.routes_dir
    }

    /// Path of the track file for `node_id` after validating the id.
    pub fn track_path(&self, node_id: &str) -> Result<PathBuf, StorageError> {
        let id = validate_node_id(node_id)?;
        Ok(self.tracks_dir.join(format!("{}.json", id)))
    }

    /// Current track of `node_id`; empty when the node has no track yet.
    pub fn load(&self, node_id: &str) -> Result<Vec<TrackPoint>, StorageError> {
        let path = self.track_path(node_id)?;
        read_track(&path)
    }

    /// Append one point to the node's track. Returns the new point count.
    pub fn append(&self, node_id: &str, point: TrackPoint) -> Result<usize, StorageError> {
        let path = self.track_path(node_id)?;
        let _guard = NodeLock::acquire(&self.tracks_dir, &path)?;
        let mut points = read_track(&path)?;
        points.push(point);
        write_track(&path, &points)?;
        debug!("Appended point to {} ({} points)", path.display(), points.len());
        Ok(points.len())
    }

    /// Append the event's position and refresh the GPX mirror when enabled.
    pub fn record_event(&self, event: &PositionEvent) -> Result<usize, StorageError> {
        let count = self.append(&event.node_id, TrackPoint::from_event(event))?;
        if let Some(dir) = &self.gpx_dir {
            let points = self.load(&event.node_id)?;
            let path = dir.join(gpx_file_name(&event.node_id, event.callsign.as_deref()));
            let name = event.display_name().to_string();
            let doc = gpx::render_track(&name, &points);
            write_atomic(&path, doc.as_bytes())?;
        }
        Ok(count)
    }

    /// Build a synthetic continuation of `node_id`'s track under a new key.
    pub fn simulate_extend(
        &self,
        node_id: &str,
        count: usize,
    ) -> Result<DerivedTrack, StorageError> {
        self.simulate_extend_with(node_id, count, &mut rand::thread_rng())
    }

    /// [`simulate_extend`](Self::simulate_extend) with a caller supplied RNG.
    ///
    /// Each new point moves from the previous one by an independent uniform
    /// offset in `[-step, step]` on each axis, rounded to 6 decimals. An empty
    /// track starts from the configured default point. The original track is
    /// only read.
    pub fn simulate_extend_with<R: Rng + ?Sized>(
        &self,
        node_id: &str,
        count: usize,
        rng: &mut R,
    ) -> Result<DerivedTrack, StorageError> {
        let mut points = self.load(node_id)?;
        // Only the source id is length-checked; the prefix may push the key past it
        let id = validate_node_id(node_id)?;
        let key = format!("{}{}", filename_fragment(&self.simulation.derived_prefix), id);
        let derived_path = self.tracks_dir.join(format!("{}.json", key));
        let step = self.simulation.step_degrees.abs();

        for _ in 0..count {
            let (lat, lng) = points
                .last()
                .map(|p| (p.lat, p.lng))
                .unwrap_or((self.simulation.start_lat, self.simulation.start_lng));
            points.push(TrackPoint {
                lat: round6(lat + rng.gen_range(-step..=step)),
                lng: round6(lng + rng.gen_range(-step..=step)),
                time: Utc::now(),
            });
        }

        let _guard = NodeLock::acquire(&self.tracks_dir, &derived_path)?;
        write_track(&derived_path, &points)?;
        Ok(DerivedTrack {
            file: format!("{}.json", key),
            key,
            points: points.len(),
        })
    }

    /// Raw content of the route file for `node_id`.
    pub fn export_route(&self, node_id: &str) -> Result<Vec<u8>, StorageError> {
        let id = validate_node_id(node_id)?;
        let path = self.routes_dir.join(route_file_name(id));
        match fs::read(&path) {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                Err(StorageError::NotFound(route_file_name(id)))
            }
            Err(e) => Err(StorageError::io(&path, e)),
        }
    }
}

/// File name of the route resource for a node.
pub fn route_file_name(node_id: &str) -> String {
    format!("{}_route.json", node_id)
}

/// GPX mirror file name: `<id>_<callsign>.gpx`, or `<id>.gpx` without a callsign.
pub fn gpx_file_name(node_id: &str, callsign: Option<&str>) -> String {
    let id = filename_fragment(node_id);
    match callsign.map(str::trim) {
        Some(c) if !c.is_empty() && c != "Unknown" => {
            format!("{}_{}.gpx", id, filename_fragment(c))
        }
        _ => format!("{}.gpx", id),
    }
}

fn round6(v: f64) -> f64 {
    (v * 1e6).round() / 1e6
}

fn read_track(path: &Path) -> Result<Vec<TrackPoint>, StorageError> {
    let content = match fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(StorageError::io(path, e)),
    };
    // Guard against accidental leading NULs from previous partial writes
    let cleaned = content.trim_start_matches('\0');
    if cleaned.trim().is_empty() {
        return Ok(Vec::new());
    }
    serde_json::from_str(cleaned).map_err(|e| StorageError::json(path, e))
}

fn write_track(path: &Path, points: &[TrackPoint]) -> Result<(), StorageError> {
    let content = serde_json::to_string_pretty(points).map_err(|e| StorageError::json(path, e))?;
    write_atomic(path, content.as_bytes())
}

/// Write `content` to a unique temp file next to `path`, then rename over it.
fn write_atomic(path: &Path, content: &[u8]) -> Result<(), StorageError> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    let base = path
        .file_name()
        .and_then(|s| s.to_str())
        .unwrap_or("track.json");
    let mut counter = 0u32;
    let tmp_path = loop {
        let candidate = dir.join(format!(".{}.tmp-{}-{}", base, std::process::id(), counter));
        match OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&candidate)
        {
            Ok(mut tmp) => {
                tmp.write_all(content)
                    .and_then(|_| tmp.flush())
                    .map_err(|e| StorageError::io(&candidate, e))?;
                let _ = tmp.sync_all();
                break candidate;
            }
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                counter = counter.saturating_add(1);
                continue;
            }
            Err(e) => return Err(StorageError::io(&candidate, e)),
        }
    };

    if let Err(e) = fs::rename(&tmp_path, path) {
        let _ = fs::remove_file(&tmp_path);
        return Err(StorageError::io(path, e));
    }
    if let Ok(dir_file) = File::open(dir) {
        let _ = dir_file.sync_all();
    }
    Ok(())
}

/// Exclusive lock on `<tracks>/.<file>.lock`, released on drop.
struct NodeLock {
    file: File,
}

impl NodeLock {
    fn acquire(dir: &Path, target: &Path) -> Result<Self, StorageError> {
        let base = target
            .file_name()
            .and_then(|s| s.to_str())
            .unwrap_or("track.json");
        let lock_path = dir.join(format!(".{}.lock", base));
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(&lock_path)
            .map_err(|e| StorageError::io(&lock_path, e))?;
        file.lock_exclusive()
            .map_err(|e| StorageError::io(&lock_path, e))?;
        Ok(NodeLock { file })
    }
}

impl Drop for NodeLock {
    fn drop(&mut self) {
        let _ = self.file.unlock();
    }
}

/// Track times are written as RFC 3339. Files produced by older tools carry
/// naive ISO-8601 timestamps without an offset; those are read as UTC.
mod time_compat {
    use chrono::{DateTime, NaiveDateTime, Utc};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(time: &DateTime<Utc>, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&time.to_rfc3339())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<DateTime<Utc>, D::Error> {
        let text = String::deserialize(d)?;
        parse(&text).ok_or_else(|| serde::de::Error::custom(format!("invalid time {:?}", text)))
    }

    pub fn parse(text: &str) -> Option<DateTime<Utc>> {
        let t = text.trim();
        if let Ok(dt) = DateTime::parse_from_rfc3339(t) {
            return Some(dt.with_timezone(&Utc));
        }
        ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"]
            .iter()
            .find_map(|fmt| NaiveDateTime::parse_from_str(t, fmt).ok())
            .map(|naive| naive.and_utc())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_naive_iso_times_as_utc() {
        let json = r#"[{"lat": 51.5, "lng": -0.1, "time": "2024-05-29T10:11:12.123456"}]"#;
        let points: Vec<TrackPoint> = serde_json::from_str(json).unwrap();
        assert_eq!(points[0].time.to_rfc3339(), "2024-05-29T10:11:12.123456+00:00");
    }

    #[test]
    fn gpx_name_falls_back_to_id() {
        assert_eq!(gpx_file_name("0x1a", Some("ALPHA")), "0x1a_ALPHA.gpx");
        assert_eq!(gpx_file_name("0x1a", Some("Unknown")), "0x1a.gpx");
        assert_eq!(gpx_file_name("0x1a", None), "0x1a.gpx");
        assert_eq!(gpx_file_name("!1a", Some("")), "_1a.gpx");
    }

    #[test]
    fn round6_keeps_six_decimals() {
        assert_eq!(round6(51.500_123_49), 51.500_123);
    }
}
