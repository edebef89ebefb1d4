//! Field extraction from Meshtastic firmware console lines.
//!
//! The firmware debug console reports a position exchange as three unrelated
//! log lines, for example:
//!
//! ```text
//! DEBUG | 12:01:07 [Router] Update DB node 0x1a2b3c4d, rx_time=1717000000
//! DEBUG | 12:01:07 [Router] Uncompressed device_callsign 'ALPHA-1'
//! INFO  | 12:01:07 [Router] Position reply: time=1717000000 lat=557558000 lon=376173000
//! ```
//!
//! [`extract_field`] looks at one line and returns at most one typed field.
//! Markers are checked in a fixed order (position, callsign, node id) and the
//! first marker present decides how the line is read.

use crate::errors::DecodeError;
use chrono::{DateTime, Utc};
use regex::Regex;
use std::sync::OnceLock;

/// Marker phrase of a position reply line.
pub const POSITION_MARKER: &str = "Position reply";
/// Marker phrase of a callsign line.
pub const CALLSIGN_MARKER: &str = "Uncompressed device_callsign";
/// Marker phrase of a node id line.
pub const NODE_ID_MARKER: &str = "Update DB node";

/// Position readings are integer degrees scaled by this factor.
pub const COORD_SCALE: f64 = 1e7;

/// One decoded field, ready to be merged into a session accumulator.
#[derive(Debug, Clone, PartialEq)]
pub enum ExtractedField {
    Position {
        time: DateTime<Utc>,
        latitude: f64,
        longitude: f64,
    },
    Callsign(String),
    NodeId(String),
}

impl ExtractedField {
    /// Short name used in logs.
    pub fn kind(&self) -> &'static str {
        match self {
            ExtractedField::Position { .. } => "position",
            ExtractedField::Callsign(_) => "callsign",
            ExtractedField::NodeId(_) => "id",
        }
    }
}

// Numeric groups are captured loosely (\S+) so that garbage after `time=` is
// reported as a DecodeError rather than silently ignored as a non-match.
fn position_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"Position reply: time=(\S+) lat=(\S+) lon=(\S+)").unwrap()
    })
}

fn callsign_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"Uncompressed device_callsign '(.*?)'").unwrap())
}

fn node_id_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"Update DB node (0x[0-9a-fA-F]+)\b").unwrap())
}

/// Extract at most one field from a console line.
///
/// Returns `Ok(None)` when no marker phrase is present, `Err` when a marker is
/// present but the line cannot be decoded.
pub fn extract_field(line: &str) -> Result<Option<ExtractedField>, DecodeError> {
    if line.contains(POSITION_MARKER) {
        return extract_position(line).map(Some);
    }
    if line.contains(CALLSIGN_MARKER) {
        let caps = callsign_pattern()
            .captures(line)
            .ok_or_else(|| malformed("callsign", line))?;
        return Ok(Some(ExtractedField::Callsign(caps[1].to_string())));
    }
    if line.contains(NODE_ID_MARKER) {
        let caps = node_id_pattern()
            .captures(line)
            .ok_or_else(|| malformed("id", line))?;
        return Ok(Some(ExtractedField::NodeId(caps[1].to_string())));
    }
    Ok(None)
}

fn extract_position(line: &str) -> Result<ExtractedField, DecodeError> {
    let caps = position_pattern()
        .captures(line)
        .ok_or_else(|| malformed("position", line))?;

    let epoch = parse_unsigned("time", &caps[1])?;
    let lat_raw = parse_signed("lat", &caps[2])?;
    let lon_raw = parse_signed("lon", &caps[3])?;

    let time = epoch_to_utc(epoch)?;
    let latitude = scale_coordinate("lat", lat_raw, 90.0)?;
    let longitude = scale_coordinate("lon", lon_raw, 180.0)?;

    Ok(ExtractedField::Position {
        time,
        latitude,
        longitude,
    })
}

/// Convert Unix epoch seconds to UTC with second resolution.
pub fn epoch_to_utc(epoch: u64) -> Result<DateTime<Utc>, DecodeError> {
    i64::try_from(epoch)
        .ok()
        .and_then(|secs| DateTime::<Utc>::from_timestamp(secs, 0))
        .ok_or(DecodeError::TimestampOutOfRange(epoch))
}

/// Divide a raw reading by 10^7 and check the result is within `±limit`.
pub fn scale_coordinate(field: &'static str, raw: i64, limit: f64) -> Result<f64, DecodeError> {
    let value = raw as f64 / COORD_SCALE;
    if !value.is_finite() || value.abs() > limit {
        return Err(DecodeError::CoordinateOutOfRange { field, value });
    }
    Ok(value)
}

fn parse_unsigned(field: &'static str, text: &str) -> Result<u64, DecodeError> {
    if !text.bytes().all(|b| b.is_ascii_digit()) {
        return Err(invalid_number(field, text));
    }
    text.parse::<u64>().map_err(|_| invalid_number(field, text))
}

fn parse_signed(field: &'static str, text: &str) -> Result<i64, DecodeError> {
    let digits = text.strip_prefix('-').unwrap_or(text);
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return Err(invalid_number(field, text));
    }
    text.parse::<i64>().map_err(|_| invalid_number(field, text))
}

fn invalid_number(field: &'static str, text: &str) -> DecodeError {
    DecodeError::InvalidNumber {
        field,
        value: text.to_string(),
    }
}

fn malformed(field: &'static str, line: &str) -> DecodeError {
    DecodeError::Malformed {
        field,
        line: crate::logutil::escape_log(line),
    }
}
