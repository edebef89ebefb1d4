//! Session assembler: stitches single-field console lines into position events.
//!
//! The firmware never delimits a record. The node id, callsign and position
//! arrive on separate lines in no fixed order, so the assembler keeps one
//! accumulator per line source and emits an event as soon as all five fields
//! (`id`, `callsign`, `lat`, `lon`, `time`) are present, then starts over
//! empty.
//!
//! The three lines share no correlation key. Two devices reporting at the same
//! time through one console will overwrite each other's partial fields; this
//! is a limitation of the console protocol. When a pending node id is replaced
//! by a different one the assembler logs a warning so it shows up in the logs.

use super::extract::{extract_field, ExtractedField};
use super::PositionEvent;
use crate::errors::DecodeError;
use crate::logutil::escape_log;
use crate::metrics;
use chrono::{DateTime, Utc};
use log::{debug, trace, warn};
use std::time::{Duration, Instant};

/// Partially filled event. All fields optional until the record completes.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Accumulator {
    pub id: Option<String>,
    pub callsign: Option<String>,
    pub lat: Option<f64>,
    pub lon: Option<f64>,
    pub time: Option<DateTime<Utc>>,
}

impl Accumulator {
    pub fn is_empty(&self) -> bool {
        self.id.is_none()
            && self.callsign.is_none()
            && self.lat.is_none()
            && self.lon.is_none()
            && self.time.is_none()
    }

    fn merge(&mut self, field: ExtractedField) {
        match field {
            ExtractedField::Position {
                time,
                latitude,
                longitude,
            } => {
                self.time = Some(time);
                self.lat = Some(latitude);
                self.lon = Some(longitude);
            }
            ExtractedField::Callsign(callsign) => self.callsign = Some(callsign),
            ExtractedField::NodeId(id) => {
                if let Some(pending) = self.id.as_deref() {
                    if pending != id {
                        warn!(
                            "Pending record for {} replaced by {} before completing (interleaved devices?)",
                            pending, id
                        );
                    }
                }
                self.id = Some(id);
            }
        }
    }

    /// Take a complete event out of the accumulator, leaving it empty.
    /// Leaves the accumulator untouched when a field is still missing.
    fn take_complete(&mut self) -> Option<PositionEvent> {
        if self.id.is_none()
            || self.callsign.is_none()
            || self.lat.is_none()
            || self.lon.is_none()
            || self.time.is_none()
        {
            return None;
        }
        let acc = std::mem::take(self);
        Some(PositionEvent {
            node_id: acc.id?,
            callsign: acc.callsign,
            latitude: acc.lat?,
            longitude: acc.lon?,
            timestamp: acc.time?,
        })
    }
}

/// Per line-source accumulator state machine.
#[derive(Debug, Default)]
pub struct SessionAssembler {
    acc: Accumulator,
    last_merge: Option<Instant>,
    max_age: Option<Duration>,
}

impl SessionAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Discard partial records whose last field is older than `max_age`.
    /// `None` keeps partial records indefinitely.
    pub fn with_timeout(max_age: Option<Duration>) -> Self {
        Self {
            max_age: max_age.filter(|d| !d.is_zero()),
            ..Self::default()
        }
    }

    pub fn accumulator(&self) -> &Accumulator {
        &self.acc
    }

    /// Feed one console line. Decode errors leave the accumulator untouched.
    pub fn push_line(
        &mut self,
        line: &str,
        now: Instant,
    ) -> Result<Option<PositionEvent>, DecodeError> {
        match extract_field(line) {
            Ok(Some(field)) => {
                metrics::inc_fields_extracted();
                Ok(self.apply(field, now))
            }
            Ok(None) => Ok(None),
            Err(e) => {
                metrics::inc_decode_errors();
                debug!("Dropping undecodable line: {} ({})", escape_log(line), e);
                Err(e)
            }
        }
    }

    /// Merge one field and emit an event if the record is now complete.
    pub fn apply(&mut self, field: ExtractedField, now: Instant) -> Option<PositionEvent> {
        self.expire_stale(now);
        trace!("Merging {} field", field.kind());
        self.acc.merge(field);
        self.last_merge = Some(now);
        let event = self.acc.take_complete();
        if event.is_some() {
            self.last_merge = None;
        }
        event
    }

    fn expire_stale(&mut self, now: Instant) {
        let (Some(max_age), Some(last)) = (self.max_age, self.last_merge) else {
            return;
        };
        if !self.acc.is_empty() && now.saturating_duration_since(last) > max_age {
            debug!(
                "Discarding partial record after {:?} idle: {:?}",
                now.saturating_duration_since(last),
                self.acc
            );
            metrics::inc_accumulator_expired();
            self.acc = Accumulator::default();
            self.last_merge = None;
        }
    }
}
