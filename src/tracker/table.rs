//! Plain-text node table for the terminal (`meshtrack start --table`).

use super::NodeSnapshot;
use chrono::{DateTime, Utc};

const HEADERS: [&str; 6] = ["ID", "Callsign", "Lat", "Lon", "GPS time", "Status"];

/// Render one row per node with columns padded to the widest cell.
pub fn render(rows: &[NodeSnapshot]) -> String {
    let cells: Vec<[String; 6]> = rows
        .iter()
        .map(|r| {
            [
                r.event.node_id.clone(),
                r.event.callsign.clone().unwrap_or_default(),
                format!("{:.6}", r.event.latitude),
                format!("{:.6}", r.event.longitude),
                gps_time(r.event.timestamp),
                r.freshness.as_str().to_string(),
            ]
        })
        .collect();

    let mut widths = HEADERS.map(|h| h.chars().count());
    for row in &cells {
        for (w, cell) in widths.iter_mut().zip(row.iter()) {
            *w = (*w).max(cell.chars().count());
        }
    }

    let mut out = String::new();
    push_row(&mut out, &HEADERS.map(str::to_string), &widths);
    let rule: Vec<String> = widths.iter().map(|w| "-".repeat(*w)).collect();
    out.push_str(rule.join("-+-").as_str());
    out.push('\n');
    for row in &cells {
        push_row(&mut out, row, &widths);
    }
    out
}

fn push_row(out: &mut String, cells: &[String; 6], widths: &[usize; 6]) {
    let padded: Vec<String> = cells
        .iter()
        .zip(widths.iter())
        .map(|(c, w)| format!("{:<width$}", c, width = *w))
        .collect();
    out.push_str(padded.join(" | ").trim_end());
    out.push('\n');
}

/// GPS time in UTC, like every other timestamp meshtrack prints.
fn gps_time(t: DateTime<Utc>) -> String {
    t.format("%Y-%m-%d %H:%M:%S").to_string()
}
