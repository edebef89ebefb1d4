//! GPX 1.1 rendering of a node track.

use super::TrackPoint;
use chrono::SecondsFormat;
use std::fmt::Write;

/// Render a complete GPX document with one track and one segment.
pub fn render_track(name: &str, points: &[TrackPoint]) -> String {
    let mut out = String::with_capacity(256 + points.len() * 96);
    out.push_str("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n");
    out.push_str(
        "<gpx version=\"1.1\" creator=\"meshtrack\" xmlns=\"http://www.topografix.com/GPX/1/1\">\n",
    );
    out.push_str("  <trk>\n");
    let _ = writeln!(out, "    <name>{}</name>", escape_xml(name));
    out.push_str("    <trkseg>\n");
    for p in points {
        let _ = writeln!(out, "      <trkpt lat=\"{}\" lon=\"{}\">", p.lat, p.lng);
        let _ = writeln!(
            out,
            "        <time>{}</time>",
            p.time.to_rfc3339_opts(SecondsFormat::Secs, true)
        );
        out.push_str("      </trkpt>\n");
    }
    out.push_str("    </trkseg>\n  </trk>\n</gpx>\n");
    out
}

fn escape_xml(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            c if c.is_control() => {}
            c => out.push(c),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    #[test]
    fn renders_points_in_order() {
        let points = vec![
            TrackPoint {
                lat: 55.7558,
                lng: 37.6173,
                time: Utc.timestamp_opt(1_717_000_000, 0).unwrap(),
            },
            TrackPoint {
                lat: 55.7559,
                lng: 37.6174,
                time: Utc.timestamp_opt(1_717_000_060, 0).unwrap(),
            },
        ];
        let doc = render_track("R&D <1>", &points);
        assert!(doc.starts_with("<?xml version=\"1.0\""));
        assert!(doc.contains("<name>R&amp;D &lt;1&gt;</name>"));
        let first = doc.find("lat=\"55.7558\"").unwrap();
        let second = doc.find("lat=\"55.7559\"").unwrap();
        assert!(first < second);
        assert!(doc.contains("<time>2024-05-29T16:26:40Z</time>"));
        assert!(doc.trim_end().ends_with("</gpx>"));
    }
}
