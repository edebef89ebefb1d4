//! Logging utilities for raw device console lines so logs stay single-line.
//! Escapes control characters (ANSI colour codes in firmware logs included)
//! that otherwise break log readability.

/// Longest preview of a device line written to the log.
const MAX_PREVIEW: usize = 300;

/// Escape a string for single-line logging:
/// - `\n` => `\\n`
/// - `\r` => `\\r`
/// - `\t` => `\\t`
/// - backslash => `\\\\`
/// - ESC and other controls => `\\xNN`
///
/// Truncates very long strings with an ellipsis to cap log noise.
pub fn escape_log(s: &str) -> String {
    let mut out = String::with_capacity(s.len().min(MAX_PREVIEW) + 8);
    for (count, ch) in s.chars().enumerate() {
        if count >= MAX_PREVIEW {
            out.push('…');
            break;
        }
        match ch {
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if c.is_control() => {
                use std::fmt::Write;
                let _ = write!(&mut out, "\\x{:02X}", c as u32);
            }
            c => out.push(c),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::escape_log;

    #[test]
    fn escapes_newlines_and_ansi() {
        let s = "\u{1b}[34mDEBUG\u{1b}[0m Line1\nEnd";
        let esc = escape_log(s);
        assert_eq!(esc, "\\x1B[34mDEBUG\\x1B[0m Line1\\nEnd");
    }

    #[test]
    fn truncates_long_lines() {
        let s = "a".repeat(400);
        let esc = escape_log(&s);
        assert_eq!(esc.chars().count(), 301);
        assert!(esc.ends_with('…'));
    }
}
