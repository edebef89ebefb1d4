//! Node id validation for anything that turns an id into a file name.
//!
//! Node ids arrive from the radio console, the node-table export and HTTP query
//! strings. Before one is used to build `tracks/<id>.json` or
//! `routes/<id>_route.json` it must be a single, harmless path component.

/// Longest node id accepted as a file name component.
pub const MAX_NODE_ID_LEN: usize = 64;

/// Node id validation errors with helpful messages
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum NodeIdError {
    #[error("node id is empty")]
    Empty,

    #[error("node id is too long (maximum {max} characters)")]
    TooLong { max: usize },

    #[error("node id contains path separators or '..'")]
    PathTraversal,

    #[error("node id contains filesystem reserved characters")]
    FilesystemReserved,

    #[error("node id contains control characters")]
    ControlCharacters,
}

/// Validate a node id for use as a file name component. Returns the trimmed id.
pub fn validate_node_id(id: &str) -> Result<&str, NodeIdError> {
    let trimmed = id.trim();
    if trimmed.is_empty() {
        return Err(NodeIdError::Empty);
    }
    if trimmed.chars().count() > MAX_NODE_ID_LEN {
        return Err(NodeIdError::TooLong {
            max: MAX_NODE_ID_LEN,
        });
    }
    if trimmed.contains("..") || trimmed.contains('/') || trimmed.contains('\\') {
        return Err(NodeIdError::PathTraversal);
    }
    let fs_reserved = ['<', '>', ':', '"', '|', '?', '*', '\0'];
    if trimmed.chars().any(|c| fs_reserved.contains(&c)) {
        return Err(NodeIdError::FilesystemReserved);
    }
    if trimmed.chars().any(|c| c.is_control()) {
        return Err(NodeIdError::ControlCharacters);
    }
    Ok(trimmed)
}

/// Make a callsign usable inside a file name. Anything outside
/// `[A-Za-z0-9_-]` becomes `_`.
pub fn filename_fragment(text: &str) -> String {
    text.trim()
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '_' || c == '-' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_console_and_library_ids() {
        assert_eq!(validate_node_id("0x1a2b3c4d"), Ok("0x1a2b3c4d"));
        assert_eq!(validate_node_id(" !deadbeef "), Ok("!deadbeef"));
        assert_eq!(validate_node_id("Emu_0xabc"), Ok("Emu_0xabc"));
    }

    #[test]
    fn rejects_traversal_and_reserved() {
        assert_eq!(validate_node_id("../etc/passwd"), Err(NodeIdError::PathTraversal));
        assert_eq!(validate_node_id("a\\b"), Err(NodeIdError::PathTraversal));
        assert_eq!(validate_node_id("a:b"), Err(NodeIdError::FilesystemReserved));
        assert_eq!(validate_node_id("a\u{7}b"), Err(NodeIdError::ControlCharacters));
        assert_eq!(validate_node_id("   "), Err(NodeIdError::Empty));
        let long = "x".repeat(MAX_NODE_ID_LEN + 1);
        assert_eq!(
            validate_node_id(&long),
            Err(NodeIdError::TooLong {
                max: MAX_NODE_ID_LEN
            })
        );
    }

    #[test]
    fn fragment_replaces_unsafe_chars() {
        assert_eq!(filename_fragment("Alpha 1/2"), "Alpha_1_2");
        assert_eq!(filename_fragment("RU-7"), "RU-7");
    }
}
