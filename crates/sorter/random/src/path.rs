//! Client path handling.

use crate::error::{SorterError, SorterResult};

/// Name of the leaf that represents a client whose path is also an
/// internal node.
pub(crate) const VIRTUAL_LEAF: &str = ".";

/// Split a client path into its segments.
///
/// Rejects the empty path, empty segments and the reserved `.` segment.
pub(crate) fn split(path: &str) -> SorterResult<Vec<&str>> {
    let invalid = |reason: &str| SorterError::InvalidPath {
        path: path.to_string(),
        reason: reason.to_string(),
    };

    if path.is_empty() {
        return Err(invalid("path is empty"));
    }

    let segments: Vec<&str> = path.split('/').collect();
    for segment in &segments {
        if segment.is_empty() {
            return Err(invalid("empty segment"));
        }
        if *segment == VIRTUAL_LEAF {
            return Err(invalid("'.' is a reserved segment"));
        }
    }
    Ok(segments)
}

/// Join a parent path and a child name. The root's path is empty.
pub(crate) fn join(parent: &str, name: &str) -> String {
    if parent.is_empty() {
        name.to_string()
    } else {
        format!("{}/{}", parent, name)
    }
}
