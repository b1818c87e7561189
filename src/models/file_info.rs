//! Stat result for a logical path.

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Size, kind and modification time of a logical file or directory.
///
/// Directories are pseudo-directory marker objects; their size is always
/// zero and their modification time is that of the marker.
#[derive(Serialize, Clone, Debug, PartialEq, Eq)]
pub struct FileInfo {
    /// Logical path, as passed to `stat`.
    pub path: String,

    /// Size in bytes. For segmented objects this is the sum of all segments.
    pub size: u64,

    /// Whether the path is a pseudo-directory.
    pub is_dir: bool,

    /// Last modification time reported by the store.
    pub modified: DateTime<Utc>,
}
