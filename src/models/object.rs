//! Represents an object stored in a container.

use crate::models::manifest::ManifestRef;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Metadata of a single object as reported by the store.
///
/// Returned by HEAD (where `bytes` is the logical size, so a manifest reports
/// the total of its segments) and by listings (where a manifest reports its
/// own zero length and `manifest` is never populated).
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct ObjectInfo {
    /// Object name within its container.
    pub name: String,

    /// Size in bytes.
    pub bytes: u64,

    /// Content type (MIME type).
    pub content_type: String,

    /// Timestamp when the object was last modified.
    pub last_modified: DateTime<Utc>,

    /// Content hash reported by the store, if any.
    pub etag: Option<String>,

    /// Segment reference when this object is a manifest.
    pub manifest: Option<ManifestRef>,

    /// Listing-only grouping entry produced by a delimiter (`subdir`).
    pub pseudo_directory: bool,
}

impl ObjectInfo {
    /// A delimiter grouping entry; it has no backing object.
    pub fn subdir(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            bytes: 0,
            content_type: String::new(),
            last_modified: DateTime::<Utc>::default(),
            etag: None,
            manifest: None,
            pseudo_directory: true,
        }
    }
}

/// Row of the `objects` table in the local backend.
#[derive(Serialize, Deserialize, Clone, FromRow, Debug)]
pub struct ObjectRecord {
    /// Name of the owning container.
    pub container: String,

    /// Object name (path-like identifier within the container).
    pub name: String,

    /// Size of the stored payload in bytes.
    pub size_bytes: i64,

    /// Content type (MIME type).
    pub content_type: String,

    /// MD5 of the stored payload.
    pub etag: String,

    /// Timestamp when the object was last written.
    pub last_modified: DateTime<Utc>,

    /// `<container>/<prefix>` segment reference for manifests.
    pub object_manifest: Option<String>,
}

impl From<ObjectRecord> for ObjectInfo {
    fn from(record: ObjectRecord) -> Self {
        Self {
            manifest: record
                .object_manifest
                .as_deref()
                .and_then(ManifestRef::parse),
            name: record.name,
            bytes: record.size_bytes.max(0) as u64,
            content_type: record.content_type,
            last_modified: record.last_modified,
            etag: Some(record.etag),
            pseudo_directory: false,
        }
    }
}
