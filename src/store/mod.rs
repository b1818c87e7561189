//! Object store client boundary.
//!
//! [`ObjectStore`] is the set of remote calls the driver is allowed to make:
//! whole or ranged GET, PUT, HEAD, DELETE, COPY, prefix listing, bulk
//! delete, container creation and capability discovery. Backends:
//!
//! - [`swift::SwiftStore`] talks to OpenStack Swift over HTTP.
//! - [`local::LocalStore`] keeps metadata in SQLite and payloads on disk.
//! - [`memory::MemoryStore`] keeps everything in process.
//!
//! Every backend honours manifest objects: reading an object whose metadata
//! carries a [`ManifestRef`] yields the concatenation of the referenced
//! segments.

use crate::models::{manifest::ManifestRef, object::ObjectInfo};
use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;
use std::{fmt, io};
use thiserror::Error;

pub mod local;
pub mod memory;
pub mod swift;

/// Streaming object body.
pub type ByteStream = BoxStream<'static, io::Result<Bytes>>;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("object not found")]
    NotFound,
    #[error("requested range not satisfiable")]
    RangeNotSatisfiable,
    #[error("unexpected status {status}: {body}")]
    Status { status: u16, body: String },
    #[error("authentication failed: {0}")]
    Auth(String),
    #[error("invalid response: {0}")]
    InvalidResponse(String),
    #[error("invalid name `{0}`")]
    InvalidName(String),
    #[error("{0} is not supported by this store")]
    Unsupported(&'static str),
    #[error("bulk delete left {failed} objects behind")]
    BulkDelete { failed: usize },
    #[error(transparent)]
    Http(#[from] reqwest::Error),
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
    #[error(transparent)]
    Io(#[from] io::Error),
}

impl StoreError {
    /// Build an error from a non-success HTTP status.
    pub fn from_status(status: u16, body: impl Into<String>) -> Self {
        match status {
            404 => StoreError::NotFound,
            416 => StoreError::RangeNotSatisfiable,
            _ => StoreError::Status {
                status,
                body: body.into(),
            },
        }
    }

    /// HTTP-equivalent status code of this error, when it has one.
    pub fn status_code(&self) -> Option<u16> {
        match self {
            StoreError::NotFound => Some(404),
            StoreError::RangeNotSatisfiable => Some(416),
            StoreError::Status { status, .. } => Some(*status),
            StoreError::Http(err) => err.status().map(|s| s.as_u16()),
            _ => None,
        }
    }
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Half-open byte range `[start, end)`; `end: None` reads to the end.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ByteRange {
    pub start: u64,
    pub end: Option<u64>,
}

impl ByteRange {
    pub fn from(start: u64) -> Self {
        Self { start, end: None }
    }

    pub fn bounded(start: u64, end: u64) -> Self {
        Self {
            start,
            end: Some(end),
        }
    }

    /// Value for an HTTP `Range` header. HTTP ranges are inclusive.
    pub fn header_value(&self) -> String {
        match self.end {
            Some(end) => format!("bytes={}-{}", self.start, end.saturating_sub(1)),
            None => format!("bytes={}-", self.start),
        }
    }

    /// Clamp the range to an object of `len` bytes.
    ///
    /// Fails with `RangeNotSatisfiable` when `start` is at or past `len`.
    pub fn resolve(&self, len: u64) -> StoreResult<(usize, usize)> {
        if self.start >= len {
            return Err(StoreError::RangeNotSatisfiable);
        }
        let end = self.end.map_or(len, |end| end.min(len));
        Ok((self.start as usize, end.max(self.start) as usize))
    }
}

impl fmt::Display for ByteRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.end {
            Some(end) => write!(f, "[{}, {})", self.start, end),
            None => write!(f, "[{}, ..)", self.start),
        }
    }
}

/// Per-object attributes set on PUT.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PutOptions {
    pub content_type: String,
    pub manifest: Option<ManifestRef>,
}

impl PutOptions {
    pub fn content_type(content_type: impl Into<String>) -> Self {
        Self {
            content_type: content_type.into(),
            manifest: None,
        }
    }

    pub fn with_manifest(mut self, manifest: ManifestRef) -> Self {
        self.manifest = Some(manifest);
        self
    }
}

/// Listing filter. With a delimiter, names sharing a prefix up to the next
/// delimiter are folded into one pseudo-directory entry.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ListOptions {
    pub prefix: String,
    pub delimiter: Option<char>,
}

impl ListOptions {
    pub fn prefix(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            delimiter: None,
        }
    }

    pub fn with_delimiter(mut self, delimiter: char) -> Self {
        self.delimiter = Some(delimiter);
        self
    }
}

/// A fully-qualified object location, used by bulk operations.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct ObjectTarget {
    pub container: String,
    pub name: String,
}

impl ObjectTarget {
    pub fn new(container: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            container: container.into(),
            name: name.into(),
        }
    }
}

/// Outcome of a bulk delete call. `errors` holds `(object, reason)` pairs.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct BulkDeleteSummary {
    pub deleted: u64,
    pub not_found: u64,
    pub errors: Vec<(String, String)>,
}

/// Optional features advertised by the store.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Capabilities {
    pub bulk_delete: bool,
}

#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Create `container` if it does not exist yet.
    async fn create_container(&self, container: &str) -> StoreResult<()>;

    /// Object metadata. For manifests `bytes` is the concatenated size.
    async fn head_object(&self, container: &str, name: &str) -> StoreResult<ObjectInfo>;

    /// Object body, optionally restricted to `range`.
    async fn get_object(
        &self,
        container: &str,
        name: &str,
        range: Option<ByteRange>,
    ) -> StoreResult<Bytes>;

    /// Streaming body from `offset` to the end of the object.
    async fn open_object(&self, container: &str, name: &str, offset: u64)
    -> StoreResult<ByteStream>;

    /// Create or replace an object.
    async fn put_object(
        &self,
        container: &str,
        name: &str,
        body: Bytes,
        options: PutOptions,
    ) -> StoreResult<()>;

    /// Server-side copy. Copying a manifest materialises its content.
    async fn copy_object(&self, from: &ObjectTarget, to: &ObjectTarget) -> StoreResult<()>;

    async fn delete_object(&self, container: &str, name: &str) -> StoreResult<()>;

    /// Delete many objects in one call, when the store supports it.
    async fn bulk_delete(&self, targets: &[ObjectTarget]) -> StoreResult<BulkDeleteSummary>;

    /// All objects matching `options`, in name order.
    async fn list_objects(
        &self,
        container: &str,
        options: &ListOptions,
    ) -> StoreResult<Vec<ObjectInfo>>;

    /// Probe the store's capability endpoint.
    async fn capabilities(&self) -> StoreResult<Capabilities>;
}

/// Fold a listing entry into a delimiter group.
///
/// Returns `Some(group)` when `name` has a delimiter after `prefix`, where
/// `group` is the name up to and including that delimiter.
pub(crate) fn common_prefix(name: &str, prefix: &str, delimiter: char) -> Option<String> {
    let rest = name.strip_prefix(prefix)?;
    let pos = rest.find(delimiter)?;
    Some(format!("{}{}", prefix, &rest[..pos + delimiter.len_utf8()]))
}

/// Whether `name` matches the prefix of a segment reference. Names after the
/// prefix must be an all-digit sequence number, optionally `/`-separated.
pub(crate) fn is_segment_of(manifest: &ManifestRef, name: &str) -> bool {
    name.strip_prefix(manifest.prefix.as_str())
        .map(|rest| rest.trim_start_matches('/'))
        .is_some_and(|rest| !rest.is_empty() && rest.bytes().all(|b| b.is_ascii_digit()))
}
