//! Filesystem-like storage driver over an object store.
//!
//! Paths are absolute, `/`-separated and map one-to-one onto object names
//! in the driver's container (below an optional prefix). Content written
//! with [`Driver::write_stream`] is kept as a manifest object pointing at
//! fixed-size segments in `<container>_segments`, which makes arbitrary
//! offset writes and resumable uploads possible on a store that only
//! supports whole-object PUTs.

use crate::{
    models::{file_info::FileInfo, manifest::ManifestRef},
    store::{ByteStream, ListOptions, ObjectStore, ObjectTarget, PutOptions, StoreError},
};
use bytes::Bytes;
use futures::stream;
use std::{fmt, sync::Arc};
use tracing::{debug, info, warn};

mod delete;
pub mod errors;
mod manifest;
pub mod segments;
mod writer;

pub use errors::{DriverError, DriverResult, WriteError, parse_error};

pub const DRIVER_NAME: &str = "swift";
pub const DEFAULT_CHUNK_SIZE: u64 = 20 << 20;
pub const MIN_CHUNK_SIZE: u64 = 1 << 20;
pub const DIRECTORY_MIME_TYPE: &str = "application/directory";
pub const CONTENT_TYPE: &str = "application/octet-stream";

const READINESS_PROBE: &str = "/.segment-fs-readiness";

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DriverOptions {
    pub container: String,
    /// Prepended to every store path. Leading and trailing `/` are ignored.
    pub prefix: String,
    pub chunk_size: u64,
}

impl DriverOptions {
    pub fn new(container: impl Into<String>) -> Self {
        Self {
            container: container.into(),
            prefix: String::new(),
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }

    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    pub fn with_chunk_size(mut self, chunk_size: u64) -> Self {
        self.chunk_size = chunk_size;
        self
    }
}

#[derive(Clone)]
pub struct Driver {
    store: Arc<dyn ObjectStore>,
    container: String,
    segments_container: String,
    prefix: String,
    chunk_size: u64,
    bulk_delete: bool,
}

impl fmt::Debug for Driver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Driver")
            .field("container", &self.container)
            .field("segments_container", &self.segments_container)
            .field("prefix", &self.prefix)
            .field("chunk_size", &self.chunk_size)
            .field("bulk_delete", &self.bulk_delete)
            .finish_non_exhaustive()
    }
}

impl Driver {
    /// Create both containers if needed and probe the store's capabilities.
    ///
    /// A failed capability probe is not fatal: the driver falls back to
    /// per-object deletes.
    pub async fn new(store: Arc<dyn ObjectStore>, options: DriverOptions) -> DriverResult<Self> {
        if options.container.is_empty() {
            return Err(DriverError::InvalidOption("container must not be empty".into()));
        }
        if options.chunk_size == 0 {
            return Err(DriverError::InvalidOption(
                "chunk size must be greater than zero".into(),
            ));
        }

        let segments_container = segments::segments_container(&options.container);
        for container in [&options.container, &segments_container] {
            store
                .create_container(container)
                .await
                .map_err(|source| DriverError::Store {
                    path: container.clone(),
                    source,
                })?;
            info!(container = %container, "container ready");
        }

        let bulk_delete = match store.capabilities().await {
            Ok(capabilities) => capabilities.bulk_delete,
            Err(err) => {
                warn!(error = %err, "capability discovery failed, bulk delete disabled");
                false
            }
        };

        Ok(Self {
            store,
            container: options.container,
            segments_container,
            prefix: options.prefix,
            chunk_size: options.chunk_size,
            bulk_delete,
        })
    }

    pub fn name(&self) -> &'static str {
        DRIVER_NAME
    }

    pub fn container(&self) -> &str {
        &self.container
    }

    pub fn segments_container(&self) -> &str {
        &self.segments_container
    }

    pub fn chunk_size(&self) -> u64 {
        self.chunk_size
    }

    pub fn bulk_delete_supported(&self) -> bool {
        self.bulk_delete
    }

    /// Whole content of the object at `path`.
    pub async fn get_content(&self, path: &str) -> DriverResult<Bytes> {
        validate_path(path, false)?;
        self.store
            .get_object(&self.container, &self.swift_path(path), None)
            .await
            .map_err(|err| parse_error(path, err))
    }

    /// Store `content` at `path` as a single object.
    pub async fn put_content(&self, path: &str, content: Bytes) -> DriverResult<()> {
        validate_path(path, false)?;
        self.create_parent_folders(path).await?;

        let name = self.swift_path(path);
        let previous = self.manifest_at(path, &name).await?;
        self.store
            .put_object(
                &self.container,
                &name,
                content,
                PutOptions::content_type(CONTENT_TYPE),
            )
            .await
            .map_err(|err| parse_error(path, err))?;

        if let Some(manifest) = previous {
            self.delete_manifest_segments(path, &manifest).await?;
        }
        Ok(())
    }

    /// Stream the content of `path` starting at `offset`.
    ///
    /// Offsets at or past the end yield an empty stream.
    pub async fn reader(&self, path: &str, offset: u64) -> DriverResult<ByteStream> {
        validate_path(path, false)?;
        match self
            .store
            .open_object(&self.container, &self.swift_path(path), offset)
            .await
        {
            Ok(body) => Ok(body),
            Err(StoreError::RangeNotSatisfiable) => {
                debug!(path, offset, "read past end");
                Ok(Box::pin(stream::empty()))
            }
            Err(err) => Err(parse_error(path, err)),
        }
    }

    pub async fn stat(&self, path: &str) -> DriverResult<FileInfo> {
        validate_path(path, false)?;
        let info = self
            .store
            .head_object(&self.container, &self.swift_path(path))
            .await
            .map_err(|err| parse_error(path, err))?;

        Ok(FileInfo {
            path: path.to_string(),
            size: info.bytes,
            is_dir: info.content_type == DIRECTORY_MIME_TYPE,
            modified: info.last_modified,
        })
    }

    /// Immediate children of `path`, as absolute paths.
    pub async fn list(&self, path: &str) -> DriverResult<Vec<String>> {
        validate_path(path, true)?;
        let mut prefix = self.store_dir(path);
        if !prefix.is_empty() {
            prefix.push('/');
        }

        let objects = self
            .store
            .list_objects(
                &self.container,
                &ListOptions::prefix(prefix).with_delimiter('/'),
            )
            .await
            .map_err(|err| parse_error(path, err))?;

        let children: Vec<String> = objects
            .into_iter()
            .filter(|object| !object.pseudo_directory)
            .map(|object| self.logical_path(&object.name))
            .collect();

        if children.is_empty() && path != "/" {
            // An empty listing is fine for an existing (empty) directory.
            self.store
                .head_object(&self.container, &self.swift_path(path))
                .await
                .map_err(|err| parse_error(path, err))?;
        }
        Ok(children)
    }

    /// Move `source` to `dest` with a server-side copy followed by a delete.
    ///
    /// A segmented source is materialised at `dest`, so its segments are
    /// removed afterwards, as are the segments of a segmented object that
    /// `dest` replaced.
    pub async fn move_object(&self, source: &str, dest: &str) -> DriverResult<()> {
        validate_path(source, false)?;
        validate_path(dest, false)?;

        let from = self.swift_path(source);
        let to = self.swift_path(dest);
        let info = self
            .store
            .head_object(&self.container, &from)
            .await
            .map_err(|err| parse_error(source, err))?;
        if from == to {
            return Ok(());
        }

        self.create_parent_folders(dest).await?;
        let replaced = self.manifest_at(dest, &to).await?;

        self.store
            .copy_object(
                &ObjectTarget::new(&self.container, &from),
                &ObjectTarget::new(&self.container, &to),
            )
            .await
            .map_err(|err| parse_error(source, err))?;
        self.store
            .delete_object(&self.container, &from)
            .await
            .map_err(|err| parse_error(source, err))?;
        debug!(source, dest, "moved");

        if let Some(manifest) = info.manifest {
            self.delete_manifest_segments(source, &manifest).await?;
        }
        if let Some(manifest) = replaced {
            self.delete_manifest_segments(dest, &manifest).await?;
        }
        Ok(())
    }

    pub fn url_for(&self, _path: &str) -> DriverResult<String> {
        Err(DriverError::Unsupported)
    }

    /// Check that the store answers requests for the driver's container.
    pub async fn verify_reachable(&self) -> DriverResult<()> {
        match self
            .store
            .head_object(&self.container, &self.swift_path(READINESS_PROBE))
            .await
        {
            Ok(_) | Err(StoreError::NotFound) => Ok(()),
            Err(source) => Err(DriverError::Store {
                path: READINESS_PROBE.to_string(),
                source,
            }),
        }
    }

    /// Store name of a logical path.
    fn swift_path(&self, path: &str) -> String {
        format!("{}{}", self.prefix.trim_end_matches('/'), path)
            .trim_start_matches('/')
            .to_string()
    }

    /// Store name of `path` without a trailing `/`, as used for prefix
    /// matching. Empty for the root of an unprefixed driver.
    fn store_dir(&self, path: &str) -> String {
        self.swift_path(path).trim_end_matches('/').to_string()
    }

    /// Logical path of a store name.
    fn logical_path(&self, name: &str) -> String {
        let name = name.trim_end_matches('/');
        let root = self.prefix.trim_matches('/');
        let relative = if root.is_empty() {
            name
        } else {
            name.strip_prefix(root).unwrap_or(name)
        };
        format!("/{}", relative.trim_start_matches('/'))
    }

    /// Manifest carried by the object at `name`, if the object exists.
    async fn manifest_at(
        &self,
        path: &str,
        name: &str,
    ) -> DriverResult<Option<ManifestRef>> {
        match self.store.head_object(&self.container, name).await {
            Ok(info) => Ok(info.manifest),
            Err(StoreError::NotFound) => Ok(None),
            Err(err) => Err(parse_error(path, err)),
        }
    }

    /// Create a directory marker for every missing ancestor of `path`.
    /// An ancestor that exists as a file makes `path` invalid.
    async fn create_parent_folders(&self, path: &str) -> DriverResult<()> {
        let mut dir = parent(path);
        while dir != "/" {
            let name = self.swift_path(dir);
            match self.store.head_object(&self.container, &name).await {
                Ok(info) if info.content_type == DIRECTORY_MIME_TYPE => {}
                Ok(_) => {
                    return Err(DriverError::InvalidPath {
                        path: path.to_string(),
                    });
                }
                Err(StoreError::NotFound) => {
                    self.store
                        .put_object(
                            &self.container,
                            &name,
                            Bytes::new(),
                            PutOptions::content_type(DIRECTORY_MIME_TYPE),
                        )
                        .await
                        .map_err(|err| parse_error(dir, err))?;
                    debug!(dir, "created directory marker");
                }
                Err(err) => return Err(parse_error(dir, err)),
            }
            dir = parent(dir);
        }
        Ok(())
    }
}

/// Parent directory of an absolute path; the parent of a top-level entry
/// is `/`.
fn parent(path: &str) -> &str {
    match path.rfind('/') {
        Some(0) | None => "/",
        Some(pos) => &path[..pos],
    }
}

/// Paths are absolute, without empty, `.` or `..` components. The root is
/// only accepted where `allow_root` is set.
fn validate_path(path: &str, allow_root: bool) -> DriverResult<()> {
    let invalid = || DriverError::InvalidPath {
        path: path.to_string(),
    };
    if path == "/" {
        return if allow_root { Ok(()) } else { Err(invalid()) };
    }
    let rest = path.strip_prefix('/').ok_or_else(invalid)?;
    if rest
        .split('/')
        .any(|component| component.is_empty() || component == "." || component == "..")
    {
        return Err(invalid());
    }
    Ok(())
}
