//! src/store/local.rs
//!
//! LocalStore: Swift-like object storage backed by SQLite for metadata and
//! local disk for payloads. Payloads are sharded beneath
//! `base_path/{container}/{shard}/{shard}/{digest}` so object names never
//! become filesystem paths. Manifest objects are resolved on read by
//! concatenating every object in the referenced container whose name starts
//! with the manifest prefix.

use super::{
    BulkDeleteSummary, ByteRange, ByteStream, Capabilities, ListOptions, ObjectStore,
    ObjectTarget, PutOptions, StoreError, StoreResult, common_prefix,
};
use crate::models::{
    container::Container,
    manifest::ManifestRef,
    object::{ObjectInfo, ObjectRecord},
};
use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use chrono::Utc;
use futures::{StreamExt, stream};
use md5::Context;
use sqlx::SqlitePool;
use std::{
    collections::BTreeSet,
    io::{self, ErrorKind, SeekFrom},
    path::{Path, PathBuf},
    sync::Arc,
};
use tokio::{
    fs::{self, File},
    io::{AsyncSeekExt, AsyncWriteExt},
};
use tokio_util::io::ReaderStream;
use tracing::debug;
use uuid::Uuid;

const MIGRATIONS: &str = include_str!("../../migrations/0001_init.sql");
const MAX_OBJECT_NAME_LEN: usize = 1024;
const MAX_CONTAINER_NAME_LEN: usize = 256;
const SELECT_OBJECT: &str = "SELECT container, name, size_bytes, content_type, etag, \
                             last_modified, object_manifest FROM objects";

/// Local object store sharing one SQLite pool and one payload directory.
#[derive(Clone)]
pub struct LocalStore {
    /// Shared SQLite connection pool used for metadata operations.
    pub db: Arc<SqlitePool>,

    /// Base directory on disk where object payloads are stored.
    pub base_path: PathBuf,
}

impl LocalStore {
    /// Create a LocalStore backed by the provided SQLite pool and using
    /// `base_path` as the root directory for payloads.
    pub fn new(db: Arc<SqlitePool>, base_path: impl Into<PathBuf>) -> Self {
        Self {
            db,
            base_path: base_path.into(),
        }
    }

    /// Run the embedded schema statements. Safe to call repeatedly.
    pub async fn migrate(&self) -> StoreResult<()> {
        let statements = MIGRATIONS
            .split(';')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>();

        debug!("running {} migration statements", statements.len());
        for stmt in statements {
            sqlx::query(stmt).execute(&*self.db).await?;
        }
        Ok(())
    }

    /// Reject empty, oversized, or control-character object names.
    fn ensure_name_safe(&self, name: &str) -> StoreResult<()> {
        if name.is_empty()
            || name.len() > MAX_OBJECT_NAME_LEN
            || name.bytes().any(|b| b.is_ascii_control())
        {
            return Err(StoreError::InvalidName(name.to_string()));
        }
        Ok(())
    }

    fn ensure_container_name_safe(&self, container: &str) -> StoreResult<()> {
        if container.is_empty()
            || container.len() > MAX_CONTAINER_NAME_LEN
            || container.contains('/')
            || container.starts_with('.')
            || container.bytes().any(|b| b.is_ascii_control())
        {
            return Err(StoreError::InvalidName(container.to_string()));
        }
        Ok(())
    }

    fn container_root(&self, container: &str) -> PathBuf {
        self.base_path.join(container)
    }

    /// Two-level shard directories plus file name, all from MD5(container/name).
    fn payload_path(&self, container: &str, name: &str) -> PathBuf {
        let digest = md5::compute(format!("{}/{}", container, name));
        let mut path = self.container_root(container);
        path.push(format!("{:02x}", digest[0]));
        path.push(format!("{:02x}", digest[1]));
        path.push(format!("{:x}", digest));
        path
    }

    async fn fetch_container(&self, container: &str) -> StoreResult<Container> {
        self.ensure_container_name_safe(container)?;
        sqlx::query_as::<_, Container>("SELECT name, created_at FROM containers WHERE name = ?")
            .bind(container)
            .fetch_one(&*self.db)
            .await
            .map_err(|err| match err {
                sqlx::Error::RowNotFound => StoreError::NotFound,
                other => StoreError::Sqlx(other),
            })
    }

    async fn fetch_object(&self, container: &str, name: &str) -> StoreResult<ObjectRecord> {
        sqlx::query_as::<_, ObjectRecord>(&format!(
            "{SELECT_OBJECT} WHERE container = ? AND name = ?"
        ))
        .bind(container)
        .bind(name)
        .fetch_one(&*self.db)
        .await
        .map_err(|err| match err {
            sqlx::Error::RowNotFound => StoreError::NotFound,
            other => StoreError::Sqlx(other),
        })
    }

    /// Records whose name starts with `prefix`, in byte order.
    async fn fetch_prefixed(
        &self,
        container: &str,
        prefix: &str,
    ) -> StoreResult<Vec<ObjectRecord>> {
        Ok(sqlx::query_as::<_, ObjectRecord>(&format!(
            "{SELECT_OBJECT} WHERE container = ? AND substr(name, 1, ?) = ? ORDER BY name ASC"
        ))
        .bind(container)
        .bind(prefix.chars().count() as i64)
        .bind(prefix)
        .fetch_all(&*self.db)
        .await?)
    }

    /// Write `body` to a temp file, fsync, then rename into place.
    /// Returns the MD5 etag of the payload.
    async fn write_payload(&self, file_path: &Path, body: &Bytes) -> StoreResult<String> {
        let parent = file_path.parent().map(Path::to_path_buf).ok_or_else(|| {
            StoreError::Io(io::Error::other("payload path missing parent directory"))
        })?;
        fs::create_dir_all(&parent).await?;
        let tmp_path = parent.join(format!(".tmp-{}", Uuid::new_v4()));
        let mut file = File::create(&tmp_path).await?;

        let mut digest = Context::new();
        digest.consume(body);
        if let Err(err) = file.write_all(body).await {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(StoreError::Io(err));
        }
        if let Err(err) = file.sync_all().await {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(StoreError::Io(err));
        }

        if let Err(err) = fs::rename(&tmp_path, file_path).await {
            if err.kind() == ErrorKind::AlreadyExists {
                fs::remove_file(file_path).await?;
                fs::rename(&tmp_path, file_path).await?;
            } else {
                let _ = fs::remove_file(&tmp_path).await;
                return Err(StoreError::Io(err));
            }
        }

        Ok(format!("{:x}", digest.compute()))
    }

    async fn read_payload(&self, record: &ObjectRecord) -> StoreResult<Bytes> {
        let path = self.payload_path(&record.container, &record.name);
        match fs::read(&path).await {
            Ok(data) => Ok(Bytes::from(data)),
            Err(err) if err.kind() == ErrorKind::NotFound => Err(StoreError::NotFound),
            Err(err) => Err(StoreError::Io(err)),
        }
    }

    fn manifest_of(record: &ObjectRecord) -> Option<ManifestRef> {
        record
            .object_manifest
            .as_deref()
            .and_then(ManifestRef::parse)
    }

    /// Logical content: the payload, or the concatenated segments of a manifest.
    async fn resolve(&self, record: &ObjectRecord) -> StoreResult<Bytes> {
        let Some(manifest) = Self::manifest_of(record) else {
            return self.read_payload(record).await;
        };
        let mut content = BytesMut::new();
        for segment in self.fetch_prefixed(&manifest.container, &manifest.prefix).await? {
            content.extend_from_slice(&self.read_payload(&segment).await?);
        }
        Ok(content.freeze())
    }

    async fn logical_size(&self, record: &ObjectRecord) -> StoreResult<u64> {
        let Some(manifest) = Self::manifest_of(record) else {
            return Ok(record.size_bytes.max(0) as u64);
        };
        let (total,): (i64,) = sqlx::query_as(
            "SELECT COALESCE(SUM(size_bytes), 0) FROM objects \
             WHERE container = ? AND substr(name, 1, ?) = ?",
        )
        .bind(&manifest.container)
        .bind(manifest.prefix.chars().count() as i64)
        .bind(&manifest.prefix)
        .fetch_one(&*self.db)
        .await?;
        Ok(total.max(0) as u64)
    }

    /// Recursively remove empty directories up to the container root.
    ///
    /// Stops when:
    /// - directory not empty
    /// - directory not found
    /// - reached root
    /// - encountered unexpected I/O errors
    async fn prune_empty_dirs(&self, start: &Path, stop: &Path) {
        let mut current = start.to_path_buf();
        while current.starts_with(stop) && current != stop {
            match fs::remove_dir(&current).await {
                Ok(_) => {
                    if let Some(parent) = current.parent() {
                        current = parent.to_path_buf();
                    } else {
                        break;
                    }
                }
                Err(err) if err.kind() == ErrorKind::NotFound => break,
                Err(err) if err.kind() == ErrorKind::DirectoryNotEmpty => break,
                Err(err) => {
                    debug!("failed to prune directory {}: {}", current.display(), err);
                    break;
                }
            }
        }
    }

    async fn insert_record(
        &self,
        container: &str,
        name: &str,
        body: Bytes,
        options: PutOptions,
    ) -> StoreResult<()> {
        self.ensure_name_safe(name)?;
        self.fetch_container(container).await?;

        let file_path = self.payload_path(container, name);
        let etag = self.write_payload(&file_path, &body).await?;

        let result = sqlx::query(
            r#"
            INSERT INTO objects (
                container, name, size_bytes, content_type, etag, last_modified, object_manifest
            ) VALUES (?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(container, name) DO UPDATE SET
                size_bytes = excluded.size_bytes,
                content_type = excluded.content_type,
                etag = excluded.etag,
                last_modified = excluded.last_modified,
                object_manifest = excluded.object_manifest
            "#,
        )
        .bind(container)
        .bind(name)
        .bind(body.len() as i64)
        .bind(&options.content_type)
        .bind(&etag)
        .bind(Utc::now())
        .bind(options.manifest.as_ref().map(ManifestRef::header_value))
        .execute(&*self.db)
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(err) => {
                let _ = fs::remove_file(&file_path).await;
                Err(StoreError::Sqlx(err))
            }
        }
    }
}

#[async_trait]
impl ObjectStore for LocalStore {
    async fn create_container(&self, container: &str) -> StoreResult<()> {
        self.ensure_container_name_safe(container)?;
        fs::create_dir_all(self.container_root(container)).await?;
        sqlx::query("INSERT OR IGNORE INTO containers (name, created_at) VALUES (?, ?)")
            .bind(container)
            .bind(Utc::now())
            .execute(&*self.db)
            .await?;
        Ok(())
    }

    async fn head_object(&self, container: &str, name: &str) -> StoreResult<ObjectInfo> {
        let record = self.fetch_object(container, name).await?;
        let bytes = self.logical_size(&record).await?;
        let mut info = ObjectInfo::from(record);
        info.bytes = bytes;
        Ok(info)
    }

    async fn get_object(
        &self,
        container: &str,
        name: &str,
        range: Option<ByteRange>,
    ) -> StoreResult<Bytes> {
        let record = self.fetch_object(container, name).await?;
        let content = self.resolve(&record).await?;
        match range {
            Some(range) => {
                let (start, end) = range.resolve(content.len() as u64)?;
                Ok(content.slice(start..end))
            }
            None => Ok(content),
        }
    }

    async fn open_object(
        &self,
        container: &str,
        name: &str,
        offset: u64,
    ) -> StoreResult<ByteStream> {
        let record = self.fetch_object(container, name).await?;
        if record.object_manifest.is_some() {
            let content = self.resolve(&record).await?;
            let (start, end) = ByteRange::from(offset).resolve(content.len() as u64)?;
            let body = content.slice(start..end);
            return Ok(Box::pin(stream::iter([Ok::<_, io::Error>(body)])));
        }

        ByteRange::from(offset).resolve(record.size_bytes.max(0) as u64)?;
        let path = self.payload_path(container, name);
        let mut file = File::open(&path).await.map_err(|err| {
            if err.kind() == ErrorKind::NotFound {
                StoreError::NotFound
            } else {
                StoreError::Io(err)
            }
        })?;
        file.seek(SeekFrom::Start(offset)).await?;
        Ok(ReaderStream::new(file).boxed())
    }

    async fn put_object(
        &self,
        container: &str,
        name: &str,
        body: Bytes,
        options: PutOptions,
    ) -> StoreResult<()> {
        self.insert_record(container, name, body, options).await
    }

    async fn copy_object(&self, from: &ObjectTarget, to: &ObjectTarget) -> StoreResult<()> {
        let source = self.fetch_object(&from.container, &from.name).await?;
        let content = self.resolve(&source).await?;
        self.insert_record(
            &to.container,
            &to.name,
            content,
            PutOptions::content_type(source.content_type),
        )
        .await
    }

    async fn delete_object(&self, container: &str, name: &str) -> StoreResult<()> {
        let result = sqlx::query("DELETE FROM objects WHERE container = ? AND name = ?")
            .bind(container)
            .bind(name)
            .execute(&*self.db)
            .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound);
        }

        let file_path = self.payload_path(container, name);
        match fs::remove_file(&file_path).await {
            Ok(_) => debug!("removed payload {}", file_path.display()),
            Err(err) if err.kind() == ErrorKind::NotFound => {
                debug!("payload {} already missing", file_path.display());
            }
            Err(err) => return Err(StoreError::Io(err)),
        }

        if let Some(parent) = file_path.parent() {
            let root = self.container_root(container);
            self.prune_empty_dirs(parent, &root).await;
        }
        Ok(())
    }

    async fn bulk_delete(&self, targets: &[ObjectTarget]) -> StoreResult<BulkDeleteSummary> {
        let mut summary = BulkDeleteSummary::default();
        for target in targets {
            match self.delete_object(&target.container, &target.name).await {
                Ok(()) => summary.deleted += 1,
                Err(StoreError::NotFound) => summary.not_found += 1,
                Err(err) => summary.errors.push((target.name.clone(), err.to_string())),
            }
        }
        Ok(summary)
    }

    async fn list_objects(
        &self,
        container: &str,
        options: &ListOptions,
    ) -> StoreResult<Vec<ObjectInfo>> {
        self.fetch_container(container).await?;
        let records = self.fetch_prefixed(container, &options.prefix).await?;

        let mut entries = Vec::new();
        let mut groups = BTreeSet::new();
        for record in records {
            if let Some(delimiter) = options.delimiter {
                if let Some(group) = common_prefix(&record.name, &options.prefix, delimiter) {
                    if groups.insert(group.clone()) {
                        entries.push(ObjectInfo::subdir(group));
                    }
                    continue;
                }
            }
            let mut entry = ObjectInfo::from(record);
            entry.manifest = None;
            entries.push(entry);
        }
        Ok(entries)
    }

    async fn capabilities(&self) -> StoreResult<Capabilities> {
        Ok(Capabilities { bulk_delete: true })
    }
}
