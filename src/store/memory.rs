//! In-process object store.
//!
//! Behaves like a Swift cluster with dynamic large object support: a
//! manifest reads as the concatenation of its segments, listings report the
//! manifest's own (empty) payload, and copies materialise manifests. Used by
//! the `memory` backend and by the test suite, which can also make PUTs
//! fail after a number of successful calls.

use super::{
    BulkDeleteSummary, ByteRange, ByteStream, Capabilities, ListOptions, ObjectStore,
    ObjectTarget, PutOptions, StoreError, StoreResult, common_prefix,
};
use crate::models::{manifest::ManifestRef, object::ObjectInfo};
use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use chrono::{DateTime, Utc};
use futures::stream;
use std::{
    collections::{BTreeMap, BTreeSet},
    io,
    sync::{
        Mutex,
        atomic::{AtomicUsize, Ordering},
    },
};
use tokio::sync::RwLock;
use tracing::debug;

#[derive(Clone, Debug)]
struct StoredObject {
    data: Bytes,
    content_type: String,
    last_modified: DateTime<Utc>,
    etag: String,
    manifest: Option<ManifestRef>,
}

type Containers = BTreeMap<String, BTreeMap<String, StoredObject>>;

/// How an injected bulk delete failure shows up.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BulkDeleteFault {
    /// The request itself fails with a 503 and nothing is removed.
    Request,
    /// The request succeeds but reports every target as failed.
    PerObject,
}

pub struct MemoryStore {
    containers: RwLock<Containers>,
    bulk_delete: bool,
    /// Remaining PUTs allowed before injected failures start.
    put_budget: Mutex<Option<usize>>,
    bulk_fault: Mutex<Option<BulkDeleteFault>>,
    bulk_delete_calls: AtomicUsize,
}

impl MemoryStore {
    /// Create an empty store. `bulk_delete` controls the advertised
    /// capability and whether `bulk_delete` calls are accepted.
    pub fn new(bulk_delete: bool) -> Self {
        Self {
            containers: RwLock::new(BTreeMap::new()),
            bulk_delete,
            put_budget: Mutex::new(None),
            bulk_fault: Mutex::new(None),
            bulk_delete_calls: AtomicUsize::new(0),
        }
    }

    /// Let `successes` more PUTs through, then fail every PUT with a 503.
    pub fn fail_puts_after(&self, successes: usize) {
        *self.put_budget.lock().unwrap_or_else(|e| e.into_inner()) = Some(successes);
    }

    /// Make every following bulk delete fail as described by `fault`.
    pub fn fail_bulk_deletes(&self, fault: BulkDeleteFault) {
        *self.bulk_fault.lock().unwrap_or_else(|e| e.into_inner()) = Some(fault);
    }

    /// Stop injecting PUT and bulk delete failures.
    pub fn heal(&self) {
        *self.put_budget.lock().unwrap_or_else(|e| e.into_inner()) = None;
        *self.bulk_fault.lock().unwrap_or_else(|e| e.into_inner()) = None;
    }

    pub fn bulk_delete_calls(&self) -> usize {
        self.bulk_delete_calls.load(Ordering::SeqCst)
    }

    /// Names stored in `container`, in order. Empty if it does not exist.
    pub async fn object_names(&self, container: &str) -> Vec<String> {
        self.containers
            .read()
            .await
            .get(container)
            .map(|objects| objects.keys().cloned().collect())
            .unwrap_or_default()
    }

    /// Raw stored payload of one object, without manifest resolution.
    pub async fn raw_object(&self, container: &str, name: &str) -> Option<Bytes> {
        self.containers
            .read()
            .await
            .get(container)
            .and_then(|objects| objects.get(name))
            .map(|object| object.data.clone())
    }

    fn take_put_budget(&self) -> StoreResult<()> {
        let mut budget = self.put_budget.lock().unwrap_or_else(|e| e.into_inner());
        match budget.as_mut() {
            Some(0) => Err(StoreError::Status {
                status: 503,
                body: "injected failure".into(),
            }),
            Some(remaining) => {
                *remaining -= 1;
                Ok(())
            }
            None => Ok(()),
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new(true)
    }
}

fn lookup<'a>(
    containers: &'a Containers,
    container: &str,
    name: &str,
) -> StoreResult<&'a StoredObject> {
    containers
        .get(container)
        .and_then(|objects| objects.get(name))
        .ok_or(StoreError::NotFound)
}

/// Logical content of an object: manifests concatenate their segments.
fn resolve(containers: &Containers, object: &StoredObject) -> Bytes {
    let Some(manifest) = &object.manifest else {
        return object.data.clone();
    };
    let Some(segments) = containers.get(&manifest.container) else {
        return Bytes::new();
    };
    let mut content = BytesMut::new();
    for (_, segment) in segments
        .range(manifest.prefix.clone()..)
        .take_while(|(name, _)| name.starts_with(&manifest.prefix))
    {
        content.extend_from_slice(&segment.data);
    }
    content.freeze()
}

fn info(name: &str, object: &StoredObject, bytes: u64) -> ObjectInfo {
    ObjectInfo {
        name: name.to_string(),
        bytes,
        content_type: object.content_type.clone(),
        last_modified: object.last_modified,
        etag: Some(object.etag.clone()),
        manifest: object.manifest.clone(),
        pseudo_directory: false,
    }
}

#[async_trait]
impl ObjectStore for MemoryStore {
    async fn create_container(&self, container: &str) -> StoreResult<()> {
        self.containers
            .write()
            .await
            .entry(container.to_string())
            .or_default();
        Ok(())
    }

    async fn head_object(&self, container: &str, name: &str) -> StoreResult<ObjectInfo> {
        let containers = self.containers.read().await;
        let object = lookup(&containers, container, name)?;
        let bytes = resolve(&containers, object).len() as u64;
        Ok(info(name, object, bytes))
    }

    async fn get_object(
        &self,
        container: &str,
        name: &str,
        range: Option<ByteRange>,
    ) -> StoreResult<Bytes> {
        let containers = self.containers.read().await;
        let content = resolve(&containers, lookup(&containers, container, name)?);
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
        let body = self
            .get_object(container, name, Some(ByteRange::from(offset)))
            .await?;
        Ok(Box::pin(stream::iter([Ok::<_, io::Error>(body)])))
    }

    async fn put_object(
        &self,
        container: &str,
        name: &str,
        body: Bytes,
        options: PutOptions,
    ) -> StoreResult<()> {
        self.take_put_budget()?;
        let mut containers = self.containers.write().await;
        let objects = containers.get_mut(container).ok_or(StoreError::NotFound)?;
        debug!(container, name, size = body.len(), "memory put");
        let etag = format!("{:x}", md5::compute(&body));
        objects.insert(
            name.to_string(),
            StoredObject {
                data: body,
                content_type: options.content_type,
                last_modified: Utc::now(),
                etag,
                manifest: options.manifest,
            },
        );
        Ok(())
    }

    async fn copy_object(&self, from: &ObjectTarget, to: &ObjectTarget) -> StoreResult<()> {
        let mut containers = self.containers.write().await;
        let source = lookup(&containers, &from.container, &from.name)?;
        let data = resolve(&containers, source);
        let copied = StoredObject {
            etag: format!("{:x}", md5::compute(&data)),
            data,
            content_type: source.content_type.clone(),
            last_modified: Utc::now(),
            manifest: None,
        };
        containers
            .get_mut(&to.container)
            .ok_or(StoreError::NotFound)?
            .insert(to.name.clone(), copied);
        Ok(())
    }

    async fn delete_object(&self, container: &str, name: &str) -> StoreResult<()> {
        self.containers
            .write()
            .await
            .get_mut(container)
            .and_then(|objects| objects.remove(name))
            .map(|_| ())
            .ok_or(StoreError::NotFound)
    }

    async fn bulk_delete(&self, targets: &[ObjectTarget]) -> StoreResult<BulkDeleteSummary> {
        if !self.bulk_delete {
            return Err(StoreError::Unsupported("bulk delete"));
        }
        self.bulk_delete_calls.fetch_add(1, Ordering::SeqCst);

        let fault = *self.bulk_fault.lock().unwrap_or_else(|e| e.into_inner());
        match fault {
            Some(BulkDeleteFault::Request) => {
                return Err(StoreError::Status {
                    status: 503,
                    body: "injected failure".into(),
                });
            }
            Some(BulkDeleteFault::PerObject) => {
                return Ok(BulkDeleteSummary {
                    errors: targets
                        .iter()
                        .map(|target| {
                            (
                                format!("{}/{}", target.container, target.name),
                                "503 Service Unavailable".to_string(),
                            )
                        })
                        .collect(),
                    ..BulkDeleteSummary::default()
                });
            }
            None => {}
        }

        let mut containers = self.containers.write().await;
        let mut summary = BulkDeleteSummary::default();
        for target in targets {
            let removed = containers
                .get_mut(&target.container)
                .and_then(|objects| objects.remove(&target.name));
            match removed {
                Some(_) => summary.deleted += 1,
                None => summary.not_found += 1,
            }
        }
        Ok(summary)
    }

    async fn list_objects(
        &self,
        container: &str,
        options: &ListOptions,
    ) -> StoreResult<Vec<ObjectInfo>> {
        let containers = self.containers.read().await;
        let objects = containers.get(container).ok_or(StoreError::NotFound)?;

        let mut entries = Vec::new();
        let mut groups = BTreeSet::new();
        for (name, object) in objects
            .range(options.prefix.clone()..)
            .take_while(|(name, _)| name.starts_with(&options.prefix))
        {
            if let Some(delimiter) = options.delimiter {
                if let Some(group) = common_prefix(name, &options.prefix, delimiter) {
                    if groups.insert(group.clone()) {
                        entries.push(ObjectInfo::subdir(group));
                    }
                    continue;
                }
            }
            let mut entry = info(name, object, object.data.len() as u64);
            entry.manifest = None;
            entries.push(entry);
        }
        Ok(entries)
    }

    async fn capabilities(&self) -> StoreResult<Capabilities> {
        Ok(Capabilities {
            bulk_delete: self.bulk_delete,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn store_with_container() -> MemoryStore {
        let store = MemoryStore::new(true);
        store.create_container("c").await.unwrap();
        store.create_container("c_segments").await.unwrap();
        store
    }

    fn octets() -> PutOptions {
        PutOptions::content_type("application/octet-stream")
    }

    #[tokio::test]
    async fn manifest_reads_concatenate_segments() {
        let store = store_with_container().await;
        for (name, body) in [("f/0000000000000002", "FGH"), ("f/0000000000000001", "ABCDE")] {
            store
                .put_object("c_segments", name, Bytes::from(body), octets())
                .await
                .unwrap();
        }
        store
            .put_object(
                "c",
                "f",
                Bytes::new(),
                octets().with_manifest(ManifestRef::new("c_segments", "f/")),
            )
            .await
            .unwrap();

        assert_eq!(store.head_object("c", "f").await.unwrap().bytes, 8);
        assert_eq!(
            store.get_object("c", "f", None).await.unwrap(),
            Bytes::from("ABCDEFGH")
        );
        assert_eq!(
            store
                .get_object("c", "f", Some(ByteRange::bounded(3, 6)))
                .await
                .unwrap(),
            Bytes::from("DEF")
        );

        let listed = store
            .list_objects("c", &ListOptions::prefix(""))
            .await
            .unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].bytes, 0);
        assert!(listed[0].manifest.is_none());
    }

    #[tokio::test]
    async fn listing_folds_delimited_names() {
        let store = store_with_container().await;
        for name in ["a", "a/b", "a/c/d", "a/c/e", "b"] {
            store
                .put_object("c", name, Bytes::new(), octets())
                .await
                .unwrap();
        }
        let listed = store
            .list_objects("c", &ListOptions::prefix("a/").with_delimiter('/'))
            .await
            .unwrap();
        let names: Vec<_> = listed
            .iter()
            .map(|e| (e.name.as_str(), e.pseudo_directory))
            .collect();
        assert_eq!(names, vec![("a/b", false), ("a/c/", true)]);
    }

    #[tokio::test]
    async fn injected_put_failures() {
        let store = store_with_container().await;
        store.fail_puts_after(1);
        store
            .put_object("c", "one", Bytes::from("1"), octets())
            .await
            .unwrap();
        let err = store
            .put_object("c", "two", Bytes::from("2"), octets())
            .await
            .unwrap_err();
        assert_eq!(err.status_code(), Some(503));
        store.heal();
        store
            .put_object("c", "two", Bytes::from("2"), octets())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn bulk_delete_requires_capability() {
        let store = MemoryStore::new(false);
        assert!(!store.capabilities().await.unwrap().bulk_delete);
        assert!(matches!(
            store.bulk_delete(&[ObjectTarget::new("c", "x")]).await,
            Err(StoreError::Unsupported(_))
        ));
    }

    #[tokio::test]
    async fn range_past_end_is_not_satisfiable() {
        let store = store_with_container().await;
        store
            .put_object("c", "x", Bytes::from("abc"), octets())
            .await
            .unwrap();
        assert!(matches!(
            store
                .get_object("c", "x", Some(ByteRange::from(3)))
                .await,
            Err(StoreError::RangeNotSatisfiable)
        ));
    }
}
