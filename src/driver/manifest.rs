//! Manifest lifecycle: creation on first write, segment discovery for
//! existing manifests and conversion of plain objects.

use super::{CONTENT_TYPE, DIRECTORY_MIME_TYPE, Driver, DriverError, DriverResult, parse_error};
use super::segments::{parse_sequence, segment_name, segment_prefix};
use crate::{
    models::manifest::ManifestRef,
    store::{ListOptions, PutOptions, StoreError},
};
use bytes::Bytes;
use tracing::{debug, info};

impl Driver {
    /// Make sure `path` is a manifest and return the lengths of its
    /// segments in sequence order.
    pub(super) async fn prepare_manifest(&self, path: &str) -> DriverResult<Vec<u64>> {
        let name = self.swift_path(path);
        let info = match self.store.head_object(&self.container, &name).await {
            Ok(info) => info,
            Err(StoreError::NotFound) => {
                self.create_parent_folders(path).await?;
                self.clear_segments(path, &name).await?;
                self.put_manifest(path, &name).await?;
                info!(path, "created manifest");
                return Ok(Vec::new());
            }
            Err(err) => return Err(parse_error(path, err)),
        };

        if info.manifest.is_some() {
            return self.segment_lengths(path, &name).await;
        }
        if info.content_type == DIRECTORY_MIME_TYPE {
            return Err(DriverError::InvalidPath {
                path: path.to_string(),
            });
        }
        self.convert_to_manifest(path, &name, info.bytes).await
    }

    fn manifest_ref(&self, name: &str) -> ManifestRef {
        ManifestRef::new(&self.segments_container, segment_prefix(name))
    }

    async fn put_manifest(&self, path: &str, name: &str) -> DriverResult<()> {
        self.store
            .put_object(
                &self.container,
                name,
                Bytes::new(),
                PutOptions::content_type(CONTENT_TYPE).with_manifest(self.manifest_ref(name)),
            )
            .await
            .map_err(|err| parse_error(path, err))
    }

    /// Segment names and lengths under `name`, sorted by sequence.
    async fn list_segments(&self, path: &str, name: &str) -> DriverResult<Vec<(u64, String, u64)>> {
        let prefix = segment_prefix(name);
        let objects = self
            .store
            .list_objects(&self.segments_container, &ListOptions::prefix(prefix.as_str()))
            .await
            .map_err(|err| parse_error(path, err))?;

        let mut segments: Vec<_> = objects
            .into_iter()
            .filter_map(|object| {
                parse_sequence(&prefix, &object.name)
                    .map(|sequence| (sequence, object.name, object.bytes))
            })
            .collect();
        segments.sort_unstable_by_key(|(sequence, _, _)| *sequence);
        Ok(segments)
    }

    async fn segment_lengths(&self, path: &str, name: &str) -> DriverResult<Vec<u64>> {
        let segments = self.list_segments(path, name).await?;
        Ok(segments.into_iter().map(|(_, _, bytes)| bytes).collect())
    }

    /// Remove segments left behind under `name` by an earlier object.
    async fn clear_segments(&self, path: &str, name: &str) -> DriverResult<()> {
        for (_, segment, _) in self.list_segments(path, name).await? {
            match self
                .store
                .delete_object(&self.segments_container, &segment)
                .await
            {
                Ok(()) | Err(StoreError::NotFound) => {
                    debug!(segment = %segment, "removed stale segment")
                }
                Err(err) => return Err(parse_error(path, err)),
            }
        }
        Ok(())
    }

    /// Rewrite a plain object as chunk-sized segments behind a manifest.
    async fn convert_to_manifest(&self, path: &str, name: &str, size: u64) -> DriverResult<Vec<u64>> {
        let content = if size == 0 {
            Bytes::new()
        } else {
            self.store
                .get_object(&self.container, name, None)
                .await
                .map_err(|err| parse_error(path, err))?
        };

        self.clear_segments(path, name).await?;
        let mut lengths = Vec::new();
        let mut start = 0;
        let mut sequence = 1;
        while start < content.len() {
            let end = (start + self.chunk_size as usize).min(content.len());
            self.store
                .put_object(
                    &self.segments_container,
                    &segment_name(name, sequence),
                    content.slice(start..end),
                    PutOptions::content_type(CONTENT_TYPE),
                )
                .await
                .map_err(|err| parse_error(path, err))?;
            lengths.push((end - start) as u64);
            start = end;
            sequence += 1;
        }

        self.put_manifest(path, name).await?;
        info!(path, segments = lengths.len(), "converted object to manifest");
        Ok(lengths)
    }
}
