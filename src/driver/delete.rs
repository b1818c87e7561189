//! Recursive delete and segment collection.

use super::{Driver, DriverError, DriverResult, parse_error, validate_path};
use crate::{
    models::manifest::ManifestRef,
    store::{BulkDeleteSummary, ListOptions, ObjectTarget, StoreError, is_segment_of},
};
use tracing::{debug, info, warn};

/// Upper bound on targets per bulk delete request.
const BULK_DELETE_BATCH: usize = 10_000;

impl Driver {
    /// Delete `path` and everything below it, including the segments of
    /// every segmented object removed.
    pub async fn delete(&self, path: &str) -> DriverResult<()> {
        validate_path(path, true)?;
        let base = self.store_dir(path);
        let below = format!("{base}/");

        let names: Vec<String> = self
            .store
            .list_objects(&self.container, &ListOptions::prefix(base.as_str()))
            .await
            .map_err(|err| parse_error(path, err))?
            .into_iter()
            .map(|object| object.name)
            .filter(|name| base.is_empty() || *name == base || name.starts_with(&below))
            .collect();
        if names.is_empty() {
            return Err(DriverError::PathNotFound {
                path: path.to_string(),
            });
        }

        if self.bulk_delete {
            match self.bulk_delete_tree(path, &base, &names).await {
                Ok(()) => {
                    info!(path, objects = names.len(), "bulk delete complete");
                    return Ok(());
                }
                Err(err) => {
                    warn!(path, error = %err, "bulk delete failed, deleting objects one by one")
                }
            }
        }

        for name in &names {
            self.delete_one(name).await?;
        }
        info!(path, objects = names.len(), "delete complete");
        Ok(())
    }

    /// One bulk request (per batch) for `names` plus every segment stored
    /// below `base` in the segments container.
    async fn bulk_delete_tree(&self, path: &str, base: &str, names: &[String]) -> DriverResult<()> {
        let segment_prefix = if base.is_empty() {
            String::new()
        } else {
            format!("{base}/")
        };
        let segments = self
            .store
            .list_objects(&self.segments_container, &ListOptions::prefix(segment_prefix))
            .await
            .map_err(|err| parse_error(path, err))?;

        let targets: Vec<ObjectTarget> = names
            .iter()
            .map(|name| ObjectTarget::new(&self.container, name))
            .chain(
                segments
                    .into_iter()
                    .map(|segment| ObjectTarget::new(&self.segments_container, segment.name)),
            )
            .collect();

        let mut summary = BulkDeleteSummary::default();
        for batch in targets.chunks(BULK_DELETE_BATCH) {
            let result = self
                .store
                .bulk_delete(batch)
                .await
                .map_err(|err| parse_error(path, err))?;
            summary.deleted += result.deleted;
            summary.not_found += result.not_found;
            summary.errors.extend(result.errors);
        }
        debug!(
            path,
            deleted = summary.deleted,
            not_found = summary.not_found,
            "bulk delete summary"
        );

        if !summary.errors.is_empty() {
            return Err(DriverError::Store {
                path: path.to_string(),
                source: StoreError::BulkDelete {
                    failed: summary.errors.len(),
                },
            });
        }
        Ok(())
    }

    /// Delete a single object and, if it is a manifest, its segments.
    /// Objects that are already gone are skipped.
    async fn delete_one(&self, name: &str) -> DriverResult<()> {
        let path = self.logical_path(name);
        let info = match self.store.head_object(&self.container, name).await {
            Ok(info) => info,
            Err(StoreError::NotFound) => return Ok(()),
            Err(err) => return Err(parse_error(&path, err)),
        };

        if let Some(manifest) = &info.manifest {
            self.delete_manifest_segments(&path, manifest).await?;
        }
        match self.store.delete_object(&self.container, name).await {
            Ok(()) | Err(StoreError::NotFound) => {
                debug!(path = %path, "deleted");
                Ok(())
            }
            Err(err) => Err(parse_error(&path, err)),
        }
    }

    /// Delete every segment referenced by `manifest`.
    pub(super) async fn delete_manifest_segments(
        &self,
        path: &str,
        manifest: &ManifestRef,
    ) -> DriverResult<()> {
        let segments = match self
            .store
            .list_objects(
                &manifest.container,
                &ListOptions::prefix(manifest.prefix.as_str()),
            )
            .await
        {
            Ok(segments) => segments,
            Err(StoreError::NotFound) => return Ok(()),
            Err(err) => return Err(parse_error(path, err)),
        };

        for segment in segments
            .iter()
            .filter(|segment| is_segment_of(manifest, &segment.name))
        {
            match self
                .store
                .delete_object(&manifest.container, &segment.name)
                .await
            {
                Ok(()) | Err(StoreError::NotFound) => {}
                Err(err) => return Err(parse_error(&segment.name, err)),
            }
        }
        debug!(path, manifest = %manifest, "deleted segments");
        Ok(())
    }
}
