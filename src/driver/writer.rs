//! Offset writes into segmented objects.

use super::segments::{SegmentPlan, plan_write, segment_name};
use super::{
    CONTENT_TYPE, Driver, DriverError, DriverResult, WriteError, parse_error, validate_path,
};
use crate::store::{ByteRange, PutOptions};
use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt};
use tracing::debug;

impl Driver {
    /// Write the bytes of `reader` into `path` starting at `offset`.
    ///
    /// Offsets beyond the current end are zero-filled. Bytes of the old
    /// content that lie past the end of the new data are kept. Returns the
    /// number of bytes taken from `reader` and committed; on failure the
    /// same count is carried by the error, and calling again with
    /// `offset + bytes_written` and the rest of the data resumes the write.
    pub async fn write_stream<R>(
        &self,
        path: &str,
        offset: u64,
        mut reader: R,
    ) -> Result<u64, WriteError>
    where
        R: AsyncRead + Unpin + Send,
    {
        validate_path(path, false).map_err(|err| WriteError::new(0, err))?;
        let segments = self
            .prepare_manifest(path)
            .await
            .map_err(|err| WriteError::new(0, err))?;

        let plan = plan_write(offset, &segments, self.chunk_size);
        debug!(path, offset, ?plan, "planned write");

        let name = self.swift_path(path);
        self.pad(path, &name, &plan)
            .await
            .map_err(|err| WriteError::new(0, err))?;

        let mut bytes_written = 0;
        let mut sequence = plan.sequence;
        let mut first = true;
        loop {
            let result = self
                .write_segment(path, &name, &plan, sequence, first, &segments, &mut reader)
                .await;
            match result {
                Ok(Segment::Full(n)) => bytes_written += n,
                Ok(Segment::Last(n)) => {
                    bytes_written += n;
                    break;
                }
                Err(err) => return Err(WriteError::new(bytes_written, err)),
            }
            sequence += 1;
            first = false;
        }

        debug!(path, offset, bytes_written, "write complete");
        Ok(bytes_written)
    }

    /// Zero-extend a short tail segment and write whole zero segments for
    /// the gap between the current end and the target segment.
    async fn pad(&self, path: &str, name: &str, plan: &SegmentPlan) -> DriverResult<()> {
        if plan.complete_tail.is_none() && plan.zero_segments.is_empty() {
            return Ok(());
        }
        let chunk = self.chunk_size as usize;

        if let Some(tail) = plan.complete_tail {
            let segment = segment_name(name, tail.sequence);
            let mut body = BytesMut::with_capacity(chunk);
            if tail.length > 0 {
                let old = self
                    .store
                    .get_object(&self.segments_container, &segment, None)
                    .await
                    .map_err(|err| parse_error(path, err))?;
                body.extend_from_slice(&old);
            }
            body.resize(chunk, 0);
            self.put_segment(path, &segment, body.freeze()).await?;
            debug!(segment = %segment, from = tail.length, "completed short segment");
        }

        let zeros = Bytes::from(vec![0u8; chunk]);
        for sequence in plan.zero_segments.clone() {
            let segment = segment_name(name, sequence);
            self.put_segment(path, &segment, zeros.clone()).await?;
            debug!(segment = %segment, "wrote zero segment");
        }
        Ok(())
    }

    /// Assemble and commit one segment. The first segment starts with the
    /// retained head of the old segment and any zero fill.
    #[allow(clippy::too_many_arguments)]
    async fn write_segment<R>(
        &self,
        path: &str,
        name: &str,
        plan: &SegmentPlan,
        sequence: u64,
        first: bool,
        existing: &[u64],
        reader: &mut R,
    ) -> DriverResult<Segment>
    where
        R: AsyncRead + Unpin + Send,
    {
        let chunk = self.chunk_size as usize;
        let segment = segment_name(name, sequence);
        let old_len = existing
            .get(sequence as usize - 1)
            .copied()
            .unwrap_or_default();

        let mut buf = Vec::with_capacity(chunk);
        if first {
            if plan.retained > 0 {
                let head = self
                    .store
                    .get_object(
                        &self.segments_container,
                        &segment,
                        Some(ByteRange::bounded(0, plan.retained)),
                    )
                    .await
                    .map_err(|err| parse_error(path, err))?;
                buf.extend_from_slice(&head);
            }
            buf.resize(buf.len() + plan.zero_fill as usize, 0);
        }

        let want = chunk.saturating_sub(buf.len());
        let read = (&mut *reader)
            .take(want as u64)
            .read_to_end(&mut buf)
            .await
            .map_err(|source| DriverError::Io {
                path: path.to_string(),
                source,
            })?;

        let last = read < want || want == 0;
        let commit = read > 0 || (first && plan.zero_fill > 0);
        if last && commit && old_len > buf.len() as u64 {
            let tail = self
                .store
                .get_object(
                    &self.segments_container,
                    &segment,
                    Some(ByteRange::bounded(buf.len() as u64, old_len)),
                )
                .await
                .map_err(|err| parse_error(path, err))?;
            buf.extend_from_slice(&tail);
        }

        if commit {
            let size = buf.len();
            self.put_segment(path, &segment, Bytes::from(buf)).await?;
            debug!(segment = %segment, size, data = read, "wrote segment");
        }

        let read = read as u64;
        Ok(if last {
            Segment::Last(read)
        } else {
            Segment::Full(read)
        })
    }

    async fn put_segment(&self, path: &str, segment: &str, body: Bytes) -> DriverResult<()> {
        self.store
            .put_object(
                &self.segments_container,
                segment,
                body,
                PutOptions::content_type(CONTENT_TYPE),
            )
            .await
            .map_err(|err| parse_error(path, err))
    }
}

/// Caller bytes committed by one segment iteration.
enum Segment {
    Full(u64),
    Last(u64),
}
