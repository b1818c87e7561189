//! Core data models shared by the driver and the store backends.
//!
//! `ObjectInfo` and `ManifestRef` describe objects as the store sees them;
//! `FileInfo` is the logical view handed back to callers. Rows of the local
//! backend map to tables via `sqlx::FromRow`.

pub mod container;
pub mod file_info;
pub mod manifest;
pub mod object;
