//! Represents a container, a flat, top-level namespace for objects.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// A storage container in the local backend.
///
/// Containers are flat namespaces; hierarchy is emulated by `/`-separated
/// object names and pseudo-directory marker objects.
#[derive(Serialize, Deserialize, Clone, FromRow, Debug)]
pub struct Container {
    /// Container name, unique per store.
    pub name: String,

    /// When this container was created.
    pub created_at: DateTime<Utc>,
}
