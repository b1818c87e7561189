//! The segment reference carried by a manifest object.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Points a manifest at the segments that compose its content.
///
/// Reading a manifest yields the concatenation, in name order, of every
/// object in `container` whose name starts with `prefix`. On the wire this
/// is the `X-Object-Manifest: <container>/<prefix>` header.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct ManifestRef {
    pub container: String,
    pub prefix: String,
}

impl ManifestRef {
    pub fn new(container: impl Into<String>, prefix: impl Into<String>) -> Self {
        Self {
            container: container.into(),
            prefix: prefix.into(),
        }
    }

    /// Parse a `<container>/<prefix>` header value.
    ///
    /// Returns `None` when the value has no container component.
    pub fn parse(value: &str) -> Option<Self> {
        let (container, prefix) = value.split_once('/')?;
        if container.is_empty() {
            return None;
        }
        Some(Self::new(container, prefix))
    }

    pub fn header_value(&self) -> String {
        format!("{}/{}", self.container, self.prefix)
    }
}

impl fmt::Display for ManifestRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.container, self.prefix)
    }
}
