//! Restricted access to transcoded files
//!
//! The playback side never sees filesystem paths of transcoded output. It gets
//! an opaque `cadence-local://<name>` token instead, and only tokens naming a
//! file currently held by the [`TempFileRegistry`] resolve to bytes.

use super::registry::TempFileRegistry;
use crate::error::{Error, Result};
use std::fmt;
use std::path::{Path, PathBuf};

/// URL scheme of local resource tokens
pub const LOCAL_SCHEME: &str = "cadence-local";

/// Opaque reference to a transcoded file
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LocalResource(String);

impl LocalResource {
    /// Parse a `cadence-local://` token
    pub fn parse(token: &str) -> Option<Self> {
        let name = token.strip_prefix(LOCAL_SCHEME)?.strip_prefix("://")?;
        if is_plain_name(name) {
            Some(Self(token.to_string()))
        } else {
            None
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    fn name(&self) -> &str {
        // Constructed only through `parse`/`expose`, which guarantee the prefix
        &self.0[LOCAL_SCHEME.len() + 3..]
    }
}

impl fmt::Display for LocalResource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

fn is_plain_name(name: &str) -> bool {
    !name.is_empty()
        && name != "."
        && name != ".."
        && !name.contains('/')
        && !name.contains('\\')
}

/// Maps tokens to registered temp files and back
#[derive(Clone)]
pub struct LocalResourceScheme {
    registry: TempFileRegistry,
}

impl LocalResourceScheme {
    pub fn new(registry: TempFileRegistry) -> Self {
        Self { registry }
    }

    /// Token for a registered file; `None` for anything else
    pub fn expose(&self, path: &Path) -> Option<LocalResource> {
        if !self.registry.contains(path) || path.parent() != Some(self.registry.dir()) {
            return None;
        }
        let name = path.file_name()?.to_str()?;
        LocalResource::parse(&format!("{}://{}", LOCAL_SCHEME, name))
    }

    /// File behind a token, if it is still registered
    pub fn resolve(&self, resource: &LocalResource) -> Option<PathBuf> {
        let path = self.registry.dir().join(resource.name());
        self.registry.contains(&path).then_some(path)
    }

    /// Read the whole file behind a token
    pub async fn read(&self, resource: &LocalResource) -> Result<Vec<u8>> {
        let path = self
            .resolve(resource)
            .ok_or_else(|| Error::Fetch(format!("Unknown local resource: {}", resource)))?;
        tokio::fs::read(&path)
            .await
            .map_err(|e| Error::Fetch(format!("{}: {}", resource, e)))
    }
}
