// SPDX-License-Identifier: Apache-2.0
// SPDX-FileCopyrightText: Copyright The Lance Authors

//! Wraps [ObjectStore](object_store::ObjectStore)

use std::ops::Range;
use std::sync::Arc;

use bytes::Bytes;
use object_store::local::LocalFileSystem;
use object_store::memory::InMemory;
use object_store::path::Path;
use object_store::{ObjectStore as OSObjectStore, PutPayload};
use retrodex_core::{Error, Result};
use snafu::location;
use url::Url;

/// Wraps [ObjectStore](object_store::ObjectStore)
#[derive(Debug, Clone)]
pub struct ObjectStore {
    // Inner object store
    pub inner: Arc<dyn OSObjectStore>,
    scheme: String,
}

impl std::fmt::Display for ObjectStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ObjectStore({})", self.scheme)
    }
}

fn expand_path(str_path: &str) -> Result<std::path::PathBuf> {
    let path = std::path::PathBuf::from(str_path);
    if path.is_absolute() {
        return Ok(path);
    }
    Ok(std::env::current_dir()?.join(path))
}

impl ObjectStore {
    /// Parse from a string URI.
    ///
    /// Returns the ObjectStore instance and the absolute path to the object.
    ///
    /// `memory://` URIs open a fresh in-memory store; `file://` URIs and
    /// plain paths open the local file system.
    pub fn from_uri(uri: &str) -> Result<(Arc<Self>, Path)> {
        if let Some(rest) = uri.strip_prefix("memory://") {
            let path = Path::parse(rest.trim_matches('/'))?;
            return Ok((Arc::new(Self::memory()), path));
        }
        let local_path = match Url::parse(uri) {
            Ok(url) if url.scheme() == "file" => url.to_file_path().map_err(|_| {
                Error::invalid_input(format!("Invalid file URI: '{}'", uri), location!())
            })?,
            // Windows drive letters parse as a one-letter scheme.
            Ok(url) if url.scheme().len() > 1 => {
                return Err(Error::invalid_input(
                    format!("Unsupported object store scheme '{}' in '{}'", url.scheme(), uri),
                    location!(),
                ));
            }
            _ => expand_path(uri)?,
        };
        let path = Path::from_absolute_path(&local_path)?;
        Ok((Arc::new(Self::local()), path))
    }

    /// Local object store.
    pub fn local() -> Self {
        Self {
            inner: Arc::new(LocalFileSystem::new()),
            scheme: String::from("file"),
        }
    }

    /// Create a in-memory object store directly for testing.
    pub fn memory() -> Self {
        Self {
            inner: Arc::new(InMemory::new()),
            scheme: String::from("memory"),
        }
    }

    pub fn scheme(&self) -> &str {
        &self.scheme
    }

    /// A helper function to write `content` to `path` in one request.
    ///
    /// The object becomes visible only once it is fully written.
    pub async fn put(&self, path: &Path, content: Bytes) -> Result<()> {
        self.inner.put(path, PutPayload::from(content)).await?;
        Ok(())
    }

    /// Read a directory and returns the names of all entries in it.
    pub async fn read_dir(&self, dir_path: &Path) -> Result<Vec<String>> {
        let output = self.inner.list_with_delimiter(Some(dir_path)).await?;
        Ok(output
            .common_prefixes
            .iter()
            .chain(output.objects.iter().map(|o| &o.location))
            .filter_map(|s| s.filename().map(|name| name.to_string()))
            .collect())
    }

    /// Check a file exists.
    pub async fn exists(&self, path: &Path) -> Result<bool> {
        match self.inner.head(path).await {
            Ok(_) => Ok(true),
            Err(object_store::Error::NotFound { path: _, source: _ }) => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    /// Convenience function to read all the bytes of an object.
    pub async fn read_one_all(&self, path: &Path) -> Result<Bytes> {
        Ok(self.inner.get(path).await?.bytes().await?)
    }

    /// Convenience function to make a single range request.
    pub async fn read_one_range(&self, path: &Path, range: Range<usize>) -> Result<Bytes> {
        Ok(self.inner.get_range(path, range).await?)
    }
}
