//! Filesystem-based persistence sink.
//!
//! Stores each item as an individual JSON file named after its ID and
//! removes the file when the item is deleted.
//!
//! # Security
//!
//! - **Path traversal**: IDs are validated before they become file names
//! - **Torn writes**: content goes to a temporary file that is then renamed

use crate::models::{StoreItem, Tombstone};
use crate::storage::traits::PersistenceSink;
use crate::{Error, Result};
use async_trait::async_trait;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::fmt;
use std::io::ErrorKind;
use std::marker::PhantomData;
use std::path::{Path, PathBuf};

/// Filesystem-based persistence sink.
pub struct FilesystemSink<T> {
    /// Base directory for storage.
    base_path: PathBuf,
    _item: PhantomData<fn() -> T>,
}

impl<T: StoreItem> FilesystemSink<T> {
    /// Creates a sink rooted at `base_path`.
    ///
    /// The directory is created on first write.
    #[must_use]
    pub fn new(base_path: impl Into<PathBuf>) -> Self {
        Self {
            base_path: base_path.into(),
            _item: PhantomData,
        }
    }

    /// Creates a sink and its directory up front.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be created.
    pub async fn with_create(base_path: impl Into<PathBuf>) -> Result<Self> {
        let sink = Self::new(base_path);
        sink.ensure_dir().await?;
        Ok(sink)
    }

    /// Returns the base path.
    #[must_use]
    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    /// Returns the file path for an item ID.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] if the ID is not a safe file name.
    pub fn item_path(&self, id: &T::Id) -> Result<PathBuf> {
        let id_str = id.to_string();
        if !is_safe_filename(&id_str) {
            return Err(Error::InvalidInput(format!(
                "item ID contains invalid characters: {id_str}"
            )));
        }
        Ok(self.base_path.join(format!("{id_str}.json")))
    }

    /// Reads a previously written item back.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed.
    pub async fn load(&self, id: &T::Id) -> Result<Option<T>>
    where
        T: DeserializeOwned,
    {
        let path = self.item_path(id)?;
        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(self.failure(id, &e)),
        };
        serde_json::from_slice(&bytes)
            .map(Some)
            .map_err(|e| self.failure(id, &e))
    }

    async fn ensure_dir(&self) -> Result<()> {
        tokio::fs::create_dir_all(&self.base_path)
            .await
            .map_err(|e| Error::OperationFailed {
                operation: "create_storage_dir".to_string(),
                cause: e.to_string(),
            })
    }

    fn failure(&self, id: &T::Id, cause: &dyn fmt::Display) -> Error {
        Error::PersistenceFailed {
            sink: "filesystem".to_string(),
            id: id.to_string(),
            cause: cause.to_string(),
        }
    }
}

/// Only alphanumerics, dash and underscore; rejects `..`, separators and NUL.
fn is_safe_filename(name: &str) -> bool {
    !name.is_empty()
        && name.len() <= 255
        && name
            .chars()
            .all(|c| c.is_alphanumeric() || c == '-' || c == '_')
}

impl<T> fmt::Debug for FilesystemSink<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FilesystemSink")
            .field("base_path", &self.base_path)
            .finish()
    }
}

#[async_trait]
impl<T> PersistenceSink<T> for FilesystemSink<T>
where
    T: StoreItem + Serialize,
{
    fn name(&self) -> &'static str {
        "filesystem"
    }

    async fn write_item(&self, item: &T) -> Result<()> {
        let path = self.item_path(item.id())?;
        self.ensure_dir().await?;

        let json = serde_json::to_vec_pretty(item).map_err(|e| self.failure(item.id(), &e))?;

        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, json)
            .await
            .map_err(|e| self.failure(item.id(), &e))?;
        tokio::fs::rename(&tmp, &path)
            .await
            .map_err(|e| self.failure(item.id(), &e))?;

        tracing::debug!(kind = T::KIND, id = %item.id(), path = %path.display(), "Wrote item file");
        Ok(())
    }

    async fn delete_item(&self, tombstone: &Tombstone<T::Id>) -> Result<()> {
        let id = &tombstone.id;
        let path = self.item_path(id)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => {
                tracing::debug!(kind = T::KIND, %id, "Removed item file");
                Ok(())
            },
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(self.failure(id, &e)),
        }
    }
}
