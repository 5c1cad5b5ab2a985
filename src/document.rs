use std::{
    fs,
    io::ErrorKind,
    marker::PhantomData,
    path::{Path, PathBuf},
    sync::Mutex,
};

use serde::{Serialize, de::DeserializeOwned};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Failed to access `{path}`: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Malformed documents in `{path}`: {source}")]
    Json {
        path: PathBuf,
        source: serde_json::Error,
    },
}

/// A collection of documents kept as a single JSON array on disk.
///
/// Saves go to a sibling temporary file first and are then renamed over the
/// collection, so a reader never sees a half written array.
pub struct JsonCollection<D> {
    path: PathBuf,
    write_lock: Mutex<()>,
    _documents: PhantomData<fn() -> D>,
}

impl<D> JsonCollection<D>
where
    D: Serialize + DeserializeOwned,
{
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
            _documents: PhantomData,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Missing file is an empty collection.
    pub fn load(&self) -> Result<Vec<D>, StorageError> {
        let content = match fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(source) => {
                return Err(StorageError::Io {
                    path: self.path.clone(),
                    source,
                });
            }
        };
        serde_json::from_str(&content).map_err(|source| StorageError::Json {
            path: self.path.clone(),
            source,
        })
    }

    /// Replaces the collection with the documents returned by `snapshot`.
    ///
    /// The snapshot is taken while holding the write lock, so concurrent saves
    /// land on disk in the order their snapshots were taken.
    pub fn save(&self, snapshot: impl FnOnce() -> Vec<D>) -> Result<(), StorageError> {
        let _guard = self
            .write_lock
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let content =
            serde_json::to_string_pretty(&snapshot()).map_err(|source| StorageError::Json {
                path: self.path.clone(),
                source,
            })?;
        let tmp_path = self.path.with_extension("json.tmp");
        fs::write(&tmp_path, content)
            .and_then(|()| fs::rename(&tmp_path, &self.path))
            .map_err(|source| StorageError::Io {
                path: self.path.clone(),
                source,
            })
    }
}
