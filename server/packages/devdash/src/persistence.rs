//! Durable JSON documents with atomic replace-on-write.

use std::io::Write;
use std::marker::PhantomData;
use std::path::{Path, PathBuf};

use devdash_error::DashboardError;
use serde::de::DeserializeOwned;
use serde::Serialize;

/// A single JSON document on disk.
///
/// Writes go to a temp file in the same directory and are renamed over the
/// target, so a reader never observes a half-written document.
#[derive(Debug, Clone)]
pub struct JsonFile<T> {
    path: PathBuf,
    _marker: PhantomData<fn() -> T>,
}

impl<T> JsonFile<T>
where
    T: Serialize + DeserializeOwned + Default,
{
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            _marker: PhantomData,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the document, returning `T::default()` when the file does not exist.
    pub async fn load(&self) -> Result<T, DashboardError> {
        match tokio::fs::read(&self.path).await {
            Ok(bytes) => serde_json::from_slice(&bytes).map_err(|err| storage_error(&self.path, err)),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(T::default()),
            Err(err) => Err(storage_error(&self.path, err)),
        }
    }

    pub async fn save(&self, value: &T) -> Result<(), DashboardError> {
        let mut content =
            serde_json::to_vec_pretty(value).map_err(|err| storage_error(&self.path, err))?;
        content.push(b'\n');
        let path = self.path.clone();
        tokio::task::spawn_blocking(move || write_atomic(&path, &content))
            .await
            .map_err(|err| DashboardError::StorageError {
                message: err.to_string(),
            })?
    }
}

fn write_atomic(path: &Path, content: &[u8]) -> Result<(), DashboardError> {
    let dir = path
        .parent()
        .filter(|dir| !dir.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    std::fs::create_dir_all(dir).map_err(|err| storage_error(path, err))?;
    let mut temp = tempfile::NamedTempFile::new_in(dir).map_err(|err| storage_error(path, err))?;
    temp.write_all(content)
        .and_then(|_| temp.as_file().sync_all())
        .map_err(|err| storage_error(path, err))?;
    temp.persist(path)
        .map_err(|err| storage_error(path, err.error))?;
    Ok(())
}

fn storage_error(path: &Path, err: impl std::fmt::Display) -> DashboardError {
    DashboardError::StorageError {
        message: format!("{}: {}", path.display(), err),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::*;

    #[tokio::test]
    async fn missing_file_loads_default() {
        let dir = tempfile::tempdir().unwrap();
        let file: JsonFile<BTreeMap<String, u16>> = JsonFile::new(dir.path().join("absent.json"));
        assert!(file.load().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn save_creates_parent_directories() {
        let dir = tempfile::tempdir().unwrap();
        let file = JsonFile::new(dir.path().join("nested").join("doc.json"));
        let mut doc = BTreeMap::new();
        doc.insert("web".to_string(), 3000u16);
        file.save(&doc).await.unwrap();
        assert_eq!(file.load().await.unwrap(), doc);
    }

    #[tokio::test]
    async fn corrupt_document_is_a_storage_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("doc.json");
        std::fs::write(&path, b"{not json").unwrap();
        let file: JsonFile<BTreeMap<String, u16>> = JsonFile::new(path);
        assert!(matches!(
            file.load().await,
            Err(DashboardError::StorageError { .. })
        ));
    }
}
