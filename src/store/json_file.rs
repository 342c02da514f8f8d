//! JSON document on the local file system.

use super::{StoreBackend, StoreError};
use async_trait::async_trait;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Stores the document at `path`, writing through a sibling temp file and
/// renaming it into place.
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    path: PathBuf,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_else(|| "store.json".into());
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

#[async_trait]
impl StoreBackend for JsonFileStore {
    fn describe(&self) -> String {
        self.path.display().to_string()
    }

    async fn load(&self) -> Result<Option<String>, StoreError> {
        match tokio::fs::read_to_string(&self.path).await {
            Ok(text) => Ok(Some(text)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(source) => Err(StoreError::Read {
                path: self.path.clone(),
                source,
            }),
        }
    }

    async fn save(&self, contents: &str) -> Result<(), StoreError> {
        let write_err = |source| StoreError::Write {
            path: self.path.clone(),
            source,
        };

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await.map_err(write_err)?;
            }
        }

        let temp = self.temp_path();
        tokio::fs::write(&temp, contents).await.map_err(write_err)?;
        if let Err(e) = tokio::fs::rename(&temp, &self.path).await {
            let _ = tokio::fs::remove_file(&temp).await;
            return Err(write_err(e));
        }
        debug!(path = %self.path.display(), bytes = contents.len(), "Saved store document");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn missing_file_loads_as_none() {
        let temp = TempDir::new().unwrap();
        let store = JsonFileStore::new(temp.path().join("tasks.json"));
        assert_eq!(store.load().await.unwrap(), None);
    }

    #[tokio::test]
    async fn save_creates_parent_dirs_and_leaves_no_temp_file() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("nested/dir/tasks.json");
        let store = JsonFileStore::new(&path);

        store.save("{\"tasks\":{}}").await.unwrap();
        store.save("{\"tasks\":{\"a\":null}}").await.unwrap();

        assert_eq!(
            store.load().await.unwrap().as_deref(),
            Some("{\"tasks\":{\"a\":null}}")
        );
        assert!(!path.with_file_name("tasks.json.tmp").exists());
    }

    #[tokio::test]
    async fn write_failure_is_a_store_error() {
        let temp = TempDir::new().unwrap();
        // A directory where the file should be makes the rename fail
        let path = temp.path().join("tasks.json");
        std::fs::create_dir_all(path.join("occupied")).unwrap();

        let err = JsonFileStore::new(&path).save("{}").await.unwrap_err();
        assert!(matches!(err, StoreError::Write { .. }));
    }
}
