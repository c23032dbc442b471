//! Where stored documents physically live

use async_trait::async_trait;
use dashmap::DashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use tokio::fs;
use tracing::debug;

use super::StorageResult;

/// Raw document access by storage key
#[async_trait]
pub trait StorageBackend: Send + Sync + fmt::Debug {
    /// Contents for `key`, or `None` if nothing was ever written
    async fn read(&self, key: &str) -> StorageResult<Option<String>>;

    /// Replace the document for `key`
    async fn write(&self, key: &str, contents: &str) -> StorageResult<()>;

    /// Delete `key`; deleting a missing key is not an error
    async fn remove(&self, key: &str) -> StorageResult<()>;

    /// Move an undecodable document aside and return where it went
    async fn quarantine(&self, key: &str) -> StorageResult<String>;

    /// Human readable location of `key`, for log messages
    fn location(&self, key: &str) -> String;
}

/// Documents as files in a `.storage/` directory
#[derive(Debug, Clone)]
pub struct FileBackend {
    storage_dir: PathBuf,
}

impl FileBackend {
    /// Store documents as files under `storage_dir`
    pub fn new(storage_dir: impl Into<PathBuf>) -> Self {
        Self {
            storage_dir: storage_dir.into(),
        }
    }

    pub fn storage_dir(&self) -> &Path {
        &self.storage_dir
    }

    /// Path of the file holding `key`
    pub fn file_path(&self, key: &str) -> PathBuf {
        self.storage_dir.join(key)
    }
}

#[async_trait]
impl StorageBackend for FileBackend {
    async fn read(&self, key: &str) -> StorageResult<Option<String>> {
        match fs::read_to_string(self.file_path(key)).await {
            Ok(content) => Ok(Some(content)),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                debug!(key, "Storage file not found");
                Ok(None)
            }
            Err(err) => Err(err.into()),
        }
    }

    async fn write(&self, key: &str, contents: &str) -> StorageResult<()> {
        fs::create_dir_all(&self.storage_dir).await?;

        let path = self.file_path(key);
        let temp_path = self.file_path(&format!("{key}.tmp"));

        // Temp file then rename so readers never see a partial document
        fs::write(&temp_path, contents).await?;
        fs::rename(&temp_path, &path).await?;

        debug!(key, path = %path.display(), "Wrote storage file");
        Ok(())
    }

    async fn remove(&self, key: &str) -> StorageResult<()> {
        match fs::remove_file(self.file_path(key)).await {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }

    async fn quarantine(&self, key: &str) -> StorageResult<String> {
        let corrupt = format!("{key}.corrupt.{}", chrono::Utc::now().to_rfc3339());
        let corrupt_path = self.file_path(&corrupt);
        fs::rename(self.file_path(key), &corrupt_path).await?;
        Ok(corrupt_path.display().to_string())
    }

    fn location(&self, key: &str) -> String {
        self.file_path(key).display().to_string()
    }
}

/// Documents held in memory; counts writes and can be told to fail them
#[derive(Debug, Default)]
pub struct MemoryBackend {
    documents: DashMap<String, String>,
    writes: AtomicUsize,
    fail_writes: AtomicBool,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a raw document
    pub fn insert(&self, key: impl Into<String>, contents: impl Into<String>) {
        self.documents.insert(key.into(), contents.into());
    }

    /// Raw document stored under `key`
    pub fn get(&self, key: &str) -> Option<String> {
        self.documents.get(key).map(|d| d.clone())
    }

    /// Parsed document for `key`, if present and valid JSON
    pub fn get_json(&self, key: &str) -> Option<serde_json::Value> {
        self.get(key).and_then(|d| serde_json::from_str(&d).ok())
    }

    pub fn contains(&self, key: &str) -> bool {
        self.documents.contains_key(key)
    }

    pub fn keys(&self) -> Vec<String> {
        self.documents.iter().map(|d| d.key().clone()).collect()
    }

    /// Successful writes so far
    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    /// Make every following write fail with an IO error
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl StorageBackend for MemoryBackend {
    async fn read(&self, key: &str) -> StorageResult<Option<String>> {
        Ok(self.get(key))
    }

    async fn write(&self, key: &str, contents: &str) -> StorageResult<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(std::io::Error::new(std::io::ErrorKind::Other, "disk full").into());
        }
        self.documents.insert(key.to_string(), contents.to_string());
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn remove(&self, key: &str) -> StorageResult<()> {
        self.documents.remove(key);
        Ok(())
    }

    async fn quarantine(&self, key: &str) -> StorageResult<String> {
        let corrupt = format!("{key}.corrupt");
        if let Some((_, contents)) = self.documents.remove(key) {
            self.documents.insert(corrupt.clone(), contents);
        }
        Ok(corrupt)
    }

    fn location(&self, key: &str) -> String {
        format!("memory://{key}")
    }
}
