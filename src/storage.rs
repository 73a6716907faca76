use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use thiserror::Error;
use tokio::fs;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("invalid storage key '{0}'")]
    InvalidKey(String),
    #[error("object '{0}' not found")]
    NotFound(String),
    #[error("storage io error for '{key}': {source}")]
    Io {
        key: String,
        #[source]
        source: std::io::Error,
    },
}

impl StorageError {
    fn io(key: &str, source: std::io::Error) -> Self {
        Self::Io {
            key: key.to_string(),
            source,
        }
    }
}

pub type StorageResult<T> = Result<T, StorageError>;

/// Byte store addressed by slash-separated keys such as `boards/7/cat.png`.
#[async_trait]
pub trait ObjectStorage: Send + Sync + 'static {
    /// Writes `bytes` under `key`, replacing anything already there.
    async fn put_object(&self, key: &str, bytes: Vec<u8>) -> StorageResult<()>;

    async fn get_object(&self, key: &str) -> StorageResult<Vec<u8>>;

    /// Recursively removes everything below `prefix`. Returns `false` when
    /// there was nothing to remove.
    async fn delete_prefix(&self, prefix: &str) -> StorageResult<bool>;

    /// Names of the immediate children of `prefix`.
    async fn list_prefix(&self, prefix: &str) -> StorageResult<Vec<String>>;
}

const TEMP_DIR: &str = ".tmp";

static TEMP_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Stores objects as plain files below a root directory.
#[derive(Debug, Clone)]
pub struct LocalStorage {
    root: PathBuf,
}

impl LocalStorage {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Maps a key onto a path below the root. Keys with empty, `.` or `..`
    /// segments, absolute keys and backslashes are refused.
    fn resolve(&self, key: &str) -> StorageResult<PathBuf> {
        if key.is_empty() || key.contains('\\') || key.contains('\0') {
            return Err(StorageError::InvalidKey(key.to_string()));
        }

        let mut path = self.root.clone();
        for segment in key.split('/') {
            let mut components = Path::new(segment).components();
            match (components.next(), components.next()) {
                (Some(Component::Normal(part)), None) => path.push(part),
                _ => return Err(StorageError::InvalidKey(key.to_string())),
            }
        }
        Ok(path)
    }
}

#[async_trait]
impl ObjectStorage for LocalStorage {
    async fn put_object(&self, key: &str, bytes: Vec<u8>) -> StorageResult<()> {
        let path = self.resolve(key)?;
        let parent = path
            .parent()
            .ok_or_else(|| StorageError::InvalidKey(key.to_string()))?;
        fs::create_dir_all(parent)
            .await
            .map_err(|err| StorageError::io(key, err))?;

        // Readers never observe a partially written object. Temporary files
        // live outside the key space so no key can collide with one.
        let temp_dir = self.root.join(TEMP_DIR);
        fs::create_dir_all(&temp_dir)
            .await
            .map_err(|err| StorageError::io(key, err))?;
        let temp = temp_dir.join(format!(
            "upload-{}-{}",
            std::process::id(),
            TEMP_COUNTER.fetch_add(1, Ordering::Relaxed)
        ));
        if let Err(err) = fs::write(&temp, &bytes).await {
            let _ = fs::remove_file(&temp).await;
            return Err(StorageError::io(key, err));
        }
        if let Err(err) = fs::rename(&temp, &path).await {
            let _ = fs::remove_file(&temp).await;
            return Err(StorageError::io(key, err));
        }
        Ok(())
    }

    async fn get_object(&self, key: &str) -> StorageResult<Vec<u8>> {
        let path = self.resolve(key)?;
        match fs::read(&path).await {
            Ok(bytes) => Ok(bytes),
            Err(err) if err.kind() == ErrorKind::NotFound => {
                Err(StorageError::NotFound(key.to_string()))
            }
            Err(err) => Err(StorageError::io(key, err)),
        }
    }

    async fn delete_prefix(&self, prefix: &str) -> StorageResult<bool> {
        let path = self.resolve(prefix)?;
        match fs::remove_dir_all(&path).await {
            Ok(()) => Ok(true),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(false),
            Err(err) => Err(StorageError::io(prefix, err)),
        }
    }

    async fn list_prefix(&self, prefix: &str) -> StorageResult<Vec<String>> {
        let path = self.resolve(prefix)?;
        let mut entries = match fs::read_dir(&path).await {
            Ok(entries) => entries,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(StorageError::io(prefix, err)),
        };

        let mut names = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|err| StorageError::io(prefix, err))?
        {
            if let Some(name) = entry.file_name().to_str() {
                names.push(name.to_string());
            }
        }
        names.sort();
        Ok(names)
    }
}
