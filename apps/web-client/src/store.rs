use std::collections::HashMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::error::ClientError;

/// Keys under which the session is persisted.
pub mod keys {
    pub const ACCESS_TOKEN: &str = "access_token";
    pub const TOKEN_SET_AT: &str = "token_set_at";
    pub const USERNAME: &str = "username";
    pub const USER_ID: &str = "user_id";
}

/// Abstraction over the key-value store holding client-side auth state.
///
/// Backed by a JSON file for the binary and an in-memory map in tests.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    async fn set(&self, key: &str, value: &str) -> Result<(), ClientError>;
    async fn get(&self, key: &str) -> Result<Option<String>, ClientError>;
    async fn del(&self, key: &str) -> Result<(), ClientError>;
}

// ---------------------------------------------------------------------------
// In-memory implementation
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct MemoryStore {
    data: Mutex<HashMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    async fn set(&self, key: &str, value: &str) -> Result<(), ClientError> {
        self.data.lock().insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<String>, ClientError> {
        Ok(self.data.lock().get(key).cloned())
    }

    async fn del(&self, key: &str) -> Result<(), ClientError> {
        self.data.lock().remove(key);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// File-backed implementation
// ---------------------------------------------------------------------------

/// Write-through store keeping a flat JSON object on disk.
///
/// Every write goes to a sibling `.tmp` file first and is renamed over the
/// real one, so readers only ever see a complete map.
pub struct FileStore {
    path: PathBuf,
    tmp_path: PathBuf,
    data: tokio::sync::Mutex<HashMap<String, String>>,
}

impl FileStore {
    /// Open (or lazily create) the store at `path`. A corrupt file is logged
    /// and replaced by an empty map on the next write.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, ClientError> {
        let path = path.as_ref().to_path_buf();
        let data = match tokio::fs::read(&path).await {
            Ok(bytes) if bytes.is_empty() => HashMap::new(),
            Ok(bytes) => serde_json::from_slice(&bytes).unwrap_or_else(|e| {
                tracing::warn!(?e, path = %path.display(), "corrupt session file, starting empty");
                HashMap::new()
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => HashMap::new(),
            Err(e) => {
                return Err(ClientError::Storage(format!(
                    "failed to read {}: {e}",
                    path.display()
                )))
            }
        };
        let mut tmp_name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
        tmp_name.push(".tmp");
        Ok(Self {
            tmp_path: path.with_file_name(tmp_name),
            path,
            data: tokio::sync::Mutex::new(data),
        })
    }

    async fn flush(&self, data: &HashMap<String, String>) -> Result<(), ClientError> {
        let bytes = serde_json::to_vec_pretty(data)?;
        tokio::fs::write(&self.tmp_path, bytes)
            .await
            .map_err(|e| self.write_failed(e))?;
        tokio::fs::rename(&self.tmp_path, &self.path)
            .await
            .map_err(|e| self.write_failed(e))
    }

    fn write_failed(&self, e: std::io::Error) -> ClientError {
        tracing::error!(?e, path = %self.path.display(), "session file write failed");
        ClientError::Storage(format!("failed to write {}: {e}", self.path.display()))
    }
}

#[async_trait]
impl KeyValueStore for FileStore {
    async fn set(&self, key: &str, value: &str) -> Result<(), ClientError> {
        let mut data = self.data.lock().await;
        data.insert(key.to_string(), value.to_string());
        self.flush(&data).await
    }

    async fn get(&self, key: &str) -> Result<Option<String>, ClientError> {
        Ok(self.data.lock().await.get(key).cloned())
    }

    async fn del(&self, key: &str) -> Result<(), ClientError> {
        let mut data = self.data.lock().await;
        if data.remove(key).is_some() {
            self.flush(&data).await?;
        }
        Ok(())
    }
}
