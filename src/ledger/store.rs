// src/ledger/store.rs
use super::LedgerSnapshot;
use crate::error::PersistenceError;
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tokio::sync::RwLock;
use tracing::debug;

/// Durable ledger snapshots keyed by agent id.
#[async_trait]
pub trait StateStore: Send + Sync {
    async fn load(&self, agent_id: &str) -> Result<Option<LedgerSnapshot>, PersistenceError>;

    /// Replaces the previous snapshot. A reader never observes a partial write.
    async fn save(&self, agent_id: &str, snapshot: &LedgerSnapshot) -> Result<(), PersistenceError>;
}

/// One pretty-printed JSON file per agent under `dir`.
pub struct JsonFileStore {
    dir: PathBuf,
}

impl JsonFileStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_for(&self, agent_id: &str) -> PathBuf {
        let file: String = agent_id
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
            .collect();
        self.dir.join(format!("{file}.json"))
    }
}

fn io_error(agent_id: &str, source: std::io::Error) -> PersistenceError {
    PersistenceError::Io {
        agent: agent_id.to_string(),
        source,
    }
}

#[async_trait]
impl StateStore for JsonFileStore {
    async fn load(&self, agent_id: &str) -> Result<Option<LedgerSnapshot>, PersistenceError> {
        let path = self.path_for(agent_id);
        let data = match tokio::fs::read_to_string(&path).await {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(io_error(agent_id, e)),
        };
        serde_json::from_str(&data)
            .map(Some)
            .map_err(|source| PersistenceError::Corrupt {
                agent: agent_id.to_string(),
                source,
            })
    }

    async fn save(&self, agent_id: &str, snapshot: &LedgerSnapshot) -> Result<(), PersistenceError> {
        let json = serde_json::to_string_pretty(snapshot).map_err(|source| PersistenceError::Corrupt {
            agent: agent_id.to_string(),
            source,
        })?;
        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| io_error(agent_id, e))?;

        // write-then-rename keeps the previous snapshot intact if we die mid-write
        let path = self.path_for(agent_id);
        let tmp = path.with_extension(format!("json.{}.tmp", uuid::Uuid::new_v4().simple()));
        let mut file = tokio::fs::File::create(&tmp)
            .await
            .map_err(|e| io_error(agent_id, e))?;
        file.write_all(json.as_bytes())
            .await
            .map_err(|e| io_error(agent_id, e))?;
        file.sync_all().await.map_err(|e| io_error(agent_id, e))?;
        drop(file);

        if let Err(e) = tokio::fs::rename(&tmp, &path).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(io_error(agent_id, e));
        }
        debug!(agent = agent_id, path = %path.display(), "ledger snapshot written");
        Ok(())
    }
}

/// Process-local store. Snapshots still go through JSON so restores behave
/// exactly like the file store.
#[derive(Default)]
pub struct MemoryStore {
    snapshots: RwLock<HashMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl StateStore for MemoryStore {
    async fn load(&self, agent_id: &str) -> Result<Option<LedgerSnapshot>, PersistenceError> {
        let snapshots = self.snapshots.read().await;
        match snapshots.get(agent_id) {
            Some(json) => serde_json::from_str(json)
                .map(Some)
                .map_err(|source| PersistenceError::Corrupt {
                    agent: agent_id.to_string(),
                    source,
                }),
            None => Ok(None),
        }
    }

    async fn save(&self, agent_id: &str, snapshot: &LedgerSnapshot) -> Result<(), PersistenceError> {
        let json = serde_json::to_string(snapshot).map_err(|source| PersistenceError::Corrupt {
            agent: agent_id.to_string(),
            source,
        })?;
        self.snapshots.write().await.insert(agent_id.to_string(), json);
        Ok(())
    }
}
