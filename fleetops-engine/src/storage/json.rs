use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use fleetops_core::ScheduledUpdate;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::fs;

use crate::storage::{DocumentStore, StorageError, UptimeSnapshot};

const UPDATES_FILE: &str = "scheduled_updates.json";
const UPTIME_FILE: &str = "uptime_history.json";

/// JSON file storage.
/// Keeps `scheduled_updates.json` and `uptime_history.json` in one
/// directory. Each save writes a sibling temp file and renames it over the
/// document so a crash never leaves a half-written file behind.
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    dir: PathBuf,
}

impl JsonFileStore {
    pub fn new<P: AsRef<Path>>(dir: P) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
        }
    }

    pub fn updates_path(&self) -> PathBuf {
        self.dir.join(UPDATES_FILE)
    }

    pub fn uptime_path(&self) -> PathBuf {
        self.dir.join(UPTIME_FILE)
    }

    async fn read<T: DeserializeOwned>(path: &Path) -> Result<Option<T>, StorageError> {
        let content = match fs::read(path).await {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        Ok(Some(serde_json::from_slice(&content)?))
    }

    async fn write<T: Serialize + ?Sized>(&self, path: &Path, value: &T) -> Result<(), StorageError> {
        fs::create_dir_all(&self.dir).await?;

        let content = serde_json::to_vec_pretty(value)?;
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, content).await?;
        fs::rename(&tmp, path).await?;

        Ok(())
    }
}

#[async_trait]
impl DocumentStore for JsonFileStore {
    async fn load_updates(&self) -> Result<Option<Vec<ScheduledUpdate>>, StorageError> {
        Self::read(&self.updates_path()).await
    }

    async fn save_updates(&self, updates: &[ScheduledUpdate]) -> Result<(), StorageError> {
        self.write(&self.updates_path(), updates).await
    }

    async fn load_uptime(&self) -> Result<Option<UptimeSnapshot>, StorageError> {
        Self::read(&self.uptime_path()).await
    }

    async fn save_uptime(&self, snapshot: &UptimeSnapshot) -> Result<(), StorageError> {
        self.write(&self.uptime_path(), snapshot).await
    }
}
