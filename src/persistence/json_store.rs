//! JSON file store
//!
//! One `<serial>.json` per charge point under the data directory, plus an
//! append-only `<serial>.log.jsonl` with one log entry per line.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::debug;

use super::{ChargePointStore, PersistedChargePoint, StoreError};
use crate::notifications::LogEntry;

pub struct JsonFileStore {
    root: PathBuf,
}

impl JsonFileStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn state_path(&self, serial: &str) -> PathBuf {
        self.root.join(format!("{serial}.json"))
    }

    fn log_path(&self, serial: &str) -> PathBuf {
        self.root.join(format!("{serial}.log.jsonl"))
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

#[async_trait]
impl ChargePointStore for JsonFileStore {
    async fn load(&self, serial: &str) -> Result<Option<PersistedChargePoint>, StoreError> {
        match fs::read(self.state_path(serial)).await {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn save(
        &self,
        state: &PersistedChargePoint,
        logs: &[LogEntry],
    ) -> Result<(), StoreError> {
        fs::create_dir_all(&self.root).await?;

        let json = serde_json::to_vec_pretty(state)?;
        fs::write(self.state_path(&state.serialno), json).await?;

        if !logs.is_empty() {
            let mut file = fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(self.log_path(&state.serialno))
                .await?;
            let mut buffer = Vec::new();
            for entry in logs {
                serde_json::to_writer(&mut buffer, entry)?;
                buffer.push(b'\n');
            }
            file.write_all(&buffer).await?;
            file.flush().await?;
        }

        debug!(serial = %state.serialno, logs = logs.len(), "charge point saved");
        Ok(())
    }

    async fn list_serials(&self) -> Result<Vec<String>, StoreError> {
        let mut serials = Vec::new();
        let mut dir = match fs::read_dir(&self.root).await {
            Ok(dir) => dir,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(serials),
            Err(e) => return Err(e.into()),
        };
        while let Some(entry) = dir.next_entry().await? {
            let name = entry.file_name();
            let name = name.to_string_lossy();
            if let Some(serial) = name.strip_suffix(".json") {
                serials.push(serial.to_string());
            }
        }
        serials.sort();
        Ok(serials)
    }

    async fn remove(&self, serial: &str) -> Result<(), StoreError> {
        for path in [self.state_path(serial), self.log_path(serial)] {
            match fs::remove_file(path).await {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }
}
