use std::io;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::fs;
use tokio::sync::{Mutex, watch};

use super::{Edit, GateConfig, SettingsDocument, SettingsStore, publish};
use crate::error::{Error, Result};
use crate::tracing::prelude::*;

/// Settings persisted as a JSON document on disk.
///
/// The file is the only copy: every read loads it and every modification
/// re-reads it, applies the edit and writes the result back, so edits made
/// by another process (e.g. `opengate-cli` while the daemon runs) are
/// neither lost nor stale. Writes go to a sibling temp file that is renamed
/// over the document, so a crash mid-write leaves the previous version
/// intact.
///
/// Gate changes picked up from disk are published on the next read.
pub struct FileStore {
    path: PathBuf,
    /// Serializes read-modify-write cycles within this process.
    lock: Mutex<()>,
    config_tx: watch::Sender<GateConfig>,
}

impl FileStore {
    /// Open the document at `path`. A missing file reads as defaults and is
    /// not created until the first modification.
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let document = load(&path).await?;
        let (config_tx, _) = watch::channel(document.gate);

        Ok(Self {
            path,
            lock: Mutex::new(()),
            config_tx,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn persist(&self, document: &SettingsDocument) -> Result<()> {
        let context = |op: &str, e: io::Error| {
            Error::Store(format!("{op} {}: {e}", self.path.display()))
        };

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| context("create directory for", e))?;
        }

        let bytes = serde_json::to_vec_pretty(document)
            .map_err(|e| Error::Store(format!("serialize settings: {e}")))?;
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, bytes)
            .await
            .map_err(|e| context("write", e))?;
        fs::rename(&tmp, &self.path)
            .await
            .map_err(|e| context("replace", e))?;

        Ok(())
    }
}

async fn load(path: &Path) -> Result<SettingsDocument> {
    match fs::read(path).await {
        Ok(bytes) => Ok(serde_json::from_slice::<SettingsDocument>(&bytes)
            .map_err(|e| Error::Store(format!("parse {}: {e}", path.display())))?
            .normalized()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            trace!(path = %path.display(), "No settings file, using defaults");
            Ok(SettingsDocument::default())
        }
        Err(e) => Err(Error::Store(format!("read {}: {e}", path.display()))),
    }
}

#[async_trait]
impl SettingsStore for FileStore {
    async fn snapshot(&self) -> Result<SettingsDocument> {
        let _guard = self.lock.lock().await;
        let document = load(&self.path).await?;
        publish(&self.config_tx, &document.gate);
        Ok(document)
    }

    async fn modify(&self, edit: Edit) -> Result<SettingsDocument> {
        let _guard = self.lock.lock().await;
        let current = load(&self.path).await?;
        publish(&self.config_tx, &current.gate);

        let mut updated = current.clone();
        edit(&mut updated);

        if updated != current {
            self.persist(&updated).await?;
            publish(&self.config_tx, &updated.gate);
        }

        Ok(updated)
    }

    fn subscribe(&self) -> watch::Receiver<GateConfig> {
        self.config_tx.subscribe()
    }
}
