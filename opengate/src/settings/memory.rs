use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::watch;

use super::{Edit, GateConfig, SettingsDocument, SettingsStore, publish};
use crate::error::Result;

/// Settings held in process memory. Nothing survives a restart.
pub struct MemoryStore {
    document: Mutex<SettingsDocument>,
    config_tx: watch::Sender<GateConfig>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::with_document(SettingsDocument::default())
    }

    pub fn with_document(document: SettingsDocument) -> Self {
        let document = document.normalized();
        let (config_tx, _) = watch::channel(document.gate.clone());
        Self {
            document: Mutex::new(document),
            config_tx,
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SettingsStore for MemoryStore {
    async fn snapshot(&self) -> Result<SettingsDocument> {
        Ok(self.document.lock().clone())
    }

    async fn modify(&self, edit: Edit) -> Result<SettingsDocument> {
        let updated = {
            let mut document = self.document.lock();
            edit(&mut *document);
            document.clone()
        };
        publish(&self.config_tx, &updated.gate);
        Ok(updated)
    }

    fn subscribe(&self) -> watch::Receiver<GateConfig> {
        self.config_tx.subscribe()
    }
}
