use std::sync::Arc;

use async_trait::async_trait;

use super::{DialError, DialStrategy, Notifier};

/// Last-resort strategy: ask the user to place the call themselves.
pub struct PromptDialer {
    notifier: Arc<dyn Notifier>,
}

impl PromptDialer {
    pub fn new(notifier: Arc<dyn Notifier>) -> Self {
        Self { notifier }
    }
}

#[async_trait]
impl DialStrategy for PromptDialer {
    fn name(&self) -> &'static str {
        "prompt"
    }

    async fn dial(&self, phone_number: &str) -> Result<(), DialError> {
        self.notifier
            .notify(&format!("Near the gate. Tap to call tel:{phone_number}"));
        Ok(())
    }
}
