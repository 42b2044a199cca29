//! Placing the gate call.
//!
//! The monitor hands a phone number to an [`ActionExecutor`] and moves on;
//! whether and how the call goes through is the executor's business. The
//! stock executor, [`DialingExecutor`], walks an ordered list of
//! [`DialStrategy`] implementations (typically a direct dialer first, then
//! a user-confirmed prompt) and reports problems through a [`Notifier`].

mod command;
mod prompt;

pub use command::{CommandDialer, EXIT_LINE_BUSY, EXIT_NO_PERMISSION};
pub use prompt::PromptDialer;

use std::io;
use std::sync::Arc;

use async_trait::async_trait;

use crate::tracing::prelude::*;

const NOTICE_NUMBER_NOT_SET: &str = "Gate number not set";
const NOTICE_LINE_BUSY: &str = "Already in a call";
const NOTICE_ALL_FAILED: &str = "Unable to place call automatically. Please open the app.";

/// Fire-and-forget call placement.
#[async_trait]
pub trait ActionExecutor: Send + Sync {
    async fn place_call(&self, phone_number: &str);
}

/// One way of getting a call started.
#[async_trait]
pub trait DialStrategy: Send + Sync {
    /// Short name for logs.
    fn name(&self) -> &'static str;

    async fn dial(&self, phone_number: &str) -> Result<(), DialError>;
}

#[derive(Debug, thiserror::Error)]
pub enum DialError {
    /// Another call is in progress. Not worth trying other strategies.
    #[error("line busy")]
    LineBusy,

    #[error("call permission not granted")]
    PermissionDenied,

    #[error("dial failed: {0}")]
    Failed(String),

    #[error(transparent)]
    Io(#[from] io::Error),
}

/// User-visible notices (toasts, desktop notifications, ...).
pub trait Notifier: Send + Sync {
    fn notify(&self, message: &str);
}

/// Notifier that only writes to the log.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn notify(&self, message: &str) {
        warn!(notice = message, "User notice");
    }
}

/// Tries each strategy in order until one succeeds.
pub struct DialingExecutor {
    strategies: Vec<Box<dyn DialStrategy>>,
    notifier: Arc<dyn Notifier>,
}

impl DialingExecutor {
    pub fn new(strategies: Vec<Box<dyn DialStrategy>>, notifier: Arc<dyn Notifier>) -> Self {
        Self {
            strategies,
            notifier,
        }
    }
}

#[async_trait]
impl ActionExecutor for DialingExecutor {
    async fn place_call(&self, phone_number: &str) {
        let phone_number = phone_number.trim();
        if phone_number.is_empty() {
            error!("Gate number is blank");
            self.notifier.notify(NOTICE_NUMBER_NOT_SET);
            return;
        }

        for strategy in &self.strategies {
            match strategy.dial(phone_number).await {
                Ok(()) => {
                    info!(strategy = strategy.name(), "Gate call placed");
                    return;
                }
                Err(DialError::LineBusy) => {
                    info!(strategy = strategy.name(), "Already in a call, not dialing");
                    self.notifier.notify(NOTICE_LINE_BUSY);
                    return;
                }
                Err(e) => {
                    warn!(strategy = strategy.name(), error = %e, "Dial attempt failed, falling back");
                }
            }
        }

        error!("Every dial strategy failed");
        self.notifier.notify(NOTICE_ALL_FAILED);
    }
}
