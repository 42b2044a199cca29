use async_trait::async_trait;
use tokio::process::Command;

use super::{DialError, DialStrategy};
use crate::error::{Error, Result};
use crate::tracing::prelude::*;

/// Exit status reporting that a call is already in progress
/// (`EX_TEMPFAIL`).
pub const EXIT_LINE_BUSY: i32 = 75;

/// Exit status reporting that the program may not place calls
/// (`EX_NOPERM`).
pub const EXIT_NO_PERMISSION: i32 = 77;

/// Dials by running an external program with the number as its last
/// argument, e.g. `termux-telephony-call` or a modem helper script.
///
/// A zero exit status counts as success. [`EXIT_LINE_BUSY`] and
/// [`EXIT_NO_PERMISSION`] map to [`DialError::LineBusy`] and
/// [`DialError::PermissionDenied`]; any other status is a plain failure.
#[derive(Debug, Clone)]
pub struct CommandDialer {
    program: String,
    args: Vec<String>,
}

impl CommandDialer {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }

    /// Split a whitespace-separated command line into program and arguments.
    pub fn from_command_line(command_line: &str) -> Result<Self> {
        let mut words = command_line.split_whitespace().map(str::to_owned);
        let program = words
            .next()
            .ok_or_else(|| Error::Config("dial command is empty".into()))?;
        Ok(Self::new(program, words.collect()))
    }
}

#[async_trait]
impl DialStrategy for CommandDialer {
    fn name(&self) -> &'static str {
        "command"
    }

    async fn dial(&self, phone_number: &str) -> std::result::Result<(), DialError> {
        debug!(program = %self.program, "Running dial command");
        let status = Command::new(&self.program)
            .args(&self.args)
            .arg(phone_number)
            .kill_on_drop(true)
            .status()
            .await?;

        match status.code() {
            Some(0) => Ok(()),
            Some(EXIT_LINE_BUSY) => Err(DialError::LineBusy),
            Some(EXIT_NO_PERMISSION) => Err(DialError::PermissionDenied),
            _ => Err(DialError::Failed(format!(
                "{} exited with {status}",
                self.program
            ))),
        }
    }
}
