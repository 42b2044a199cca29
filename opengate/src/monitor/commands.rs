//! Control messages from [`MonitorHandle`](super::MonitorHandle) to the
//! monitor task.

use tokio::sync::oneshot;

use crate::error::Result;

pub enum MonitorCommand {
    /// Open a session. No-op when one is already running.
    Start { reply: oneshot::Sender<Result<()>> },

    /// Close the current session, if any.
    Stop { reply: oneshot::Sender<()> },
}
