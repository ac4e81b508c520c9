//! Generation task context and outcome.

use std::sync::Arc;

use palaver_core::SessionId;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

use crate::socket::ClientSocket;

/// Everything a generation task needs from its session.
#[derive(Clone, Debug)]
pub struct GenerationContext {
    /// Owning session.
    pub session_id: SessionId,
    /// Where frames go.
    pub socket: Arc<ClientSocket>,
    /// Set by `stop`, `disconnect`, or a newer generation.
    pub cancel: CancellationToken,
}

/// How a generation ended.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum GenerationOutcome {
    /// Upstream finished and the buffer was flushed.
    Completed {
        /// Upstream stopped at the token cap.
        truncated: bool,
        /// Content frames written.
        frames: usize,
    },
    /// The cancellation token fired first.
    Cancelled,
    /// Upstream failed or the socket went away.
    Failed(String),
}

impl GenerationOutcome {
    /// Short label used in logs and metrics.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Completed { .. } => "completed",
            Self::Cancelled => "cancelled",
            Self::Failed(_) => "failed",
        }
    }
}

/// Handle returned when a generation is started.
#[derive(Debug)]
pub struct GenerationTicket {
    /// Monotonic generation number, unique within the registry.
    pub generation: u64,
    pub(crate) outcome: oneshot::Receiver<GenerationOutcome>,
}

impl GenerationTicket {
    /// Wait for the task to end.
    ///
    /// A task that was aborted or panicked reports `Failed`.
    pub async fn outcome(self) -> GenerationOutcome {
        self.outcome
            .await
            .unwrap_or_else(|_| GenerationOutcome::Failed("generation task aborted".into()))
    }
}
