//! Server drain sequence.
//!
//! Shutdown happens in a fixed order: stop accepting upgrades, close every
//! session with 1001, then give the listener a bounded time to finish its
//! in-flight HTTP requests before aborting it.

use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::registry::SessionRegistry;

/// What a drain accomplished.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ShutdownReport {
    /// Sessions closed with 1001.
    pub sessions_closed: usize,
    /// Whether the listener exited on its own before the deadline.
    pub listener_drained: bool,
}

/// Owns the shutdown signal shared by the listener and the `/ws` handler.
#[derive(Debug, Default)]
pub struct ShutdownCoordinator {
    token: CancellationToken,
}

impl ShutdownCoordinator {
    /// Coordinator with the signal not yet raised.
    pub fn new() -> Self {
        Self::default()
    }

    /// Signal observed by `axum::serve`'s graceful shutdown.
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Raise the signal. New upgrades are refused from here on.
    pub fn shutdown(&self) {
        self.token.cancel();
    }

    /// Whether the signal has been raised.
    pub fn is_shutting_down(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Raise the signal, close every session, then wait up to `deadline` for
    /// `listener`. A listener still running at the deadline is aborted.
    pub async fn drain(
        &self,
        registry: &SessionRegistry,
        listener: JoinHandle<()>,
        deadline: Duration,
    ) -> ShutdownReport {
        self.shutdown();
        let sessions_closed = registry.disconnect_all().await;
        info!(sessions_closed, deadline_secs = deadline.as_secs(), "draining listener");

        let abort = listener.abort_handle();
        let listener_drained = tokio::time::timeout(deadline, listener).await.is_ok();
        if !listener_drained {
            warn!("listener still running after {deadline:?}, aborting");
            abort.abort();
        }

        ShutdownReport {
            sessions_closed,
            listener_drained,
        }
    }
}
