//! Background expiry of stale sessions.

use std::sync::Weak;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error};

use crate::config::MIN_TIMER_PERIOD;
use crate::registry::SessionRegistry;

/// Run [`SessionRegistry::sweep_once`] every `interval` until the registry is dropped.
///
/// Each cycle runs in its own task so a panic inside a sweep is logged and the
/// loop keeps going. `interval` is raised to [`MIN_TIMER_PERIOD`].
pub fn spawn_sweeper(registry: Weak<SessionRegistry>, interval: Duration) -> JoinHandle<()> {
    let interval = interval.max(MIN_TIMER_PERIOD);
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        debug!(interval_secs = interval.as_secs(), "sweeper started");

        loop {
            let _ = ticker.tick().await;
            let Some(registry) = registry.upgrade() else {
                debug!("registry dropped, sweeper exiting");
                break;
            };
            let cycle = tokio::spawn(async move { registry.sweep_once().await });
            if let Err(e) = cycle.await {
                error!(error = %e, "sweep cycle failed");
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use palaver_core::SessionId;

    use super::*;
    use crate::registry::RegistryConfig;
    use crate::socket::test_support::socket;

    async fn settle() {
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test(start_paused = true)]
    async fn sweeper_expires_stale_session() {
        let registry = SessionRegistry::new(RegistryConfig {
            max_connections: 10,
            session_timeout: Duration::from_secs(60),
            sweep_interval: Duration::from_secs(30),
        });
        let (s, _rx) = socket("a:1");
        assert!(registry.connect(s.clone()).await);
        assert!(registry.sweeper_running());

        // First sweep at 30s: still fresh.
        tokio::time::sleep(Duration::from_secs(31)).await;
        settle().await;
        assert!(registry.contains(&SessionId::from_raw("a:1")).await);

        // Sweep at 90s: older than 60s.
        tokio::time::sleep(Duration::from_secs(60)).await;
        settle().await;
        assert!(!registry.contains(&SessionId::from_raw("a:1")).await);
        assert!(s.is_closed());
    }

    #[tokio::test(start_paused = true)]
    async fn sweeper_exits_when_registry_dropped() {
        let registry = SessionRegistry::new(RegistryConfig::default());
        let handle = spawn_sweeper(Arc::downgrade(&registry), Duration::from_secs(1));
        drop(registry);
        tokio::time::sleep(Duration::from_secs(2)).await;
        settle().await;
        assert!(handle.is_finished());
    }

    #[tokio::test(start_paused = true)]
    async fn zero_interval_sweeper_keeps_running() {
        let registry = SessionRegistry::new(RegistryConfig {
            sweep_interval: Duration::ZERO,
            ..RegistryConfig::default()
        });
        let (s, _rx) = socket("a:1");
        assert!(registry.connect(s.clone()).await);
        settle().await;
        assert!(registry.sweeper_running());

        s.mark_disconnected();
        tokio::time::sleep(MIN_TIMER_PERIOD * 2).await;
        settle().await;
        assert_eq!(registry.connection_count().await, 0);
        assert!(registry.sweeper_running());
    }

    #[tokio::test(start_paused = true)]
    async fn sweeper_removes_disconnected_socket() {
        let registry = SessionRegistry::new(RegistryConfig {
            sweep_interval: Duration::from_secs(5),
            ..RegistryConfig::default()
        });
        let (s, _rx) = socket("a:1");
        assert!(registry.connect(s.clone()).await);
        s.mark_disconnected();

        tokio::time::sleep(Duration::from_secs(6)).await;
        settle().await;
        assert_eq!(registry.connection_count().await, 0);
    }
}
