//! Live session bookkeeping.
//!
//! [`SessionRegistry`] owns every connected session: its socket, cancellation
//! token and the slot holding its single generation task. All mutation goes
//! through one async mutex so connect, disconnect, stop and sweep never
//! interleave on the same identity.
//!
//! The per-session task slot is a separate `parking_lot` mutex. It is never
//! held across an await, which lets a finishing task clear its own slot while
//! another caller holds the registry lock.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use metrics::{counter, gauge};
use palaver_core::{SessionError, SessionId};
use palaver_telemetry::names;
use parking_lot::Mutex as SlotMutex;
use serde::Serialize;
use tokio::sync::{Mutex, oneshot};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::generation::{GenerationContext, GenerationOutcome, GenerationTicket};
use crate::socket::{CLOSE_GOING_AWAY, CLOSE_NORMAL, CLOSE_POLICY_VIOLATION, ClientSocket};
use crate::sweeper::spawn_sweeper;

/// Close reason sent when the registry is full.
pub const CAPACITY_REASON: &str = "Maximum connections reached";

/// Registry limits and timings.
#[derive(Clone, Debug)]
pub struct RegistryConfig {
    /// Sessions admitted at once.
    pub max_connections: usize,
    /// Age after which the sweeper disconnects a session.
    pub session_timeout: Duration,
    /// Time between sweeps.
    pub sweep_interval: Duration,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            max_connections: 100,
            session_timeout: Duration::from_secs(600),
            sweep_interval: Duration::from_secs(30),
        }
    }
}

/// Result of one sweep.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Sessions inspected.
    pub checked: usize,
    /// Removed because the socket was already gone.
    pub expired_disconnected: usize,
    /// Removed because they outlived the session timeout.
    pub expired_timeout: usize,
    /// Removals whose teardown reported an error.
    pub failures: usize,
}

impl SweepReport {
    /// Total sessions removed.
    pub fn expired(&self) -> usize {
        self.expired_disconnected + self.expired_timeout
    }
}

/// Connection summary for `/health`.
#[derive(Clone, Debug, Serialize)]
pub struct ConnectionInfo {
    /// Registered sessions.
    pub total_connections: usize,
    /// Capacity.
    pub max_connections: usize,
    /// One entry per session, ordered by id.
    pub clients: Vec<ClientInfo>,
}

/// One session in [`ConnectionInfo`].
#[derive(Clone, Debug, Serialize)]
pub struct ClientInfo {
    /// Session id (`host:port`).
    pub id: String,
    /// RFC 3339 connect time.
    pub connected_at: String,
    /// Seconds since connect.
    pub duration_secs: u64,
    /// Whether a generation is running.
    pub has_active_stream: bool,
}

struct ActiveTask {
    generation: u64,
    handle: JoinHandle<()>,
    finished: CancellationToken,
}

type TaskSlot = Arc<SlotMutex<Option<ActiveTask>>>;

struct Session {
    socket: Arc<ClientSocket>,
    created_at: Instant,
    cancel: CancellationToken,
    task: TaskSlot,
}

impl Session {
    fn new(socket: Arc<ClientSocket>) -> Self {
        Self {
            socket,
            created_at: Instant::now(),
            cancel: CancellationToken::new(),
            task: Arc::new(SlotMutex::new(None)),
        }
    }

    fn has_task(&self) -> bool {
        self.task.lock().is_some()
    }
}

/// Clears the slot and trips the `finished` latch when a task ends, however it ends.
struct SlotGuard {
    slot: TaskSlot,
    generation: u64,
    finished: CancellationToken,
}

impl Drop for SlotGuard {
    fn drop(&mut self) {
        {
            let mut slot = self.slot.lock();
            if slot.as_ref().is_some_and(|t| t.generation == self.generation) {
                *slot = None;
            }
        }
        self.finished.cancel();
        gauge!(names::GENERATIONS_ACTIVE).decrement(1.0);
    }
}

#[derive(Clone, Copy, Debug)]
enum Expiry {
    Disconnected,
    Timeout,
}

/// Tracks live sessions and their generation tasks.
pub struct SessionRegistry {
    config: RegistryConfig,
    sessions: Mutex<HashMap<SessionId, Session>>,
    sweeper: SlotMutex<Option<JoinHandle<()>>>,
    generation_seq: AtomicU64,
}

impl SessionRegistry {
    /// Create an empty registry. The sweeper starts with the first connection.
    pub fn new(config: RegistryConfig) -> Arc<Self> {
        Arc::new(Self {
            config,
            sessions: Mutex::new(HashMap::new()),
            sweeper: SlotMutex::new(None),
            generation_seq: AtomicU64::new(0),
        })
    }

    /// Registry limits.
    pub fn config(&self) -> &RegistryConfig {
        &self.config
    }

    /// Admit `socket`.
    ///
    /// An existing session with the same identity is torn down first. At
    /// capacity the socket is closed with 1008 and `false` is returned.
    pub async fn connect(self: &Arc<Self>, socket: Arc<ClientSocket>) -> bool {
        let mut sessions = self.sessions.lock().await;

        if let Some(previous) = sessions.remove(&socket.id) {
            debug!(session_id = %socket.id, "replacing session with same identity");
            counter!(names::WS_DISCONNECTIONS_TOTAL, "reason" => "replaced").increment(1);
            if let Err(e) = teardown(previous, CLOSE_NORMAL, "Replaced by new connection").await {
                debug!(session_id = %socket.id, error = %e, "replaced session teardown failed");
            }
        }

        if sessions.len() >= self.config.max_connections {
            warn!(
                session_id = %socket.id,
                max_connections = self.config.max_connections,
                "connection rejected: at capacity"
            );
            counter!(names::WS_REJECTED_TOTAL).increment(1);
            socket.close(CLOSE_POLICY_VIOLATION, CAPACITY_REASON);
            set_active(sessions.len());
            return false;
        }

        info!(session_id = %socket.id, total = sessions.len() + 1, "session connected");
        counter!(names::WS_CONNECTIONS_TOTAL).increment(1);
        let _ = sessions.insert(socket.id.clone(), Session::new(socket));
        set_active(sessions.len());
        drop(sessions);

        self.ensure_sweeper();
        true
    }

    /// Tear down the session for `id`. Returns `false` if it was not registered.
    pub async fn disconnect(&self, id: &SessionId) -> bool {
        let mut sessions = self.sessions.lock().await;
        let Some(session) = sessions.remove(id) else {
            return false;
        };
        set_active(sessions.len());
        counter!(names::WS_DISCONNECTIONS_TOTAL, "reason" => "disconnect").increment(1);
        if let Err(e) = teardown(session, CLOSE_NORMAL, "").await {
            warn!(session_id = %id, error = %e, "session teardown failed");
        }
        info!(session_id = %id, "session disconnected");
        true
    }

    /// Disconnect only if `socket` is still the registered socket for its id.
    ///
    /// A connection loop that was superseded by a newer connection from the
    /// same address must not evict its successor.
    pub async fn release(&self, socket: &Arc<ClientSocket>) -> bool {
        let mut sessions = self.sessions.lock().await;
        let current = sessions
            .get(&socket.id)
            .is_some_and(|s| Arc::ptr_eq(&s.socket, socket));
        if !current {
            return false;
        }
        let Some(session) = sessions.remove(&socket.id) else {
            return false;
        };
        set_active(sessions.len());
        counter!(names::WS_DISCONNECTIONS_TOTAL, "reason" => "closed").increment(1);
        if let Err(e) = teardown(session, CLOSE_NORMAL, "").await {
            warn!(session_id = %socket.id, error = %e, "session teardown failed");
        }
        info!(session_id = %socket.id, "session released");
        true
    }

    /// Signal the running generation for `id` to stop. The socket stays open.
    pub async fn stop_stream(&self, id: &SessionId) -> bool {
        let sessions = self.sessions.lock().await;
        let Some(session) = sessions.get(id) else {
            return false;
        };
        session.cancel.cancel();
        debug!(session_id = %id, "stop requested");
        true
    }

    /// Resolve once the generation running for `id` (if any) has ended.
    pub async fn wait_for_generation(&self, id: &SessionId) {
        let finished = {
            let sessions = self.sessions.lock().await;
            sessions
                .get(id)
                .and_then(|s| s.task.lock().as_ref().map(|t| t.finished.clone()))
        };
        if let Some(finished) = finished {
            finished.cancelled().await;
        }
    }

    /// Start a generation for `id`, replacing any running one.
    ///
    /// The previous task is cancelled and awaited before the new one is
    /// spawned, so at most one generation runs per session. `task` receives a
    /// fresh cancellation token. The slot is cleared by the task itself when
    /// it ends.
    pub async fn start_generation<F, Fut>(
        &self,
        id: &SessionId,
        task: F,
    ) -> Result<GenerationTicket, SessionError>
    where
        F: FnOnce(GenerationContext) -> Fut + Send,
        Fut: Future<Output = GenerationOutcome> + Send + 'static,
    {
        let mut sessions = self.sessions.lock().await;
        let session = sessions
            .get_mut(id)
            .ok_or_else(|| SessionError::NotFound(id.to_string()))?;

        session.cancel.cancel();
        let previous = session.task.lock().take();
        if let Some(previous) = previous {
            debug!(session_id = %id, generation = previous.generation, "cancelling previous generation");
            if let Err(e) = previous.handle.await {
                if e.is_panic() {
                    warn!(session_id = %id, "previous generation panicked");
                }
            }
        }

        session.cancel = CancellationToken::new();
        let generation = self.generation_seq.fetch_add(1, Ordering::Relaxed) + 1;
        let ctx = GenerationContext {
            session_id: id.clone(),
            socket: session.socket.clone(),
            cancel: session.cancel.clone(),
        };
        let finished = CancellationToken::new();
        let guard = SlotGuard {
            slot: session.task.clone(),
            generation,
            finished: finished.clone(),
        };
        let (tx, rx) = oneshot::channel();
        let fut = task(ctx);

        {
            let mut slot = session.task.lock();
            gauge!(names::GENERATIONS_ACTIVE).increment(1.0);
            let handle = tokio::spawn(async move {
                let guard = guard;
                let outcome = fut.await;
                drop(guard);
                let _ = tx.send(outcome);
            });
            *slot = Some(ActiveTask {
                generation,
                handle,
                finished,
            });
        }

        Ok(GenerationTicket {
            generation,
            outcome: rx,
        })
    }

    /// Whether `id` has a generation running.
    pub async fn has_active_generation(&self, id: &SessionId) -> bool {
        let sessions = self.sessions.lock().await;
        sessions.get(id).is_some_and(Session::has_task)
    }

    /// Expire disconnected and timed-out sessions.
    ///
    /// A failing teardown is logged and counted; the remaining sessions are
    /// still swept.
    pub async fn sweep_once(&self) -> SweepReport {
        let mut sessions = self.sessions.lock().await;
        let mut report = SweepReport {
            checked: sessions.len(),
            ..SweepReport::default()
        };

        let expired: Vec<(SessionId, Expiry)> = sessions
            .iter()
            .filter_map(|(id, s)| {
                if !s.socket.is_connected() {
                    Some((id.clone(), Expiry::Disconnected))
                } else if s.created_at.elapsed() > self.config.session_timeout {
                    Some((id.clone(), Expiry::Timeout))
                } else {
                    None
                }
            })
            .collect();

        for (id, why) in expired {
            let Some(session) = sessions.remove(&id) else {
                continue;
            };
            let reason = match why {
                Expiry::Disconnected => {
                    report.expired_disconnected += 1;
                    "disconnected"
                }
                Expiry::Timeout => {
                    report.expired_timeout += 1;
                    "timeout"
                }
            };
            counter!(names::SWEEP_EXPIRED_TOTAL, "reason" => reason).increment(1);
            debug!(session_id = %id, reason, "sweeping session");
            if let Err(e) = teardown(session, CLOSE_NORMAL, "Session expired").await {
                report.failures += 1;
                warn!(session_id = %id, error = %e, "sweep teardown failed");
            }
        }

        set_active(sessions.len());
        counter!(names::SWEEP_RUNS_TOTAL).increment(1);
        if report.expired() > 0 {
            info!(
                checked = report.checked,
                disconnected = report.expired_disconnected,
                timed_out = report.expired_timeout,
                "sweep expired sessions"
            );
        }
        report
    }

    /// Disconnect every session with 1001. Used at shutdown.
    pub async fn disconnect_all(&self) -> usize {
        let mut sessions = self.sessions.lock().await;
        let drained: Vec<(SessionId, Session)> = sessions.drain().collect();
        set_active(0);
        let count = drained.len();
        for (id, session) in drained {
            if let Err(e) = teardown(session, CLOSE_GOING_AWAY, "Server shutting down").await {
                warn!(session_id = %id, error = %e, "shutdown teardown failed");
            }
        }
        if count > 0 {
            info!(count, "disconnected all sessions");
        }
        count
    }

    /// Snapshot for `/health`.
    pub async fn connection_info(&self) -> ConnectionInfo {
        let sessions = self.sessions.lock().await;
        let mut clients: Vec<ClientInfo> = sessions
            .iter()
            .map(|(id, s)| ClientInfo {
                id: id.to_string(),
                connected_at: s.socket.connected_at.to_rfc3339(),
                duration_secs: s.created_at.elapsed().as_secs(),
                has_active_stream: s.has_task(),
            })
            .collect();
        clients.sort_by(|a, b| a.id.cmp(&b.id));
        ConnectionInfo {
            total_connections: sessions.len(),
            max_connections: self.config.max_connections,
            clients,
        }
    }

    /// Registered sessions.
    pub async fn connection_count(&self) -> usize {
        self.sessions.lock().await.len()
    }

    /// Whether `id` is registered.
    pub async fn contains(&self, id: &SessionId) -> bool {
        self.sessions.lock().await.contains_key(id)
    }

    /// Whether the background sweeper is running.
    pub fn sweeper_running(&self) -> bool {
        self.sweeper.lock().as_ref().is_some_and(|h| !h.is_finished())
    }

    fn ensure_sweeper(self: &Arc<Self>) {
        let mut sweeper = self.sweeper.lock();
        if sweeper.as_ref().is_some_and(|h| !h.is_finished()) {
            return;
        }
        *sweeper = Some(spawn_sweeper(
            Arc::downgrade(self),
            self.config.sweep_interval,
        ));
    }
}

impl Drop for SessionRegistry {
    fn drop(&mut self) {
        if let Some(handle) = self.sweeper.lock().take() {
            handle.abort();
        }
    }
}

/// Cancel, close and await. Errors only if the generation task panicked.
///
/// The socket is closed before the task is awaited so a send blocked on a
/// full outbound queue returns.
async fn teardown(session: Session, code: u16, reason: &str) -> Result<(), String> {
    session.cancel.cancel();
    session.socket.close(code, reason);
    let task = session.task.lock().take();
    let mut result = Ok(());
    if let Some(task) = task {
        match task.handle.await {
            Err(e) if e.is_panic() => {
                result = Err(format!("generation {} panicked", task.generation));
            }
            _ => {}
        }
    }
    result
}

#[allow(clippy::cast_precision_loss)]
fn set_active(count: usize) {
    gauge!(names::SESSIONS_ACTIVE).set(count as f64);
}
