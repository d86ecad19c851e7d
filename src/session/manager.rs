use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use rand::Rng;
use serde::Serialize;
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use super::backend::{StorageBackend, StorageSession};
use crate::error::{AppResult, SessionError};

/// Connection manager tunables
#[derive(Debug, Clone)]
pub struct SessionSettings {
    pub heartbeat_interval: Duration,
    /// Sessions older than this are rotated before their next use
    pub max_session_age: Duration,
    pub connect_attempts: u32,
    pub backoff_base: Duration,
    pub backoff_max: Duration,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            heartbeat_interval: Duration::from_secs(45),
            max_session_age: Duration::from_secs(60),
            connect_attempts: 5,
            backoff_base: Duration::from_secs(1),
            backoff_max: Duration::from_secs(10),
        }
    }
}

impl SessionSettings {
    /// Linear backoff, capped, with up to 10% jitter
    fn backoff(&self, attempt: u32) -> Duration {
        let delay = self.backoff_base.saturating_mul(attempt).min(self.backoff_max);
        let jitter_ms = (delay.as_millis() / 10) as u64;
        if jitter_ms == 0 {
            return delay;
        }
        delay + Duration::from_millis(rand::rng().random_range(0..=jitter_ms))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    Disconnected,
    Connecting,
    Connected,
}

/// Health data for external reporting
#[derive(Debug, Clone, Serialize)]
pub struct SessionDiagnostics {
    pub state: SessionState,
    pub generation: u64,
    pub connected_since: Option<DateTime<Utc>>,
    pub last_heartbeat: Option<DateTime<Utc>>,
    pub last_reconnect: Option<DateTime<Utc>>,
    pub reconnect_count: u64,
    pub last_error: Option<String>,
}

impl Default for SessionDiagnostics {
    fn default() -> Self {
        Self {
            state: SessionState::Disconnected,
            generation: 0,
            connected_since: None,
            last_heartbeat: None,
            last_reconnect: None,
            reconnect_count: 0,
            last_error: None,
        }
    }
}

/// Why a session is being replaced
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Rotation {
    /// Healthy but past `max_session_age`; in-flight operations may still be using it
    Expired,
    /// Broken or missing
    Failed,
}

/// How often a retired session is checked for remaining borrowers
const RETIRE_POLL: Duration = Duration::from_millis(10);
/// Retired sessions are closed after this even if still borrowed
const RETIRE_LIMIT: Duration = Duration::from_secs(600);

#[derive(Clone)]
struct ActiveSession {
    session: Arc<dyn StorageSession>,
    generation: u64,
    opened_at: Instant,
}

struct Shared {
    backend: Arc<dyn StorageBackend>,
    settings: SessionSettings,
    current: RwLock<Option<ActiveSession>>,
    // Held for the whole connect so concurrent callers share one reconnect
    connect_lock: tokio::sync::Mutex<()>,
    generation: AtomicU64,
    diagnostics: Mutex<SessionDiagnostics>,
    closed: AtomicBool,
}

impl Shared {
    fn record_error(&self, message: String) {
        self.diagnostics.lock().last_error = Some(message);
    }

    async fn connect_with_retry(&self) -> AppResult<Arc<dyn StorageSession>> {
        let attempts = self.settings.connect_attempts.max(1);
        let mut last_error = String::new();

        for attempt in 1..=attempts {
            match self.backend.connect().await {
                Ok(session) => return Ok(session),
                Err(e) => {
                    last_error = e.to_string();
                    warn!(
                        "⚠️  Storage connect attempt {}/{} failed: {}",
                        attempt, attempts, last_error
                    );
                    if attempt < attempts {
                        tokio::time::sleep(self.settings.backoff(attempt)).await;
                    }
                }
            }
        }

        Err(SessionError::Unreachable {
            attempts,
            message: last_error,
        }
        .into())
    }

    /// Replace the session identified by `stale` (or establish one if there is none).
    ///
    /// Single-flight: callers queue on `connect_lock`; whoever gets it second finds a
    /// newer generation already installed and reuses it instead of reconnecting again.
    /// A failed session is closed right away; an expired one is closed once its last
    /// borrower has finished.
    async fn rotate(&self, stale: Option<u64>, rotation: Rotation) -> AppResult<ActiveSession> {
        let _guard = self.connect_lock.lock().await;

        if self.closed.load(Ordering::SeqCst) {
            return Err(SessionError::Closed.into());
        }

        let existing = self.current.read().clone();
        if let Some(active) = existing {
            if stale != Some(active.generation) {
                return Ok(active);
            }
        }

        let old = self.current.write().take();
        match (old, rotation) {
            (Some(old), Rotation::Expired) => retire(old),
            (Some(old), Rotation::Failed) => {
                debug!("Closing storage session generation {}", old.generation);
                if let Err(e) = old.session.close().await {
                    debug!("Ignoring close error on stale session: {}", e);
                }
            }
            (None, _) => {}
        }

        self.diagnostics.lock().state = SessionState::Connecting;

        let session = match self.connect_with_retry().await {
            Ok(session) => session,
            Err(e) => {
                error!("❌ Storage backend unreachable: {}", e);
                let mut diagnostics = self.diagnostics.lock();
                diagnostics.state = SessionState::Disconnected;
                diagnostics.last_error = Some(e.to_string());
                return Err(e);
            }
        };

        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let active = ActiveSession {
            session,
            generation,
            opened_at: Instant::now(),
        };
        *self.current.write() = Some(active.clone());

        let now = Utc::now();
        {
            let mut diagnostics = self.diagnostics.lock();
            diagnostics.state = SessionState::Connected;
            diagnostics.generation = generation;
            diagnostics.connected_since = Some(now);
            if generation > 1 {
                diagnostics.reconnect_count += 1;
                diagnostics.last_reconnect = Some(now);
            }
        }

        info!(
            "🔌 Storage session {} established (generation {})",
            active.session.id(),
            generation
        );
        Ok(active)
    }

    async fn acquire(&self) -> AppResult<ActiveSession> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(SessionError::Closed.into());
        }

        let existing = self.current.read().clone();
        match existing {
            Some(active) if active.opened_at.elapsed() < self.settings.max_session_age => {
                Ok(active)
            }
            Some(active) => {
                info!(
                    "🔄 Storage session generation {} exceeded {:?}, rotating",
                    active.generation, self.settings.max_session_age
                );
                self.rotate(Some(active.generation), Rotation::Expired).await
            }
            None => self.rotate(None, Rotation::Failed).await,
        }
    }

    async fn heartbeat(&self) {
        if self.closed.load(Ordering::SeqCst) {
            return;
        }

        let existing = self.current.read().clone();
        let Some(active) = existing else {
            debug!("💓 No storage session, attempting to connect");
            if let Err(e) = self.rotate(None, Rotation::Failed).await {
                warn!("⚠️  Heartbeat reconnect failed: {}", e);
            }
            return;
        };

        let alive = active.session.is_alive().await;
        self.diagnostics.lock().last_heartbeat = Some(Utc::now());

        let reason = match alive {
            Ok(true) => {
                debug!("💓 Storage session generation {} alive", active.generation);
                return;
            }
            Ok(false) => "session reported not alive".to_string(),
            Err(e) => e.to_string(),
        };

        warn!(
            "💔 Heartbeat failed for generation {}: {}",
            active.generation, reason
        );
        self.record_error(reason);
        if let Err(e) = self.rotate(Some(active.generation), Rotation::Failed).await {
            warn!("⚠️  Heartbeat reconnect failed: {}", e);
        }
    }
}

/// Close `old` in the background once no operation holds it any more.
///
/// Every borrower holds a clone of the session `Arc`, so the retiring task's own
/// reference is the last one when the count drops to 1.
fn retire(old: ActiveSession) {
    let ActiveSession {
        session,
        generation,
        ..
    } = old;
    debug!("↩️  Retiring storage session generation {}", generation);

    tokio::spawn(async move {
        let started = Instant::now();
        while Arc::strong_count(&session) > 1 {
            if started.elapsed() >= RETIRE_LIMIT {
                warn!(
                    "⚠️  Storage session generation {} still borrowed after {:?}, closing anyway",
                    generation, RETIRE_LIMIT
                );
                break;
            }
            tokio::time::sleep(RETIRE_POLL).await;
        }
        debug!("Closing retired storage session generation {}", generation);
        if let Err(e) = session.close().await {
            debug!("Ignoring close error on retired session: {}", e);
        }
    });
}

/// Owns the single long-lived storage session of this process.
///
/// Each process instance has its own session and timers; nothing is shared across
/// replicas.
pub struct ConnectionManager {
    shared: Arc<Shared>,
    heartbeat: Mutex<Option<JoinHandle<()>>>,
}

impl ConnectionManager {
    pub fn new(backend: Arc<dyn StorageBackend>, settings: SessionSettings) -> Self {
        Self {
            shared: Arc::new(Shared {
                backend,
                settings,
                current: RwLock::new(None),
                connect_lock: tokio::sync::Mutex::new(()),
                generation: AtomicU64::new(0),
                diagnostics: Mutex::new(SessionDiagnostics::default()),
                closed: AtomicBool::new(false),
            }),
            heartbeat: Mutex::new(None),
        }
    }

    /// Establish the first session (with retry/backoff) and start the heartbeat
    pub async fn initialize(&self) -> AppResult<()> {
        self.shared.rotate(None, Rotation::Failed).await?;
        self.start_heartbeat();
        Ok(())
    }

    fn start_heartbeat(&self) {
        let mut slot = self.heartbeat.lock();
        if slot.is_some() {
            return;
        }

        let weak: Weak<Shared> = Arc::downgrade(&self.shared);
        let period = self.shared.settings.heartbeat_interval;

        *slot = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // interval fires immediately; the session was just opened
            ticker.tick().await;

            loop {
                ticker.tick().await;
                let Some(shared) = weak.upgrade() else {
                    break;
                };
                if shared.closed.load(Ordering::SeqCst) {
                    break;
                }
                shared.heartbeat().await;
            }
            debug!("Heartbeat task stopped");
        }));
        info!("💓 Storage heartbeat started ({:?})", period);
    }

    /// Run `operation` against a live session.
    ///
    /// If it fails, the session is torn down and re-established once and the operation
    /// is retried exactly once; a second failure is returned unchanged. A failed
    /// reconnect is reported as `SessionError::Unreachable`.
    pub async fn with_connection<T, F, Fut>(&self, mut operation: F) -> AppResult<T>
    where
        F: FnMut(Arc<dyn StorageSession>) -> Fut,
        Fut: Future<Output = AppResult<T>>,
    {
        let active = self.shared.acquire().await?;

        match operation(active.session.clone()).await {
            Ok(value) => Ok(value),
            Err(first) => {
                warn!(
                    "⚠️  Storage operation failed on generation {}, reconnecting: {}",
                    active.generation, first
                );
                self.shared.record_error(first.to_string());

                let fresh = self
                    .shared
                    .rotate(Some(active.generation), Rotation::Failed)
                    .await?;
                operation(fresh.session.clone()).await.map_err(|second| {
                    error!("❌ Storage operation failed after reconnect: {}", second);
                    self.shared.record_error(second.to_string());
                    second
                })
            }
        }
    }

    /// One liveness check, as run by the heartbeat task
    pub async fn check_liveness(&self) {
        self.shared.heartbeat().await;
    }

    pub fn diagnostics(&self) -> SessionDiagnostics {
        self.shared.diagnostics.lock().clone()
    }

    pub fn settings(&self) -> &SessionSettings {
        &self.shared.settings
    }

    /// Stop the heartbeat and close the session; later calls fail with `Closed`
    pub async fn shutdown(&self) {
        self.shared.closed.store(true, Ordering::SeqCst);
        if let Some(handle) = self.heartbeat.lock().take() {
            handle.abort();
        }

        let _guard = self.shared.connect_lock.lock().await;
        let old = self.shared.current.write().take();
        if let Some(old) = old {
            if let Err(e) = old.session.close().await {
                warn!("⚠️  Error closing storage session: {}", e);
            }
        }
        self.shared.diagnostics.lock().state = SessionState::Disconnected;
        info!("🔌 Storage connection manager shut down");
    }
}

impl Drop for ConnectionManager {
    fn drop(&mut self) {
        if let Some(handle) = self.heartbeat.lock().take() {
            handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AppError;
    use crate::session::backend::UploadMetadata;
    use crate::testing::MockStorageBackend;

    fn settings() -> SessionSettings {
        SessionSettings {
            heartbeat_interval: Duration::from_secs(3600),
            max_session_age: Duration::from_secs(3600),
            connect_attempts: 5,
            backoff_base: Duration::from_millis(5),
            backoff_max: Duration::from_millis(20),
        }
    }

    async fn ping(manager: &ConnectionManager) -> AppResult<String> {
        manager
            .with_connection(|session| async move {
                if session.is_alive().await? {
                    Ok(session.id().to_string())
                } else {
                    Err(AppError::ExternalError("session is dead".to_string()))
                }
            })
            .await
    }

    #[test]
    fn test_backoff_is_linear_and_capped() {
        let s = SessionSettings {
            backoff_base: Duration::from_millis(100),
            backoff_max: Duration::from_millis(250),
            ..settings()
        };
        let first = s.backoff(1);
        assert!(first >= Duration::from_millis(100) && first <= Duration::from_millis(110));
        let second = s.backoff(2);
        assert!(second >= Duration::from_millis(200) && second <= Duration::from_millis(220));
        let capped = s.backoff(9);
        assert!(capped >= Duration::from_millis(250) && capped <= Duration::from_millis(275));
    }

    #[tokio::test]
    async fn test_initialize_retries_until_connected() {
        let backend = Arc::new(MockStorageBackend::new().with_connect_failures(2));
        let manager = ConnectionManager::new(backend.clone(), settings());

        manager.initialize().await.unwrap();
        assert_eq!(backend.connect_attempts(), 3);
        assert_eq!(manager.diagnostics().state, SessionState::Connected);
        assert_eq!(manager.diagnostics().reconnect_count, 0);
    }

    #[tokio::test]
    async fn test_initialize_gives_up_after_five_attempts() {
        let backend = Arc::new(MockStorageBackend::new().with_connect_failures(u32::MAX));
        let manager = ConnectionManager::new(backend.clone(), settings());

        let err = manager.initialize().await.unwrap_err();
        assert!(matches!(
            err,
            AppError::Session(SessionError::Unreachable { attempts: 5, .. })
        ));
        assert_eq!(backend.connect_attempts(), 5);
        assert_eq!(manager.diagnostics().state, SessionState::Disconnected);
        assert!(manager.diagnostics().last_error.is_some());
    }

    #[tokio::test]
    async fn test_first_failure_is_retried_on_fresh_session() {
        let backend = Arc::new(MockStorageBackend::new());
        let manager = ConnectionManager::new(backend.clone(), settings());
        manager.initialize().await.unwrap();

        let calls = AtomicU64::new(0);
        let result = manager
            .with_connection(|session| {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n == 0 {
                        Err(AppError::ExternalError("socket closed".to_string()))
                    } else {
                        Ok(session.id().to_string())
                    }
                }
            })
            .await
            .unwrap();

        assert_eq!(result, "session-2");
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(backend.sessions_opened(), 2);
        assert_eq!(manager.diagnostics().reconnect_count, 1);
    }

    #[tokio::test]
    async fn test_second_failure_propagates() {
        let backend = Arc::new(MockStorageBackend::new());
        let manager = ConnectionManager::new(backend.clone(), settings());
        manager.initialize().await.unwrap();

        let calls = AtomicU64::new(0);
        let err = manager
            .with_connection(|_session| {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                async move { Err::<(), _>(AppError::ExternalError(format!("failure {}", n))) }
            })
            .await
            .unwrap_err();

        assert!(matches!(err, AppError::ExternalError(ref m) if m == "failure 1"));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_concurrent_callers_share_one_reconnect() {
        let backend = Arc::new(MockStorageBackend::new().with_connect_delay(Duration::from_millis(30)));
        let manager = Arc::new(ConnectionManager::new(backend.clone(), settings()));
        manager.initialize().await.unwrap();
        backend.kill_sessions();

        let tasks: Vec<_> = (0..10)
            .map(|_| {
                let manager = manager.clone();
                tokio::spawn(async move {
                    manager
                        .with_connection(|session| async move {
                            if session.is_alive().await? {
                                Ok(())
                            } else {
                                Err(AppError::ExternalError("session is dead".to_string()))
                            }
                        })
                        .await
                })
            })
            .collect();

        for result in futures::future::join_all(tasks).await {
            result.unwrap().unwrap();
        }

        assert_eq!(backend.sessions_opened(), 2);
        assert_eq!(manager.diagnostics().generation, 2);
    }

    #[tokio::test]
    async fn test_forced_refresh_rotates_old_session() {
        let backend = Arc::new(MockStorageBackend::new());
        let manager = ConnectionManager::new(
            backend.clone(),
            SessionSettings {
                max_session_age: Duration::from_millis(50),
                ..settings()
            },
        );
        manager.initialize().await.unwrap();

        tokio::time::sleep(Duration::from_millis(80)).await;
        let id = manager
            .with_connection(|session| async move { Ok(session.id().to_string()) })
            .await
            .unwrap();

        assert_eq!(id, "session-2");
        // Closed in the background once unborrowed
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(backend.session_closed(0));
        assert!(!backend.session_closed(1));
    }

    #[tokio::test]
    async fn test_expired_session_outlives_its_slow_upload() {
        let backend = Arc::new(
            MockStorageBackend::new().with_upload_delay(Duration::from_millis(100)),
        );
        let manager = Arc::new(ConnectionManager::new(
            backend.clone(),
            SessionSettings {
                max_session_age: Duration::from_millis(50),
                ..settings()
            },
        ));
        manager.initialize().await.unwrap();

        let upload = {
            let manager = manager.clone();
            tokio::spawn(async move {
                manager
                    .with_connection(|session| async move {
                        let metadata = UploadMetadata {
                            file_name: "slow.bin".to_string(),
                            owner_address: "0xabc".to_string(),
                            content_hash: "00".to_string(),
                            size_bytes: 4,
                            duration_days: 1,
                        };
                        let stored = session.upload(b"slow", &metadata).await?;
                        Ok((session.id().to_string(), stored))
                    })
                    .await
            })
        };

        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(ping(&manager).await.unwrap(), "session-2");
        assert!(!backend.session_closed(0));

        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(ping(&manager).await.unwrap(), "session-3");

        let (id, stored) = upload.await.unwrap().unwrap();
        assert_eq!(id, "session-1");
        assert_eq!(stored.provider_id, "mock-provider");
        assert_eq!(backend.upload_calls(), 1);

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(backend.session_closed(0));
        assert!(backend.session_closed(1));
        assert!(!backend.session_closed(2));
        manager.shutdown().await;
    }

    #[tokio::test]
    async fn test_failed_reconnect_during_retry_is_unreachable() {
        let backend = Arc::new(MockStorageBackend::new());
        let manager = ConnectionManager::new(backend.clone(), settings());
        manager.initialize().await.unwrap();
        backend.refuse_connections();

        let calls = AtomicU64::new(0);
        let err = manager
            .with_connection(|_session| {
                calls.fetch_add(1, Ordering::SeqCst);
                async move { Err::<(), _>(AppError::ExternalError("socket closed".to_string())) }
            })
            .await
            .unwrap_err();

        assert!(
            matches!(
                err,
                AppError::Session(SessionError::Unreachable { attempts: 5, .. })
            ),
            "got {:?}",
            err
        );
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(backend.connect_attempts(), 6);
        assert_eq!(backend.sessions_opened(), 1);
        assert!(backend.session_closed(0));
        assert_eq!(manager.diagnostics().state, SessionState::Disconnected);
    }

    #[tokio::test]
    async fn test_heartbeat_replaces_dead_session() {
        let backend = Arc::new(MockStorageBackend::new());
        let manager = ConnectionManager::new(
            backend.clone(),
            SessionSettings {
                heartbeat_interval: Duration::from_millis(20),
                ..settings()
            },
        );
        manager.initialize().await.unwrap();
        backend.kill_sessions();

        tokio::time::sleep(Duration::from_millis(120)).await;

        let diagnostics = manager.diagnostics();
        assert!(diagnostics.last_heartbeat.is_some());
        assert!(diagnostics.reconnect_count >= 1);
        assert_eq!(diagnostics.state, SessionState::Connected);
        assert!(backend.sessions_opened() >= 2);
        manager.shutdown().await;
    }

    #[tokio::test]
    async fn test_check_liveness_keeps_healthy_session() {
        let backend = Arc::new(MockStorageBackend::new());
        let manager = ConnectionManager::new(backend.clone(), settings());
        manager.initialize().await.unwrap();

        manager.check_liveness().await;
        assert_eq!(backend.sessions_opened(), 1);
        assert!(manager.diagnostics().last_heartbeat.is_some());
    }

    #[tokio::test]
    async fn test_shutdown_rejects_further_use() {
        let backend = Arc::new(MockStorageBackend::new());
        let manager = ConnectionManager::new(backend.clone(), settings());
        manager.initialize().await.unwrap();
        manager.shutdown().await;

        let err = manager
            .with_connection(|session| async move { Ok(session.id().to_string()) })
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Session(SessionError::Closed)));
        assert!(backend.session_closed(0));
    }
}
