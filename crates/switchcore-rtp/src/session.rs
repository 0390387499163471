//! Session Registry: owns one `Session` per call, plus a background Reaper
//! that releases sessions gone idle after signalling loses track of them.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, RwLock};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::port_pool::{PortPool, SocketPair};

/// Lifecycle state of a `Session`. `New -> Active` on first forward start;
/// any state `-> Stopped` on explicit stop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum SessionState {
    New = 0,
    Active = 1,
    Stopped = 2,
}

impl SessionState {
    fn from_u8(v: u8) -> Self {
        match v {
            1 => SessionState::Active,
            2 => SessionState::Stopped,
            _ => SessionState::New,
        }
    }
}

/// Monotonic, lock-free per-session counters.
#[derive(Default)]
#[derive(Debug)]
pub struct SessionCounters {
    pub packets_caller_to_callee: AtomicU64,
    pub packets_callee_to_caller: AtomicU64,
    pub bytes_caller_to_callee: AtomicU64,
    pub bytes_callee_to_caller: AtomicU64,
    pub packets_dropped: AtomicU64,
}

impl SessionCounters {
    pub fn snapshot(&self) -> SessionCountersSnapshot {
        SessionCountersSnapshot {
            packets_caller_to_callee: self.packets_caller_to_callee.load(Ordering::Relaxed),
            packets_callee_to_caller: self.packets_callee_to_caller.load(Ordering::Relaxed),
            bytes_caller_to_callee: self.bytes_caller_to_callee.load(Ordering::Relaxed),
            bytes_callee_to_caller: self.bytes_callee_to_caller.load(Ordering::Relaxed),
            packets_dropped: self.packets_dropped.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionCountersSnapshot {
    pub packets_caller_to_callee: u64,
    pub packets_callee_to_caller: u64,
    pub bytes_caller_to_callee: u64,
    pub bytes_callee_to_caller: u64,
    pub packets_dropped: u64,
}

fn now_unix_nanos() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos() as i64
}

/// One two-leg call: a caller socket pair and a callee socket pair, with
/// lock-free state/activity/counters so the relay's hot path never blocks on
/// the registry mutex.
#[derive(Debug)]
pub struct Session {
    pub id: String,
    pub call_id: String,
    pub leg_caller: SocketPair,
    pub leg_callee: SocketPair,
    pub created_at: SystemTime,
    state: AtomicU8,
    last_activity_ns: AtomicI64,
    pub counters: SessionCounters,
    pub stopped_flag: Arc<AtomicBool>,
}

impl Session {
    pub fn state(&self) -> SessionState {
        SessionState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub fn set_active(&self) {
        // Only a New session transitions to Active; an already-Stopped
        // session must never be resurrected by a late StartRelay call.
        let _ = self.state.compare_exchange(
            SessionState::New as u8,
            SessionState::Active as u8,
            Ordering::AcqRel,
            Ordering::Acquire,
        );
    }

    pub fn set_stopped(&self) {
        self.state.store(SessionState::Stopped as u8, Ordering::Release);
        self.stopped_flag.store(true, Ordering::Release);
    }

    pub fn touch_activity(&self) {
        self.last_activity_ns.store(now_unix_nanos(), Ordering::Relaxed);
    }

    pub fn last_activity_ns(&self) -> i64 {
        self.last_activity_ns.load(Ordering::Relaxed)
    }

    pub fn idle_for(&self) -> Duration {
        let now = now_unix_nanos();
        let last = self.last_activity_ns();
        Duration::from_nanos(now.saturating_sub(last).max(0) as u64)
    }
}

/// Owns every live `Session`, keyed by session id, behind a single mutex;
/// per-session hot-path state lives on lock-free atomics (see `Session`).
pub struct SessionRegistry {
    pool: Arc<PortPool>,
    sessions: RwLock<HashMap<String, Arc<Session>>>,
    reaper: std::sync::Mutex<Option<ReaperHandle>>,
}

struct ReaperHandle {
    handle: JoinHandle<()>,
    stop: Arc<Notify>,
    stopped: Arc<AtomicBool>,
}

/// Tunables for the idle-session reaper (spec §4.2, §6).
#[derive(Debug, Clone, Copy)]
pub struct ReaperConfig {
    pub idle_timeout: Duration,
    pub scan_interval: Duration,
}

impl Default for ReaperConfig {
    fn default() -> Self {
        Self {
            idle_timeout: Duration::from_secs(60),
            scan_interval: Duration::from_secs(30),
        }
    }
}

impl SessionRegistry {
    pub fn new(pool: Arc<PortPool>) -> Self {
        Self {
            pool,
            sessions: RwLock::new(HashMap::new()),
            reaper: std::sync::Mutex::new(None),
        }
    }

    /// Allocate a new `Session` in state `New`. Rejects duplicate ids before
    /// any port is allocated (structural errors surface before side effects
    /// commit). If the second leg's allocation fails, the first leg is
    /// released so a failed Allocate never leaks a port.
    pub async fn allocate(&self, session_id: &str, call_id: &str) -> Result<Arc<Session>> {
        if self.sessions.read().unwrap().contains_key(session_id) {
            return Err(Error::DuplicateSession(session_id.to_string()));
        }

        let leg_caller = self.pool.allocate().await?;
        let leg_callee = match self.pool.allocate().await {
            Ok(leg) => leg,
            Err(e) => {
                self.pool.release(leg_caller.ports);
                return Err(e);
            }
        };

        let session = Arc::new(Session {
            id: session_id.to_string(),
            call_id: call_id.to_string(),
            leg_caller,
            leg_callee,
            created_at: SystemTime::now(),
            state: AtomicU8::new(SessionState::New as u8),
            last_activity_ns: AtomicI64::new(now_unix_nanos()),
            counters: SessionCounters::default(),
            stopped_flag: Arc::new(AtomicBool::new(false)),
        });

        self.sessions
            .write()
            .unwrap()
            .insert(session_id.to_string(), session.clone());

        info!(session_id, call_id, "session allocated");
        Ok(session)
    }

    pub fn get(&self, session_id: &str) -> Option<Arc<Session>> {
        self.sessions.read().unwrap().get(session_id).cloned()
    }

    /// Mark stopped and release both legs' ports. Idempotent.
    pub fn release(&self, session_id: &str) {
        let session = self.sessions.write().unwrap().remove(session_id);
        if let Some(session) = session {
            session.set_stopped();
            self.pool.release(session.leg_caller.ports);
            self.pool.release(session.leg_callee.ports);
            info!(session_id, "session released");
        }
    }

    pub fn len(&self) -> usize {
        self.sessions.read().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn snapshot_ids(&self) -> Vec<String> {
        self.sessions.read().unwrap().keys().cloned().collect()
    }

    /// Release every session idle for longer than `idle_timeout`. Returns
    /// the ids reaped, for logging/metrics by the caller.
    pub fn reap_idle(&self, idle_timeout: Duration) -> Vec<String> {
        let ids = self.snapshot_ids();
        let mut reaped = Vec::new();
        for id in ids {
            if let Some(session) = self.get(&id) {
                if session.idle_for() > idle_timeout {
                    self.release(&id);
                    reaped.push(id);
                }
            }
        }
        reaped
    }

    /// Start the periodic idle-session scan. Starting twice is a no-op on
    /// the already-running reaper (the prior one keeps running).
    pub fn start_reaper(self: &Arc<Self>, config: ReaperConfig) {
        let mut guard = self.reaper.lock().unwrap();
        if guard.is_some() {
            return;
        }
        let stop = Arc::new(Notify::new());
        let stopped = Arc::new(AtomicBool::new(false));
        let registry = self.clone();
        let stop_rx = stop.clone();
        let stopped_flag = stopped.clone();
        let handle = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = tokio::time::sleep(config.scan_interval) => {
                        let reaped = registry.reap_idle(config.idle_timeout);
                        if !reaped.is_empty() {
                            debug!(count = reaped.len(), "reaper released idle sessions");
                        }
                    }
                    _ = stop_rx.notified() => {
                        stopped_flag.store(true, Ordering::Release);
                        break;
                    }
                }
            }
        });
        *guard = Some(ReaperHandle {
            handle,
            stop,
            stopped,
        });
    }

    /// Request the reaper to stop after it finishes its current tick, and
    /// wait for it to exit.
    pub async fn stop_reaper(&self) {
        let handle = self.reaper.lock().unwrap().take();
        if let Some(h) = handle {
            h.stop.notify_one();
            let _ = h.handle.await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn new_registry(min: u16, max: u16) -> Arc<SessionRegistry> {
        let pool = Arc::new(PortPool::new(min, max).unwrap());
        Arc::new(SessionRegistry::new(pool))
    }

    #[tokio::test]
    async fn allocate_rejects_duplicate_ids() {
        let reg = new_registry(21000, 21019).await;
        reg.allocate("sess-1", "call-1").await.unwrap();
        let err = reg.allocate("sess-1", "call-2").await.unwrap_err();
        assert!(matches!(err, Error::DuplicateSession(_)));
    }

    #[tokio::test]
    async fn allocate_starts_in_new_state() {
        let reg = new_registry(21100, 21119).await;
        let s = reg.allocate("sess-2", "call-2").await.unwrap();
        assert_eq!(s.state(), SessionState::New);
        s.set_active();
        assert_eq!(s.state(), SessionState::Active);
    }

    #[tokio::test]
    async fn release_is_idempotent_and_frees_ports() {
        let reg = new_registry(21200, 21219).await;
        reg.allocate("sess-3", "call-3").await.unwrap();
        reg.release("sess-3");
        reg.release("sess-3"); // no panic
        assert!(reg.get("sess-3").is_none());
        assert_eq!(reg.len(), 0);
    }

    #[tokio::test]
    async fn reaper_releases_idle_sessions() {
        let reg = new_registry(21300, 21319).await;
        let s = reg.allocate("sess-4", "call-4").await.unwrap();
        // Force the activity clock into the past without sleeping.
        s.touch_activity();
        s.last_activity_ns
            .store(now_unix_nanos() - Duration::from_secs(120).as_nanos() as i64, Ordering::Relaxed);
        let reaped = reg.reap_idle(Duration::from_secs(60));
        assert_eq!(reaped, vec!["sess-4".to_string()]);
        assert!(reg.get("sess-4").is_none());
    }

    #[tokio::test]
    async fn active_sessions_survive_reap() {
        let reg = new_registry(21400, 21419).await;
        reg.allocate("sess-5", "call-5").await.unwrap();
        let reaped = reg.reap_idle(Duration::from_secs(60));
        assert!(reaped.is_empty());
    }
}
