//! Separate capacity-limited registries for speakers and listeners (§3, §4.1),
//! ported from the reference `ClientManager`/`SpeakerManager`/`ListenerManager`.
//! Connection identity here is a locally-issued `ConnId`, not the transport
//! object itself, which keeps the registry transport-agnostic.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::Mutex;
use tracing::{error, warn};

use crate::listener_session::ListenerHandle;
use crate::speaker_session::SpeakerHandle;
use streamcast_protocol::{Heartbeat, ServerToSpeaker};

/// How often the registries are polled for `max_connection_time` expiry
/// (§4.1, §5: "enforced polled by the registry").
const TIMEOUT_SWEEP_INTERVAL: Duration = Duration::from_secs(5);

pub type ConnId = u64;

pub fn next_conn_id() -> ConnId {
    static COUNTER: AtomicU64 = AtomicU64::new(1);
    COUNTER.fetch_add(1, Ordering::Relaxed)
}

struct Entry<S> {
    session: Arc<S>,
    start_time: Instant,
}

/// Generic capacity/timeout-enforcing registry. Both the speaker and
/// listener registries are thin wrappers around one of these so the
/// capacity/timeout/eviction mechanics live in exactly one place.
pub struct Registry<S> {
    entries: Mutex<HashMap<ConnId, Entry<S>>>,
    max_clients: usize,
    max_connection_time: Duration,
}

impl<S> Registry<S> {
    pub fn new(max_clients: usize, max_connection_time: Duration) -> Self {
        Registry {
            entries: Mutex::new(HashMap::new()),
            max_clients,
            max_connection_time,
        }
    }

    pub async fn add(&self, id: ConnId, session: Arc<S>) {
        let mut entries = self.entries.lock().await;
        entries.insert(
            id,
            Entry {
                session,
                start_time: Instant::now(),
            },
        );
    }

    pub async fn get(&self, id: ConnId) -> Option<Arc<S>> {
        self.entries.lock().await.get(&id).map(|e| e.session.clone())
    }

    pub async fn remove(&self, id: ConnId) -> Option<Arc<S>> {
        self.entries.lock().await.remove(&id).map(|e| e.session)
    }

    pub async fn count(&self) -> usize {
        self.entries.lock().await.len()
    }

    pub async fn is_full(&self) -> bool {
        self.entries.lock().await.len() >= self.max_clients
    }

    /// `(max_connection_time - max_age_of_any_session) / 60`, in minutes;
    /// 0 when the registry is empty (§4.1).
    pub async fn estimated_wait_minutes(&self) -> f64 {
        let entries = self.entries.lock().await;
        let oldest = entries.values().map(|e| e.start_time.elapsed()).max();
        match oldest {
            Some(age) => {
                let remaining = self.max_connection_time.as_secs_f64() - age.as_secs_f64();
                (remaining / 60.0).max(0.0)
            }
            None => 0.0,
        }
    }

    pub async fn is_timed_out(&self, id: ConnId) -> bool {
        let entries = self.entries.lock().await;
        entries
            .get(&id)
            .map(|e| e.start_time.elapsed() >= self.max_connection_time)
            .unwrap_or(false)
    }

    /// Snapshot of (id, session) pairs taken under the lock; callers MUST
    /// perform any I/O after releasing it (§5).
    pub async fn snapshot(&self) -> Vec<(ConnId, Arc<S>)> {
        self.entries
            .lock()
            .await
            .iter()
            .map(|(id, e)| (*id, e.session.clone()))
            .collect()
    }

    /// Snapshot of sessions whose age has reached `max_connection_time`,
    /// taken under the lock so the caller can act on them afterwards
    /// without holding it (§4.1 `is_timed_out`, §5).
    pub async fn timed_out_snapshot(&self) -> Vec<(ConnId, Arc<S>)> {
        self.entries
            .lock()
            .await
            .iter()
            .filter(|(_, e)| e.start_time.elapsed() >= self.max_connection_time)
            .map(|(id, e)| (*id, e.session.clone()))
            .collect()
    }
}

pub struct SpeakerRegistry {
    registry: Registry<SpeakerHandle>,
    uid_index: Mutex<HashMap<String, ConnId>>,
}

impl SpeakerRegistry {
    pub fn new(max_clients: usize, max_connection_time: Duration) -> Self {
        SpeakerRegistry {
            registry: Registry::new(max_clients, max_connection_time),
            uid_index: Mutex::new(HashMap::new()),
        }
    }

    pub async fn is_full(&self) -> bool {
        self.registry.is_full().await
    }

    pub async fn estimated_wait_minutes(&self) -> f64 {
        self.registry.estimated_wait_minutes().await
    }

    pub async fn is_timed_out(&self, id: ConnId) -> bool {
        self.registry.is_timed_out(id).await
    }

    pub async fn get(&self, id: ConnId) -> Option<Arc<SpeakerHandle>> {
        self.registry.get(id).await
    }

    /// Remove and return any prior holder of `uid`, if one exists, so the
    /// caller can fully tear it down (await its `shutdown()`) before
    /// constructing and inserting a replacement session (§4.1, §3, §8
    /// scenario 2: eviction must complete before the new session is
    /// added, never concurrently with it).
    pub async fn take_prior(&self, uid: &str) -> Option<Arc<SpeakerHandle>> {
        let prior_id = self.uid_index.lock().await.remove(uid)?;
        self.registry.remove(prior_id).await
    }

    /// Insert `session` under `id`/`uid`. Callers MUST have already
    /// evicted any prior holder of `uid` via [`Self::take_prior`].
    pub async fn add(&self, id: ConnId, uid: &str, session: Arc<SpeakerHandle>) {
        self.uid_index.lock().await.insert(uid.to_string(), id);
        self.registry.add(id, session).await;
    }

    pub async fn remove(&self, id: ConnId, uid: &str) -> Option<Arc<SpeakerHandle>> {
        let mut index = self.uid_index.lock().await;
        if index.get(uid) == Some(&id) {
            index.remove(uid);
        }
        drop(index);
        self.registry.remove(id).await
    }

    /// Evict every speaker whose session age has reached
    /// `max_connection_time`: send it a `DISCONNECT` frame, then remove it
    /// and stop its workers (§4.1 `is_timed_out`, §4.8 timeout transition,
    /// §7 Timeout error kind).
    async fn sweep_timeouts(&self) {
        for (id, handle) in self.registry.timed_out_snapshot().await {
            let _ = handle
                .shared
                .outbound
                .send_json(&ServerToSpeaker::disconnect(&handle.uid))
                .await;
            self.remove(id, &handle.uid).await;
            handle.shutdown().await;
        }
    }
}

pub struct ListenerRegistry {
    registry: Registry<ListenerHandle>,
}

impl ListenerRegistry {
    pub fn new(max_clients: usize, max_connection_time: Duration) -> Self {
        ListenerRegistry {
            registry: Registry::new(max_clients, max_connection_time),
        }
    }

    pub async fn is_full(&self) -> bool {
        self.registry.is_full().await
    }

    pub async fn estimated_wait_minutes(&self) -> f64 {
        self.registry.estimated_wait_minutes().await
    }

    pub async fn is_timed_out(&self, id: ConnId) -> bool {
        self.registry.is_timed_out(id).await
    }

    pub async fn add(&self, id: ConnId, session: Arc<ListenerHandle>) {
        self.registry.add(id, session).await;
    }

    pub async fn remove(&self, id: ConnId) -> Option<Arc<ListenerHandle>> {
        self.registry.remove(id).await
    }

    /// Deliver `message` to every listener following `speaker_uid`; a
    /// per-listener send failure removes that listener without aborting
    /// delivery to the rest (§4.7).
    pub async fn broadcast<T: serde::Serialize>(&self, speaker_uid: &str, message: &T) {
        let targets: Vec<_> = self
            .registry
            .snapshot()
            .await
            .into_iter()
            .filter(|(_, handle)| handle.follows == speaker_uid)
            .collect();
        for (id, handle) in targets {
            if let Err(e) = handle.outbound.send_json(message).await {
                warn!(listener_id = id, error = %e, "removing listener after send failure");
                self.remove(id).await;
            }
        }
    }

    async fn run_heartbeat_once(&self) {
        let targets = self.registry.snapshot().await;
        for (id, handle) in targets {
            if let Err(e) = handle.outbound.send_json(&Heartbeat::default()).await {
                warn!(listener_id = id, error = %e, "removing listener after heartbeat failure");
                self.remove(id).await;
            }
        }
    }

    /// Remove every listener whose session age has reached
    /// `max_connection_time` (§4.1 `is_timed_out`).
    async fn sweep_timeouts(&self) {
        for (id, _handle) in self.registry.timed_out_snapshot().await {
            self.remove(id).await;
        }
    }
}

/// Owns both registries and the listener heartbeat background task.
pub struct SessionManager {
    pub speakers: Arc<SpeakerRegistry>,
    pub listeners: Arc<ListenerRegistry>,
}

impl SessionManager {
    pub fn new(
        max_speakers: usize,
        max_listeners: usize,
        max_connection_time: Duration,
        heartbeat_interval: Duration,
    ) -> Arc<Self> {
        let manager = Arc::new(SessionManager {
            speakers: Arc::new(SpeakerRegistry::new(max_speakers, max_connection_time)),
            listeners: Arc::new(ListenerRegistry::new(max_listeners, max_connection_time)),
        });
        let listeners = manager.listeners.clone();
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(heartbeat_interval).await;
                listeners.run_heartbeat_once().await;
            }
        });

        let speakers = manager.speakers.clone();
        let listeners = manager.listeners.clone();
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(TIMEOUT_SWEEP_INTERVAL).await;
                speakers.sweep_timeouts().await;
                listeners.sweep_timeouts().await;
            }
        });

        manager
    }
}

/// Send the capacity `WAIT` frame and report whether the caller should
/// stop (§4.1 `is_full`).
pub async fn reject_if_full(registry: &SpeakerRegistry, uid: &str, sink: &crate::connection::OutboundSink) -> bool {
    if registry.is_full().await {
        let minutes = registry.estimated_wait_minutes().await;
        if let Err(e) = sink.send_json(&ServerToSpeaker::wait(uid, minutes)).await {
            error!(error = %e, "failed to send WAIT frame to rejected speaker");
        }
        true
    } else {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn registry_reports_full_at_capacity() {
        let registry: Registry<&'static str> = Registry::new(2, Duration::from_secs(600));
        assert!(!registry.is_full().await);
        registry.add(1, Arc::new("a")).await;
        assert!(!registry.is_full().await);
        registry.add(2, Arc::new("b")).await;
        assert!(registry.is_full().await);
        registry.remove(1).await;
        assert!(!registry.is_full().await);
    }

    #[tokio::test]
    async fn registry_wait_minutes_tracks_the_oldest_entry() {
        let registry: Registry<&'static str> = Registry::new(1, Duration::from_secs(600));
        assert_eq!(registry.estimated_wait_minutes().await, 0.0);
        registry.add(1, Arc::new("a")).await;
        let minutes = registry.estimated_wait_minutes().await;
        assert!(minutes > 9.9 && minutes <= 10.0);
    }

    #[tokio::test]
    async fn registry_is_timed_out_respects_max_connection_time() {
        let registry: Registry<&'static str> = Registry::new(4, Duration::from_millis(10));
        registry.add(1, Arc::new("a")).await;
        assert!(!registry.is_timed_out(1).await);
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(registry.is_timed_out(1).await);
    }

    #[tokio::test]
    async fn timed_out_snapshot_only_returns_expired_entries() {
        let registry: Registry<&'static str> = Registry::new(4, Duration::from_millis(10));
        registry.add(1, Arc::new("stale")).await;
        tokio::time::sleep(Duration::from_millis(30)).await;
        registry.add(2, Arc::new("fresh")).await;

        let expired = registry.timed_out_snapshot().await;
        assert_eq!(expired.len(), 1);
        assert_eq!(*expired[0].1, "stale");
    }

    /// Exercises `Registry::add`/`remove`/`get` under the uid-collision
    /// eviction pattern `SpeakerRegistry::take_prior`/`add` build on, using
    /// a bare payload in place of a live `SpeakerHandle` (which needs a
    /// real socket to construct).
    #[tokio::test]
    async fn registry_add_then_remove_by_id_frees_the_slot() {
        let registry: Registry<&'static str> = Registry::new(4, Duration::from_secs(600));
        registry.add(1, Arc::new("s1-first")).await;
        assert_eq!(registry.count().await, 1);

        let evicted = registry.remove(1).await;
        registry.add(2, Arc::new("s1-second")).await;

        assert_eq!(*evicted.unwrap(), "s1-first");
        assert!(registry.get(1).await.is_none());
        assert_eq!(*registry.get(2).await.unwrap(), "s1-second");
        assert_eq!(registry.count().await, 1);
    }
}
