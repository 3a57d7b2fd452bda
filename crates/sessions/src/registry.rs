use std::sync::{
    Arc,
    atomic::{AtomicU64, Ordering},
};

use {
    dashmap::DashMap,
    tokio::sync::{Mutex, OwnedMutexGuard},
    tracing::{debug, warn},
};

use crate::{key::SessionKey, transcript::Transcript};

/// Sessions kept before the least recently used idle one is evicted.
pub const DEFAULT_MAX_SESSIONS: usize = 1024;

/// One conversation's transcript behind an async mutex.
///
/// Holding the guard returned by [`Session::lock`] is what serialises model
/// calls on the same transcript.
#[derive(Debug, Default)]
pub struct Session {
    transcript: Arc<Mutex<Transcript>>,
    last_used: AtomicU64,
}

impl Session {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Exclusive access to the transcript for the duration of one call.
    pub async fn lock(&self) -> OwnedMutexGuard<Transcript> {
        Arc::clone(&self.transcript).lock_owned().await
    }

    pub async fn snapshot(&self) -> Transcript {
        self.transcript.lock().await.clone()
    }

    pub async fn clear(&self) {
        self.transcript.lock().await.clear();
    }
}

/// Session-keyed map of transcripts, bounded by `max_sessions`.
#[derive(Debug)]
pub struct SessionRegistry {
    sessions: DashMap<SessionKey, Arc<Session>>,
    max_sessions: usize,
    clock: AtomicU64,
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_MAX_SESSIONS)
    }
}

impl SessionRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_capacity(max_sessions: usize) -> Self {
        Self {
            sessions: DashMap::new(),
            max_sessions: max_sessions.max(1),
            clock: AtomicU64::new(0),
        }
    }

    pub fn get_or_create(&self, key: &SessionKey) -> Arc<Session> {
        if let Some(session) = self.get(key) {
            return session;
        }

        if self.sessions.len() >= self.max_sessions {
            self.evict_idle();
        }
        let entry = self.sessions.entry(key.clone()).or_insert_with(|| {
            debug!(session = %key, "creating session");
            Arc::new(Session::new())
        });
        self.touch(entry.value());
        Arc::clone(entry.value())
    }

    #[must_use]
    pub fn get(&self, key: &SessionKey) -> Option<Arc<Session>> {
        let session = self.sessions.get(key).map(|s| Arc::clone(s.value()))?;
        self.touch(&session);
        Some(session)
    }

    /// Drop the session for `key`, waiting for any call in flight on it.
    /// Returns `false` if no such session exists (which is equivalent to an
    /// empty transcript).
    pub async fn reset(&self, key: &SessionKey) -> bool {
        let Some((_, session)) = self.sessions.remove(key) else {
            return false;
        };
        session.clear().await;
        debug!(session = %key, "session reset");
        true
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    fn touch(&self, session: &Session) {
        let now = self.clock.fetch_add(1, Ordering::Relaxed);
        session.last_used.store(now, Ordering::Relaxed);
    }

    /// Remove the least recently used session that nobody holds. Sessions
    /// with a call in flight are never evicted, so the map may briefly
    /// exceed its cap when every session is busy.
    fn evict_idle(&self) {
        let oldest = self
            .sessions
            .iter()
            .filter(|e| is_idle(e.value()))
            .min_by_key(|e| e.value().last_used.load(Ordering::Relaxed))
            .map(|e| e.key().clone());

        let Some(key) = oldest else {
            warn!(
                sessions = self.sessions.len(),
                max = self.max_sessions,
                "every session is busy, exceeding session cap"
            );
            return;
        };
        if self.sessions.remove_if(&key, |_, s| is_idle(s)).is_some() {
            debug!(session = %key, "evicted least recently used session");
        }
    }
}

/// Only the registry holds it and no call has its transcript locked.
fn is_idle(session: &Arc<Session>) -> bool {
    Arc::strong_count(session) == 1 && session.transcript.try_lock().is_ok()
}
