use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};
use std::time::{Duration, Instant};

use uip_protocol::{unix_timestamp_ms, CanonicalInteractionEvent, Session};

#[derive(Debug, Clone)]
/// Dispatch-side bookkeeping for one external session.
pub struct SessionEntry {
    pub session: Session,
    pub adapter_name: String,
    pub created_unix_ms: u64,
    pub created_at: Instant,
    pub last_seen: Instant,
}

#[derive(Debug)]
/// Session entries keyed by external session id, expired by a periodic
/// sweep once idle for longer than the TTL.
pub struct SessionRegistry {
    entries: RwLock<HashMap<String, SessionEntry>>,
    ttl: Duration,
}

impl SessionRegistry {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            ttl,
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Creates or refreshes the entry for the event's session.
    pub fn touch(&self, event: &CanonicalInteractionEvent) {
        let now = Instant::now();
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        entries
            .entry(event.session_id().to_string())
            .and_modify(|entry| {
                entry.last_seen = now;
                entry.session = event.session.clone();
            })
            .or_insert_with(|| SessionEntry {
                session: event.session.clone(),
                adapter_name: event.meta.adapter_name.clone(),
                created_unix_ms: unix_timestamp_ms(),
                created_at: now,
                last_seen: now,
            });
    }

    pub fn get(&self, session_id: &str) -> Option<SessionEntry> {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(session_id)
            .cloned()
    }

    pub fn len(&self) -> usize {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Removes entries idle for longer than the TTL; returns how many.
    pub fn sweep_expired(&self) -> usize {
        let now = Instant::now();
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        let before = entries.len();
        entries.retain(|_, entry| now.saturating_duration_since(entry.last_seen) <= self.ttl);
        before - entries.len()
    }
}
