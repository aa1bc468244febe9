//! Correlation registry linking conversations to waiting callers.
//!
//! Two independently locked maps share the same [`PendingCorrelation`]
//! contexts:
//!
//! * the in-flight map, keyed by `{kind}:{conversation id}`, holds a context
//!   only while the dispatching call is outstanding. [`InFlightGuard`]
//!   removes it when the call returns, times out, or is cancelled.
//! * the session map, keyed by `session:{id}`, `user:{id}` and
//!   `channel:{id}` (or `group:{id}`), keeps the routing metadata around so
//!   that a callback arriving after the wait gave up can still be
//!   attributed. Entries are retired explicitly or evicted by
//!   [`CorrelationRegistry::purge_expired`] once older than the TTL.
//!
//! Keys carry their kind so a `user:general` callback never lands on the
//! channel `general`. Only unprefixed targets search across kinds.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::{Duration, Instant};

use tokio::sync::oneshot;
use uip_protocol::{
    CallbackTarget, CanonicalInteractionEvent, ConversationKind, InteractionIntent, IntentType,
    OutboundCallback, OutboundRouting, TargetKind,
};

use crate::{CallbackResolution, ResolveOutcome};

pub const DEFAULT_CORRELATION_TTL: Duration = Duration::from_secs(3_600);

const SESSION_PREFIX: &str = "session";
const USER_PREFIX: &str = "user";
const CHANNEL_PREFIX: &str = "channel";
const GROUP_PREFIX: &str = "group";

fn qualified(prefix: &str, id: &str) -> String {
    format!("{prefix}:{id}")
}

fn channel_prefix(kind: ConversationKind) -> &'static str {
    match kind {
        ConversationKind::Group => GROUP_PREFIX,
        ConversationKind::Direct | ConversationKind::Channel => CHANNEL_PREFIX,
    }
}

/// In-flight key for the conversation `event` belongs to.
fn conversation_key(event: &CanonicalInteractionEvent) -> String {
    let prefix = match (event.conversation_kind(), event.channel_id()) {
        (ConversationKind::Direct, _) | (_, None) => USER_PREFIX,
        (kind, Some(_)) => channel_prefix(kind),
    };
    qualified(prefix, event.conversation_id())
}

fn session_keys(event: &CanonicalInteractionEvent) -> Vec<String> {
    let mut keys = vec![
        qualified(SESSION_PREFIX, event.session_id()),
        qualified(USER_PREFIX, event.user_id()),
    ];
    if let Some(channel_id) = event.channel_id() {
        keys.push(qualified(channel_prefix(event.conversation_kind()), channel_id));
    }
    keys
}

/// Candidate keys for a callback target, most specific first.
fn lookup_keys(target: &CallbackTarget) -> Vec<String> {
    let prefixes: &[&str] = match &target.kind {
        TargetKind::User => &[USER_PREFIX],
        TargetKind::Channel => &[CHANNEL_PREFIX, GROUP_PREFIX],
        TargetKind::Group => &[GROUP_PREFIX, CHANNEL_PREFIX],
        TargetKind::Bare | TargetKind::Other(_) => {
            &[SESSION_PREFIX, USER_PREFIX, CHANNEL_PREFIX, GROUP_PREFIX]
        }
    };
    prefixes
        .iter()
        .map(|prefix| qualified(prefix, &target.id))
        .collect()
}

#[derive(Debug)]
/// Transient record linking a conversation to a waiting caller.
pub struct PendingCorrelation {
    slot: Mutex<Option<oneshot::Sender<InteractionIntent>>>,
    routing: OutboundRouting,
    target_session_id: String,
    in_reply_to: String,
    created_at: Instant,
}

impl PendingCorrelation {
    pub fn routing(&self) -> &OutboundRouting {
        &self.routing
    }

    pub fn target_session_id(&self) -> &str {
        &self.target_session_id
    }

    /// Hands `callback` to the waiting caller. Returns false when the slot
    /// was already consumed or the receiver is gone.
    fn fulfil(&self, callback: &OutboundCallback) -> bool {
        let sender = self
            .slot
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let Some(sender) = sender else {
            return false;
        };
        sender.send(self.intent_for(callback)).is_ok()
    }

    fn intent_for(&self, callback: &OutboundCallback) -> InteractionIntent {
        let mut intent = InteractionIntent::new(
            IntentType::Reply,
            callback.text.clone(),
            self.target_session_id.clone(),
            Some(self.in_reply_to.clone()),
        );
        if let Some(url) = callback.media_url.clone() {
            intent.content.attachments.push(uip_protocol::IntentAttachment {
                kind: "media".to_string(),
                url: Some(url),
                ..Default::default()
            });
        }
        intent
    }

    fn is_expired(&self, now: Instant, ttl: Duration) -> bool {
        now.saturating_duration_since(self.created_at) > ttl
    }
}

type ContextMap = HashMap<String, Arc<PendingCorrelation>>;

#[derive(Debug)]
struct RegistryInner {
    in_flight: RwLock<ContextMap>,
    sessions: RwLock<ContextMap>,
    ttl: Duration,
}

fn read_map(map: &RwLock<ContextMap>) -> RwLockReadGuard<'_, ContextMap> {
    map.read().unwrap_or_else(PoisonError::into_inner)
}

fn write_map(map: &RwLock<ContextMap>) -> RwLockWriteGuard<'_, ContextMap> {
    map.write().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Debug, Clone)]
/// Public struct `CorrelationRegistry` shared by backend clients.
pub struct CorrelationRegistry {
    inner: Arc<RegistryInner>,
}

impl Default for CorrelationRegistry {
    fn default() -> Self {
        Self::new(DEFAULT_CORRELATION_TTL)
    }
}

/// Keeps an in-flight entry alive for the duration of one dispatch.
#[derive(Debug)]
pub struct InFlightGuard {
    inner: Arc<RegistryInner>,
    key: String,
    context: Arc<PendingCorrelation>,
}

impl InFlightGuard {
    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn context(&self) -> &Arc<PendingCorrelation> {
        &self.context
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        let mut in_flight = write_map(&self.inner.in_flight);
        let owned = in_flight
            .get(&self.key)
            .is_some_and(|current| Arc::ptr_eq(current, &self.context));
        if owned {
            in_flight.remove(&self.key);
        }
    }
}

impl CorrelationRegistry {
    pub fn new(ttl: Duration) -> Self {
        Self {
            inner: Arc::new(RegistryInner {
                in_flight: RwLock::new(HashMap::new()),
                sessions: RwLock::new(HashMap::new()),
                ttl,
            }),
        }
    }

    fn context_for(
        event: &CanonicalInteractionEvent,
    ) -> (Arc<PendingCorrelation>, oneshot::Receiver<InteractionIntent>) {
        let (sender, receiver) = oneshot::channel();
        let context = Arc::new(PendingCorrelation {
            slot: Mutex::new(Some(sender)),
            routing: OutboundRouting {
                channel_id: event.channel_id().map(str::to_string),
                user_id: Some(event.user_id().to_string()),
                session_id: Some(event.session_id().to_string()),
            },
            target_session_id: event.session_id().to_string(),
            in_reply_to: event.interaction_id.clone(),
            created_at: Instant::now(),
        });
        (context, receiver)
    }

    fn remember(&self, event: &CanonicalInteractionEvent, context: &Arc<PendingCorrelation>) {
        let mut sessions = write_map(&self.inner.sessions);
        for key in session_keys(event) {
            sessions.insert(key, context.clone());
        }
    }

    /// Registers a pending synchronous wait for `event`, keyed in flight by
    /// its kind-qualified conversation id, and records its routing in the
    /// session map.
    pub fn register(
        &self,
        event: &CanonicalInteractionEvent,
    ) -> (InFlightGuard, oneshot::Receiver<InteractionIntent>) {
        let (context, receiver) = Self::context_for(event);
        let key = conversation_key(event);
        let replaced = write_map(&self.inner.in_flight).insert(key.clone(), context.clone());
        if replaced.is_some() {
            tracing::debug!(conversation = %key, "in-flight correlation replaced by newer event");
        }
        self.remember(event, &context);
        let guard = InFlightGuard {
            inner: self.inner.clone(),
            key,
            context,
        };
        (guard, receiver)
    }

    /// Records routing only; used when no caller waits for the reply.
    pub fn register_session(&self, event: &CanonicalInteractionEvent) {
        let (context, _receiver) = Self::context_for(event);
        self.remember(event, &context);
    }

    /// Attributes `callback` to a correlation context. A slot that cannot
    /// take the reply (already consumed, or its waiter gave up) reports
    /// [`ResolveOutcome::Late`] so the caller can forward it elsewhere.
    pub fn resolve(&self, target: &CallbackTarget, callback: &OutboundCallback) -> CallbackResolution {
        let keys = lookup_keys(target);
        let in_flight = {
            let map = read_map(&self.inner.in_flight);
            let found = keys.iter().find_map(|key| map.get(key).cloned());
            found
        };
        if let Some(context) = in_flight {
            if context.fulfil(callback) {
                return CallbackResolution {
                    outcome: ResolveOutcome::Delivered,
                    routing: context.routing.clone(),
                };
            }
            return CallbackResolution {
                outcome: ResolveOutcome::Late,
                routing: context.routing.clone(),
            };
        }

        let now = Instant::now();
        let session = {
            let map = read_map(&self.inner.sessions);
            let found = keys
                .iter()
                .filter_map(|key| map.get(key))
                .find(|context| !context.is_expired(now, self.inner.ttl))
                .cloned();
            found
        };
        match session {
            Some(context) => CallbackResolution {
                outcome: ResolveOutcome::Late,
                routing: context.routing.clone(),
            },
            None => CallbackResolution::unmatched(),
        }
    }

    /// Removes every session-map key that points at the context registered
    /// under `session_id`.
    pub fn retire_session(&self, session_id: &str) -> bool {
        let mut sessions = write_map(&self.inner.sessions);
        let Some(context) = sessions.get(&qualified(SESSION_PREFIX, session_id)).cloned() else {
            return false;
        };
        sessions.retain(|_, existing| !Arc::ptr_eq(existing, &context));
        true
    }

    /// Evicts session-map contexts older than the TTL. Returns the number of
    /// keys removed. Driven by the gateway's sweeper tick.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut sessions = write_map(&self.inner.sessions);
        let before = sessions.len();
        sessions.retain(|_, existing| !existing.is_expired(now, self.inner.ttl));
        before - sessions.len()
    }

    pub fn in_flight_len(&self) -> usize {
        read_map(&self.inner.in_flight).len()
    }

    pub fn session_len(&self) -> usize {
        read_map(&self.inner.sessions).len()
    }
}
