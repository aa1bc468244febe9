use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use uip_protocol::{
    CanonicalInteractionEvent, InteractionIntent, OutboundCallback, OutboundRouting,
    TransportMessage,
};

use crate::BackendError;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
/// Enumerates supported `BackendMode` values.
pub enum BackendMode {
    #[default]
    UniversalIm,
    Chat,
    Mock,
}

impl BackendMode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::UniversalIm => "universal_im",
            Self::Chat => "chat",
            Self::Mock => "mock",
        }
    }
}

impl fmt::Display for BackendMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
/// How an out-of-band callback was attributed.
pub enum ResolveOutcome {
    /// A synchronous wait was outstanding and has been unblocked.
    Delivered,
    /// Nobody is waiting any more but routing metadata was recovered.
    Late,
    /// No correlation context matched the callback target.
    Unmatched,
}

impl ResolveOutcome {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Delivered => "delivered",
            Self::Late => "late",
            Self::Unmatched => "unmatched",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallbackResolution {
    pub outcome: ResolveOutcome,
    pub routing: OutboundRouting,
}

impl CallbackResolution {
    pub fn unmatched() -> Self {
        Self {
            outcome: ResolveOutcome::Unmatched,
            routing: OutboundRouting::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
/// Callback handed to the delivery sink when no synchronous caller takes it.
pub struct OutboundDelivery {
    pub callback: OutboundCallback,
    pub routing: OutboundRouting,
    pub outcome: ResolveOutcome,
}

pub type DeliveryHandler = Arc<dyn Fn(OutboundDelivery) + Send + Sync>;

/// Non-blocking push channel towards the backend (WebSocket or long-poll).
pub trait OutboundTransport: Send + Sync {
    fn name(&self) -> &'static str;
    fn push(&self, message: TransportMessage) -> Result<(), BackendError>;
}

#[async_trait]
/// Trait contract for `BackendClient` behavior.
pub trait BackendClient: Send + Sync {
    fn mode(&self) -> BackendMode;

    /// Sends one event and returns the resulting intent. Bounded by the
    /// caller's `cancel` token and by the client's own reply timeout.
    async fn process_event(
        &self,
        event: &CanonicalInteractionEvent,
        cancel: &CancellationToken,
    ) -> Result<InteractionIntent, BackendError>;

    /// Resolves an out-of-band reply. Clients without correlation report
    /// every callback as unmatched.
    fn handle_callback(&self, callback: OutboundCallback) -> CallbackResolution {
        tracing::warn!(
            mode = %self.mode(),
            to = %callback.to,
            "callback received by a backend without correlation support"
        );
        CallbackResolution::unmatched()
    }

    /// Evicts correlation state older than the client's TTL. Called from
    /// the gateway's periodic sweeper; returns the number of entries removed.
    fn purge_expired(&self) -> usize {
        0
    }

    async fn health(&self) -> Result<(), BackendError>;

    async fn close(&self);
}
