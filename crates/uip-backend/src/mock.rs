use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use uip_protocol::{CanonicalInteractionEvent, InteractionIntent};

use crate::{BackendClient, BackendError, BackendMode};

pub const DEFAULT_MOCK_PREFIX: &str = "Hello! I'm Clawdbot. I received your message: ";

#[derive(Debug, Clone)]
pub struct MockConfig {
    pub delay: Duration,
    pub prefix: String,
}

impl Default for MockConfig {
    fn default() -> Self {
        Self {
            delay: Duration::from_millis(100),
            prefix: DEFAULT_MOCK_PREFIX.to_string(),
        }
    }
}

/// Echo backend for running the gateway without a real backend.
pub struct MockBackendClient {
    config: MockConfig,
    closed: AtomicBool,
}

impl MockBackendClient {
    pub fn new(config: MockConfig) -> Self {
        Self {
            config,
            closed: AtomicBool::new(false),
        }
    }
}

#[async_trait]
impl BackendClient for MockBackendClient {
    fn mode(&self) -> BackendMode {
        BackendMode::Mock
    }

    async fn process_event(
        &self,
        event: &CanonicalInteractionEvent,
        cancel: &CancellationToken,
    ) -> Result<InteractionIntent, BackendError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(BackendError::Closed);
        }
        tokio::select! {
            _ = cancel.cancelled() => return Err(BackendError::Cancelled),
            _ = tokio::time::sleep(self.config.delay) => {}
        }
        Ok(InteractionIntent::reply_to(
            event,
            format!("{}{}", self.config.prefix, event.text()),
        ))
    }

    async fn health(&self) -> Result<(), BackendError> {
        Ok(())
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}
