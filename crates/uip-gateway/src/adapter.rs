//! Front-end adapter contract and the factory registry used at startup.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use axum::Router;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use uip_protocol::{CanonicalInteractionEvent, InteractionIntent, SurfaceCapabilities};

use crate::GatewayError;

pub type EventHandler = Arc<dyn Fn(CanonicalInteractionEvent) + Send + Sync>;

#[async_trait]
/// Trait contract for `FrontEndAdapter` behavior.
///
/// An adapter turns native front-end messages into canonical events
/// (delivered through the handler installed by [`FrontEndAdapter::on_event`])
/// and renders intents back onto its surface.
pub trait FrontEndAdapter: Send + Sync {
    fn name(&self) -> &str;

    async fn start(&self, cancel: CancellationToken) -> Result<(), GatewayError>;

    async fn stop(&self) -> Result<(), GatewayError>;

    fn on_event(&self, handler: EventHandler);

    async fn send_intent(&self, intent: &InteractionIntent) -> Result<(), GatewayError>;

    fn capabilities(&self) -> SurfaceCapabilities;

    /// Path the adapter's HTTP routes are nested under, if it serves any.
    fn http_path(&self) -> Option<String> {
        None
    }

    /// HTTP routes the adapter serves, with the path they are nested under.
    fn http_mount(self: Arc<Self>) -> Option<(String, Router)> {
        None
    }
}

pub type AdapterFactory =
    Box<dyn Fn(&Value) -> Result<Arc<dyn FrontEndAdapter>, GatewayError> + Send + Sync>;

/// Named adapter constructors, handed to startup explicitly.
#[derive(Default)]
pub struct AdapterFactoryRegistry {
    factories: BTreeMap<String, AdapterFactory>,
}

impl AdapterFactoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, name: impl Into<String>, factory: AdapterFactory) {
        let name = name.into();
        if self.factories.insert(name.clone(), factory).is_some() {
            tracing::warn!(factory = %name, "adapter factory replaced");
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }

    pub fn names(&self) -> Vec<String> {
        self.factories.keys().cloned().collect()
    }

    pub fn build(
        &self,
        name: &str,
        settings: &Value,
    ) -> Result<Arc<dyn FrontEndAdapter>, GatewayError> {
        let factory = self
            .factories
            .get(name)
            .ok_or_else(|| GatewayError::UnknownAdapterFactory(name.to_string()))?;
        factory(settings)
    }
}
