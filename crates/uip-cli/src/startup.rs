//! Builds the backend, transports, gateway and HTTP server from a validated
//! configuration and runs them until ctrl-c.

use std::sync::{Arc, Weak};
use std::time::Duration;

use anyhow::{Context, Result};
use serde_json::json;
use tokio::net::TcpListener;
use uip_backend::{
    BackendClient, BackendMode, ChatBackendClient, ImWebhookNotifier, MockBackendClient,
    MockConfig, OutboundTransport, UniversalImClient, UniversalImTransport,
};
use uip_gateway::{
    build_delivery_fanout, local_adapter_factory, run_gateway_server, AdapterFactoryRegistry,
    Gateway, GatewayServerState, PollingTransport, TransportMessageHandler, WebSocketPushServer,
    LOCAL_ADAPTER_NAME,
};

use crate::GatewayFileConfig;

/// Push server and poll buffer. Both always run: late and unmatched
/// callbacks fan out to them whatever transport the backend sends over.
struct TransportSet {
    ws_push: Arc<WebSocketPushServer>,
    polling: Arc<PollingTransport>,
}

impl TransportSet {
    fn new() -> Self {
        Self {
            ws_push: Arc::new(WebSocketPushServer::default()),
            polling: Arc::new(PollingTransport::default()),
        }
    }

    fn outbound(&self) -> Vec<Arc<dyn OutboundTransport>> {
        let ws_push: Arc<dyn OutboundTransport> = self.ws_push.clone();
        let polling: Arc<dyn OutboundTransport> = self.polling.clone();
        vec![ws_push, polling]
    }

    /// Transport the universal-IM client sends events over, if it does not
    /// post to the webhook.
    fn send_transport(&self, transport: UniversalImTransport) -> Option<Arc<dyn OutboundTransport>> {
        let push: Arc<dyn OutboundTransport> = match transport {
            UniversalImTransport::Webhook => return None,
            UniversalImTransport::Websocket => self.ws_push.clone(),
            UniversalImTransport::Polling => self.polling.clone(),
        };
        Some(push)
    }

    /// Frames the backend sends over a transport are resolved like calls to
    /// the outbound endpoint.
    fn route_inbound_to(&self, backend: &Arc<dyn BackendClient>) {
        let weak: Weak<dyn BackendClient> = Arc::downgrade(backend);
        let handler: TransportMessageHandler = Arc::new(move |message| {
            let Some(backend) = weak.upgrade() else {
                return;
            };
            let callback = message.to_callback();
            let resolution = backend.handle_callback(callback);
            tracing::debug!(
                message_id = %message.message_id,
                outcome = resolution.outcome.as_str(),
                "transport frame resolved"
            );
        });
        self.ws_push.on_message(handler.clone());
        self.polling.on_message(handler);
    }
}

fn build_backend(
    config: &GatewayFileConfig,
    transports: &TransportSet,
    notifier: Option<Arc<ImWebhookNotifier>>,
) -> Result<Arc<dyn BackendClient>> {
    let backend: Arc<dyn BackendClient> = match config.backend.mode {
        BackendMode::Mock => Arc::new(MockBackendClient::new(MockConfig::default())),
        BackendMode::Chat => Arc::new(
            ChatBackendClient::new(config.chat_config()).context("failed to build chat backend client")?,
        ),
        BackendMode::UniversalIm => {
            let mut client = UniversalImClient::new(config.universal_im_config())
                .context("failed to build universal-im backend client")?
                .with_delivery_handler(build_delivery_fanout(notifier, transports.outbound()));
            if let Some(push) = transports.send_transport(config.backend.universal_im.transport) {
                client = client.with_push_transport(push);
            }
            Arc::new(client)
        }
    };
    Ok(backend)
}

async fn shutdown_signal() {
    if let Err(error) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %error, "failed to listen for ctrl-c");
        std::future::pending::<()>().await;
    }
    tracing::info!("shutdown signal received");
}

/// Runs the gateway until ctrl-c, then shuts everything down in order:
/// HTTP server, transports, dispatch core, backend.
pub async fn run_gateway(config: GatewayFileConfig) -> Result<()> {
    let bind_addr = config.bind_addr()?;
    let transports = TransportSet::new();
    let notifier = config
        .im_webhook_config()
        .map(ImWebhookNotifier::new)
        .transpose()
        .context("failed to build im webhook notifier")?
        .map(Arc::new);
    let backend = build_backend(&config, &transports, notifier.clone())?;
    transports.route_inbound_to(&backend);

    match backend.health().await {
        Ok(()) => tracing::info!(mode = %backend.mode(), endpoint = %config.backend.endpoint, "backend reachable"),
        Err(error) => tracing::warn!(
            mode = %backend.mode(),
            endpoint = %config.backend.endpoint,
            error = %error,
            "backend health check failed, continuing"
        ),
    }

    let gateway = Gateway::new(config.gateway_config(), Arc::clone(&backend));
    if config.adapters.local.enabled {
        let mut factories = AdapterFactoryRegistry::new();
        factories.register(LOCAL_ADAPTER_NAME, local_adapter_factory());
        let adapter = factories
            .build(
                LOCAL_ADAPTER_NAME,
                &json!({ "http_path": config.adapters.local.http_path }),
            )
            .context("failed to build local adapter")?;
        gateway
            .register_adapter(adapter)
            .context("failed to register local adapter")?;
    }
    gateway.start().await.context("failed to start gateway")?;
    transports.ws_push.start();

    let state = GatewayServerState::new(gateway.clone(), config.server_config())
        .with_ws_push(transports.ws_push.clone())
        .with_polling(transports.polling.clone());
    let listener = TcpListener::bind(bind_addr)
        .await
        .with_context(|| format!("failed to bind gateway server on {bind_addr}"))?;
    tracing::info!(
        addr = %bind_addr,
        backend = %config.backend.mode,
        workers = config.gateway.worker_count,
        queue_capacity = config.gateway.queue_capacity,
        "gateway starting"
    );

    let serve_result = run_gateway_server(listener, Arc::new(state), shutdown_signal()).await;

    transports.ws_push.stop().await;
    if let Some(notifier) = &notifier {
        notifier.shutdown();
    }
    let stop_budget = Duration::from_millis(config.server.shutdown_timeout_ms) + Duration::from_secs(1);
    match tokio::time::timeout(stop_budget, gateway.stop()).await {
        Ok(Ok(())) => {}
        Ok(Err(error)) => tracing::warn!(error = %error, "gateway stop reported an error"),
        Err(_) => tracing::warn!("gateway stop exceeded its shutdown budget"),
    }
    serve_result?;
    tracing::info!("gateway stopped");
    Ok(())
}
