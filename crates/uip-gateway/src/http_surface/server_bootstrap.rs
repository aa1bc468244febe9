//! Router wiring and the server loop.

use std::future::Future;

use super::*;

/// Builds the full router: gateway routes, adapter mounts and the enabled
/// transport routes.
pub fn build_gateway_router(state: Arc<GatewayServerState>) -> Router {
    let config = state.config.clone();
    let mut router = Router::new()
        .route(HEALTH_ENDPOINT, get(handle_gateway_health))
        .route(INFO_ENDPOINT, get(handle_gateway_info))
        .route(&config.outbound_path, post(handle_outbound_callback))
        .route(&config.legacy_callback_path, post(handle_legacy_callback))
        .with_state(Arc::clone(&state));

    for name in state.gateway.adapter_names() {
        let Some(adapter) = state.gateway.adapter(&name) else {
            continue;
        };
        if let Some((path, adapter_router)) = adapter.http_mount() {
            tracing::debug!(adapter = %name, path = %path, "mounting adapter routes");
            router = router.nest(&path, adapter_router);
        }
    }
    if let Some(ws_push) = &state.ws_push {
        router = router.merge(ws_push.router(&config.transport_ws_path()));
    }
    if let Some(polling) = &state.polling {
        router = router.merge(
            polling.router(&config.transport_poll_path(), &config.transport_inbound_path()),
        );
    }
    router
}

/// Serves the gateway on `listener` until `shutdown` resolves.
pub async fn run_gateway_server<F>(
    listener: TcpListener,
    state: Arc<GatewayServerState>,
    shutdown: F,
) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let local_addr: SocketAddr = listener
        .local_addr()
        .context("failed to resolve bound gateway server address")?;
    tracing::info!(
        addr = %local_addr,
        outbound = %state.config.outbound_path,
        adapters = ?state.gateway.adapter_names(),
        "gateway server listening"
    );
    let app = build_gateway_router(state);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await
        .context("gateway server exited unexpectedly")?;
    tracing::info!("gateway server stopped");
    Ok(())
}
