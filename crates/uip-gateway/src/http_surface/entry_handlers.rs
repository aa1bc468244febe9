use super::*;

pub(super) async fn handle_gateway_health() -> Json<Value> {
    Json(json!({ "status": "healthy" }))
}

pub(super) async fn handle_gateway_info(State(state): State<Arc<GatewayServerState>>) -> Json<Value> {
    let config = &state.config;
    let mut adapters = serde_json::Map::new();
    for name in state.gateway.adapter_names() {
        let mount = state
            .gateway
            .adapter(&name)
            .and_then(|adapter| adapter.http_path());
        adapters.insert(name, json!(mount));
    }
    Json(json!({
        "name": env!("CARGO_PKG_NAME"),
        "version": env!("CARGO_PKG_VERSION"),
        "protocol": PROTOCOL_NAME,
        "backend": {
            "mode": config.backend_mode.as_str(),
            "endpoint": config.backend_endpoint,
            "accountId": config.account_id,
            "transport": config.backend_transport,
        },
        "endpoints": {
            "health": HEALTH_ENDPOINT,
            "info": INFO_ENDPOINT,
            "outbound": config.outbound_path,
            "callback": config.legacy_callback_path,
            "transportWebsocket": state.ws_push.as_ref().map(|_| config.transport_ws_path()),
            "transportPoll": state.polling.as_ref().map(|_| config.transport_poll_path()),
            "transportInbound": state.polling.as_ref().map(|_| config.transport_inbound_path()),
            "adapters": adapters,
        },
        "transports": {
            "websocketConnections": state.ws_push.as_ref().map(|server| server.connection_count()),
            "websocketDropped": state.ws_push.as_ref().map(|server| server.dropped_count()),
            "pollBufferSize": state.polling.as_ref().map(|polling| polling.len()),
        },
        "stats": state.gateway.stats(),
    }))
}

pub(super) async fn handle_outbound_callback(
    State(state): State<Arc<GatewayServerState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<OutboundResponse>, ApiError> {
    state.authorize_outbound(&headers)?;
    let callback = parse_outbound_callback(&body)?;
    let resolution = state.gateway.backend().handle_callback(callback.clone());
    tracing::info!(
        to = %callback.to,
        outcome = resolution.outcome.as_str(),
        "outbound callback received"
    );
    let routing = (!resolution.routing.is_empty()).then_some(resolution.routing);
    Ok(Json(OutboundResponse {
        ok: true,
        message_id: new_uuid(),
        to: callback.to,
        text: callback.text,
        media_url: callback.media_url,
        thread_id: callback.thread_id,
        routing,
        status: resolution.outcome.as_str(),
    }))
}

pub(super) async fn handle_legacy_callback(
    State(state): State<Arc<GatewayServerState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<Value>, ApiError> {
    state.authorize_outbound(&headers)?;
    let callback = parse_outbound_callback(&body)?;
    let resolution = state.gateway.backend().handle_callback(callback);
    if resolution.outcome == ResolveOutcome::Unmatched {
        tracing::debug!("legacy callback did not match a pending conversation");
    }
    Ok(Json(json!({ "ok": true })))
}
