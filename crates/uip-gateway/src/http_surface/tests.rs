use std::time::Duration;

use anyhow::Context as _;
use futures_util::{SinkExt, StreamExt};
use reqwest::{Client, StatusCode};
use tokio::task::JoinHandle;
use tokio_tungstenite::{connect_async, tungstenite::Message as ClientWsMessage};
use uip_backend::{BackendClient, MockBackendClient, MockConfig, OutboundTransport};
use uip_protocol::TransportMessage;

use super::*;
use crate::{local_adapter_factory, AdapterFactoryRegistry, GatewayConfig};

type ClientSocket =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

fn mock_backend() -> Arc<dyn BackendClient> {
    Arc::new(MockBackendClient::new(MockConfig {
        delay: Duration::from_millis(5),
        prefix: "echo: ".to_string(),
    }))
}

async fn local_gateway() -> Gateway {
    let gateway = Gateway::new(GatewayConfig::default(), mock_backend());
    let mut factories = AdapterFactoryRegistry::new();
    factories.register("local", local_adapter_factory());
    let adapter = factories
        .build("local", &json!({}))
        .expect("build local adapter");
    gateway.register_adapter(adapter).expect("register adapter");
    gateway.start().await.expect("start gateway");
    gateway
}

async fn spawn_test_server(
    state: Arc<GatewayServerState>,
) -> anyhow::Result<(SocketAddr, JoinHandle<()>)> {
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .context("bind ephemeral listener")?;
    let addr = listener.local_addr().context("resolve listener addr")?;
    let app = build_gateway_router(state);
    let handle = tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    tokio::time::sleep(Duration::from_millis(20)).await;
    Ok((addr, handle))
}

async fn recv_ws_json(socket: &mut ClientSocket) -> Value {
    tokio::time::timeout(Duration::from_secs(2), async {
        loop {
            let Some(message) = socket.next().await else {
                panic!("websocket closed before json frame");
            };
            match message.expect("read websocket frame") {
                ClientWsMessage::Text(text) => {
                    return serde_json::from_str::<Value>(text.as_str())
                        .expect("websocket text frame should contain json");
                }
                ClientWsMessage::Ping(payload) => {
                    socket
                        .send(ClientWsMessage::Pong(payload))
                        .await
                        .expect("send pong");
                }
                ClientWsMessage::Close(_) => panic!("websocket closed before json frame"),
                _ => continue,
            }
        }
    })
    .await
    .expect("websocket frame within timeout")
}

#[tokio::test]
async fn functional_health_and_info_report_gateway_shape() {
    let gateway = local_gateway().await;
    let state = Arc::new(GatewayServerState::new(
        gateway.clone(),
        GatewayServerConfig {
            backend_mode: BackendMode::Mock,
            backend_endpoint: "http://backend.invalid".to_string(),
            ..GatewayServerConfig::default()
        },
    ));
    let (addr, handle) = spawn_test_server(state).await.expect("spawn server");
    let client = Client::new();

    let health: Value = client
        .get(format!("http://{addr}{HEALTH_ENDPOINT}"))
        .send()
        .await
        .expect("health request")
        .json()
        .await
        .expect("health json");
    assert_eq!(health, json!({"status": "healthy"}));

    let info: Value = client
        .get(format!("http://{addr}{INFO_ENDPOINT}"))
        .send()
        .await
        .expect("info request")
        .json()
        .await
        .expect("info json");
    assert_eq!(info["protocol"], "UIP v1.0");
    assert_eq!(info["backend"]["mode"], "mock");
    assert_eq!(info["endpoints"]["outbound"], DEFAULT_OUTBOUND_PATH);
    assert_eq!(info["endpoints"]["adapters"]["local"], "/api/v1/local");
    assert_eq!(info["stats"]["dropped"], 0);
    assert!(info["transports"]["pollBufferSize"].is_null());

    handle.abort();
    gateway.stop().await.expect("stop gateway");
}

#[tokio::test]
async fn integration_local_message_reply_reaches_session_websocket() {
    let gateway = local_gateway().await;
    let state = Arc::new(GatewayServerState::new(gateway.clone(), GatewayServerConfig::default()));
    let (addr, handle) = spawn_test_server(state).await.expect("spawn server");

    let (mut socket, _) = connect_async(format!("ws://{addr}/api/v1/local/ws?sessionId=s1&userId=u1"))
        .await
        .expect("connect websocket");
    let greeting = recv_ws_json(&mut socket).await;
    assert_eq!(greeting["type"], "connected");
    assert_eq!(greeting["sessionId"], "s1");

    let response: Value = Client::new()
        .post(format!("http://{addr}/api/v1/local/message"))
        .json(&json!({"sessionId": "s1", "userId": "u1", "text": "hello"}))
        .send()
        .await
        .expect("post message")
        .json()
        .await
        .expect("message json");
    assert_eq!(response["success"], true);
    assert_eq!(response["sessionId"], "s1");

    let intent = recv_ws_json(&mut socket).await;
    assert_eq!(intent["intentType"], "reply");
    assert_eq!(intent["targetSessionId"], "s1");
    assert_eq!(intent["content"]["text"], "echo: hello");
    assert_eq!(intent["inReplyTo"], response["interactionId"]);

    handle.abort();
    gateway.stop().await.expect("stop gateway");
}

#[tokio::test]
async fn integration_websocket_frames_are_dispatched_like_http_messages() {
    let gateway = local_gateway().await;
    let state = Arc::new(GatewayServerState::new(gateway.clone(), GatewayServerConfig::default()));
    let (addr, handle) = spawn_test_server(state).await.expect("spawn server");

    let (mut socket, _) = connect_async(format!("ws://{addr}/api/v1/local/ws?sessionId=ws-s"))
        .await
        .expect("connect websocket");
    let greeting = recv_ws_json(&mut socket).await;
    assert_eq!(greeting["userId"], "ws-user-ws-s");

    socket
        .send(ClientWsMessage::Text(json!({"text": "ping"}).to_string().into()))
        .await
        .expect("send frame");
    let intent = recv_ws_json(&mut socket).await;
    assert_eq!(intent["content"]["text"], "echo: ping");
    assert_eq!(intent["targetSessionId"], "ws-s");

    socket
        .send(ClientWsMessage::Text("{\"text\":\"\"}".into()))
        .await
        .expect("send empty frame");
    let error = recv_ws_json(&mut socket).await;
    assert_eq!(error["type"], "error");
    assert_eq!(error["error"]["code"], "PROTOCOL_ERROR");

    handle.abort();
    gateway.stop().await.expect("stop gateway");
}

#[tokio::test]
async fn regression_malformed_message_is_rejected_with_protocol_envelope() {
    let gateway = local_gateway().await;
    let state = Arc::new(GatewayServerState::new(gateway.clone(), GatewayServerConfig::default()));
    let (addr, handle) = spawn_test_server(state).await.expect("spawn server");
    let client = Client::new();

    for body in ["{not json", r#"{"sessionId":"s1"}"#, r#"{"text":"x","type":"video"}"#] {
        let response = client
            .post(format!("http://{addr}/api/v1/local/message"))
            .header("content-type", "application/json")
            .body(body)
            .send()
            .await
            .expect("post message");
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let payload: Value = response.json().await.expect("error json");
        assert_eq!(payload["success"], false);
        assert_eq!(payload["error"]["code"], "PROTOCOL_ERROR");
    }
    assert_eq!(gateway.stats().queued, 0);

    handle.abort();
    gateway.stop().await.expect("stop gateway");
}

#[tokio::test]
async fn functional_outbound_requires_configured_authorization() {
    let gateway = local_gateway().await;
    let state = Arc::new(GatewayServerState::new(
        gateway.clone(),
        GatewayServerConfig {
            outbound_auth_header: Some("Bearer outbound-secret".to_string()),
            ..GatewayServerConfig::default()
        },
    ));
    let (addr, handle) = spawn_test_server(state).await.expect("spawn server");
    let client = Client::new();
    let url = format!("http://{addr}{DEFAULT_OUTBOUND_PATH}");
    let body = json!({"to": "user:u1", "text": "hi", "threadId": "t-1"});

    let denied = client.post(&url).json(&body).send().await.expect("post");
    assert_eq!(denied.status(), StatusCode::UNAUTHORIZED);

    let accepted = client
        .post(&url)
        .header("authorization", "Bearer outbound-secret")
        .json(&body)
        .send()
        .await
        .expect("post");
    assert_eq!(accepted.status(), StatusCode::OK);
    let payload: Value = accepted.json().await.expect("json");
    assert_eq!(payload["ok"], true);
    assert_eq!(payload["to"], "user:u1");
    assert_eq!(payload["threadId"], "t-1");
    assert_eq!(payload["status"], "unmatched");
    assert!(payload.get("routing").is_none());
    assert!(payload["messageId"].as_str().is_some_and(|id| !id.is_empty()));

    handle.abort();
    gateway.stop().await.expect("stop gateway");
}

#[tokio::test]
async fn functional_legacy_callback_accepts_chat_id_shape() {
    let gateway = local_gateway().await;
    let state = Arc::new(GatewayServerState::new(gateway.clone(), GatewayServerConfig::default()));
    let (addr, handle) = spawn_test_server(state).await.expect("spawn server");
    let client = Client::new();
    let url = format!("http://{addr}{DEFAULT_LEGACY_CALLBACK_PATH}");

    let response = client
        .post(&url)
        .json(&json!({"chat_id": "user:u1", "text": "hi", "reply_to_message_id": "m-1"}))
        .send()
        .await
        .expect("post");
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.json::<Value>().await.expect("json"), json!({"ok": true}));

    let missing_target = client
        .post(&url)
        .json(&json!({"text": "hi"}))
        .send()
        .await
        .expect("post");
    assert_eq!(missing_target.status(), StatusCode::BAD_REQUEST);

    handle.abort();
    gateway.stop().await.expect("stop gateway");
}

#[tokio::test]
async fn integration_polling_routes_serve_buffer_and_inbound_frames() {
    let gateway = local_gateway().await;
    let polling = Arc::new(PollingTransport::default());
    let received = Arc::new(std::sync::Mutex::new(Vec::<String>::new()));
    let sink = received.clone();
    polling.on_message(Arc::new(move |message: TransportMessage| {
        sink.lock().expect("lock").push(message.text);
    }));
    polling
        .push(TransportMessage::from_callback(&OutboundCallback::new("user:u1", "queued reply")))
        .expect("push");
    let state = Arc::new(
        GatewayServerState::new(gateway.clone(), GatewayServerConfig::default())
            .with_polling(polling.clone()),
    );
    let (addr, handle) = spawn_test_server(state).await.expect("spawn server");
    let client = Client::new();

    let poll: Value = client
        .get(format!("http://{addr}{DEFAULT_TRANSPORT_PATH}/poll?since=0"))
        .send()
        .await
        .expect("poll")
        .json()
        .await
        .expect("poll json");
    assert_eq!(poll["messages"][0]["text"], "queued reply");
    let cursor = poll["cursor"].as_u64().expect("cursor");
    let empty: Value = client
        .get(format!("http://{addr}{DEFAULT_TRANSPORT_PATH}/poll?since={cursor}"))
        .send()
        .await
        .expect("poll")
        .json()
        .await
        .expect("poll json");
    assert_eq!(empty["messages"], json!([]));

    let frame = json!({
        "messageId": "b-1",
        "timestamp": 1,
        "sender": {"id": "assistant", "isBot": true},
        "conversation": {"type": "direct", "id": "u1"},
        "text": "from backend"
    });
    let inbound = client
        .post(format!("http://{addr}{DEFAULT_TRANSPORT_PATH}/inbound"))
        .json(&frame)
        .send()
        .await
        .expect("inbound");
    assert_eq!(inbound.status(), StatusCode::OK);
    assert_eq!(received.lock().expect("lock").as_slice(), ["from backend".to_string()]);

    handle.abort();
    gateway.stop().await.expect("stop gateway");
}

#[tokio::test]
async fn integration_push_websocket_broadcasts_and_forwards_inbound() {
    let gateway = local_gateway().await;
    let ws_push = Arc::new(WebSocketPushServer::default());
    let (inbound_tx, mut inbound_rx) = tokio::sync::mpsc::unbounded_channel();
    ws_push.on_message(Arc::new(move |message: TransportMessage| {
        let _ = inbound_tx.send(message);
    }));
    ws_push.start();
    let state = Arc::new(
        GatewayServerState::new(gateway.clone(), GatewayServerConfig::default())
            .with_ws_push(ws_push.clone()),
    );
    let (addr, handle) = spawn_test_server(state).await.expect("spawn server");

    let (mut socket, _) = connect_async(format!("ws://{addr}{DEFAULT_TRANSPORT_PATH}/ws"))
        .await
        .expect("connect push websocket");
    tokio::time::timeout(Duration::from_secs(2), async {
        while ws_push.connection_count() == 0 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("push connection registered");

    ws_push
        .push(TransportMessage::from_callback(&OutboundCallback::new("channel:general", "broadcast")))
        .expect("push");
    let frame = recv_ws_json(&mut socket).await;
    assert_eq!(frame["text"], "broadcast");
    assert_eq!(frame["conversation"]["type"], "channel");

    let reply = json!({
        "messageId": "b-2",
        "timestamp": 2,
        "sender": {"id": "assistant"},
        "conversation": {"type": "group", "id": "g1"},
        "text": "pushed back"
    });
    socket
        .send(ClientWsMessage::Text(reply.to_string().into()))
        .await
        .expect("send frame");
    let message = tokio::time::timeout(Duration::from_secs(2), inbound_rx.recv())
        .await
        .expect("inbound within timeout")
        .expect("inbound frame");
    assert_eq!(message.to_callback().to, "group:g1");

    handle.abort();
    ws_push.stop().await;
    gateway.stop().await.expect("stop gateway");
}
