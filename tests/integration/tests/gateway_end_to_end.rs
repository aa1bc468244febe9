use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use axum::{http::StatusCode, routing::post, Json, Router};
use futures_util::{SinkExt, StreamExt};
use httpmock::prelude::*;
use reqwest::Client;
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_tungstenite::{connect_async, tungstenite::Message as ClientWsMessage};
use uip_backend::{BackendClient, OutboundTransport, UniversalImClient, UniversalImConfig};
use uip_gateway::http_surface::{DEFAULT_OUTBOUND_PATH, DEFAULT_TRANSPORT_PATH};
use uip_gateway::{
    build_delivery_fanout, build_gateway_router, local_adapter_factory, AdapterFactoryRegistry,
    Gateway, GatewayConfig, GatewayServerConfig, GatewayServerState, PollingTransport,
    LOCAL_ADAPTER_NAME,
};
use uip_protocol::PROCESSING_ERROR_TEXT;

type ClientSocket =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

struct Harness {
    addr: SocketAddr,
    gateway: Gateway,
    backend: Arc<UniversalImClient>,
    polling: Arc<PollingTransport>,
    server: JoinHandle<()>,
}

impl Harness {
    async fn start(mut backend_config: UniversalImConfig) -> Result<Self> {
        backend_config.request_timeout_ms = 2_000;
        let polling = Arc::new(PollingTransport::default());
        let fanout_targets: Vec<Arc<dyn OutboundTransport>> = vec![polling.clone()];
        let backend = Arc::new(
            UniversalImClient::new(backend_config)
                .context("build universal-im client")?
                .with_delivery_handler(build_delivery_fanout(None, fanout_targets)),
        );
        let dyn_backend: Arc<dyn BackendClient> = backend.clone();
        let gateway = Gateway::new(
            GatewayConfig {
                worker_count: 4,
                dispatch_timeout: Duration::from_secs(5),
                shutdown_timeout: Duration::from_secs(2),
                ..GatewayConfig::default()
            },
            dyn_backend,
        );
        let mut factories = AdapterFactoryRegistry::new();
        factories.register(LOCAL_ADAPTER_NAME, local_adapter_factory());
        gateway.register_adapter(factories.build(LOCAL_ADAPTER_NAME, &json!({}))?)?;
        gateway.start().await?;

        let state = Arc::new(
            GatewayServerState::new(gateway.clone(), GatewayServerConfig::default())
                .with_polling(polling.clone()),
        );
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .context("bind ephemeral listener")?;
        let addr = listener.local_addr().context("resolve listener addr")?;
        let app = build_gateway_router(state);
        let server = tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });
        tokio::time::sleep(Duration::from_millis(20)).await;
        Ok(Self {
            addr,
            gateway,
            backend,
            polling,
            server,
        })
    }

    async fn connect(&self, session: &str, user: &str) -> ClientSocket {
        let (mut socket, _) = connect_async(format!(
            "ws://{}/api/v1/local/ws?sessionId={session}&userId={user}",
            self.addr
        ))
        .await
        .expect("connect websocket");
        let greeting = recv_ws_json(&mut socket).await;
        assert_eq!(greeting["type"], "connected");
        socket
    }

    async fn post_message(&self, body: Value) -> Value {
        Client::new()
            .post(format!("http://{}/api/v1/local/message", self.addr))
            .json(&body)
            .send()
            .await
            .expect("post message")
            .json()
            .await
            .expect("message json")
    }

    async fn post_outbound(&self, body: Value) -> Value {
        let response = Client::new()
            .post(format!("http://{}{DEFAULT_OUTBOUND_PATH}", self.addr))
            .json(&body)
            .send()
            .await
            .expect("post outbound");
        assert_eq!(response.status(), reqwest::StatusCode::OK);
        response.json().await.expect("outbound json")
    }

    async fn wait_for_in_flight(&self) {
        for _ in 0..400 {
            if self.backend.registry().in_flight_len() > 0 {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("event never became in-flight");
    }

    async fn shutdown(self) {
        self.server.abort();
        self.gateway.stop().await.expect("stop gateway");
    }
}

async fn recv_ws_json(socket: &mut ClientSocket) -> Value {
    tokio::time::timeout(Duration::from_secs(5), async {
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

async fn spawn_flaky_webhook(failures: usize) -> (String, Arc<AtomicUsize>) {
    let hits = Arc::new(AtomicUsize::new(0));
    let counter = hits.clone();
    let app = Router::new().route(
        "/universal-im/default/webhook",
        post(move || {
            let counter = counter.clone();
            async move {
                if counter.fetch_add(1, Ordering::SeqCst) < failures {
                    (StatusCode::BAD_GATEWAY, Json(json!({"ok": false})))
                } else {
                    (StatusCode::OK, Json(json!({"ok": true, "reply": "worth the wait"})))
                }
            }
        }),
    );
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind stub");
    let addr = listener.local_addr().expect("stub addr");
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    tokio::time::sleep(Duration::from_millis(20)).await;
    (format!("http://{addr}"), hits)
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn integration_message_then_outbound_callback_reaches_websocket() {
    let backend = MockServer::start();
    let webhook = backend.mock(|when, then| {
        when.method(POST)
            .path("/universal-im/default/webhook")
            .json_body_includes(
                json!({
                    "sender": {"id": "u1"},
                    "conversation": {"type": "direct", "id": "u1"},
                    "text": "hello",
                    "meta": {"sessionId": "s1"}
                })
                .to_string(),
            );
        then.status(200).json_body(json!({"ok": true, "messageId": "m-1"}));
    });
    let harness = Harness::start(UniversalImConfig::new(backend.base_url()))
        .await
        .expect("start harness");
    let mut socket = harness.connect("s1", "u1").await;

    let accepted = harness
        .post_message(json!({"sessionId": "s1", "userId": "u1", "text": "hello"}))
        .await;
    assert_eq!(accepted["success"], true);
    harness.wait_for_in_flight().await;
    webhook.assert();

    let outbound = harness
        .post_outbound(json!({"to": "user:u1", "text": "hi there"}))
        .await;
    assert_eq!(outbound["ok"], true);
    assert_eq!(outbound["status"], "delivered");
    assert_eq!(outbound["routing"]["sessionId"], "s1");
    assert_eq!(outbound["routing"]["userId"], "u1");

    let intent = recv_ws_json(&mut socket).await;
    assert_eq!(intent["intentType"], "reply");
    assert_eq!(intent["content"]["text"], "hi there");
    assert_eq!(intent["targetSessionId"], "s1");
    assert_eq!(intent["inReplyTo"], accepted["interactionId"]);
    assert!(harness.polling.is_empty());

    let stats = harness.gateway.stats();
    assert_eq!(stats.processed, 1);
    assert_eq!(stats.fallback_intents, 0);
    harness.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn integration_backend_recovers_after_two_failed_sends() {
    let (endpoint, hits) = spawn_flaky_webhook(2).await;
    let mut config = UniversalImConfig::new(endpoint);
    config.max_retries = 3;
    let harness = Harness::start(config).await.expect("start harness");
    let mut socket = harness.connect("s2", "u2").await;

    harness
        .post_message(json!({"sessionId": "s2", "userId": "u2", "text": "are you there?"}))
        .await;
    let intent = recv_ws_json(&mut socket).await;
    assert_eq!(intent["content"]["text"], "worth the wait");
    assert_eq!(intent["targetSessionId"], "s2");
    assert_eq!(hits.load(Ordering::SeqCst), 3);
    assert_eq!(harness.gateway.stats().fallback_intents, 0);
    harness.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn integration_late_callback_is_pushed_to_poll_transport() {
    let backend = MockServer::start();
    backend.mock(|when, then| {
        when.method(POST).path("/universal-im/default/webhook");
        then.status(200).json_body(json!({"ok": true}));
    });
    let mut config = UniversalImConfig::new(backend.base_url());
    config.reply_timeout_ms = 100;
    let harness = Harness::start(config).await.expect("start harness");
    let mut socket = harness.connect("s3", "u3").await;

    harness
        .post_message(json!({"sessionId": "s3", "userId": "u3", "text": "slow question"}))
        .await;
    let apology = recv_ws_json(&mut socket).await;
    assert_eq!(apology["content"]["text"], PROCESSING_ERROR_TEXT);
    assert_eq!(apology["targetSessionId"], "s3");
    assert_eq!(harness.gateway.stats().fallback_intents, 1);

    let outbound = harness
        .post_outbound(json!({"to": "user:u3", "text": "slow answer"}))
        .await;
    assert_eq!(outbound["status"], "late");
    assert_eq!(outbound["routing"]["sessionId"], "s3");

    let poll: Value = Client::new()
        .get(format!("http://{}{DEFAULT_TRANSPORT_PATH}/poll?since=0", harness.addr))
        .send()
        .await
        .expect("poll")
        .json()
        .await
        .expect("poll json");
    let messages = poll["messages"].as_array().expect("messages array");
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0]["text"], "slow answer");
    assert_eq!(messages[0]["conversation"]["id"], "u3");
    assert_eq!(messages[0]["meta"]["sessionId"], "s3");
    harness.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn regression_unknown_conversation_callback_is_surfaced_not_dropped() {
    let backend = MockServer::start();
    let harness = Harness::start(UniversalImConfig::new(backend.base_url()))
        .await
        .expect("start harness");

    let outbound = harness
        .post_outbound(json!({"to": "channel:nobody-home", "text": "orphan"}))
        .await;
    assert_eq!(outbound["ok"], true);
    assert_eq!(outbound["status"], "unmatched");
    assert!(outbound.get("routing").is_none());

    let frames = harness.polling.poll(0);
    assert_eq!(frames.len(), 1);
    assert_eq!(frames[0].text, "orphan");
    assert_eq!(frames[0].conversation.id, "nobody-home");
    harness.shutdown().await;
}
