//! Secondary request format used when the primary webhook send fails.

use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use serde::Deserialize;
use serde_json::json;
use tokio_util::sync::CancellationToken;
use uip_protocol::CanonicalInteractionEvent;

use crate::BackendError;

#[derive(Debug, Clone)]
/// Public struct `OpenAiCompatConfig` used by the fallback path.
pub struct OpenAiCompatConfig {
    pub endpoint: String,
    pub model: String,
    pub api_key: Option<String>,
    pub request_timeout_ms: u64,
}

#[derive(Debug, Clone)]
/// Single-attempt OpenAI chat-completions client.
pub struct OpenAiCompatClient {
    client: reqwest::Client,
    config: OpenAiCompatConfig,
}

#[derive(Debug, Deserialize)]
struct CompletionResponse {
    #[serde(default)]
    choices: Vec<CompletionChoice>,
}

#[derive(Debug, Deserialize)]
struct CompletionChoice {
    message: CompletionMessage,
}

#[derive(Debug, Deserialize)]
struct CompletionMessage {
    #[serde(default)]
    content: Option<String>,
}

impl OpenAiCompatClient {
    pub fn new(config: OpenAiCompatConfig) -> Result<Self, BackendError> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        if let Some(api_key) = config.api_key.as_deref().filter(|key| !key.trim().is_empty()) {
            let bearer = format!("Bearer {}", api_key.trim());
            headers.insert(
                AUTHORIZATION,
                HeaderValue::from_str(&bearer).map_err(|e| {
                    BackendError::InvalidResponse(format!("invalid API key header: {e}"))
                })?,
            );
        }
        let client = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(std::time::Duration::from_millis(
                config.request_timeout_ms.max(1),
            ))
            .build()?;
        Ok(Self { client, config })
    }

    pub fn chat_completions_url(&self) -> String {
        let base = self.config.endpoint.trim_end_matches('/');
        if base.ends_with("/chat/completions") {
            return base.to_string();
        }
        if base.ends_with("/v1") {
            return format!("{base}/chat/completions");
        }
        format!("{base}/v1/chat/completions")
    }

    /// Asks the backend for a completion of the event text and returns the
    /// first choice's content.
    pub async fn complete(
        &self,
        event: &CanonicalInteractionEvent,
        cancel: &CancellationToken,
    ) -> Result<String, BackendError> {
        let body = json!({
            "model": self.config.model,
            "messages": [{"role": "user", "content": event.text()}],
            "user": event.session_id(),
            "stream": false,
        });
        let send = async {
            let response = self
                .client
                .post(self.chat_completions_url())
                .header("X-Trace-ID", event.meta.trace_id.as_str())
                .json(&body)
                .send()
                .await?;
            let status = response.status();
            let raw = response.text().await?;
            if !status.is_success() {
                return Err(BackendError::HttpStatus {
                    status: status.as_u16(),
                    body: raw,
                });
            }
            parse_completion_text(&raw)
        };
        tokio::select! {
            _ = cancel.cancelled() => Err(BackendError::Cancelled),
            result = send => result,
        }
    }
}

fn parse_completion_text(raw: &str) -> Result<String, BackendError> {
    let parsed: CompletionResponse = serde_json::from_str(raw)?;
    parsed
        .choices
        .into_iter()
        .find_map(|choice| choice.message.content)
        .filter(|content| !content.trim().is_empty())
        .ok_or_else(|| BackendError::InvalidResponse("completion has no content".to_string()))
}

#[cfg(test)]
mod tests {
    use httpmock::prelude::*;
    use serde_json::json;
    use tokio_util::sync::CancellationToken;
    use uip_protocol::{CanonicalInteractionEvent, InputPayload, InputType, SurfaceCapabilities};

    use super::{parse_completion_text, OpenAiCompatClient, OpenAiCompatConfig};

    fn client(endpoint: String) -> OpenAiCompatClient {
        OpenAiCompatClient::new(OpenAiCompatConfig {
            endpoint,
            model: "openclaw".to_string(),
            api_key: None,
            request_timeout_ms: 5_000,
        })
        .expect("client")
    }

    #[test]
    fn unit_chat_completions_url_normalizes_base() {
        assert_eq!(
            client("http://h:1".to_string()).chat_completions_url(),
            "http://h:1/v1/chat/completions"
        );
        assert_eq!(
            client("http://h:1/v1/".to_string()).chat_completions_url(),
            "http://h:1/v1/chat/completions"
        );
    }

    #[test]
    fn unit_empty_completion_is_invalid() {
        assert!(parse_completion_text(r#"{"choices":[]}"#).is_err());
        assert!(parse_completion_text(r#"{"choices":[{"message":{"content":"  "}}]}"#).is_err());
        assert_eq!(
            parse_completion_text(r#"{"choices":[{"message":{"content":"ok"}}]}"#)
                .expect("content"),
            "ok"
        );
    }

    #[tokio::test]
    async fn integration_completion_request_carries_model_and_text() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(POST)
                .path("/v1/chat/completions")
                .header_exists("x-trace-id")
                .json_body_includes(
                    json!({
                        "model": "openclaw",
                        "messages": [{"role": "user", "content": "hello"}],
                        "user": "s1"
                    })
                    .to_string(),
                );
            then.status(200)
                .json_body(json!({"choices": [{"message": {"content": "fallback reply"}}]}));
        });
        let event = CanonicalInteractionEvent::new(
            "s1",
            "u1",
            InputType::Text,
            InputPayload::text("hello"),
            SurfaceCapabilities::default(),
            "local-adapter",
        );
        let text = client(server.base_url())
            .complete(&event, &CancellationToken::new())
            .await
            .expect("completion");
        mock.assert();
        assert_eq!(text, "fallback reply");
    }
}
