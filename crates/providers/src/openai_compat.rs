//! OpenAI-compatible streaming provider.
//!
//! Works with: Groq, OpenAI, Hugging Face router, OpenRouter, Ollama, vLLM,
//! and any endpoint exposing a streaming `/chat/completions`.
//!
//! The provider posts the conversation with `stream: true`, reads the
//! server-sent-event body on a spawned task, and forwards each content delta
//! as one fragment of a `StreamSession`. Envelope metadata, keep-alives and
//! unparseable frames are never forwarded.

use async_trait::async_trait;
use futures::StreamExt;
use kateno_core::error::ProviderError;
use kateno_core::message::Message;
use kateno_core::provider::{Provider, ProviderRequest};
use kateno_core::session::{FragmentSender, StreamSession};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use crate::sse::{SseDecoder, SseEvent};

/// An OpenAI-compatible LLM provider.
pub struct OpenAiCompatProvider {
    name: String,
    base_url: String,
    api_key: String,
    model: String,
    client: reqwest::Client,
}

impl OpenAiCompatProvider {
    /// Create a new OpenAI-compatible provider.
    pub fn new(
        name: impl Into<String>,
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        model: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            model: model.into(),
            client: reqwest::Client::new(),
        }
    }

    /// Create a Groq provider (convenience constructor).
    pub fn groq(api_key: impl Into<String>) -> Self {
        Self::new(
            "groq",
            "https://api.groq.com/openai/v1",
            api_key,
            "openai/gpt-oss-120b",
        )
    }

    /// Use a preconfigured HTTP client (connection pool, proxies, timeouts).
    pub fn with_client(mut self, client: reqwest::Client) -> Self {
        self.client = client;
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn request_body(&self, request: &ProviderRequest) -> serde_json::Value {
        let model = if request.model.is_empty() {
            self.model.as_str()
        } else {
            request.model.as_str()
        };

        let mut body = serde_json::json!({
            "model": model,
            "messages": to_api_messages(&request.messages),
            "temperature": request.temperature,
            "stream": true,
        });

        if let Some(max_tokens) = request.max_tokens {
            body["max_tokens"] = serde_json::json!(max_tokens);
        }

        body
    }
}

#[async_trait]
impl Provider for OpenAiCompatProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn model(&self) -> &str {
        &self.model
    }

    async fn stream(
        &self,
        request: ProviderRequest,
        cancel: CancellationToken,
    ) -> Result<StreamSession, ProviderError> {
        if self.api_key.trim().is_empty() {
            return Err(ProviderError::NotConfigured(format!(
                "no API key for provider '{}'",
                self.name
            )));
        }

        let url = format!("{}/chat/completions", self.base_url);
        let body = self.request_body(&request);

        debug!(
            provider = %self.name,
            model = %body["model"],
            messages = request.messages.len(),
            "Sending streaming request"
        );

        let send = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .header("Accept", "text/event-stream")
            .json(&body)
            .send();

        let response = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(ProviderError::Cancelled),
            result = send => result.map_err(|e| transport_error(&e))?,
        };

        let status = response.status().as_u16();

        if status == 429 {
            let retry_after_secs = response
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.trim().parse().ok())
                .unwrap_or(5);
            warn!(provider = %self.name, retry_after_secs, "Provider rate limited request");
            return Err(ProviderError::RateLimited { retry_after_secs });
        }

        if status == 401 || status == 403 {
            let error_body = response.text().await.unwrap_or_default();
            warn!(provider = %self.name, status, body = %error_body, "Provider rejected credentials");
            return Err(ProviderError::AuthenticationFailed(
                "Invalid API key or insufficient permissions".into(),
            ));
        }

        if !response.status().is_success() {
            let error_body = response.text().await.unwrap_or_default();
            warn!(provider = %self.name, status, body = %error_body, "Provider streaming error");
            return Err(ProviderError::ApiError {
                status_code: status,
                message: error_body,
            });
        }

        if response.content_length() == Some(0) {
            return Err(ProviderError::NoBody(self.name.clone()));
        }

        let (tx, session) = StreamSession::channel(self.name.clone(), cancel.clone());
        let provider_name = self.name.clone();

        tokio::spawn(async move {
            pump_events(provider_name, response, tx, cancel).await;
        });

        Ok(session)
    }

    async fn health_check(&self) -> Result<bool, ProviderError> {
        let url = format!("{}/models", self.base_url);
        let response = self
            .client
            .get(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .send()
            .await
            .map_err(|e| transport_error(&e))?;

        Ok(response.status().is_success())
    }
}

/// Read the SSE body until `[DONE]`, natural end, error, or cancellation.
///
/// Returning drops the response and the sender: the upstream connection is
/// released and the session sees end-of-stream.
async fn pump_events(
    provider: String,
    response: reqwest::Response,
    tx: FragmentSender,
    cancel: CancellationToken,
) {
    let mut byte_stream = response.bytes_stream();
    let mut decoder = SseDecoder::new();

    loop {
        let next = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                debug!(provider = %provider, "Stream cancelled by caller");
                return;
            }
            next = byte_stream.next() => next,
        };

        let events = match next {
            Some(Ok(bytes)) => decoder.feed(&bytes),
            Some(Err(e)) => {
                warn!(provider = %provider, error = %e, "Upstream stream broke");
                let _ = tx
                    .send(Err(ProviderError::StreamInterrupted(e.to_string())))
                    .await;
                return;
            }
            None => {
                let events = decoder.finish();
                forward_events(&provider, events, &tx, &cancel).await;
                debug!(provider = %provider, "Upstream stream ended");
                return;
            }
        };

        if !forward_events(&provider, events, &tx, &cancel).await {
            return;
        }
    }
}

/// Forward the fragments carried by `events`. Returns `false` when the
/// stream is over: terminal marker seen, consumer gone, or cancelled.
async fn forward_events(
    provider: &str,
    events: Vec<SseEvent>,
    tx: &FragmentSender,
    cancel: &CancellationToken,
) -> bool {
    for event in events {
        let payload = match event {
            SseEvent::Done => {
                debug!(provider = %provider, "Received [DONE]");
                return false;
            }
            SseEvent::Data(payload) => payload,
        };

        let Some(fragment) = parse_fragment(provider, &payload) else {
            continue;
        };

        let sent = tokio::select! {
            biased;
            _ = cancel.cancelled() => false,
            result = tx.send(Ok(fragment)) => result.is_ok(),
        };
        if !sent {
            return false;
        }
    }
    true
}

/// Extract the content delta from one event payload.
fn parse_fragment(provider: &str, payload: &str) -> Option<String> {
    match serde_json::from_str::<StreamResponse>(payload) {
        Ok(chunk) => chunk
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.delta.content)
            .filter(|content| !content.is_empty()),
        Err(e) => {
            trace!(
                provider = %provider,
                data = %payload,
                error = %e,
                "Ignoring unparseable SSE chunk"
            );
            None
        }
    }
}

fn transport_error(e: &reqwest::Error) -> ProviderError {
    if e.is_timeout() {
        ProviderError::Timeout(e.to_string())
    } else {
        ProviderError::Network(e.to_string())
    }
}

/// Convert our Message types to the OpenAI wire format.
fn to_api_messages(messages: &[Message]) -> Vec<ApiMessage<'_>> {
    messages
        .iter()
        .map(|m| ApiMessage {
            role: m.role.as_str(),
            content: &m.content,
        })
        .collect()
}

// --- OpenAI API types (internal) ---

#[derive(Debug, Serialize)]
struct ApiMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct StreamResponse {
    #[serde(default)]
    choices: Vec<StreamChoice>,
}

#[derive(Debug, Deserialize)]
struct StreamChoice {
    #[serde(default)]
    delta: StreamDelta,
}

#[derive(Debug, Default, Deserialize)]
struct StreamDelta {
    #[serde(default)]
    content: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn delta(content: &str) -> String {
        format!(
            "data: {}\n\n",
            serde_json::json!({"choices": [{"index": 0, "delta": {"content": content}}]})
        )
    }

    fn sse_response(body: String) -> ResponseTemplate {
        ResponseTemplate::new(200).set_body_raw(body, "text/event-stream")
    }

    async fn provider_for(server: &MockServer) -> OpenAiCompatProvider {
        OpenAiCompatProvider::new("test", server.uri(), "sk-test", "test-model")
    }

    fn request() -> ProviderRequest {
        ProviderRequest::new(vec![
            Message::system("be brief"),
            Message::user("Explain recursion"),
        ])
    }

    #[test]
    fn parse_fragment_extracts_delta() {
        let payload = r#"{"id":"x","choices":[{"index":0,"delta":{"content":"Hi"}}]}"#;
        assert_eq!(parse_fragment("t", payload).as_deref(), Some("Hi"));
    }

    #[test]
    fn parse_fragment_skips_role_only_and_empty_deltas() {
        assert!(parse_fragment("t", r#"{"choices":[{"delta":{"role":"assistant"}}]}"#).is_none());
        assert!(parse_fragment("t", r#"{"choices":[{"delta":{"content":""}}]}"#).is_none());
        assert!(parse_fragment("t", r#"{"choices":[]}"#).is_none());
        assert!(parse_fragment("t", "not json").is_none());
    }

    #[test]
    fn body_uses_default_model_and_stream_flag() {
        let provider = OpenAiCompatProvider::new("p", "http://x/v1/", "k", "default-model");
        let mut req = request();
        req.max_tokens = Some(256);
        let body = provider.request_body(&req);
        assert_eq!(body["model"], "default-model");
        assert_eq!(body["stream"], true);
        assert_eq!(body["max_tokens"], 256);
        assert_eq!(body["messages"][0]["role"], "system");
        assert_eq!(provider.base_url(), "http://x/v1");
    }

    #[tokio::test]
    async fn streams_content_fragments() {
        let server = MockServer::start().await;
        let body = format!(
            "{}{}{}data: [DONE]\n\n",
            delta("Recursion"),
            delta(" is"),
            delta(" self-reference.")
        );
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .and(header("authorization", "Bearer sk-test"))
            .and(body_partial_json(serde_json::json!({"stream": true, "model": "test-model"})))
            .respond_with(sse_response(body))
            .mount(&server)
            .await;

        let provider = provider_for(&server).await;
        let session = provider
            .stream(request(), CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(session.provider(), "test");
        assert_eq!(
            session.collect_text().await.unwrap(),
            "Recursion is self-reference."
        );
    }

    #[tokio::test]
    async fn malformed_frames_are_skipped() {
        let server = MockServer::start().await;
        let body = format!(
            "{}data: {{not json\n\n: keep-alive\n\n{}data: [DONE]\n\n",
            delta("one"),
            delta(" two")
        );
        Mock::given(method("POST"))
            .respond_with(sse_response(body))
            .mount(&server)
            .await;

        let session = provider_for(&server)
            .await
            .stream(request(), CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(session.collect_text().await.unwrap(), "one two");
    }

    #[tokio::test]
    async fn nothing_after_done_marker() {
        let server = MockServer::start().await;
        let body = format!("{}data: [DONE]\n\n{}", delta("kept"), delta(" dropped"));
        Mock::given(method("POST"))
            .respond_with(sse_response(body))
            .mount(&server)
            .await;

        let session = provider_for(&server)
            .await
            .stream(request(), CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(session.collect_text().await.unwrap(), "kept");
    }

    #[tokio::test]
    async fn natural_end_without_done_closes_normally() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(sse_response(format!("{}data: {{\"choices\":[{{\"delta\":{{\"content\":\"!\"}}}}]}}", delta("end"))))
            .mount(&server)
            .await;

        let session = provider_for(&server)
            .await
            .stream(request(), CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(session.collect_text().await.unwrap(), "end!");
    }

    #[tokio::test]
    async fn non_success_status_is_api_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503).set_body_string("overloaded"))
            .mount(&server)
            .await;

        let err = provider_for(&server)
            .await
            .stream(request(), CancellationToken::new())
            .await
            .unwrap_err();
        match err {
            ProviderError::ApiError {
                status_code,
                message,
            } => {
                assert_eq!(status_code, 503);
                assert_eq!(message, "overloaded");
            }
            other => panic!("Expected ApiError, got: {other:?}"),
        }
    }

    #[tokio::test]
    async fn auth_failure_and_rate_limit_are_classified() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(401).set_body_string("bad key"))
            .mount(&server)
            .await;
        let err = provider_for(&server)
            .await
            .stream(request(), CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::AuthenticationFailed(_)));

        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(429).insert_header("retry-after", "12"))
            .mount(&server)
            .await;
        let err = provider_for(&server)
            .await
            .stream(request(), CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ProviderError::RateLimited {
                retry_after_secs: 12
            }
        ));
    }

    #[tokio::test]
    async fn empty_success_body_is_no_body() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        let err = provider_for(&server)
            .await
            .stream(request(), CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::NoBody(_)));
    }

    #[tokio::test]
    async fn missing_key_is_not_configured() {
        let provider = OpenAiCompatProvider::new("p", "http://127.0.0.1:9", "", "m");
        let err = provider
            .stream(request(), CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::NotConfigured(_)));
    }

    #[tokio::test]
    async fn unreachable_host_is_network_error() {
        // Port 9 (discard) is not listening on test machines.
        let provider = OpenAiCompatProvider::new("p", "http://127.0.0.1:9", "sk", "m");
        let err = provider
            .stream(request(), CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ProviderError::Network(_) | ProviderError::Timeout(_)
        ));
    }

    #[tokio::test]
    async fn cancelled_before_dispatch() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(sse_response(delta("x")).set_delay(Duration::from_secs(5)))
            .mount(&server)
            .await;

        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = provider_for(&server)
            .await
            .stream(request(), cancel)
            .await
            .unwrap_err();
        assert!(err.is_cancellation());
    }

    #[tokio::test]
    async fn cancelling_session_ends_stream_cleanly() {
        let server = MockServer::start().await;
        let body = format!("{}{}data: [DONE]\n\n", delta("a"), delta("b"));
        Mock::given(method("POST"))
            .respond_with(sse_response(body))
            .mount(&server)
            .await;

        let mut session = provider_for(&server)
            .await
            .stream(request(), CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(session.next_fragment().await.unwrap().unwrap(), "a");
        session.cancel();
        session.cancel();
        assert!(session.next_fragment().await.is_none());
    }

    #[tokio::test]
    async fn health_check_hits_models_endpoint() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/models"))
            .and(header("authorization", "Bearer sk-test"))
            .respond_with(ResponseTemplate::new(200).set_body_string(r#"{"data":[]}"#))
            .expect(1)
            .mount(&server)
            .await;

        let provider = provider_for(&server).await;
        assert!(provider.health_check().await.unwrap());
    }

    #[tokio::test]
    async fn health_check_reports_rejected_key() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/models"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&server)
            .await;

        let provider = provider_for(&server).await;
        assert!(!provider.health_check().await.unwrap());
    }
}
