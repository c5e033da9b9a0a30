use async_trait::async_trait;
use futures::StreamExt;
use futures::stream::BoxStream;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE, HeaderMap, HeaderValue};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::models::ChatMessage;
use super::sse;
use crate::config::CompletionSettings;
use crate::errors::RelayError;

/// Incremental answer fragments, in order. Finite and not restartable; an
/// `Err` item is the last item.
pub type FragmentStream = BoxStream<'static, Result<String, RelayError>>;

/// Abstraction over the completion service so the orchestrator can be driven
/// by a scripted double in tests. Real implementation: `OpenAiRelay`.
#[async_trait]
pub trait CompletionRelay: Send + Sync {
    /// Wait for the whole answer.
    async fn complete(&self, messages: &[ChatMessage]) -> Result<String, RelayError>;

    /// Start a streamed answer. Errors before the first fragment are returned
    /// here; later ones arrive as the final stream item.
    async fn complete_streaming(&self, messages: &[ChatMessage]) -> Result<FragmentStream, RelayError>;

    fn model(&self) -> &str;
}

// ── Wire types ────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
struct CompletionRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    temperature: f64,
    stream: bool,
}

#[derive(Debug, Deserialize)]
struct CompletionResponse {
    #[serde(default)]
    choices: Vec<ResponseChoice>,
}

#[derive(Debug, Deserialize)]
struct ResponseChoice {
    message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CompletionChunk {
    #[serde(default)]
    choices: Vec<ChunkChoice>,
    #[serde(default)]
    error: Option<ApiErrorBody>,
}

#[derive(Debug, Deserialize)]
struct ChunkChoice {
    #[serde(default)]
    delta: ChunkDelta,
}

#[derive(Debug, Default, Deserialize)]
struct ChunkDelta {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    #[serde(default)]
    message: Option<String>,
}

// ── OpenAI-compatible relay ───────────────────────────────────────────

/// Relay for any service speaking the OpenAI `/chat/completions` protocol.
pub struct OpenAiRelay {
    client: reqwest::Client,
    endpoint: String,
    model: String,
    temperature: f64,
}

impl OpenAiRelay {
    pub fn new(settings: &CompletionSettings, api_key: &str) -> Result<Self, RelayError> {
        let mut headers = HeaderMap::new();
        let mut auth = HeaderValue::from_str(&format!("Bearer {}", api_key))
            .map_err(|e| RelayError::Decode(format!("credential is not a valid header value: {}", e)))?;
        auth.set_sensitive(true);
        headers.insert(AUTHORIZATION, auth);
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .build()
            .map_err(RelayError::Transport)?;

        Ok(Self {
            client,
            endpoint: format!("{}/chat/completions", settings.base_url.trim_end_matches('/')),
            model: settings.model.clone(),
            temperature: settings.temperature,
        })
    }

    async fn send(&self, messages: &[ChatMessage], stream: bool) -> Result<reqwest::Response, RelayError> {
        debug!(
            model = %self.model,
            message_count = messages.len(),
            stream,
            "Sending completion request"
        );
        let request = CompletionRequest {
            model: &self.model,
            messages,
            temperature: self.temperature,
            stream,
        };
        let response = self
            .client
            .post(&self.endpoint)
            .json(&request)
            .send()
            .await
            .map_err(RelayError::Transport)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(RelayError::Api {
                status: status.as_u16(),
                message: parse_api_error(&body),
            });
        }
        Ok(response)
    }
}

#[async_trait]
impl CompletionRelay for OpenAiRelay {
    async fn complete(&self, messages: &[ChatMessage]) -> Result<String, RelayError> {
        let response = self.send(messages, false).await?;
        let body: CompletionResponse = response.json().await.map_err(RelayError::Transport)?;
        let choice = body
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| RelayError::Decode("response has no choices".into()))?;
        Ok(choice.message.content.unwrap_or_default())
    }

    async fn complete_streaming(&self, messages: &[ChatMessage]) -> Result<FragmentStream, RelayError> {
        let response = self.send(messages, true).await?;
        let bytes = response
            .bytes_stream()
            .map(|chunk| chunk.map_err(RelayError::Transport));
        Ok(fragments(sse::data_payloads(bytes)))
    }

    fn model(&self) -> &str {
        &self.model
    }
}

/// Map decoded SSE payloads to answer fragments, dropping chunks that carry no
/// text (role announcements, finish markers). The first error ends the stream.
fn fragments(payloads: BoxStream<'static, Result<String, RelayError>>) -> FragmentStream {
    futures::stream::unfold(Some(payloads), |payloads| async move {
        let mut payloads = payloads?;
        loop {
            match payloads.next().await? {
                Ok(data) => match parse_chunk(&data) {
                    Ok(Some(fragment)) => return Some((Ok(fragment), Some(payloads))),
                    Ok(None) => continue,
                    Err(e) => return Some((Err(e), None)),
                },
                Err(e) => return Some((Err(e), None)),
            }
        }
    })
    .boxed()
}

fn parse_chunk(data: &str) -> Result<Option<String>, RelayError> {
    let chunk: CompletionChunk = serde_json::from_str(data)
        .map_err(|e| RelayError::Decode(format!("invalid stream chunk: {}", e)))?;
    if let Some(error) = chunk.error {
        return Err(RelayError::Api {
            status: 200,
            message: error.message.unwrap_or_else(|| "stream reported an error".into()),
        });
    }
    Ok(chunk
        .choices
        .into_iter()
        .next()
        .and_then(|choice| choice.delta.content)
        .filter(|text| !text.is_empty()))
}

/// Pull `error.message` out of an API error body, falling back to the raw body.
fn parse_api_error(body: &str) -> String {
    serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|json| json["error"]["message"].as_str().map(String::from))
        .unwrap_or_else(|| body.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chat::models::Role;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn settings(base_url: &str) -> CompletionSettings {
        CompletionSettings {
            model: "gpt-test".into(),
            temperature: 0.3,
            base_url: base_url.into(),
        }
    }

    fn transcript() -> Vec<ChatMessage> {
        vec![
            ChatMessage {
                role: Role::User,
                content: "q1".into(),
            },
            ChatMessage {
                role: Role::Assistant,
                content: "a1".into(),
            },
            ChatMessage {
                role: Role::User,
                content: "q2".into(),
            },
        ]
    }

    fn sse_body(fragments: &[&str]) -> String {
        let mut body = String::from("data: {\"choices\":[{\"delta\":{\"role\":\"assistant\"}}]}\n\n");
        for fragment in fragments {
            body.push_str(&format!(
                "data: {}\n\n",
                serde_json::json!({"choices": [{"delta": {"content": fragment}}]})
            ));
        }
        body.push_str("data: {\"choices\":[{\"delta\":{},\"finish_reason\":\"stop\"}]}\n\n");
        body.push_str("data: [DONE]\n\n");
        body
    }

    #[test]
    fn parse_chunk_extracts_delta_text() {
        let data = r#"{"choices":[{"delta":{"content":"Hel"}}]}"#;
        assert_eq!(parse_chunk(data).unwrap(), Some("Hel".to_string()));
    }

    #[test]
    fn parse_chunk_skips_empty_deltas() {
        assert_eq!(parse_chunk(r#"{"choices":[{"delta":{"role":"assistant"}}]}"#).unwrap(), None);
        assert_eq!(parse_chunk(r#"{"choices":[{"delta":{"content":""}}]}"#).unwrap(), None);
        assert_eq!(parse_chunk(r#"{"choices":[]}"#).unwrap(), None);
    }

    #[test]
    fn parse_chunk_surfaces_embedded_error() {
        let err = parse_chunk(r#"{"error":{"message":"overloaded"}}"#).unwrap_err();
        assert!(err.to_string().contains("overloaded"));
    }

    #[test]
    fn parse_chunk_rejects_garbage() {
        assert!(matches!(parse_chunk("not json"), Err(RelayError::Decode(_))));
    }

    #[test]
    fn parse_api_error_json_and_plain() {
        assert_eq!(
            parse_api_error(r#"{"error":{"message":"bad key","type":"auth"}}"#),
            "bad key"
        );
        assert_eq!(parse_api_error("upstream down"), "upstream down");
    }

    #[test]
    fn endpoint_tolerates_trailing_slash() {
        let relay = OpenAiRelay::new(&settings("http://localhost:1/v1/"), "k").unwrap();
        assert_eq!(relay.endpoint, "http://localhost:1/v1/chat/completions");
        assert_eq!(relay.model(), "gpt-test");
    }

    #[tokio::test]
    async fn complete_sends_configured_request() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .and(header("authorization", "Bearer sk-test"))
            .and(body_partial_json(serde_json::json!({
                "model": "gpt-test",
                "temperature": 0.3,
                "stream": false,
                "messages": [
                    {"role": "user", "content": "q1"},
                    {"role": "assistant", "content": "a1"},
                    {"role": "user", "content": "q2"}
                ]
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "choices": [{"message": {"role": "assistant", "content": "answer"}}]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let relay = OpenAiRelay::new(&settings(&server.uri()), "sk-test").unwrap();
        let answer = relay.complete(&transcript()).await.unwrap();
        assert_eq!(answer, "answer");
    }

    #[tokio::test]
    async fn complete_maps_api_failure() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(401).set_body_json(serde_json::json!({
                "error": {"message": "Incorrect API key provided"}
            })))
            .mount(&server)
            .await;

        let relay = OpenAiRelay::new(&settings(&server.uri()), "bad").unwrap();
        let err = relay.complete(&transcript()).await.unwrap_err();
        match err {
            RelayError::Api { status, message } => {
                assert_eq!(status, 401);
                assert_eq!(message, "Incorrect API key provided");
            }
            other => panic!("Expected Api error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn complete_without_choices_is_decode_error() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"choices": []})))
            .mount(&server)
            .await;

        let relay = OpenAiRelay::new(&settings(&server.uri()), "k").unwrap();
        assert!(matches!(
            relay.complete(&transcript()).await,
            Err(RelayError::Decode(_))
        ));
    }

    #[tokio::test]
    async fn complete_unreachable_service_is_transport_error() {
        let relay = OpenAiRelay::new(&settings("http://127.0.0.1:9"), "k").unwrap();
        assert!(matches!(
            relay.complete(&transcript()).await,
            Err(RelayError::Transport(_))
        ));
    }

    #[tokio::test]
    async fn complete_streaming_yields_fragments_in_order() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .and(body_partial_json(serde_json::json!({"stream": true})))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("content-type", "text/event-stream")
                    .set_body_string(sse_body(&["Hel", "lo", " there"])),
            )
            .mount(&server)
            .await;

        let relay = OpenAiRelay::new(&settings(&server.uri()), "k").unwrap();
        let stream = relay.complete_streaming(&transcript()).await.unwrap();
        let fragments: Vec<String> = stream.map(Result::unwrap).collect().await;
        assert_eq!(fragments, vec!["Hel", "lo", " there"]);
    }

    #[tokio::test]
    async fn complete_streaming_truncated_body_ends_with_error() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("content-type", "text/event-stream")
                    .set_body_string("data: {\"choices\":[{\"delta\":{\"content\":\"par\"}}]}\n\n"),
            )
            .mount(&server)
            .await;

        let relay = OpenAiRelay::new(&settings(&server.uri()), "k").unwrap();
        let items: Vec<_> = relay
            .complete_streaming(&transcript())
            .await
            .unwrap()
            .collect()
            .await;
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].as_ref().unwrap(), "par");
        assert!(matches!(items[1], Err(RelayError::Truncated)));
    }

    #[tokio::test]
    async fn complete_streaming_rejected_before_first_fragment() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
            .mount(&server)
            .await;

        let relay = OpenAiRelay::new(&settings(&server.uri()), "k").unwrap();
        match relay.complete_streaming(&transcript()).await {
            Err(RelayError::Api { status, message }) => {
                assert_eq!(status, 500);
                assert_eq!(message, "boom");
            }
            Err(other) => panic!("Expected Api error, got {:?}", other),
            Ok(_) => panic!("Expected Api error, got a stream"),
        }
    }
}
