//! OpenRouter chat-completions client.

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::{debug, instrument};

use studyforge_shared::{OpenRouterConfig, Result, StudyForgeError, excerpt};

use crate::{GenerationRequest, TextGenerator};

const USER_AGENT: &str = concat!("studyforge/", env!("CARGO_PKG_VERSION"));
const APP_TITLE: &str = "StudyForge";

#[derive(Debug, Deserialize)]
struct CompletionResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: Message,
}

#[derive(Debug, Deserialize)]
struct Message {
    content: Option<String>,
}

/// [`TextGenerator`] backed by the OpenRouter HTTP API.
#[derive(Debug, Clone)]
pub struct OpenRouterClient {
    client: Client,
    endpoint: String,
    api_key: String,
    model: String,
}

impl OpenRouterClient {
    /// Build a client from config and an already-resolved API key.
    pub fn new(config: &OpenRouterConfig, api_key: impl Into<String>) -> Result<Self> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .timeout(std::time::Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| {
                StudyForgeError::UpstreamUnavailable(format!("failed to build HTTP client: {e}"))
            })?;

        Ok(Self {
            client,
            endpoint: format!("{}/chat/completions", config.base_url.trim_end_matches('/')),
            api_key: api_key.into(),
            model: config.default_model.clone(),
        })
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    fn request_body(&self, request: &GenerationRequest) -> Value {
        let content = match &request.image {
            None => json!(request.prompt),
            Some(image) => json!([
                { "type": "text", "text": request.prompt },
                { "type": "image_url", "image_url": { "url": image.data_url() } },
            ]),
        };

        json!({
            "model": self.model,
            "messages": [{ "role": "user", "content": content }],
        })
    }
}

#[async_trait]
impl TextGenerator for OpenRouterClient {
    #[instrument(skip_all, fields(model = %self.model, multimodal = request.image.is_some()))]
    async fn generate(&self, request: &GenerationRequest) -> Result<String> {
        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .header("X-Title", APP_TITLE)
            .json(&self.request_body(request))
            .send()
            .await
            .map_err(|e| StudyForgeError::UpstreamUnavailable(format!("request failed: {e}")))?;

        let status = response.status();
        let body = response.text().await.map_err(|e| {
            StudyForgeError::UpstreamUnavailable(format!("failed to read response body: {e}"))
        })?;

        if !status.is_success() {
            return Err(StudyForgeError::UpstreamUnavailable(format!(
                "HTTP {status}: {}",
                excerpt(&body)
            )));
        }

        let parsed: CompletionResponse = serde_json::from_str(&body).map_err(|e| {
            StudyForgeError::UpstreamUnavailable(format!("malformed completion response: {e}"))
        })?;

        let text = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .filter(|t| !t.trim().is_empty())
            .ok_or_else(|| StudyForgeError::UpstreamUnavailable("empty completion".into()))?;

        debug!(chars = text.len(), "completion received");
        Ok(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ImageInput;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client_for(server: &MockServer) -> OpenRouterClient {
        let config = OpenRouterConfig {
            base_url: format!("{}/api/v1/", server.uri()),
            ..OpenRouterConfig::default()
        };
        OpenRouterClient::new(&config, "test-key").unwrap()
    }

    fn completion(text: &str) -> Value {
        json!({ "choices": [{ "message": { "role": "assistant", "content": text } }] })
    }

    #[tokio::test]
    async fn returns_first_choice_text() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/v1/chat/completions"))
            .and(header("authorization", "Bearer test-key"))
            .respond_with(ResponseTemplate::new(200).set_body_json(completion("## 1. Core Concepts")))
            .expect(1)
            .mount(&server)
            .await;

        let text = client_for(&server)
            .generate(&GenerationRequest::text("summarise"))
            .await
            .unwrap();
        assert_eq!(text, "## 1. Core Concepts");
    }

    #[tokio::test]
    async fn image_is_sent_as_data_url() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/v1/chat/completions"))
            .and(body_partial_json(json!({
                "messages": [{
                    "role": "user",
                    "content": [
                        { "type": "text", "text": "describe" },
                        { "type": "image_url", "image_url": { "url": "data:image/png;base64,iVBOR" } },
                    ]
                }]
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(completion("a diagram")))
            .expect(1)
            .mount(&server)
            .await;

        let request = GenerationRequest::with_image(
            "describe",
            ImageInput {
                mime_type: "image/png".into(),
                base64: "iVBOR".into(),
            },
        );
        let text = client_for(&server).generate(&request).await.unwrap();
        assert_eq!(text, "a diagram");
    }

    #[tokio::test]
    async fn server_error_is_upstream_unavailable() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503).set_body_string("overloaded"))
            .mount(&server)
            .await;

        let err = client_for(&server)
            .generate(&GenerationRequest::text("x"))
            .await
            .unwrap_err();
        match err {
            StudyForgeError::UpstreamUnavailable(msg) => {
                assert!(msg.contains("503"));
                assert!(msg.contains("overloaded"));
            }
            other => panic!("expected UpstreamUnavailable, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn empty_choices_are_rejected() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "choices": [] })))
            .mount(&server)
            .await;

        let err = client_for(&server)
            .generate(&GenerationRequest::text("x"))
            .await
            .unwrap_err();
        assert!(matches!(err, StudyForgeError::UpstreamUnavailable(_)));
        assert!(!err.is_retryable());
    }
}
