//! # Generation Backend
//!
//! The external vision/text capability behind every analysis turn. The
//! orchestrator only sees [`GenerationService`], which guards a
//! [`GenerationBackend`] with a circuit breaker and an upper time bound.
//! [`OpenAiBackend`] talks to any OpenAI-compatible chat-completions API.

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use crate::circuit_breaker::CircuitBreaker;
use crate::config::{BreakerConfig, GenerationConfig};
use crate::error::GenerationError;
use crate::photo;
use crate::session::{AnalysisKind, AnalysisSession, Role, Turn, TurnContent};

/// Everything the backend needs for one call
#[derive(Debug, Clone)]
pub struct GenerationRequest {
    pub user_id: i64,
    pub kind: AnalysisKind,
    /// Full role-tagged turn log, system instruction first
    pub turns: Vec<Turn>,
    /// Bytes for the `TurnContent::Image` turn, if any
    pub image: Option<Arc<Vec<u8>>>,
    pub max_tokens: u32,
}

impl GenerationRequest {
    pub fn from_session(session: &AnalysisSession, max_tokens: u32) -> Self {
        Self {
            user_id: session.user_id,
            kind: session.kind,
            turns: session.turns.clone(),
            image: Some(Arc::clone(&session.image)),
            max_tokens,
        }
    }
}

/// A vision/text generation capability
#[async_trait]
pub trait GenerationBackend: Send + Sync {
    async fn generate(&self, request: &GenerationRequest) -> Result<String, GenerationError>;
}

/// Breaker- and timeout-guarded access to a backend
pub struct GenerationService {
    backend: Arc<dyn GenerationBackend>,
    breaker: CircuitBreaker,
    timeout: Duration,
}

impl GenerationService {
    pub fn new(backend: Arc<dyn GenerationBackend>, breaker: BreakerConfig, timeout: Duration) -> Self {
        Self {
            backend,
            breaker: CircuitBreaker::new(breaker),
            timeout,
        }
    }

    pub fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    /// Run one generation call
    ///
    /// Timeouts, transport errors and blank replies all count as failures
    /// for the breaker.
    pub async fn generate(&self, request: &GenerationRequest) -> Result<String, GenerationError> {
        if self.breaker.is_open() {
            warn!(user_id = request.user_id, "Generation skipped, circuit breaker open");
            return Err(GenerationError::CircuitOpen);
        }

        debug!(
            user_id = request.user_id,
            kind = %request.kind,
            turns = request.turns.len(),
            "Calling generation backend"
        );

        let result = match tokio::time::timeout(self.timeout, self.backend.generate(request)).await {
            Err(_) => Err(GenerationError::Timeout(self.timeout.as_secs())),
            Ok(Ok(text)) if text.trim().is_empty() => Err(GenerationError::EmptyResponse),
            Ok(other) => other,
        };

        match &result {
            Ok(text) => {
                self.breaker.record_success();
                info!(user_id = request.user_id, chars = text.len(), "Generation completed");
            }
            Err(e) => {
                self.breaker.record_failure();
                error!(user_id = request.user_id, error = %e, "Generation failed");
            }
        }
        result
    }
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    messages: Vec<ChatMessage>,
}

#[derive(Debug, Serialize)]
struct ChatMessage {
    role: &'static str,
    content: MessageContent,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
enum MessageContent {
    Text(String),
    Parts(Vec<ContentPart>),
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ContentPart {
    Text { text: String },
    ImageUrl { image_url: ImageUrl },
}

#[derive(Debug, Serialize)]
struct ImageUrl {
    url: String,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    #[serde(default)]
    content: Option<String>,
}

fn role_name(role: Role) -> &'static str {
    match role {
        Role::System => "system",
        Role::User => "user",
        Role::Assistant => "assistant",
    }
}

/// Translate the turn log into chat-completions messages
fn build_messages(request: &GenerationRequest) -> Result<Vec<ChatMessage>, GenerationError> {
    request
        .turns
        .iter()
        .map(|turn| {
            let content = match &turn.content {
                TurnContent::Text(text) => MessageContent::Text(text.clone()),
                TurnContent::Image { caption } => {
                    let bytes = request
                        .image
                        .as_deref()
                        .filter(|b| !b.is_empty())
                        .ok_or_else(|| GenerationError::ImageDecode("session has no image".to_string()))?;
                    let url = format!("data:{};base64,{}", photo::mime_type(bytes), STANDARD.encode(bytes));

                    let mut text = "Here is a photo of my meal.".to_string();
                    if let Some(caption) = caption.as_deref().filter(|c| !c.trim().is_empty()) {
                        text.push_str(&format!(" My note: {}", caption.trim()));
                    }
                    MessageContent::Parts(vec![
                        ContentPart::Text { text },
                        ContentPart::ImageUrl {
                            image_url: ImageUrl { url },
                        },
                    ])
                }
            };
            Ok(ChatMessage {
                role: role_name(turn.role),
                content,
            })
        })
        .collect()
}

/// OpenAI-compatible chat-completions client
pub struct OpenAiBackend {
    client: reqwest::Client,
    config: GenerationConfig,
}

impl OpenAiBackend {
    pub fn new(config: GenerationConfig) -> Result<Self, GenerationError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| GenerationError::Request(e.to_string()))?;
        Ok(Self { client, config })
    }

    fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.config.api_base.trim_end_matches('/'))
    }
}

#[async_trait]
impl GenerationBackend for OpenAiBackend {
    async fn generate(&self, request: &GenerationRequest) -> Result<String, GenerationError> {
        let body = ChatRequest {
            model: &self.config.model,
            max_tokens: request.max_tokens,
            messages: build_messages(request)?,
        };

        let response = self
            .client
            .post(self.endpoint())
            .bearer_auth(&self.config.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    GenerationError::Timeout(self.config.timeout_secs)
                } else {
                    GenerationError::Request(e.to_string())
                }
            })?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(GenerationError::Api { status, body });
        }

        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|e| GenerationError::Request(format!("malformed response: {e}")))?;

        parsed
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .map(|text| text.trim().to_string())
            .filter(|text| !text.is_empty())
            .ok_or(GenerationError::EmptyResponse)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(image: Option<Vec<u8>>) -> GenerationRequest {
        GenerationRequest {
            user_id: 1,
            kind: AnalysisKind::Nutrition,
            turns: vec![
                Turn::system("be helpful"),
                Turn {
                    role: Role::User,
                    content: TurnContent::Image {
                        caption: Some("pasta".to_string()),
                    },
                },
                Turn::user("how many calories?"),
            ],
            image: image.map(Arc::new),
            max_tokens: 1200,
        }
    }

    #[test]
    fn test_messages_serialize_as_chat_completions() {
        let png = vec![0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A];
        let messages = build_messages(&request(Some(png))).unwrap();
        let json = serde_json::to_value(&messages).unwrap();

        assert_eq!(json[0]["role"], "system");
        assert_eq!(json[0]["content"], "be helpful");
        assert_eq!(json[1]["content"][0]["type"], "text");
        assert!(json[1]["content"][0]["text"]
            .as_str()
            .unwrap()
            .contains("pasta"));
        assert_eq!(json[1]["content"][1]["type"], "image_url");
        assert!(json[1]["content"][1]["image_url"]["url"]
            .as_str()
            .unwrap()
            .starts_with("data:image/png;base64,"));
        assert_eq!(json[2]["role"], "user");
    }

    #[test]
    fn test_missing_image_is_decode_error() {
        assert!(matches!(
            build_messages(&request(None)),
            Err(GenerationError::ImageDecode(_))
        ));
    }

    #[test]
    fn test_response_parsing_tolerates_missing_content() {
        let parsed: ChatResponse =
            serde_json::from_str(r#"{"choices":[{"message":{"role":"assistant"}}]}"#).unwrap();
        assert!(parsed.choices[0].message.content.is_none());

        let parsed: ChatResponse = serde_json::from_str(r#"{"id":"x"}"#).unwrap();
        assert!(parsed.choices.is_empty());
    }
}
