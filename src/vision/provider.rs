use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::ApiError;
use crate::config::{VisionConfig, VisionProviderType};

/// Longest slice of an error body kept in [`ApiError::Status`].
const MAX_BODY_CHARS: usize = 300;

/// A multimodal model endpoint. One call is one request; no retries.
pub trait VisionProvider: Send + Sync {
    /// Send a base64 JPEG and an instruction, returning the model's reply text.
    fn complete(&self, image_base64: &str, prompt: &str) -> Result<String, ApiError>;

    /// Get the provider name for display
    fn provider_name(&self) -> &'static str;
}

fn build_agent(timeout: Duration) -> ureq::Agent {
    ureq::AgentBuilder::new().timeout(timeout).build()
}

fn send_json<T: Serialize>(
    agent: &ureq::Agent,
    url: &str,
    api_key: Option<&str>,
    body: &T,
    timeout: Duration,
) -> Result<ureq::Response, ApiError> {
    let mut req = agent.post(url).set("Content-Type", "application/json");
    if let Some(api_key) = api_key {
        req = req.set("Authorization", &format!("Bearer {}", api_key));
    }
    req.send_json(body).map_err(|e| map_ureq_error(e, timeout))
}

fn map_ureq_error(err: ureq::Error, timeout: Duration) -> ApiError {
    match err {
        ureq::Error::Status(code, response) => {
            let body = response.into_string().unwrap_or_default();
            ApiError::Status {
                code,
                body: body.chars().take(MAX_BODY_CHARS).collect(),
            }
        }
        ureq::Error::Transport(transport) => {
            if is_timeout(&transport) {
                ApiError::Timeout(timeout)
            } else {
                ApiError::Transport(transport.to_string())
            }
        }
    }
}

fn is_timeout(transport: &ureq::Transport) -> bool {
    use std::error::Error as _;
    transport
        .source()
        .and_then(|s| s.downcast_ref::<std::io::Error>())
        .map(|e| {
            matches!(
                e.kind(),
                std::io::ErrorKind::TimedOut | std::io::ErrorKind::WouldBlock
            )
        })
        .unwrap_or(false)
}

// ============================================================================
// OpenAI-compatible provider (works with OpenAI, LM Studio and compatible APIs)
// ============================================================================

pub struct OpenAICompatibleProvider {
    endpoint: String,
    model: String,
    api_key: Option<String>,
    timeout: Duration,
    agent: ureq::Agent,
}

#[derive(Debug, Serialize)]
struct OpenAIChatRequest {
    model: String,
    messages: Vec<OpenAIMessage>,
    max_tokens: u32,
    temperature: f32,
}

#[derive(Debug, Serialize)]
struct OpenAIMessage {
    role: String,
    content: Vec<OpenAIContentPart>,
}

#[derive(Debug, Serialize)]
#[serde(tag = "type")]
enum OpenAIContentPart {
    #[serde(rename = "text")]
    Text { text: String },
    #[serde(rename = "image_url")]
    ImageUrl { image_url: ImageUrl },
}

#[derive(Debug, Serialize)]
struct ImageUrl {
    url: String,
}

#[derive(Debug, Deserialize)]
struct OpenAIChatResponse {
    #[serde(default)]
    choices: Vec<OpenAIChoice>,
}

#[derive(Debug, Deserialize)]
struct OpenAIChoice {
    message: OpenAIResponseMessage,
}

#[derive(Debug, Deserialize)]
struct OpenAIResponseMessage {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    refusal: Option<String>,
}

impl OpenAICompatibleProvider {
    pub fn new(endpoint: &str, model: &str, api_key: Option<&str>, timeout: Duration) -> Self {
        Self {
            endpoint: endpoint.trim_end_matches('/').to_string(),
            model: model.to_string(),
            api_key: api_key.map(|s| s.to_string()),
            timeout,
            agent: build_agent(timeout),
        }
    }
}

impl VisionProvider for OpenAICompatibleProvider {
    fn complete(&self, image_base64: &str, prompt: &str) -> Result<String, ApiError> {
        let request = OpenAIChatRequest {
            model: self.model.clone(),
            messages: vec![OpenAIMessage {
                role: "user".to_string(),
                content: vec![
                    OpenAIContentPart::Text {
                        text: prompt.to_string(),
                    },
                    OpenAIContentPart::ImageUrl {
                        image_url: ImageUrl {
                            url: format!("data:image/jpeg;base64,{}", image_base64),
                        },
                    },
                ],
            }],
            max_tokens: 1000,
            temperature: 0.3,
        };

        let url = format!("{}/chat/completions", self.endpoint);
        let response = send_json(
            &self.agent,
            &url,
            self.api_key.as_deref(),
            &request,
            self.timeout,
        )?;

        let chat_response: OpenAIChatResponse = response
            .into_json()
            .map_err(|e| ApiError::Parse(format!("chat completion body: {}", e)))?;

        let message = chat_response
            .choices
            .into_iter()
            .next()
            .map(|c| c.message)
            .ok_or_else(|| ApiError::Refusal("no choices in response".to_string()))?;

        if let Some(refusal) = message.refusal.filter(|r| !r.trim().is_empty()) {
            return Err(ApiError::Refusal(refusal));
        }

        match message.content {
            Some(content) if !content.trim().is_empty() => Ok(content),
            _ => Err(ApiError::Refusal("empty content".to_string())),
        }
    }

    fn provider_name(&self) -> &'static str {
        "openai"
    }
}

// ============================================================================
// Qwen provider (DashScope multimodal generation)
// ============================================================================

pub struct QwenProvider {
    endpoint: String,
    model: String,
    api_key: String,
    timeout: Duration,
    agent: ureq::Agent,
}

#[derive(Debug, Serialize)]
struct QwenRequest {
    model: String,
    input: QwenInput,
    parameters: QwenParameters,
}

#[derive(Debug, Serialize)]
struct QwenInput {
    messages: Vec<QwenMessage>,
}

#[derive(Debug, Serialize)]
struct QwenMessage {
    role: String,
    content: Vec<QwenContentPart>,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
enum QwenContentPart {
    Image { image: String },
    Text { text: String },
}

#[derive(Debug, Serialize)]
struct QwenParameters {
    max_tokens: u32,
    temperature: f32,
}

#[derive(Debug, Deserialize)]
struct QwenResponse {
    output: Option<QwenOutput>,
    #[serde(default)]
    message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct QwenOutput {
    #[serde(default)]
    choices: Vec<QwenChoice>,
}

#[derive(Debug, Deserialize)]
struct QwenChoice {
    message: QwenResponseMessage,
}

#[derive(Debug, Deserialize)]
struct QwenResponseMessage {
    #[serde(default)]
    content: serde_json::Value,
}

impl QwenProvider {
    pub fn new(endpoint: &str, model: &str, api_key: &str, timeout: Duration) -> Self {
        Self {
            endpoint: endpoint.trim_end_matches('/').to_string(),
            model: model.to_string(),
            api_key: api_key.to_string(),
            timeout,
            agent: build_agent(timeout),
        }
    }
}

/// Qwen replies carry either a plain string or a list of `{"text": ...}` parts.
fn qwen_content_text(content: &serde_json::Value) -> String {
    match content {
        serde_json::Value::String(s) => s.clone(),
        serde_json::Value::Array(parts) => parts
            .iter()
            .filter_map(|p| p.get("text").and_then(|t| t.as_str()))
            .collect::<Vec<_>>()
            .join(""),
        _ => String::new(),
    }
}

impl VisionProvider for QwenProvider {
    fn complete(&self, image_base64: &str, prompt: &str) -> Result<String, ApiError> {
        let request = QwenRequest {
            model: self.model.clone(),
            input: QwenInput {
                messages: vec![QwenMessage {
                    role: "user".to_string(),
                    content: vec![
                        QwenContentPart::Image {
                            image: format!("data:image/jpeg;base64,{}", image_base64),
                        },
                        QwenContentPart::Text {
                            text: prompt.to_string(),
                        },
                    ],
                }],
            },
            parameters: QwenParameters {
                max_tokens: 1000,
                temperature: 0.3,
            },
        };

        let url = format!(
            "{}/services/aigc/multimodal-generation/generation",
            self.endpoint
        );
        let response = send_json(
            &self.agent,
            &url,
            Some(&self.api_key),
            &request,
            self.timeout,
        )?;

        let qwen_response: QwenResponse = response
            .into_json()
            .map_err(|e| ApiError::Parse(format!("generation body: {}", e)))?;

        let Some(choice) = qwen_response
            .output
            .and_then(|o| o.choices.into_iter().next())
        else {
            let reason = qwen_response
                .message
                .unwrap_or_else(|| "no choices in response".to_string());
            return Err(ApiError::Refusal(reason));
        };

        let text = qwen_content_text(&choice.message.content);
        if text.trim().is_empty() {
            return Err(ApiError::Refusal("empty content".to_string()));
        }
        Ok(text)
    }

    fn provider_name(&self) -> &'static str {
        "qwen"
    }
}

/// Create a provider based on configuration. `None` when no provider is
/// selected or the selected one lacks credentials.
pub fn create_provider(config: &VisionConfig) -> Option<Box<dyn VisionProvider>> {
    if !config.is_available() {
        return None;
    }

    let endpoint = config.resolved_endpoint();
    let model = config.resolved_model();
    let timeout = config.timeout();

    match config.provider {
        VisionProviderType::OpenAI => Some(Box::new(OpenAICompatibleProvider::new(
            &endpoint,
            &model,
            config.resolved_api_key().as_deref(),
            timeout,
        ))),
        VisionProviderType::Qwen => {
            let api_key = config.resolved_api_key()?;
            Some(Box::new(QwenProvider::new(
                &endpoint, &model, &api_key, timeout,
            )))
        }
        VisionProviderType::None => None,
    }
}
