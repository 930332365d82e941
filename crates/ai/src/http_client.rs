//! HTTP adapter for OpenAI-compatible chat completion endpoints.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use tracing::{debug, instrument};

use crate::client::AiClient;
use crate::error::AiError;

/// Upper bound on error-body text kept in `AiError`s.
const MAX_ERROR_BODY: usize = 512;

/// Connection settings for [`HttpAiClient`].
#[derive(Debug, Clone)]
pub struct HttpAiConfig {
    /// Base URL up to and including the API version, e.g. `https://api.openai.com/v1`.
    pub base_url: String,
    pub api_key: Option<String>,
    pub model: String,
    pub temperature: f32,
    pub timeout: Duration,
}

impl Default for HttpAiConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.openai.com/v1".to_string(),
            api_key: None,
            model: "gpt-4o-mini".to_string(),
            temperature: 0.7,
            timeout: Duration::from_secs(120),
        }
    }
}

/// [`AiClient`] that talks to a `/chat/completions` endpoint.
#[derive(Debug, Clone)]
pub struct HttpAiClient {
    http: reqwest::Client,
    config: HttpAiConfig,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    temperature: f32,
    messages: Vec<ChatMessage>,
}

#[derive(Serialize)]
struct ChatMessage {
    role: &'static str,
    content: String,
}

#[derive(Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Deserialize)]
struct ChatChoiceMessage {
    content: Option<String>,
}

impl HttpAiClient {
    pub fn new(config: HttpAiConfig) -> Result<Self, AiError> {
        let http = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| AiError::Transport(e.to_string()))?;
        Ok(Self { http, config })
    }

    pub fn config(&self) -> &HttpAiConfig {
        &self.config
    }

    fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.config.base_url.trim_end_matches('/'))
    }
}

#[async_trait::async_trait]
impl AiClient for HttpAiClient {
    #[instrument(skip_all, fields(model = %self.config.model), err)]
    async fn generate_text(
        &self,
        system_prompt: &str,
        user_prompt: &str,
        schema_hint: Option<&JsonValue>,
    ) -> Result<String, AiError> {
        let body = ChatRequest {
            model: &self.config.model,
            temperature: self.config.temperature,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: system_with_hint(system_prompt, schema_hint),
                },
                ChatMessage {
                    role: "user",
                    content: user_prompt.to_string(),
                },
            ],
        };

        let mut request = self.http.post(self.endpoint()).json(&body);
        if let Some(key) = &self.config.api_key {
            request = request.bearer_auth(key);
        }

        let response = request
            .send()
            .await
            .map_err(|e| AiError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(classify_status(status.as_u16(), text));
        }

        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|e| AiError::InvalidResponse(e.to_string()))?;

        let content = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| AiError::InvalidResponse("response contained no message content".to_string()))?;

        debug!(chars = content.len(), "AI response received");
        Ok(content)
    }
}

fn system_with_hint(system_prompt: &str, schema_hint: Option<&JsonValue>) -> String {
    match schema_hint {
        Some(hint) => format!(
            "{system_prompt}\n\nRespond with JSON only, matching this shape:\n{hint}"
        ),
        None => system_prompt.to_string(),
    }
}

fn classify_status(status: u16, body: String) -> AiError {
    let body = truncate(body);
    match status {
        401 | 403 => AiError::Auth(body),
        429 => AiError::RateLimited(body),
        _ => AiError::Upstream { status, body },
    }
}

fn truncate(mut body: String) -> String {
    if body.len() > MAX_ERROR_BODY {
        let mut cut = MAX_ERROR_BODY;
        while !body.is_char_boundary(cut) {
            cut -= 1;
        }
        body.truncate(cut);
    }
    body
}
