//! External text-generation capability.

use std::sync::Mutex;

use serde_json::Value as JsonValue;

use crate::error::AiError;

/// The external AI service, reduced to the one call processors need.
///
/// Implementations may fail on any I/O problem (network, auth, rate limits).
/// Prompt construction and model selection live with the caller.
#[async_trait::async_trait]
pub trait AiClient: Send + Sync + 'static {
    /// Generate free-form text for a system/user prompt pair.
    ///
    /// `schema_hint` describes the JSON shape the caller hopes to get back. It
    /// is advisory; the response must still go through the sanitizer.
    async fn generate_text(
        &self,
        system_prompt: &str,
        user_prompt: &str,
        schema_hint: Option<&JsonValue>,
    ) -> Result<String, AiError>;
}

/// A recorded call to an [`AiClient`].
#[derive(Debug, Clone, PartialEq)]
pub struct AiRequest {
    pub system_prompt: String,
    pub user_prompt: String,
    pub schema_hint: Option<JsonValue>,
}

type Responder = Box<dyn Fn(&AiRequest) -> Result<String, AiError> + Send + Sync>;

/// Canned-response client for tests and offline development.
pub struct ScriptedAiClient {
    responder: Responder,
    calls: Mutex<Vec<AiRequest>>,
}

impl ScriptedAiClient {
    pub fn new<F>(responder: F) -> Self
    where
        F: Fn(&AiRequest) -> Result<String, AiError> + Send + Sync + 'static,
    {
        Self {
            responder: Box::new(responder),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Always answer with the same text.
    pub fn always(text: impl Into<String>) -> Self {
        let text = text.into();
        Self::new(move |_| Ok(text.clone()))
    }

    /// Every call fails with a transport error carrying `message`.
    pub fn failing(message: impl Into<String>) -> Self {
        let message = message.into();
        Self::new(move |_| Err(AiError::Transport(message.clone())))
    }

    /// Calls received so far, oldest first.
    pub fn calls(&self) -> Vec<AiRequest> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }
}

impl core::fmt::Debug for ScriptedAiClient {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("ScriptedAiClient")
            .field("calls", &self.calls().len())
            .finish()
    }
}

#[async_trait::async_trait]
impl AiClient for ScriptedAiClient {
    async fn generate_text(
        &self,
        system_prompt: &str,
        user_prompt: &str,
        schema_hint: Option<&JsonValue>,
    ) -> Result<String, AiError> {
        let request = AiRequest {
            system_prompt: system_prompt.to_string(),
            user_prompt: user_prompt.to_string(),
            schema_hint: schema_hint.cloned(),
        };
        let answer = (self.responder)(&request);
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(request);
        }
        answer
    }
}
