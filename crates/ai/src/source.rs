//! Read access to stored algorithms referenced by job inputs.

use std::collections::HashMap;
use std::sync::RwLock;

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use bioforge_core::AlgorithmId;

use crate::error::AiError;

/// The parts of a stored algorithm that processors feed to the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AlgorithmSummary {
    pub id: AlgorithmId,
    pub name: String,
    pub description: String,
    #[serde(default)]
    pub inspiration: Option<String>,
    /// Free-form structured body (steps, parameters, pseudocode, ...).
    #[serde(default)]
    pub details: JsonValue,
}

impl AlgorithmSummary {
    pub fn new(id: AlgorithmId, name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            description: description.into(),
            inspiration: None,
            details: JsonValue::Null,
        }
    }

    pub fn with_details(mut self, details: JsonValue) -> Self {
        self.details = details;
        self
    }
}

/// Lookup of algorithms owned by the surrounding application.
#[async_trait::async_trait]
pub trait AlgorithmSource: Send + Sync + 'static {
    async fn fetch(&self, id: AlgorithmId) -> Result<Option<AlgorithmSummary>, AiError>;
}

/// In-memory algorithm catalogue for tests/dev.
#[derive(Debug, Default)]
pub struct InMemoryAlgorithmSource {
    inner: RwLock<HashMap<AlgorithmId, AlgorithmSummary>>,
}

impl InMemoryAlgorithmSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(algorithms: impl IntoIterator<Item = AlgorithmSummary>) -> Self {
        let source = Self::new();
        for a in algorithms {
            source.insert(a);
        }
        source
    }

    pub fn insert(&self, algorithm: AlgorithmSummary) {
        if let Ok(mut inner) = self.inner.write() {
            inner.insert(algorithm.id, algorithm);
        }
    }
}

#[async_trait::async_trait]
impl AlgorithmSource for InMemoryAlgorithmSource {
    async fn fetch(&self, id: AlgorithmId) -> Result<Option<AlgorithmSummary>, AiError> {
        let inner = self
            .inner
            .read()
            .map_err(|_| AiError::Source("algorithm catalogue lock poisoned".to_string()))?;
        Ok(inner.get(&id).cloned())
    }
}
