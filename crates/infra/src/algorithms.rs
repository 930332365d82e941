//! Read-only access to the host application's `algorithms` table.

use std::sync::Arc;

use serde_json::Value as JsonValue;
use sqlx::{PgPool, Row};
use tracing::instrument;

use bioforge_ai::{AiError, AlgorithmSource, AlgorithmSummary};
use bioforge_core::AlgorithmId;

/// [`AlgorithmSource`] over a table with at least `id`, `name`,
/// `description` and a nullable `inspiration` column.
#[derive(Debug, Clone)]
pub struct PostgresAlgorithmSource {
    pool: Arc<PgPool>,
    query: String,
}

impl PostgresAlgorithmSource {
    pub fn new(pool: PgPool) -> Self {
        Self::with_table(pool, "algorithms")
    }

    pub fn with_table(pool: PgPool, table: &str) -> Self {
        Self {
            pool: Arc::new(pool),
            query: format!(
                "SELECT id, name, description, inspiration FROM {table} WHERE id = $1"
            ),
        }
    }
}

#[async_trait::async_trait]
impl AlgorithmSource for PostgresAlgorithmSource {
    #[instrument(skip(self), fields(algorithm_id = %id), err)]
    async fn fetch(&self, id: AlgorithmId) -> Result<Option<AlgorithmSummary>, AiError> {
        let row = sqlx::query(&self.query)
            .bind(id.get())
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| AiError::Source(format!("algorithm lookup failed: {e}")))?;

        let Some(row) = row else {
            return Ok(None);
        };

        let read = |e: sqlx::Error| AiError::Source(format!("algorithm {id}: {e}"));
        Ok(Some(AlgorithmSummary {
            id: AlgorithmId::new(row.try_get("id").map_err(read)?),
            name: row.try_get("name").map_err(read)?,
            description: row.try_get::<Option<String>, _>("description").map_err(read)?.unwrap_or_default(),
            inspiration: row.try_get("inspiration").map_err(read)?,
            details: JsonValue::Null,
        }))
    }
}
