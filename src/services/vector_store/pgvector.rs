//! PostgreSQL/pgvector backend.
//!
//! Expects a table with at least `content TEXT` and `embedding vector(N)`
//! columns. Optional `id` and `metadata JSONB` columns are surfaced as
//! document metadata when present.

use async_trait::async_trait;
use pgvector::Vector;
use serde_json::{Map, Value};
use sqlx::Row;
use sqlx::postgres::{PgConnectOptions, PgPool, PgPoolOptions, PgRow};
use std::str::FromStr;
use std::time::Duration;

use super::{VectorStore, validate_identifier};
use crate::error::VectorStoreError;
use crate::models::{Document, SearchParams, VectorStoreConfig};

/// Which optional columns the searched table has.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct TableColumns {
    has_id: bool,
    has_metadata: bool,
}

impl TableColumns {
    fn from_names(table_name: &str, names: &[String]) -> Result<Self, VectorStoreError> {
        if names.is_empty() {
            return Err(VectorStoreError::ConnectionError(format!(
                "table '{table_name}' does not exist"
            )));
        }

        let has = |column: &str| names.iter().any(|n| n == column);
        for required in ["content", "embedding"] {
            if !has(required) {
                return Err(VectorStoreError::SchemaMismatch(format!(
                    "table '{table_name}' has no '{required}' column"
                )));
            }
        }

        Ok(Self {
            has_id: has("id"),
            has_metadata: has("metadata"),
        })
    }
}

pub struct PgVectorBackend {
    pool: PgPool,
    table_name: String,
    columns: TableColumns,
}

impl PgVectorBackend {
    pub async fn new(config: &VectorStoreConfig, table_name: &str) -> Result<Self, VectorStoreError> {
        validate_identifier(table_name)?;

        let url = config
            .url
            .as_deref()
            .filter(|u| !u.is_empty())
            .ok_or_else(|| VectorStoreError::MissingCredential("vector store url".to_string()))?;

        let mut options = PgConnectOptions::from_str(url)
            .map_err(|e| VectorStoreError::ConnectionError(e.to_string()))?;
        if let Some(password) = config.api_key.as_deref().filter(|k| !k.is_empty()) {
            options = options.password(password);
        }

        let pool = PgPoolOptions::new()
            .max_connections(config.pool_max)
            .acquire_timeout(Duration::from_secs(config.pool_acquire_timeout.into()))
            .connect_with(options)
            .await
            .map_err(|e| VectorStoreError::ConnectionError(e.to_string()))?;

        check_pgvector_extension(&pool).await?;
        let names = table_column_names(&pool, table_name).await?;
        let columns = TableColumns::from_names(table_name, &names)?;

        Ok(Self {
            pool,
            table_name: table_name.to_string(),
            columns,
        })
    }

    fn search_sql(&self, params: &SearchParams) -> String {
        search_sql(&self.table_name, self.columns, params)
    }
}

fn search_sql(table_name: &str, columns: TableColumns, params: &SearchParams) -> String {
    let id = if columns.has_id {
        "id::text AS id"
    } else {
        "NULL::text AS id"
    };
    let metadata = if columns.has_metadata {
        "metadata"
    } else {
        "NULL::jsonb AS metadata"
    };
    let threshold = params
        .score_threshold
        .map(|score| format!("WHERE (1 - (embedding <=> $1)) >= {}", score))
        .unwrap_or_default();

    format!(
        r#"
        SELECT
            {},
            content,
            {},
            1 - (embedding <=> $1) AS score
        FROM {}
        {}
        ORDER BY embedding <=> $1
        LIMIT {}
        "#,
        id, metadata, table_name, threshold, params.k
    )
}

async fn check_pgvector_extension(pool: &PgPool) -> Result<(), VectorStoreError> {
    let result: Option<(String,)> =
        sqlx::query_as("SELECT extname FROM pg_extension WHERE extname = 'vector'")
            .fetch_optional(pool)
            .await
            .map_err(|e| VectorStoreError::PostgresError(e.to_string()))?;

    if result.is_none() {
        return Err(VectorStoreError::PgVectorExtensionError(
            "pgvector extension is not installed. Run: CREATE EXTENSION vector;".to_string(),
        ));
    }

    Ok(())
}

/// Column names of `table_name`, resolved the same way the search query
/// resolves it (schema qualification or the current search path).
async fn table_column_names(pool: &PgPool, table_name: &str) -> Result<Vec<String>, VectorStoreError> {
    let rows: Vec<(String,)> = sqlx::query_as(
        "SELECT attname::text FROM pg_attribute \
         WHERE attrelid = to_regclass($1::text) AND attnum > 0 AND NOT attisdropped",
    )
    .bind(table_name)
    .fetch_all(pool)
    .await
    .map_err(|e| VectorStoreError::PostgresError(e.to_string()))?;

    Ok(rows.into_iter().map(|(name,)| name).collect())
}

fn row_to_document(row: &PgRow) -> Document {
    let id: Option<String> = row.try_get("id").ok().flatten();
    let content: String = row.try_get("content").unwrap_or_default();
    let score: f64 = row.try_get("score").unwrap_or_default();
    let stored: Option<Value> = row.try_get("metadata").ok().flatten();

    let mut metadata = match stored {
        Some(Value::Object(map)) => map,
        _ => Map::new(),
    };
    if let Some(id) = id {
        metadata.insert("id".to_string(), Value::String(id));
    }
    metadata.insert("score".to_string(), Value::from(score));

    Document {
        page_content: content,
        metadata,
    }
}

#[async_trait]
impl VectorStore for PgVectorBackend {
    async fn health_check(&self) -> Result<bool, VectorStoreError> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map(|_| true)
            .map_err(|e| VectorStoreError::ConnectionError(e.to_string()))
    }

    async fn search(
        &self,
        query_vector: Vec<f32>,
        params: &SearchParams,
    ) -> Result<Vec<Document>, VectorStoreError> {
        let embedding = Vector::from(query_vector);
        let query = self.search_sql(params);

        let rows = sqlx::query(&query)
            .bind(&embedding)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| VectorStoreError::SearchError(e.to_string()))?;

        Ok(rows.iter().map(row_to_document).collect())
    }

    async fn search_batch(
        &self,
        query_vectors: Vec<Vec<f32>>,
        params: &SearchParams,
    ) -> Result<Vec<Vec<Document>>, VectorStoreError> {
        // PostgreSQL has no multi-query vector search; run them back to back
        // on one pooled connection so the batch stays a single unit.
        let query = self.search_sql(params);
        let mut conn = self
            .pool
            .acquire()
            .await
            .map_err(|e| VectorStoreError::ConnectionError(e.to_string()))?;

        let mut results = Vec::with_capacity(query_vectors.len());
        for vector in query_vectors {
            let embedding = Vector::from(vector);
            let rows = sqlx::query(&query)
                .bind(&embedding)
                .fetch_all(&mut *conn)
                .await
                .map_err(|e| VectorStoreError::SearchError(e.to_string()))?;
            results.push(rows.iter().map(row_to_document).collect());
        }

        Ok(results)
    }

    fn collection(&self) -> &str {
        &self.table_name
    }
}
