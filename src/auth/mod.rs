//! Bearer API-key store.
//!
//! Consumers authenticate with `Authorization: Bearer <api-key>`; each key
//! carries an allowed-model list and a per-minute rate limit. The store is a
//! trait so the HTTP layer can be exercised without a database.

use async_trait::async_trait;
use thiserror::Error;

/// One API key with its permissions.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ApiKeyRecord {
    pub api_key: String,
    /// Comma-separated model names, or `*` for everything.
    pub allowed_models: String,
    /// Requests per minute; 0 or negative blocks the key outright.
    pub rpm: i32,
}

impl ApiKeyRecord {
    /// Whether this key may use `model`.
    pub fn allows_model(&self, model: &str) -> bool {
        if self.allowed_models.is_empty() || self.allowed_models == "*" {
            return true;
        }
        self.allowed_models
            .split(',')
            .any(|m| m.trim() == "*" || m.trim() == model)
    }
}

#[derive(Error, Debug)]
pub enum AuthError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Lookup interface for API keys.
#[async_trait]
pub trait KeyStore: Send + Sync + 'static {
    /// Fetch the record for a key; `None` means the key does not exist.
    async fn get(&self, key: &str) -> Result<Option<ApiKeyRecord>, AuthError>;
}

/// Postgres-backed key store.
pub struct PgKeyStore {
    pool: sqlx::PgPool,
}

impl PgKeyStore {
    pub async fn connect(database_url: &str) -> Result<Self, AuthError> {
        let pool = sqlx::PgPool::connect(database_url).await?;
        Ok(Self { pool })
    }

    /// Create the key table if this is a fresh database.
    pub async fn init_schema(&self) -> Result<(), AuthError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS api_keys (
                id SERIAL PRIMARY KEY,
                api_key VARCHAR(100) UNIQUE NOT NULL,
                allowed_models VARCHAR(255) NOT NULL DEFAULT '*',
                rpm INTEGER NOT NULL DEFAULT 60
            )
            "#,
        )
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[async_trait]
impl KeyStore for PgKeyStore {
    async fn get(&self, key: &str) -> Result<Option<ApiKeyRecord>, AuthError> {
        let record = sqlx::query_as::<_, ApiKeyRecord>(
            "SELECT api_key, allowed_models, rpm FROM api_keys WHERE api_key = $1",
        )
        .bind(key)
        .fetch_optional(&self.pool)
        .await?;
        Ok(record)
    }
}
