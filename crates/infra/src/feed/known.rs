//! The Known-Record Set: canonical URLs of acts already ingested.

use std::collections::HashSet;
use std::sync::RwLock;

use async_trait::async_trait;
use sqlx::{PgPool, Row};

use vigil_compliance::canonical_url;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum KnownRecordsError {
    #[error("known-record set unavailable: {0}")]
    Unavailable(String),
    #[error("known-record set error: {0}")]
    Storage(String),
}

/// Read-only view of already-ingested records.
#[async_trait]
pub trait KnownRecords: Send + Sync {
    /// Every known URL, in canonical form.
    async fn known_urls(&self) -> Result<HashSet<String>, KnownRecordsError>;
}

#[derive(Debug, Default)]
pub struct InMemoryKnownRecords {
    urls: RwLock<HashSet<String>>,
}

impl InMemoryKnownRecords {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_urls<I, S>(urls: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let urls = urls.into_iter().map(|u| canonical_url(u.as_ref())).collect();
        Self {
            urls: RwLock::new(urls),
        }
    }

    /// Mark a URL as ingested.
    pub fn insert(&self, url: &str) -> Result<(), KnownRecordsError> {
        let mut urls = self
            .urls
            .write()
            .map_err(|_| KnownRecordsError::Storage("lock poisoned".to_string()))?;
        urls.insert(canonical_url(url));
        Ok(())
    }
}

#[async_trait]
impl KnownRecords for InMemoryKnownRecords {
    async fn known_urls(&self) -> Result<HashSet<String>, KnownRecordsError> {
        self.urls
            .read()
            .map(|urls| urls.clone())
            .map_err(|_| KnownRecordsError::Storage("lock poisoned".to_string()))
    }
}

/// Reads `source_url` from the `legal_records` table.
///
/// The whole set is fetched in one query and diffed in memory, which is
/// fine at feed volume.
#[derive(Debug, Clone)]
pub struct PostgresKnownRecords {
    pool: PgPool,
}

impl PostgresKnownRecords {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl KnownRecords for PostgresKnownRecords {
    #[tracing::instrument(skip(self), err)]
    async fn known_urls(&self) -> Result<HashSet<String>, KnownRecordsError> {
        let rows = sqlx::query("SELECT source_url FROM legal_records WHERE source_url IS NOT NULL")
            .fetch_all(&self.pool)
            .await
            .map_err(map_sqlx_error)?;

        rows.iter()
            .map(|row| {
                row.try_get::<String, _>("source_url")
                    .map(|url| canonical_url(&url))
                    .map_err(map_sqlx_error)
            })
            .collect()
    }
}

fn map_sqlx_error(err: sqlx::Error) -> KnownRecordsError {
    match err {
        sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) => {
            KnownRecordsError::Unavailable(err.to_string())
        }
        other => KnownRecordsError::Storage(other.to_string()),
    }
}
