//! Read access to compliance records.

use std::collections::HashMap;
use std::sync::{LazyLock, RwLock};

use async_trait::async_trait;
use chrono::NaiveDate;
use regex::Regex;
use sqlx::{PgPool, Row};
use uuid::Uuid;

use vigil_compliance::{ComplianceRecord, RecordKind};
use vigil_core::OrgId;

/// Record source error.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RecordSourceError {
    #[error("record source unavailable: {0}")]
    Unavailable(String),
    #[error("record source error: {0}")]
    Storage(String),
}

/// Where handlers look records up.
#[async_trait]
pub trait RecordSource: Send + Sync {
    /// Fetch one record. `Ok(None)` when it does not exist.
    async fn fetch(
        &self,
        kind: RecordKind,
        id: &str,
    ) -> Result<Option<ComplianceRecord>, RecordSourceError>;

    /// All records of a kind, optionally restricted to one organization.
    async fn list(
        &self,
        kind: RecordKind,
        org_id: Option<OrgId>,
    ) -> Result<Vec<ComplianceRecord>, RecordSourceError>;
}

/// In-memory record source for tests/dev.
#[derive(Debug, Default)]
pub struct InMemoryRecordSource {
    records: RwLock<HashMap<(RecordKind, String), ComplianceRecord>>,
}

impl InMemoryRecordSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_records(records: impl IntoIterator<Item = ComplianceRecord>) -> Self {
        let records = records
            .into_iter()
            .map(|r| ((r.kind, r.id.clone()), r))
            .collect();
        Self {
            records: RwLock::new(records),
        }
    }

    /// Add or replace a record.
    pub fn insert(&self, record: ComplianceRecord) -> Result<(), RecordSourceError> {
        let mut records = self
            .records
            .write()
            .map_err(|_| RecordSourceError::Storage("lock poisoned".to_string()))?;
        records.insert((record.kind, record.id.clone()), record);
        Ok(())
    }
}

#[async_trait]
impl RecordSource for InMemoryRecordSource {
    async fn fetch(
        &self,
        kind: RecordKind,
        id: &str,
    ) -> Result<Option<ComplianceRecord>, RecordSourceError> {
        let records = self
            .records
            .read()
            .map_err(|_| RecordSourceError::Storage("lock poisoned".to_string()))?;
        Ok(records.get(&(kind, id.to_string())).cloned())
    }

    async fn list(
        &self,
        kind: RecordKind,
        org_id: Option<OrgId>,
    ) -> Result<Vec<ComplianceRecord>, RecordSourceError> {
        let records = self
            .records
            .read()
            .map_err(|_| RecordSourceError::Storage("lock poisoned".to_string()))?;
        let mut out: Vec<ComplianceRecord> = records
            .values()
            .filter(|r| r.kind == kind)
            .filter(|r| org_id.is_none_or(|org| r.org_id == org))
            .cloned()
            .collect();
        out.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(out)
    }
}

static IDENTIFIER_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*(\.[A-Za-z_][A-Za-z0-9_]*)?$").expect("valid identifier regex")
});

/// Postgres record source.
///
/// Reads `(id, org_id, kind, label, expires_at)` from a table or view, by
/// default `compliance_records`.
#[derive(Debug, Clone)]
pub struct PostgresRecordSource {
    pool: PgPool,
    relation: String,
}

impl PostgresRecordSource {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            relation: "compliance_records".to_string(),
        }
    }

    /// Read from a different table or view (`name` or `schema.name`).
    pub fn with_relation(pool: PgPool, relation: &str) -> Result<Self, RecordSourceError> {
        validate_relation(relation)?;
        Ok(Self {
            pool,
            relation: relation.to_string(),
        })
    }

    fn map_row(row: &sqlx::postgres::PgRow) -> Result<ComplianceRecord, RecordSourceError> {
        let kind: String = row.try_get("kind").map_err(map_sqlx_error)?;
        let org_id: Uuid = row.try_get("org_id").map_err(map_sqlx_error)?;
        let expires_at: Option<NaiveDate> = row.try_get("expires_at").map_err(map_sqlx_error)?;
        Ok(ComplianceRecord {
            id: row.try_get("id").map_err(map_sqlx_error)?,
            org_id: OrgId::from_uuid(org_id),
            kind: kind
                .parse()
                .map_err(|e: vigil_core::DomainError| RecordSourceError::Storage(e.to_string()))?,
            label: row.try_get("label").map_err(map_sqlx_error)?,
            expires_at,
        })
    }
}

#[async_trait]
impl RecordSource for PostgresRecordSource {
    async fn fetch(
        &self,
        kind: RecordKind,
        id: &str,
    ) -> Result<Option<ComplianceRecord>, RecordSourceError> {
        let sql = format!(
            "SELECT id, org_id, kind, label, expires_at FROM {} WHERE kind = $1 AND id = $2",
            self.relation
        );
        let row = sqlx::query(&sql)
            .bind(kind.as_str())
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(map_sqlx_error)?;
        row.as_ref().map(Self::map_row).transpose()
    }

    async fn list(
        &self,
        kind: RecordKind,
        org_id: Option<OrgId>,
    ) -> Result<Vec<ComplianceRecord>, RecordSourceError> {
        let sql = format!(
            "SELECT id, org_id, kind, label, expires_at FROM {} \
             WHERE kind = $1 AND ($2::UUID IS NULL OR org_id = $2) ORDER BY id",
            self.relation
        );
        let rows = sqlx::query(&sql)
            .bind(kind.as_str())
            .bind(org_id.map(|o| *o.as_uuid()))
            .fetch_all(&self.pool)
            .await
            .map_err(map_sqlx_error)?;
        rows.iter().map(Self::map_row).collect()
    }
}

/// Relation names are interpolated into SQL, so only plain identifiers pass.
pub fn validate_relation(relation: &str) -> Result<(), RecordSourceError> {
    if IDENTIFIER_RE.is_match(relation) {
        Ok(())
    } else {
        Err(RecordSourceError::Storage(format!(
            "invalid relation name '{relation}'"
        )))
    }
}

fn map_sqlx_error(err: sqlx::Error) -> RecordSourceError {
    match err {
        sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) => {
            RecordSourceError::Unavailable(err.to_string())
        }
        other => RecordSourceError::Storage(other.to_string()),
    }
}
