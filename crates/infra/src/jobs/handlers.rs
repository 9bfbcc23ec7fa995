//! Built-in job handlers.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use serde_json::Value;
use tracing::{info, warn};

use vigil_compliance::{RecordKind, Verification, VerificationFailure, verify};

use super::registry::{HandlerError, ItemContext, JobHandler, ScopeContext};
use crate::records::{RecordSource, RecordSourceError};

/// Days before expiry at which a still-valid record is reported.
pub const DEFAULT_WARNING_WINDOW_DAYS: i64 = 30;

/// Verifies existence and expiry of compliance records of one kind.
///
/// Item mode checks the record named by the item's `id` (a bare string or
/// number is accepted too); for an org-scoped job, a record of another
/// organization counts as not found. Scope mode walks every record of the
/// organization and only fails when the source itself cannot be read.
pub struct RecordCheckHandler {
    kind: RecordKind,
    records: Arc<dyn RecordSource>,
    warning_window_days: i64,
    today: Option<NaiveDate>,
}

impl RecordCheckHandler {
    pub fn new(kind: RecordKind, records: Arc<dyn RecordSource>) -> Self {
        Self {
            kind,
            records,
            warning_window_days: DEFAULT_WARNING_WINDOW_DAYS,
            today: None,
        }
    }

    pub fn with_warning_window(mut self, days: i64) -> Self {
        self.warning_window_days = days;
        self
    }

    /// Pin the verification date.
    pub fn with_today(mut self, today: NaiveDate) -> Self {
        self.today = Some(today);
        self
    }

    fn today(&self) -> NaiveDate {
        self.today.unwrap_or_else(|| Utc::now().date_naive())
    }
}

fn record_id(item: &Value) -> Option<String> {
    let raw = match item {
        Value::Object(map) => map.get("id")?,
        other => other,
    };
    match raw {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn source_error(err: RecordSourceError) -> HandlerError {
    HandlerError::item(err.to_string())
}

#[async_trait]
impl JobHandler for RecordCheckHandler {
    async fn process_item(&self, ctx: ItemContext<'_>) -> Result<(), HandlerError> {
        let id = record_id(ctx.item).ok_or_else(|| HandlerError::item("item has no record id"))?;
        let record = self
            .records
            .fetch(self.kind, &id)
            .await
            .map_err(source_error)?
            .filter(|r| ctx.org_id.is_none_or(|org| r.org_id == org));

        match verify(record.as_ref(), self.today(), self.warning_window_days) {
            Ok(Verification::Valid { .. }) => Ok(()),
            Ok(Verification::ExpiringSoon { days_left }) => {
                warn!(kind = %self.kind, record_id = %id, days_left, "record expiring soon");
                Ok(())
            }
            Err(failure) => Err(HandlerError::item(failure.to_string())),
        }
    }

    async fn process_scope(&self, ctx: ScopeContext<'_>) -> Result<(), HandlerError> {
        let records = self
            .records
            .list(self.kind, ctx.org_id)
            .await
            .map_err(|e| HandlerError::scope(e.to_string()))?;

        let today = self.today();
        let mut expired = 0usize;
        let mut incomplete = 0usize;
        let mut expiring = 0usize;
        for record in &records {
            match verify(Some(record), today, self.warning_window_days) {
                Ok(Verification::Valid { .. }) => {}
                Ok(Verification::ExpiringSoon { days_left }) => {
                    expiring += 1;
                    warn!(kind = %self.kind, record_id = %record.id, days_left, "record expiring soon");
                }
                Err(VerificationFailure::Expired(on)) => {
                    expired += 1;
                    warn!(kind = %self.kind, record_id = %record.id, expired_on = %on, "record expired");
                }
                Err(_) => incomplete += 1,
            }
        }

        info!(
            kind = %self.kind,
            org_id = ?ctx.org_id,
            checked = records.len(),
            expired,
            expiring,
            incomplete,
            "scope check complete"
        );
        Ok(())
    }
}

/// Hand-off point for legislative acts queued by the feed scanner.
///
/// Acts are consumed by a separate content pipeline; this handler only
/// checks that the job carries a usable `url`.
pub struct LegislativeUpdateHandler;

fn act_url(value: &Value) -> Option<&str> {
    value
        .get("url")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|u| !u.is_empty())
}

#[async_trait]
impl JobHandler for LegislativeUpdateHandler {
    async fn process_item(&self, ctx: ItemContext<'_>) -> Result<(), HandlerError> {
        let url = act_url(ctx.item).ok_or_else(|| HandlerError::item("missing url"))?;
        info!(url, "legislative act handed off");
        Ok(())
    }

    async fn process_scope(&self, ctx: ScopeContext<'_>) -> Result<(), HandlerError> {
        let url = act_url(ctx.payload).ok_or_else(|| HandlerError::scope("missing url"))?;
        let title = ctx.payload.get("title").and_then(Value::as_str).unwrap_or("");
        info!(url, title, "legislative act handed off");
        Ok(())
    }
}
