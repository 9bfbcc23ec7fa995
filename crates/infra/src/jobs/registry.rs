//! Job type to handler mapping.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use vigil_core::OrgId;

use super::handlers::{LegislativeUpdateHandler, RecordCheckHandler};
use super::types::JobType;
use crate::records::RecordSource;
use vigil_compliance::RecordKind;

/// Handler failure.
///
/// `Item` and `Timeout` are recovered per item by the processor; `Scope` and
/// `UnknownJobType` fail the whole job.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HandlerError {
    /// A single domain check failed. The message is stored in the error log.
    #[error("{0}")]
    Item(String),
    /// The organization-wide pass failed.
    #[error("{0}")]
    Scope(String),
    #[error("timed out after {0:?}")]
    Timeout(Duration),
    #[error("unknown job type '{0}'")]
    UnknownJobType(String),
}

impl HandlerError {
    pub fn item(msg: impl Into<String>) -> Self {
        Self::Item(msg.into())
    }

    pub fn scope(msg: impl Into<String>) -> Self {
        Self::Scope(msg.into())
    }
}

/// Input to one item-mode call.
#[derive(Debug, Clone, Copy)]
pub struct ItemContext<'a> {
    /// Organization of the job; handlers must not look outside it.
    pub org_id: Option<OrgId>,
    pub item: &'a Value,
}

/// Input to a scope-mode pass.
#[derive(Debug, Clone, Copy)]
pub struct ScopeContext<'a> {
    /// `None` means a global pass.
    pub org_id: Option<OrgId>,
    pub payload: &'a Value,
}

/// Domain logic for one job type.
///
/// Handlers read and verify; they never write job state.
#[async_trait]
pub trait JobHandler: Send + Sync {
    /// Check a single entry of `payload.items`.
    async fn process_item(&self, ctx: ItemContext<'_>) -> Result<(), HandlerError>;

    /// Organization-wide (or global) pass, used when the payload has no items.
    async fn process_scope(&self, ctx: ScopeContext<'_>) -> Result<(), HandlerError>;
}

/// Maps job type tags to handlers.
#[derive(Clone, Default)]
pub struct HandlerRegistry {
    handlers: HashMap<String, Arc<dyn JobHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the built-in handlers:
    /// `psi_check`, `medical_check`, `iscir_check` and `legislative_update`.
    pub fn with_defaults(records: Arc<dyn RecordSource>, warning_window_days: i64) -> Self {
        let check = |kind| {
            Arc::new(
                RecordCheckHandler::new(kind, records.clone())
                    .with_warning_window(warning_window_days),
            )
        };
        let mut registry = Self::new();
        registry.register(JobType::PSI_CHECK, check(RecordKind::Equipment));
        registry.register(JobType::MEDICAL_CHECK, check(RecordKind::Medical));
        registry.register(JobType::ISCIR_CHECK, check(RecordKind::Iscir));
        registry.register(JobType::LEGISLATIVE_UPDATE, Arc::new(LegislativeUpdateHandler));
        registry
    }

    /// Register (or replace) the handler for a job type.
    pub fn register(&mut self, job_type: impl Into<String>, handler: Arc<dyn JobHandler>) {
        self.handlers.insert(job_type.into(), handler);
    }

    pub fn get(&self, job_type: &JobType) -> Result<Arc<dyn JobHandler>, HandlerError> {
        self.handlers
            .get(job_type.as_str())
            .cloned()
            .ok_or_else(|| HandlerError::UnknownJobType(job_type.to_string()))
    }

    /// Registered type tags, sorted.
    pub fn registered_types(&self) -> Vec<&str> {
        let mut types: Vec<&str> = self.handlers.keys().map(String::as_str).collect();
        types.sort_unstable();
        types
    }
}

impl std::fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerRegistry")
            .field("types", &self.registered_types())
            .finish()
    }
}
