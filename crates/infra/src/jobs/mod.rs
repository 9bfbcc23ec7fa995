//! Batch job pipeline.
//!
//! ## Design
//!
//! - Jobs are typed by an open string tag and optionally organization-scoped
//! - A job runs in item mode (one handler call per `payload.items` entry) or
//!   scope mode (one organization-wide pass)
//! - Claims are atomic; each pending job is run by exactly one processor
//! - No automatic retries: failed jobs are terminal and carry an error log
//!
//! ## Components
//!
//! - `Job`: queued unit of work and its status state machine
//! - `JobStore`: durable queue (in-memory or Postgres)
//! - `HandlerRegistry`: job type to `JobHandler` mapping
//! - `JobProcessor`: claims and runs one job per trigger
//! - `StuckJobReconciler`: fails jobs abandoned in `processing`

pub mod handlers;
pub mod postgres;
pub mod processor;
pub mod reconcile;
pub mod registry;
pub mod store;
pub mod types;

pub use handlers::{DEFAULT_WARNING_WINDOW_DAYS, LegislativeUpdateHandler, RecordCheckHandler};
pub use postgres::PostgresJobStore;
pub use processor::{JobProcessor, ProcessError, ProcessorConfig, RunSummary};
pub use reconcile::StuckJobReconciler;
pub use registry::{HandlerError, HandlerRegistry, ItemContext, JobHandler, ScopeContext};
pub use store::{InMemoryJobStore, JobFilter, JobStore, JobStoreError};
pub use types::{
    ErrorLogEntry, ExecutionMode, Job, JobId, JobOutcome, JobStatus, JobType, NewJob,
};
