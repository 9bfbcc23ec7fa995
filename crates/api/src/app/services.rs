use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use sqlx::postgres::PgPoolOptions;
use tracing::{info, warn};

use vigil_auth::{Hs256SessionValidator, Role, TriggerGate};
use vigil_infra::{
    config::PipelineConfig,
    feed::{FeedScanner, HttpFeedSource, InMemoryKnownRecords, KnownRecords, PostgresKnownRecords},
    jobs::{
        HandlerRegistry, InMemoryJobStore, JobProcessor, JobStore, PostgresJobStore,
        StuckJobReconciler,
    },
    records::{InMemoryRecordSource, PostgresRecordSource, RecordSource},
};

/// Everything the routes need, shared behind an `Arc`.
pub struct AppServices {
    pub gate: TriggerGate,
    pub store: Arc<dyn JobStore>,
    pub processor: JobProcessor,
    pub scanner: FeedScanner,
    pub reconciler: StuckJobReconciler,
}

struct Backends {
    store: Arc<dyn JobStore>,
    records: Arc<dyn RecordSource>,
    known: Arc<dyn KnownRecords>,
}

async fn connect_backends(config: &PipelineConfig) -> anyhow::Result<Backends> {
    let Some(url) = &config.database_url else {
        warn!("DATABASE_URL not set; using in-memory stores (state is lost on restart)");
        return Ok(Backends {
            store: Arc::new(InMemoryJobStore::new()),
            records: Arc::new(InMemoryRecordSource::new()),
            known: Arc::new(InMemoryKnownRecords::new()),
        });
    };

    let pool = PgPoolOptions::new()
        .max_connections(5)
        .acquire_timeout(Duration::from_secs(5))
        .connect(url)
        .await
        .context("failed to connect to Postgres")?;

    let jobs = PostgresJobStore::new(pool.clone());
    jobs.migrate().await.context("failed to create jobs schema")?;
    info!("using Postgres job store");

    let records = match &config.records_relation {
        Some(relation) => PostgresRecordSource::with_relation(pool.clone(), relation)
            .context("invalid VIGIL_RECORDS_RELATION")?,
        None => PostgresRecordSource::new(pool.clone()),
    };

    Ok(Backends {
        store: Arc::new(jobs),
        records: Arc::new(records),
        known: Arc::new(PostgresKnownRecords::new(pool)),
    })
}

/// Wire stores, processor and scanner from configuration.
pub async fn build_services(config: &PipelineConfig) -> anyhow::Result<AppServices> {
    let sessions = Arc::new(Hs256SessionValidator::new(config.session_secret.as_bytes()));
    let gate = TriggerGate::new(
        config.cron_secret.clone(),
        Role::new(config.privileged_role.clone()),
        sessions,
    );

    let backends = connect_backends(config).await?;

    let registry = HandlerRegistry::with_defaults(backends.records, config.expiry_warning_days);
    info!(types = ?registry.registered_types(), "job handlers registered");
    let processor = JobProcessor::new(
        backends.store.clone(),
        Arc::new(registry),
        config.processor_config(),
    );

    let feed = HttpFeedSource::new(config.feed_url.clone(), config.feed_timeout)
        .context("failed to build feed client")?;
    let scanner = FeedScanner::new(
        Arc::new(feed),
        config.keyword_filter()?,
        backends.known,
        backends.store.clone(),
        config.fallback_sample()?,
    );

    let reconciler = StuckJobReconciler::new(backends.store.clone(), config.stuck_job_timeout);

    Ok(AppServices {
        gate,
        store: backends.store,
        processor,
        scanner,
        reconciler,
    })
}
