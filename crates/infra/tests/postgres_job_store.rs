//! Postgres job store against a live database.
//!
//! These tests claim every pending job they find, so point
//! `DATABASE_URL` at a scratch database and run with
//! `cargo test -p vigil-infra --test postgres_job_store -- --ignored`.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::Utc;
use serde_json::json;
use sqlx::postgres::PgPoolOptions;
use tokio::sync::Mutex;

use vigil_infra::jobs::{
    ErrorLogEntry, JobId, JobOutcome, JobStatus, JobStore, JobStoreError, NewJob,
    PostgresJobStore,
};

// Tests in this file share one queue.
static SERIAL: Mutex<()> = Mutex::const_new(());

async fn store() -> PostgresJobStore {
    let url = std::env::var("DATABASE_URL").expect("DATABASE_URL must be set");
    let pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(&url)
        .await
        .expect("failed to connect to Postgres");
    let store = PostgresJobStore::new(pool);
    store.migrate().await.unwrap();
    store
}

async fn drain(store: &PostgresJobStore) {
    while store.claim_next_pending().await.unwrap().is_some() {}
}

#[tokio::test]
#[ignore] // Requires database
async fn concurrent_claims_never_hand_out_a_job_twice() {
    let _serial = SERIAL.lock().await;
    let store = Arc::new(store().await);
    drain(&store).await;

    let mut enqueued = HashSet::new();
    for i in 0..20 {
        let job = store
            .enqueue(NewJob::new("psi_check", json!({ "items": [{ "id": i }] })))
            .await
            .unwrap();
        enqueued.insert(job.id);
    }

    let workers: Vec<_> = (0..8)
        .map(|_| {
            let store = store.clone();
            tokio::spawn(async move {
                let mut claimed: Vec<JobId> = Vec::new();
                while let Some(job) = store.claim_next_pending().await.unwrap() {
                    assert_eq!(job.status, JobStatus::Processing);
                    assert_eq!(job.items_total, 1);
                    claimed.push(job.id);
                }
                claimed
            })
        })
        .collect();

    let mut claimed = Vec::new();
    for worker in workers {
        claimed.extend(worker.await.unwrap());
    }

    let unique: HashSet<JobId> = claimed.iter().copied().collect();
    assert_eq!(unique.len(), claimed.len(), "a job was claimed twice");
    assert_eq!(unique, enqueued);
}

#[tokio::test]
#[ignore] // Requires database
async fn progress_entries_survive_a_reclaim() {
    let _serial = SERIAL.lock().await;
    let store = store().await;
    drain(&store).await;

    let items = json!({ "items": [{ "id": "a" }, { "id": "b" }, { "id": "c" }] });
    let job = store.enqueue(NewJob::new("medical_check", items)).await.unwrap();
    let claimed = store.claim_next_pending().await.unwrap().unwrap();
    assert_eq!(claimed.id, job.id);
    assert_eq!(claimed.items_total, 3);

    store
        .record_progress(job.id, 0, 1, Some(ErrorLogEntry::for_item(&json!({ "id": "a" }), "record not found")))
        .await
        .unwrap();
    store.record_progress(job.id, 1, 1, None).await.unwrap();
    assert!(matches!(
        store.record_progress(job.id, 3, 1, None).await,
        Err(JobStoreError::InvalidProgress(_))
    ));

    let cutoff = Utc::now() + chrono::Duration::seconds(5);
    let reclaimed = store.reclaim_stuck(cutoff, "timeout: abandoned").await.unwrap();
    assert!(reclaimed.contains(&job.id));

    let failed = store.get(job.id).await.unwrap().unwrap();
    assert_eq!(failed.status, JobStatus::Failed);
    assert_eq!(failed.items_processed, 1);
    assert_eq!(failed.items_failed, 2);
    assert_eq!(failed.error_log.len(), 2);
    assert_eq!(failed.error_log[0].error, "record not found");
    assert!(failed.error_log[1].is_synthetic());
    assert!(failed.completed_at.is_some());
}

#[tokio::test]
#[ignore] // Requires database
async fn finalize_only_applies_to_processing_jobs() {
    let _serial = SERIAL.lock().await;
    let store = store().await;
    drain(&store).await;

    let job = store.enqueue(NewJob::new("iscir_check", json!({}))).await.unwrap();
    store.claim_next_pending().await.unwrap().unwrap();

    let done = store.finalize(job.id, JobOutcome::completed(1, 0, vec![])).await.unwrap();
    assert_eq!(done.status, JobStatus::Done);
    assert!(store.finalize(job.id, JobOutcome::completed(1, 0, vec![])).await.is_err());
}
