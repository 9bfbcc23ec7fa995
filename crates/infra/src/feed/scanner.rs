//! Feed scanner: turns new relevant feed entries into `legislative_update` jobs.

use std::collections::HashSet;
use std::sync::Arc;

use serde::Serialize;
use serde_json::json;
use tracing::{info, warn};

use vigil_compliance::{CandidateEntry, KeywordFilter, canonical_url, parse_feed};

use super::known::{KnownRecords, KnownRecordsError};
use super::source::FeedSource;
use crate::jobs::{JobId, JobStore, JobStoreError, JobType, NewJob};

const BUILTIN_SAMPLE: &str = include_str!("../../data/sample_feed.json");

/// Sample entries bundled with the crate, used when the feed cannot be fetched.
pub fn builtin_sample() -> Result<Vec<CandidateEntry>, serde_json::Error> {
    sample_from_json(BUILTIN_SAMPLE)
}

/// Parse a JSON array of candidate entries, canonicalizing their URLs.
pub fn sample_from_json(json: &str) -> Result<Vec<CandidateEntry>, serde_json::Error> {
    let mut entries: Vec<CandidateEntry> = serde_json::from_str(json)?;
    for entry in &mut entries {
        entry.url = canonical_url(&entry.url);
    }
    Ok(entries)
}

/// Scan failure. Fetch failures are not errors; they fall back to the sample.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ScanError {
    #[error(transparent)]
    KnownRecords(#[from] KnownRecordsError),
    #[error("failed to enqueue any of {relevant} relevant entries: {source}")]
    Enqueue {
        relevant: usize,
        source: JobStoreError,
    },
}

/// One act queued by a scan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QueuedAct {
    pub title: String,
    pub url: String,
    pub job_id: JobId,
}

/// Outcome of one scan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScanReport {
    /// Entries parsed from the feed (or taken from the sample).
    pub scanned: usize,
    /// Entries that matched a keyword and were not already known.
    pub relevant: usize,
    pub queued: usize,
    pub acts: Vec<QueuedAct>,
    /// The feed could not be fetched and the sample was scanned instead.
    pub used_fallback: bool,
}

impl ScanReport {
    pub fn message(&self) -> String {
        let mut message = format!(
            "Scanned {} entries, {} relevant, {} queued",
            self.scanned, self.relevant, self.queued
        );
        if self.used_fallback {
            message.push_str(" (sample data)");
        }
        message
    }
}

pub struct FeedScanner {
    source: Arc<dyn FeedSource>,
    filter: KeywordFilter,
    known: Arc<dyn KnownRecords>,
    store: Arc<dyn JobStore>,
    fallback: Vec<CandidateEntry>,
}

impl FeedScanner {
    pub fn new(
        source: Arc<dyn FeedSource>,
        filter: KeywordFilter,
        known: Arc<dyn KnownRecords>,
        store: Arc<dyn JobStore>,
        fallback: Vec<CandidateEntry>,
    ) -> Self {
        Self {
            source,
            filter,
            known,
            store,
            fallback,
        }
    }

    pub async fn scan(&self) -> Result<ScanReport, ScanError> {
        let (entries, used_fallback) = match self.source.fetch().await {
            Ok(xml) => (parse_feed(&xml), false),
            Err(e) => {
                warn!(error = %e, sample_entries = self.fallback.len(), "feed fetch failed, scanning sample data");
                (self.fallback.clone(), true)
            }
        };
        let scanned = entries.len();

        let known = self.known.known_urls().await?;
        let mut seen = HashSet::new();
        let candidates: Vec<CandidateEntry> = entries
            .into_iter()
            .filter(|entry| self.filter.is_relevant(entry))
            .filter(|entry| !known.contains(&entry.url))
            .filter(|entry| seen.insert(entry.url.clone()))
            .collect();
        let relevant = candidates.len();

        let mut acts = Vec::with_capacity(relevant);
        let mut last_error = None;
        for entry in candidates {
            let job = NewJob::new(
                JobType::LEGISLATIVE_UPDATE,
                json!({ "url": entry.url, "title": entry.title }),
            );
            match self.store.enqueue(job).await {
                Ok(job) => acts.push(QueuedAct {
                    title: entry.title,
                    url: entry.url,
                    job_id: job.id,
                }),
                Err(e) => {
                    warn!(url = %entry.url, error = %e, "failed to enqueue legislative update");
                    last_error = Some(e);
                }
            }
        }

        if let (true, Some(source)) = (acts.is_empty(), last_error) {
            return Err(ScanError::Enqueue { relevant, source });
        }

        let report = ScanReport {
            scanned,
            relevant,
            queued: acts.len(),
            acts,
            used_fallback,
        };
        info!(
            scanned = report.scanned,
            relevant = report.relevant,
            queued = report.queued,
            used_fallback = report.used_fallback,
            "feed scan complete"
        );
        Ok(report)
    }
}
