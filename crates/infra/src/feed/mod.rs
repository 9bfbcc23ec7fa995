//! Legislation feed ingestion.
//!
//! The scanner fetches the upstream feed, keeps entries matching the keyword
//! vocabulary that are not in the Known-Record Set, and queues one
//! `legislative_update` job per new act.

pub mod known;
pub mod scanner;
pub mod source;

pub use known::{InMemoryKnownRecords, KnownRecords, KnownRecordsError, PostgresKnownRecords};
pub use scanner::{FeedScanner, QueuedAct, ScanError, ScanReport, builtin_sample, sample_from_json};
pub use source::{FeedError, FeedSource, HttpFeedSource, StaticFeedSource};
