//! `vigil-compliance` — pure compliance domain logic.
//!
//! - `record`: compliance records (equipment, medical, ISCIR) and expiry verification
//! - `feed`: syndication feed parsing into candidate entries
//! - `keywords`: relevance filtering of candidates against domain vocabulary
//!
//! No IO happens here; fetching records and feeds is the infra layer's job.

pub mod feed;
pub mod keywords;
pub mod record;

pub use feed::{CandidateEntry, canonical_url, parse_feed};
pub use keywords::KeywordFilter;
pub use record::{ComplianceRecord, RecordKind, Verification, VerificationFailure, verify};
