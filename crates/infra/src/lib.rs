//! Infrastructure layer: job store, processor, feed ingestion, config.
//!
//! - `jobs`: job queue (in-memory and Postgres), handlers, processor, reconciliation
//! - `records`: read access to compliance records for the check handlers
//! - `feed`: feed retrieval, Known-Record Set, scanner
//! - `config`: environment-driven configuration

pub mod config;
pub mod feed;
pub mod jobs;
pub mod records;
