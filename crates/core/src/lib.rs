//! `vigil-core` — shared domain building blocks.
//!
//! Identifiers and the parse error shared by every other crate.
//! No infrastructure concerns live here.

pub mod error;
pub mod id;

pub use error::DomainError;
pub use id::{OrgId, UserId};
