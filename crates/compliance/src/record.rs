//! Compliance records and expiry verification.
//!
//! A record is anything with an expiry date that an organization must keep
//! current: equipment fire-safety checks, employee medical fitness
//! certificates, ISCIR pressure-equipment authorizations.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use vigil_core::OrgId;

/// Which register a record belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordKind {
    /// Fire-safety (PSI) equipment: extinguishers, hydrants, alarm panels.
    Equipment,
    /// Occupational medicine fitness certificates.
    Medical,
    /// ISCIR-regulated installations (boilers, pressure vessels, lifts).
    Iscir,
}

impl RecordKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecordKind::Equipment => "equipment",
            RecordKind::Medical => "medical",
            RecordKind::Iscir => "iscir",
        }
    }
}

impl core::fmt::Display for RecordKind {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl core::str::FromStr for RecordKind {
    type Err = vigil_core::DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "equipment" => Ok(RecordKind::Equipment),
            "medical" => Ok(RecordKind::Medical),
            "iscir" => Ok(RecordKind::Iscir),
            other => Err(vigil_core::DomainError::validation(format!(
                "unknown record kind '{other}'"
            ))),
        }
    }
}

/// A single record as read from the record store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComplianceRecord {
    pub id: String,
    pub org_id: OrgId,
    pub kind: RecordKind,
    /// Human-readable label (equipment serial, employee name, installation tag).
    pub label: String,
    pub expires_at: Option<NaiveDate>,
}

/// Outcome of a successful verification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verification {
    Valid { days_left: i64 },
    /// Still valid, but inside the warning window.
    ExpiringSoon { days_left: i64 },
}

/// Why a record failed verification.
///
/// The `Display` strings end up verbatim in job error logs, so keep them short.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum VerificationFailure {
    #[error("record not found")]
    NotFound,

    #[error("missing expiry date")]
    MissingExpiry,

    #[error("expired on {0}")]
    Expired(NaiveDate),
}

/// Verify that a record exists and has not expired as of `today`.
///
/// A record expiring exactly on `today` is still valid for that day.
pub fn verify(
    record: Option<&ComplianceRecord>,
    today: NaiveDate,
    warning_window_days: i64,
) -> Result<Verification, VerificationFailure> {
    let record = record.ok_or(VerificationFailure::NotFound)?;
    let expires_at = record.expires_at.ok_or(VerificationFailure::MissingExpiry)?;

    if expires_at < today {
        return Err(VerificationFailure::Expired(expires_at));
    }

    let days_left = (expires_at - today).num_days();
    if days_left <= warning_window_days {
        Ok(Verification::ExpiringSoon { days_left })
    } else {
        Ok(Verification::Valid { days_left })
    }
}
