//! Trigger Gate: who may invoke the processor and the scanner.
//!
//! - Processor: shared-secret bearer (scheduler) **or** a session holding the
//!   privileged role (manual trigger).
//! - Scanner: shared-secret bearer only.
//!
//! No credential, or an invalid one, is `Unauthorized` (401). A valid session
//! without the privileged role is `Forbidden` (403).

use std::sync::Arc;

use chrono::{DateTime, Utc};
use thiserror::Error;
use tracing::debug;

use crate::{Principal, Role, SessionValidator};

/// Who is triggering the run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Caller {
    Scheduler,
    User(Principal),
}

impl Caller {
    pub fn label(&self) -> String {
        match self {
            Caller::Scheduler => "scheduler".to_string(),
            Caller::User(p) => format!("user:{}", p.user_id),
        }
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TriggerError {
    #[error("unauthorized")]
    Unauthorized,

    #[error("forbidden: role '{0}' required")]
    Forbidden(String),
}

#[derive(Clone)]
pub struct TriggerGate {
    shared_secret: String,
    privileged_role: Role,
    sessions: Arc<dyn SessionValidator>,
}

impl TriggerGate {
    pub fn new(
        shared_secret: impl Into<String>,
        privileged_role: Role,
        sessions: Arc<dyn SessionValidator>,
    ) -> Self {
        Self {
            shared_secret: shared_secret.into(),
            privileged_role,
            sessions,
        }
    }

    /// Authorize a processor invocation (scheduler or privileged user).
    pub fn authorize_processor(
        &self,
        bearer: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<Caller, TriggerError> {
        let token = bearer.ok_or(TriggerError::Unauthorized)?;

        if self.secret_matches(token) {
            return Ok(Caller::Scheduler);
        }

        let claims = self.sessions.validate(token, now).map_err(|e| {
            debug!(error = %e, "session rejected");
            TriggerError::Unauthorized
        })?;

        let principal = claims.into_principal();
        if !principal.has_role(&self.privileged_role) {
            debug!(user_id = %principal.user_id, "session lacks privileged role");
            return Err(TriggerError::Forbidden(self.privileged_role.to_string()));
        }

        Ok(Caller::User(principal))
    }

    /// Authorize a scanner invocation (scheduler only).
    pub fn authorize_scanner(&self, bearer: Option<&str>) -> Result<Caller, TriggerError> {
        match bearer {
            Some(token) if self.secret_matches(token) => Ok(Caller::Scheduler),
            _ => Err(TriggerError::Unauthorized),
        }
    }

    fn secret_matches(&self, candidate: &str) -> bool {
        !self.shared_secret.is_empty()
            && constant_time_eq(self.shared_secret.as_bytes(), candidate.as_bytes())
    }
}

impl core::fmt::Debug for TriggerGate {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("TriggerGate")
            .field("privileged_role", &self.privileged_role)
            .finish_non_exhaustive()
    }
}

/// Length is not hidden; content is compared without early exit.
fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Hs256SessionValidator, SessionClaims};
    use vigil_core::UserId;

    const SECRET: &str = "cron-secret";

    fn gate() -> (TriggerGate, Arc<Hs256SessionValidator>) {
        let sessions = Arc::new(Hs256SessionValidator::new("session-key"));
        let gate = TriggerGate::new(SECRET, Role::new("admin"), sessions.clone());
        (gate, sessions)
    }

    fn token(sessions: &Hs256SessionValidator, roles: &[&'static str]) -> String {
        let now = Utc::now();
        sessions
            .issue(&SessionClaims {
                sub: UserId::new(),
                org_id: None,
                roles: roles.iter().map(|r| Role::new(*r)).collect(),
                iat: now.timestamp(),
                exp: now.timestamp() + 600,
            })
            .unwrap()
    }

    #[test]
    fn missing_credential_is_unauthorized() {
        let (gate, _) = gate();
        assert_eq!(
            gate.authorize_processor(None, Utc::now()),
            Err(TriggerError::Unauthorized)
        );
        assert_eq!(gate.authorize_scanner(None), Err(TriggerError::Unauthorized));
    }

    #[test]
    fn shared_secret_authorizes_both_paths() {
        let (gate, _) = gate();
        assert_eq!(
            gate.authorize_processor(Some(SECRET), Utc::now()),
            Ok(Caller::Scheduler)
        );
        assert_eq!(gate.authorize_scanner(Some(SECRET)), Ok(Caller::Scheduler));
    }

    #[test]
    fn wrong_secret_is_unauthorized() {
        let (gate, _) = gate();
        assert_eq!(
            gate.authorize_processor(Some("cron-secreT"), Utc::now()),
            Err(TriggerError::Unauthorized)
        );
        assert_eq!(
            gate.authorize_scanner(Some("nope")),
            Err(TriggerError::Unauthorized)
        );
    }

    #[test]
    fn privileged_session_authorizes_processor_only() {
        let (gate, sessions) = gate();
        let t = token(&sessions, &["admin"]);
        assert!(matches!(
            gate.authorize_processor(Some(&t), Utc::now()),
            Ok(Caller::User(_))
        ));
        assert_eq!(gate.authorize_scanner(Some(&t)), Err(TriggerError::Unauthorized));
    }

    #[test]
    fn session_without_role_is_forbidden() {
        let (gate, sessions) = gate();
        let t = token(&sessions, &["viewer"]);
        assert_eq!(
            gate.authorize_processor(Some(&t), Utc::now()),
            Err(TriggerError::Forbidden("admin".to_string()))
        );
    }

    #[test]
    fn empty_configured_secret_never_matches() {
        let sessions = Arc::new(Hs256SessionValidator::new("k"));
        let gate = TriggerGate::new("", Role::new("admin"), sessions);
        assert_eq!(gate.authorize_scanner(Some("")), Err(TriggerError::Unauthorized));
    }
}
