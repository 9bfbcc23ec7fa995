//! `vigil-auth` — trigger authorization boundary.
//!
//! Decides who may invoke the pipeline: a scheduler presenting the shared
//! secret, or a user session holding the privileged role. This crate is
//! decoupled from HTTP; the API layer hands it the raw bearer credential.

pub mod claims;
pub mod gate;
pub mod principal;
pub mod roles;
pub mod session;

pub use claims::{SessionClaims, TokenValidationError, validate_claims};
pub use gate::{Caller, TriggerError, TriggerGate};
pub use principal::Principal;
pub use roles::Role;
pub use session::{Hs256SessionValidator, SessionValidator};
