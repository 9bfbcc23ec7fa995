use serde::{Deserialize, Serialize};

use vigil_core::{OrgId, UserId};

use crate::Role;

/// An authenticated user, resolved from a validated session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Principal {
    pub user_id: UserId,
    /// Organization the session is acting within, if any.
    pub org_id: Option<OrgId>,
    pub roles: Vec<Role>,
}

impl Principal {
    pub fn has_role(&self, role: &Role) -> bool {
        self.roles.iter().any(|r| r == role)
    }
}
