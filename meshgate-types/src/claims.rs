use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Scope {
    Read,
    Write,
    Admin,
}

/// Authenticated identity attached to a connection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthClaims {
    pub tenant_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_id: Option<String>,
    #[serde(default)]
    pub scopes: BTreeSet<Scope>,
}

impl AuthClaims {
    pub fn new(tenant_id: impl Into<String>, scopes: impl IntoIterator<Item = Scope>) -> Self {
        Self {
            tenant_id: tenant_id.into(),
            agent_id: None,
            scopes: scopes.into_iter().collect(),
        }
    }

    pub fn can_read(&self) -> bool {
        !self.scopes.is_empty()
    }

    pub fn can_write(&self) -> bool {
        self.scopes.contains(&Scope::Write) || self.scopes.contains(&Scope::Admin)
    }

    pub fn can_admin(&self) -> bool {
        self.scopes.contains(&Scope::Admin)
    }
}
