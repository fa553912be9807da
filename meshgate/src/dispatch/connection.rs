use std::sync::Mutex;

use meshgate_types::{AuthClaims, PassthroughToken};

/// Mutable per-connection fields, guarded by the connection's own lock.
#[derive(Debug, Default, Clone)]
pub struct ConnectionState {
    pub agent_id: String,
    pub binary_mode: bool,
    pub system_tokens: u64,
    pub conversation_tokens: u64,
    pub tool_tokens: u64,
    pub active_session: Option<String>,
}

/// A live agent connection. Created on accept, destroyed on close, never
/// shared across replicas.
#[derive(Debug)]
pub struct Connection {
    pub id: String,
    /// Authenticated claims; `None` until the transport authenticates.
    pub claims: Option<AuthClaims>,
    /// User token supplied at connect time (X-User-Token headers).
    pub passthrough: PassthroughToken,
    state: Mutex<ConnectionState>,
}

impl Connection {
    pub fn new(id: impl Into<String>, claims: Option<AuthClaims>) -> Self {
        Self::with_passthrough(id, claims, PassthroughToken::default())
    }

    pub fn with_passthrough(
        id: impl Into<String>,
        claims: Option<AuthClaims>,
        passthrough: PassthroughToken,
    ) -> Self {
        let claims_agent = claims
            .as_ref()
            .and_then(|c| c.agent_id.clone())
            .unwrap_or_default();
        Self {
            id: id.into(),
            claims,
            passthrough,
            state: Mutex::new(ConnectionState {
                agent_id: claims_agent,
                ..Default::default()
            }),
        }
    }

    pub fn tenant_id(&self) -> Option<&str> {
        self.claims.as_ref().map(|c| c.tenant_id.as_str())
    }

    pub fn state(&self) -> ConnectionState {
        self.state.lock().expect("connection state lock").clone()
    }

    pub fn update_state<F: FnOnce(&mut ConnectionState)>(&self, update: F) {
        let mut state = self.state.lock().expect("connection state lock");
        update(&mut state);
    }

    pub fn set_binary_mode(&self, enabled: bool) {
        self.update_state(|s| s.binary_mode = enabled);
    }

    pub fn binary_mode(&self) -> bool {
        self.state().binary_mode
    }

    pub fn add_tool_tokens(&self, tokens: u64) {
        self.update_state(|s| s.tool_tokens += tokens);
    }
}
