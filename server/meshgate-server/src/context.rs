//! Request-scoped tenant identity. The tenant is derived from
//! authentication headers and inserted as a request extension before the
//! routes run.

use actix_web::HttpRequest;
use std::collections::BTreeSet;

use meshgate_types::{AuthClaims, PassthroughToken, Scope};

/// Authoritative passthrough header spellings.
pub const USER_TOKEN_HEADER: &str = "X-User-Token";
pub const TOKEN_PROVIDER_HEADER: &str = "X-Token-Provider";

const TENANT_HEADER: &str = "X-Tenant-Id";
const AGENT_HEADER: &str = "X-Agent-Id";
const SCOPES_HEADER: &str = "X-Scopes";

#[derive(Debug, Clone)]
pub struct UserContext {
    pub claims: AuthClaims,
}

impl UserContext {
    pub fn anonymous() -> Self {
        Self {
            claims: AuthClaims::new("anonymous", [Scope::Read, Scope::Write, Scope::Admin]),
        }
    }

    pub fn tenant_id(&self) -> &str {
        &self.claims.tenant_id
    }
}

fn header<'a>(req: &'a HttpRequest, name: &str) -> Option<&'a str> {
    req.headers().get(name).and_then(|v| v.to_str().ok())
}

/// Build the caller identity from request headers. Absent headers fall back
/// to the anonymous development identity; a production deployment fronts
/// this with a real authenticator.
pub fn user_context(req: &HttpRequest) -> UserContext {
    let Some(tenant_id) = header(req, TENANT_HEADER).filter(|t| !t.is_empty()) else {
        return UserContext::anonymous();
    };

    let scopes: BTreeSet<Scope> = match header(req, SCOPES_HEADER) {
        Some(raw) => raw
            .split(',')
            .filter_map(|scope| match scope.trim() {
                "read" => Some(Scope::Read),
                "write" => Some(Scope::Write),
                "admin" => Some(Scope::Admin),
                _ => None,
            })
            .collect(),
        None => [Scope::Read, Scope::Write].into_iter().collect(),
    };

    let mut claims = AuthClaims::new(tenant_id, scopes);
    claims.agent_id = header(req, AGENT_HEADER).map(String::from);
    UserContext { claims }
}

/// Per-request user token override (§passthrough). Only the authoritative
/// header spellings are honoured.
pub fn passthrough_token(req: &HttpRequest) -> PassthroughToken {
    PassthroughToken {
        token: header(req, USER_TOKEN_HEADER).map(String::from),
        provider: header(req, TOKEN_PROVIDER_HEADER).map(String::from),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::test::TestRequest;

    #[test]
    fn anonymous_without_tenant_header() {
        let req = TestRequest::default().to_http_request();
        let ctx = user_context(&req);
        assert_eq!(ctx.tenant_id(), "anonymous");
        assert!(ctx.claims.can_admin());
    }

    #[test]
    fn tenant_and_scopes_parse_from_headers() {
        let req = TestRequest::default()
            .insert_header(("X-Tenant-Id", "tenant-a"))
            .insert_header(("X-Scopes", "read"))
            .to_http_request();
        let ctx = user_context(&req);
        assert_eq!(ctx.tenant_id(), "tenant-a");
        assert!(ctx.claims.can_read());
        assert!(!ctx.claims.can_write());
    }

    #[test]
    fn passthrough_reads_only_authoritative_spellings() {
        let req = TestRequest::default()
            .insert_header(("X-User-Token", "tok"))
            .insert_header(("X-Token-Provider", "github"))
            .insert_header(("X-USER-AUTH", "ignored"))
            .to_http_request();
        let token = passthrough_token(&req);
        assert_eq!(token.token.as_deref(), Some("tok"));
        assert_eq!(token.provider.as_deref(), Some("github"));
    }
}
