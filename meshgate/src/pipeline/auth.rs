//! Auth injection for outbound calls. Resolves the effective credential
//! (service credential vs. per-request passthrough token) and renders it as
//! request headers.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;

use meshgate_types::{
    AuthKind, GatewayError, PassthroughMode, PassthroughToken, ToolConfig,
};

use super::provider::ProviderAdapter;

/// Rendered auth material for one request.
#[derive(Debug, Clone, PartialEq)]
pub enum AuthHeader {
    None,
    Header { name: String, value: String },
}

/// Select the effective token per the tool's passthrough mode, then render
/// it for the tool's auth scheme.
pub fn resolve_auth(
    config: &ToolConfig,
    provider: &dyn ProviderAdapter,
    passthrough: &PassthroughToken,
) -> Result<AuthHeader, GatewayError> {
    let user_token = match &config.passthrough {
        Some(pt) => match pt.mode {
            PassthroughMode::Optional => passthrough.token.clone(),
            PassthroughMode::Required => Some(passthrough.token.clone().ok_or_else(|| {
                GatewayError::PassthroughRequired(format!(
                    "tool {} requires a user token (X-User-Token)",
                    config.name
                ))
            })?),
            PassthroughMode::RequiredWithProviderMatch => {
                let token = passthrough.token.clone().ok_or_else(|| {
                    GatewayError::PassthroughRequired(format!(
                        "tool {} requires a user token (X-User-Token)",
                        config.name
                    ))
                })?;
                let expected = config
                    .provider
                    .clone()
                    .unwrap_or_else(|| provider.name().to_string());
                let got = passthrough.provider.clone().unwrap_or_default();
                if !got.eq_ignore_ascii_case(&expected) {
                    return Err(GatewayError::PassthroughProviderMismatch { expected, got });
                }
                Some(token)
            }
        },
        None => None,
    };

    if let Some(token) = user_token {
        // User token takes the place of the service credential in the
        // tool's auth scheme.
        return Ok(match config.auth_type {
            AuthKind::ApiKey => AuthHeader::Header {
                name: api_key_header(config, provider),
                value: token,
            },
            AuthKind::None => AuthHeader::None,
            _ => AuthHeader::Header {
                name: "Authorization".to_string(),
                value: format!("Bearer {token}"),
            },
        });
    }

    let credential = config.credential.as_ref();
    match config.auth_type {
        AuthKind::None => Ok(AuthHeader::None),
        AuthKind::Bearer | AuthKind::OAuth2 => {
            let token = credential
                .and_then(|c| c.token.as_ref())
                .filter(|t| !t.is_empty())
                .ok_or_else(|| {
                    GatewayError::AuthMissing(format!("tool {} has no token", config.name))
                })?;
            Ok(AuthHeader::Header {
                name: "Authorization".to_string(),
                value: format!("Bearer {token}"),
            })
        }
        AuthKind::ApiKey | AuthKind::Custom => {
            let token = credential
                .and_then(|c| c.token.as_ref())
                .filter(|t| !t.is_empty())
                .ok_or_else(|| {
                    GatewayError::AuthMissing(format!("tool {} has no API key", config.name))
                })?;
            Ok(AuthHeader::Header {
                name: api_key_header(config, provider),
                value: token.clone(),
            })
        }
        AuthKind::Basic => {
            let credential = credential.ok_or_else(|| {
                GatewayError::AuthMissing(format!("tool {} has no credentials", config.name))
            })?;
            let (username, password) = match (&credential.username, &credential.password) {
                (Some(u), Some(p)) => (u, p),
                _ => {
                    return Err(GatewayError::AuthMissing(format!(
                        "tool {} requires username and password",
                        config.name
                    )))
                }
            };
            Ok(AuthHeader::Header {
                name: "Authorization".to_string(),
                value: format!("Basic {}", BASE64.encode(format!("{username}:{password}"))),
            })
        }
    }
}

/// The credential's explicit header wins over the provider default.
fn api_key_header(config: &ToolConfig, provider: &dyn ProviderAdapter) -> String {
    config
        .credential
        .as_ref()
        .and_then(|c| c.header_name.clone())
        .unwrap_or_else(|| provider.api_key_header().to_string())
}
