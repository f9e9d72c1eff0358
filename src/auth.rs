//! Credential resolution for the duplex session
//!
//! Prefers a short-lived single-use token from a local exchange endpoint;
//! falls back silently to the long-lived API key when the exchange is
//! unavailable. Neither being available is a configuration error.

use secrecy::{ExposeSecret, SecretString};

use crate::config::AuthConfig;
use crate::{Error, Result};

/// Response from the token-exchange endpoint
#[derive(serde::Deserialize)]
struct TokenResponse {
    token: String,
}

/// A resolved session credential
pub enum Credential {
    /// Long-lived API key
    ApiKey(SecretString),
    /// Short-lived single-use token from the exchange endpoint
    EphemeralToken(SecretString),
}

impl Credential {
    /// Query-parameter name the credential is sent under
    #[must_use]
    pub const fn query_param(&self) -> &'static str {
        match self {
            Self::ApiKey(_) => "key",
            Self::EphemeralToken(_) => "access_token",
        }
    }

    /// The secret value
    #[must_use]
    pub fn expose(&self) -> &str {
        match self {
            Self::ApiKey(secret) | Self::EphemeralToken(secret) => secret.expose_secret(),
        }
    }
}

impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ApiKey(_) => write!(f, "Credential::ApiKey(..)"),
            Self::EphemeralToken(_) => write!(f, "Credential::EphemeralToken(..)"),
        }
    }
}

/// Resolve the session credential
///
/// # Errors
///
/// Returns `Error::Config` if no token can be exchanged and no long-lived
/// key is configured.
pub async fn resolve_credential(auth: &AuthConfig) -> Result<Credential> {
    if let Some(endpoint) = &auth.token_endpoint {
        match fetch_token(endpoint, auth).await {
            Ok(token) => {
                tracing::debug!("using ephemeral session token");
                return Ok(Credential::EphemeralToken(token));
            }
            Err(e) => {
                // Silent fallback: the exchange endpoint is optional
                tracing::debug!(error = %e, "token exchange unavailable, falling back to API key");
            }
        }
    }

    auth.api_key.clone().map(Credential::ApiKey).ok_or_else(|| {
        Error::Config(
            "no credential available: set VOXRELAY_API_KEY or configure a token endpoint"
                .to_string(),
        )
    })
}

/// Fetch an ephemeral token from the local exchange endpoint
async fn fetch_token(endpoint: &str, auth: &AuthConfig) -> Result<SecretString> {
    let client = reqwest::Client::builder()
        .timeout(auth.token_timeout())
        .build()?;

    let response = client.post(endpoint).send().await?;

    let status = response.status();
    if !status.is_success() {
        return Err(Error::Config(format!(
            "token exchange returned {status}"
        )));
    }

    let result: TokenResponse = response.json().await?;
    if result.token.is_empty() {
        return Err(Error::Config("token exchange returned empty token".to_string()));
    }

    Ok(SecretString::from(result.token))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn no_credential_is_config_error() {
        let auth = AuthConfig {
            api_key: None,
            token_endpoint: None,
            token_timeout_ms: 1500,
        };

        let err = resolve_credential(&auth).await.unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[tokio::test]
    async fn api_key_resolves_without_endpoint() {
        let auth = AuthConfig {
            api_key: Some(SecretString::from("test-key")),
            token_endpoint: None,
            token_timeout_ms: 1500,
        };

        let credential = resolve_credential(&auth).await.unwrap();
        assert!(matches!(credential, Credential::ApiKey(_)));
        assert_eq!(credential.query_param(), "key");
        assert_eq!(credential.expose(), "test-key");
    }

    #[tokio::test]
    async fn unreachable_endpoint_falls_back_to_key() {
        let auth = AuthConfig {
            api_key: Some(SecretString::from("fallback-key")),
            // Nothing listens here; connection is refused immediately
            token_endpoint: Some("http://127.0.0.1:1/token".to_string()),
            token_timeout_ms: 200,
        };

        let credential = resolve_credential(&auth).await.unwrap();
        assert!(matches!(credential, Credential::ApiKey(_)));
    }

    #[tokio::test]
    async fn unreachable_endpoint_without_key_is_config_error() {
        let auth = AuthConfig {
            api_key: None,
            token_endpoint: Some("http://127.0.0.1:1/token".to_string()),
            token_timeout_ms: 200,
        };

        let err = resolve_credential(&auth).await.unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn credential_debug_hides_secret() {
        let credential = Credential::ApiKey(SecretString::from("super-secret"));
        let debug = format!("{credential:?}");
        assert!(!debug.contains("super-secret"));
    }
}
