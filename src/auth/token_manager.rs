use crate::auth::signer::{CredentialError, CredentialSigner, SignedAssertion, ASSERTION_VALIDITY};
use crate::auth::{Lifetime, TokenState};
use crate::http;
use serde::Deserialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info};

const JWT_BEARER_GRANT: &str = "urn:ietf:params:oauth:grant-type:jwt-bearer";
const DEFAULT_SCOPED_VALIDITY_SECS: u64 = 3600;

#[derive(Debug, Error)]
pub enum AuthError {
    #[error(transparent)]
    Credential(#[from] CredentialError),

    #[error("{operation} failed with HTTP {status}: {message}")]
    Status {
        operation: &'static str,
        status: u16,
        message: String,
    },

    #[error("{operation} request failed: {source}")]
    Http {
        operation: &'static str,
        #[source]
        source: reqwest::Error,
    },

    #[error("{operation} returned an unusable response: {message}")]
    InvalidResponse {
        operation: &'static str,
        message: String,
    },
}

impl AuthError {
    pub fn status(&self) -> Option<u16> {
        match self {
            AuthError::Status { status, .. } => Some(*status),
            AuthError::Http { source, .. } => source.status().map(|s| s.as_u16()),
            _ => None,
        }
    }

    /// 429, 5xx and network failures may succeed on a later attempt
    pub fn is_retryable(&self) -> bool {
        match self {
            AuthError::Status { status, .. } => *status == 429 || *status >= 500,
            AuthError::Http { .. } => true,
            AuthError::Credential(_) | AuthError::InvalidResponse { .. } => false,
        }
    }
}

/// Bearer token scoped to the ingest host
#[derive(Clone)]
pub struct ScopedToken {
    token: String,
    ingest_host: String,
    lifetime: Lifetime,
    generation: u64,
}

impl ScopedToken {
    pub fn token(&self) -> &str {
        &self.token
    }

    pub fn ingest_host(&self) -> &str {
        &self.ingest_host
    }

    pub fn ingest_base_url(&self) -> String {
        http::base_url(&self.ingest_host)
    }

    pub fn lifetime(&self) -> &Lifetime {
        &self.lifetime
    }

    /// Increases by one with every exchange
    pub fn generation(&self) -> u64 {
        self.generation
    }
}

impl std::fmt::Debug for ScopedToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScopedToken")
            .field("token", &"<redacted>")
            .field("ingest_host", &self.ingest_host)
            .field("lifetime", &self.lifetime)
            .field("generation", &self.generation)
            .finish()
    }
}

#[derive(Deserialize)]
struct HostnameResponse {
    hostname: Option<String>,
    ingest_host: Option<String>,
}

#[derive(Deserialize)]
struct OAuthTokenResponse {
    access_token: Option<String>,
    expires_in: Option<u64>,
}

/// Owns both token tiers: the identity assertion and the scoped ingest token.
///
/// Scoped refreshes are single-flight. Callers queue on an async mutex; a
/// caller that finds a token minted after it started waiting takes that token
/// instead of exchanging again, even when it asked for a forced refresh.
pub struct TokenManager {
    signer: CredentialSigner,
    http: reqwest::Client,
    control_url: String,
    role: Option<String>,
    safety_margin: Duration,
    identity: Mutex<Option<SignedAssertion>>,
    ingest_host: Mutex<Option<String>>,
    scoped: tokio::sync::Mutex<Option<ScopedToken>>,
    generation: AtomicU64,
    discoveries: AtomicU64,
}

impl TokenManager {
    pub fn new(
        signer: CredentialSigner,
        http: reqwest::Client,
        control_url: impl Into<String>,
        role: Option<String>,
        safety_margin: Duration,
    ) -> Self {
        Self {
            signer,
            http,
            control_url: control_url.into().trim_end_matches('/').to_string(),
            role,
            safety_margin,
            identity: Mutex::new(None),
            ingest_host: Mutex::new(None),
            scoped: tokio::sync::Mutex::new(None),
            generation: AtomicU64::new(0),
            discoveries: AtomicU64::new(0),
        }
    }

    /// Current identity assertion, re-signed when it is about to expire
    pub fn identity_token(&self) -> Result<SignedAssertion, CredentialError> {
        let mut cached = self.identity.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(assertion) = cached.as_ref() {
            if !assertion.needs_refresh(self.safety_margin) {
                return Ok(assertion.clone());
            }
            debug!("Identity assertion expiring, re-signing");
        }

        let assertion = self.signer.sign(ASSERTION_VALIDITY)?;
        *cached = Some(assertion.clone());
        Ok(assertion)
    }

    /// Current scoped token. `force` bypasses the cache, e.g. after the
    /// ingest host rejected the token.
    pub async fn scoped_token(&self, force: bool) -> Result<ScopedToken, AuthError> {
        let generation_at_call = self.generation.load(Ordering::SeqCst);
        let mut cached = self.scoped.lock().await;

        if let Some(token) = cached.as_ref() {
            let minted_while_waiting = token.generation > generation_at_call;
            if minted_while_waiting || (!force && !token.lifetime.needs_refresh(self.safety_margin))
            {
                return Ok(token.clone());
            }
        }

        let identity = self.identity_token()?;
        let ingest_host = self.discover_ingest_host(&identity).await?;
        let (token, validity) = self.exchange(&identity, &ingest_host).await?;
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;

        let scoped = ScopedToken {
            token,
            ingest_host,
            lifetime: Lifetime::starting_now(validity),
            generation,
        };
        info!(
            generation,
            expires_in_secs = validity.as_secs(),
            forced = force,
            "Scoped token obtained"
        );

        *cached = Some(scoped.clone());
        Ok(scoped)
    }

    pub fn identity_state(&self) -> TokenState {
        let cached = self.identity.lock().unwrap_or_else(PoisonError::into_inner);
        match cached.as_ref() {
            None => TokenState::Absent,
            Some(assertion) if assertion.needs_refresh(self.safety_margin) => TokenState::Expiring,
            Some(_) => TokenState::Valid,
        }
    }

    pub async fn scoped_state(&self) -> TokenState {
        match self.scoped.lock().await.as_ref() {
            None => TokenState::Absent,
            Some(token) => token.lifetime.state(self.safety_margin),
        }
    }

    /// Number of token exchanges performed so far
    pub fn exchange_count(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    pub fn discovery_count(&self) -> u64 {
        self.discoveries.load(Ordering::SeqCst)
    }

    async fn discover_ingest_host(&self, identity: &SignedAssertion) -> Result<String, AuthError> {
        const OPERATION: &str = "ingest host discovery";

        if let Some(host) = self
            .ingest_host
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
        {
            return Ok(host);
        }

        let url = format!("{}/v2/streaming/hostname", self.control_url);
        self.discoveries.fetch_add(1, Ordering::SeqCst);

        let response = self
            .http
            .get(&url)
            .header(reqwest::header::AUTHORIZATION, http::bearer(identity.token()))
            .header(http::TOKEN_TYPE_HEADER, identity.token_type().header_value())
            .send()
            .await
            .map_err(|source| AuthError::Http {
                operation: OPERATION,
                source,
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(AuthError::Status {
                operation: OPERATION,
                status: status.as_u16(),
                message: http::error_body(response).await,
            });
        }

        let is_json = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|v| v.contains("application/json"));
        let body = response.text().await.map_err(|source| AuthError::Http {
            operation: OPERATION,
            source,
        })?;

        let host = parse_hostname(&body, is_json).ok_or_else(|| AuthError::InvalidResponse {
            operation: OPERATION,
            message: "no ingest host in response".to_string(),
        })?;

        info!(ingest_host = %host, "Discovered ingest host");
        *self.ingest_host.lock().unwrap_or_else(PoisonError::into_inner) = Some(host.clone());
        Ok(host)
    }

    fn scope_for(&self, ingest_host: &str) -> String {
        match &self.role {
            Some(role) => format!("session:role:{} {}", role, ingest_host),
            None => ingest_host.to_string(),
        }
    }

    async fn exchange(
        &self,
        identity: &SignedAssertion,
        ingest_host: &str,
    ) -> Result<(String, Duration), AuthError> {
        const OPERATION: &str = "token exchange";

        let url = format!("{}/oauth/token", self.control_url);
        let scope = self.scope_for(ingest_host);
        let form = [("grant_type", JWT_BEARER_GRANT), ("scope", scope.as_str())];

        let response = self
            .http
            .post(&url)
            .header(reqwest::header::AUTHORIZATION, http::bearer(identity.token()))
            .header(http::TOKEN_TYPE_HEADER, identity.token_type().header_value())
            .form(&form)
            .send()
            .await
            .map_err(|source| AuthError::Http {
                operation: OPERATION,
                source,
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(AuthError::Status {
                operation: OPERATION,
                status: status.as_u16(),
                message: http::error_body(response).await,
            });
        }

        let body: OAuthTokenResponse =
            response.json().await.map_err(|e| AuthError::InvalidResponse {
                operation: OPERATION,
                message: e.to_string(),
            })?;

        let token = body
            .access_token
            .filter(|t| !t.is_empty())
            .ok_or_else(|| AuthError::InvalidResponse {
                operation: OPERATION,
                message: "missing access_token".to_string(),
            })?;
        let validity = Duration::from_secs(body.expires_in.unwrap_or(DEFAULT_SCOPED_VALIDITY_SECS));

        Ok((token, validity))
    }
}

impl std::fmt::Debug for TokenManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenManager")
            .field("control_url", &self.control_url)
            .field("role", &self.role)
            .field("exchanges", &self.exchange_count())
            .finish()
    }
}

/// Ingest host from a discovery response body, JSON or plain text.
/// Underscores are not valid in the host name and become dashes.
fn parse_hostname(body: &str, is_json: bool) -> Option<String> {
    let host = if is_json {
        let parsed: HostnameResponse = serde_json::from_str(body).ok()?;
        parsed.hostname.or(parsed.ingest_host)?
    } else {
        body.trim().to_string()
    };

    let host = host.trim();
    if host.is_empty() {
        return None;
    }
    Some(host.replace('_', "-"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_hostname_json_and_text() {
        assert_eq!(
            parse_hostname(r#"{"hostname":"my_acct.ingest.example.com"}"#, true),
            Some("my-acct.ingest.example.com".to_string())
        );
        assert_eq!(
            parse_hostname(r#"{"ingest_host":"host.example.com"}"#, true),
            Some("host.example.com".to_string())
        );
        assert_eq!(
            parse_hostname("  acct_1.ingest.example.com\n", false),
            Some("acct-1.ingest.example.com".to_string())
        );
        assert_eq!(parse_hostname("   ", false), None);
        assert_eq!(parse_hostname("{}", true), None);
    }

    #[test]
    fn test_auth_error_retryability() {
        let status = |status| AuthError::Status {
            operation: "token exchange",
            status,
            message: String::new(),
        };
        assert!(status(429).is_retryable());
        assert!(status(503).is_retryable());
        assert!(!status(401).is_retryable());
        assert!(!status(400).is_retryable());
        assert_eq!(status(403).status(), Some(403));
        assert!(!AuthError::Credential(CredentialError::Missing).is_retryable());
    }

    #[test]
    fn test_scope_includes_role() {
        use crate::auth::signer::Credential;

        let signer = CredentialSigner::new(Credential::from_access_token("acct", "user", "pat"));
        let manager = TokenManager::new(
            signer,
            reqwest::Client::new(),
            "https://acct.example.com/",
            Some("INGEST_ROLE".to_string()),
            Duration::from_secs(300),
        );
        assert_eq!(
            manager.scope_for("host.example.com"),
            "session:role:INGEST_ROLE host.example.com"
        );
        assert_eq!(manager.identity_state(), TokenState::Absent);
        manager.identity_token().unwrap();
        assert_eq!(manager.identity_state(), TokenState::Valid);
    }
}
