use crate::auth::Lifetime;
use crate::config::types::{AuthConfig, SnowflakeConfig};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use rsa::pkcs1::{DecodeRsaPrivateKey, EncodeRsaPrivateKey};
use rsa::pkcs8::{DecodePrivateKey, EncodePublicKey};
use rsa::RsaPrivateKey;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tracing::info;

/// Validity of a key-pair JWT; the service rejects anything above one hour
pub const ASSERTION_VALIDITY: Duration = Duration::from_secs(3600);

#[derive(Debug, Error)]
pub enum CredentialError {
    #[error("failed to read private key file '{}': {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed private key: {0}")]
    MalformedKey(String),

    #[error("private key is encrypted but no passphrase is configured")]
    PassphraseRequired,

    #[error("failed to sign assertion: {0}")]
    Signing(String),

    #[error("no credential configured: set auth.private_key_file or auth.pat_token")]
    Missing,
}

/// How the identity token was obtained, sent alongside it on control-plane calls
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenType {
    KeyPairJwt,
    ProgrammaticAccessToken,
}

impl TokenType {
    pub fn header_value(self) -> &'static str {
        match self {
            TokenType::KeyPairJwt => "KEYPAIR_JWT",
            TokenType::ProgrammaticAccessToken => "PROGRAMMATIC_ACCESS_TOKEN",
        }
    }
}

enum KeyMaterial {
    KeyPair {
        encoding_key: EncodingKey,
        fingerprint: String,
    },
    AccessToken(String),
}

/// Long-lived identity material, loaded once at startup
pub struct Credential {
    account: String,
    user: String,
    material: KeyMaterial,
}

impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let kind = match self.material {
            KeyMaterial::KeyPair { .. } => "key_pair",
            KeyMaterial::AccessToken(_) => "access_token",
        };
        f.debug_struct("Credential")
            .field("account", &self.account)
            .field("user", &self.user)
            .field("material", &kind)
            .finish()
    }
}

/// Account identifier as used in JWT claims: upper case, without region suffix
fn normalize_account(account: &str) -> String {
    account
        .split('.')
        .next()
        .unwrap_or(account)
        .to_uppercase()
}

impl Credential {
    pub fn from_config(
        snowflake: &SnowflakeConfig,
        auth: &AuthConfig,
    ) -> Result<Self, CredentialError> {
        match (&auth.private_key_file, &auth.pat_token) {
            (Some(path), _) => Self::from_private_key_file(
                &snowflake.account,
                &snowflake.user,
                path,
                auth.private_key_passphrase.as_deref(),
            ),
            (None, Some(token)) => {
                info!("Using programmatic access token authentication");
                Ok(Self::from_access_token(
                    &snowflake.account,
                    &snowflake.user,
                    token,
                ))
            }
            (None, None) => Err(CredentialError::Missing),
        }
    }

    pub fn from_private_key_file(
        account: &str,
        user: &str,
        path: &Path,
        passphrase: Option<&str>,
    ) -> Result<Self, CredentialError> {
        let pem = std::fs::read_to_string(path).map_err(|source| CredentialError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let credential = Self::from_private_key_pem(account, user, &pem, passphrase)?;
        info!(path = %path.display(), "Private key loaded");
        Ok(credential)
    }

    pub fn from_private_key_pem(
        account: &str,
        user: &str,
        pem: &str,
        passphrase: Option<&str>,
    ) -> Result<Self, CredentialError> {
        let key = decode_private_key(pem, passphrase)?;
        let fingerprint = public_key_fingerprint(&key)?;
        let der = key
            .to_pkcs1_der()
            .map_err(|e| CredentialError::MalformedKey(e.to_string()))?;

        Ok(Self {
            account: normalize_account(account),
            user: user.to_uppercase(),
            material: KeyMaterial::KeyPair {
                encoding_key: EncodingKey::from_rsa_der(der.as_bytes()),
                fingerprint,
            },
        })
    }

    pub fn from_access_token(account: &str, user: &str, token: &str) -> Self {
        Self {
            account: normalize_account(account),
            user: user.to_uppercase(),
            material: KeyMaterial::AccessToken(token.to_string()),
        }
    }

    /// `ACCOUNT.USER`
    pub fn qualified_user(&self) -> String {
        format!("{}.{}", self.account, self.user)
    }

    /// `SHA256:<base64>` fingerprint of the public key, for key-pair credentials
    pub fn fingerprint(&self) -> Option<&str> {
        match &self.material {
            KeyMaterial::KeyPair { fingerprint, .. } => Some(fingerprint),
            KeyMaterial::AccessToken(_) => None,
        }
    }

    pub fn token_type(&self) -> TokenType {
        match self.material {
            KeyMaterial::KeyPair { .. } => TokenType::KeyPairJwt,
            KeyMaterial::AccessToken(_) => TokenType::ProgrammaticAccessToken,
        }
    }
}

fn decode_private_key(pem: &str, passphrase: Option<&str>) -> Result<RsaPrivateKey, CredentialError> {
    let result = if pem.contains("BEGIN ENCRYPTED PRIVATE KEY") {
        let passphrase = passphrase.ok_or(CredentialError::PassphraseRequired)?;
        RsaPrivateKey::from_pkcs8_encrypted_pem(pem, passphrase.as_bytes())
            .map_err(|e| e.to_string())
    } else if pem.contains("BEGIN RSA PRIVATE KEY") {
        RsaPrivateKey::from_pkcs1_pem(pem).map_err(|e| e.to_string())
    } else {
        RsaPrivateKey::from_pkcs8_pem(pem).map_err(|e| e.to_string())
    };

    result.map_err(CredentialError::MalformedKey)
}

fn public_key_fingerprint(key: &RsaPrivateKey) -> Result<String, CredentialError> {
    let der = key
        .to_public_key()
        .to_public_key_der()
        .map_err(|e| CredentialError::MalformedKey(e.to_string()))?;
    let digest = Sha256::digest(der.as_bytes());
    Ok(format!("SHA256:{}", STANDARD.encode(digest)))
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssertionClaims {
    pub iss: String,
    pub sub: String,
    pub iat: i64,
    pub exp: i64,
}

/// Bearer credential presented to the control plane
#[derive(Clone)]
pub struct SignedAssertion {
    token: String,
    token_type: TokenType,
    /// None for access tokens, which this process never renews
    lifetime: Option<Lifetime>,
}

impl SignedAssertion {
    pub fn token(&self) -> &str {
        &self.token
    }

    pub fn token_type(&self) -> TokenType {
        self.token_type
    }

    pub fn lifetime(&self) -> Option<&Lifetime> {
        self.lifetime.as_ref()
    }

    pub fn needs_refresh(&self, margin: Duration) -> bool {
        self.lifetime
            .as_ref()
            .is_some_and(|lifetime| lifetime.needs_refresh(margin))
    }
}

impl std::fmt::Debug for SignedAssertion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SignedAssertion")
            .field("token", &"<redacted>")
            .field("token_type", &self.token_type)
            .field("lifetime", &self.lifetime)
            .finish()
    }
}

/// Produces short-lived signed assertions from a [`Credential`]
#[derive(Debug)]
pub struct CredentialSigner {
    credential: Credential,
}

impl CredentialSigner {
    pub fn new(credential: Credential) -> Self {
        Self { credential }
    }

    pub fn credential(&self) -> &Credential {
        &self.credential
    }

    pub fn sign(&self, validity: Duration) -> Result<SignedAssertion, CredentialError> {
        self.sign_at(chrono::Utc::now().timestamp(), validity)
    }

    /// Sign with an explicit issue time (epoch seconds)
    pub fn sign_at(&self, now: i64, validity: Duration) -> Result<SignedAssertion, CredentialError> {
        match &self.credential.material {
            KeyMaterial::AccessToken(token) => Ok(SignedAssertion {
                token: token.clone(),
                token_type: TokenType::ProgrammaticAccessToken,
                lifetime: None,
            }),
            KeyMaterial::KeyPair {
                encoding_key,
                fingerprint,
            } => {
                let qualified = self.credential.qualified_user();
                let claims = AssertionClaims {
                    iss: format!("{}.{}", qualified, fingerprint),
                    sub: qualified,
                    iat: now,
                    exp: now + validity.as_secs() as i64,
                };

                let token = encode(&Header::new(Algorithm::RS256), &claims, encoding_key)
                    .map_err(|e| CredentialError::Signing(e.to_string()))?;

                Ok(SignedAssertion {
                    token,
                    token_type: TokenType::KeyPairJwt,
                    lifetime: Some(Lifetime::starting_now(validity)),
                })
            }
        }
    }
}
