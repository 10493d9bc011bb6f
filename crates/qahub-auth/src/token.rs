//! Bearer token issuance and validation.
//!
//! Tokens are compact HS256 JWTs. The claims carry `user_id`, `username`,
//! `iat` and `exp` (Unix seconds) plus a random `jti`, so two tokens issued
//! for the same user in the same second still differ.

use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde_json::{json, Value};
use std::collections::HashSet;
use std::time::Duration;
use uuid::Uuid;

use crate::identity::{value_as_i64, Claims, Identity};

/// Why a token was rejected.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TokenError {
    #[error("malformed token: {0}")]
    Malformed(String),

    #[error("token signature does not verify")]
    BadSignature,

    #[error("token expired")]
    Expired,

    #[error("token missing user_id claim")]
    MissingPrincipal,

    #[error("token ttl must be at least one second")]
    InvalidTtl,

    #[error("token secret must not be empty")]
    EmptySecret,
}

impl From<jsonwebtoken::errors::Error> for TokenError {
    fn from(e: jsonwebtoken::errors::Error) -> Self {
        match e.kind() {
            ErrorKind::InvalidSignature => TokenError::BadSignature,
            ErrorKind::ExpiredSignature => TokenError::Expired,
            _ => TokenError::Malformed(e.to_string()),
        }
    }
}

/// A freshly signed token and its validity window.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IssuedToken {
    pub token: String,
    pub issued_at: i64,
    pub expires_at: i64,
}

/// Issues and parses HMAC-signed bearer tokens with a shared secret.
#[derive(Clone)]
pub struct TokenAuthority {
    encoding: EncodingKey,
    decoding: DecodingKey,
    validation: Validation,
    default_ttl: Duration,
}

impl std::fmt::Debug for TokenAuthority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenAuthority")
            .field("default_ttl", &self.default_ttl)
            .finish_non_exhaustive()
    }
}

impl TokenAuthority {
    pub fn new(secret: &[u8], default_ttl: Duration) -> Result<Self, TokenError> {
        if secret.is_empty() {
            return Err(TokenError::EmptySecret);
        }
        if default_ttl.as_secs() == 0 {
            return Err(TokenError::InvalidTtl);
        }

        // Expiry is checked against the caller's clock in `parse_at`.
        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_exp = false;
        validation.leeway = 0;
        validation.required_spec_claims = HashSet::new();

        Ok(Self {
            encoding: EncodingKey::from_secret(secret),
            decoding: DecodingKey::from_secret(secret),
            validation,
            default_ttl,
        })
    }

    pub fn default_ttl(&self) -> Duration {
        self.default_ttl
    }

    /// Signs a token for `principal_id` valid for `ttl` from now.
    pub fn issue(
        &self,
        principal_id: i64,
        username: &str,
        ttl: Duration,
    ) -> Result<IssuedToken, TokenError> {
        self.issue_at(principal_id, username, ttl, qahub_types::time::now_unix())
    }

    /// Like [`issue`](Self::issue) with an explicit clock reading.
    pub fn issue_at(
        &self,
        principal_id: i64,
        username: &str,
        ttl: Duration,
        now: i64,
    ) -> Result<IssuedToken, TokenError> {
        let ttl_secs = i64::try_from(ttl.as_secs()).map_err(|_| TokenError::InvalidTtl)?;
        if ttl_secs < 1 {
            return Err(TokenError::InvalidTtl);
        }
        let expires_at = now.checked_add(ttl_secs).ok_or(TokenError::InvalidTtl)?;

        let claims = json!({
            "user_id": principal_id,
            "username": username,
            "iat": now,
            "exp": expires_at,
            "jti": Uuid::new_v4().to_string(),
        });
        let token = encode(&Header::new(Algorithm::HS256), &claims, &self.encoding)?;

        Ok(IssuedToken {
            token,
            issued_at: now,
            expires_at,
        })
    }

    /// Verifies `token` against the wall clock and decodes its identity.
    ///
    /// Revocation is not consulted here; see [`crate::revocation`].
    pub fn parse(&self, token: &str) -> Result<Identity, TokenError> {
        self.parse_at(token, qahub_types::time::now_unix())
    }

    /// Like [`parse`](Self::parse) with an explicit clock reading.
    pub fn parse_at(&self, token: &str, now: i64) -> Result<Identity, TokenError> {
        if token.split('.').count() != 3 {
            return Err(TokenError::Malformed("expected three segments".to_string()));
        }

        let claims: Claims = decode::<Claims>(token, &self.decoding, &self.validation)?.claims;

        let expires_at = claims
            .get("exp")
            .and_then(value_as_i64)
            .ok_or_else(|| TokenError::Malformed("missing exp claim".to_string()))?;
        if now >= expires_at {
            return Err(TokenError::Expired);
        }

        let principal_id = claims
            .get("user_id")
            .and_then(value_as_i64)
            .ok_or(TokenError::MissingPrincipal)?;
        let username = claims
            .get("username")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();

        Ok(Identity {
            principal_id,
            username,
            token: token.to_string(),
            claims,
        })
    }
}
