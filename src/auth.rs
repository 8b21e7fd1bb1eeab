//! Bearer token issuing and checking.
//!
//! Tokens are HS256 JWTs. Only issuance and verification live here: there
//! are no users, passwords or sessions.

use crate::error::ServiceError;
use axum::http::{header::AUTHORIZATION, HeaderMap};
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub iat: u64,
    pub exp: u64,
}

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("Authentication required")]
    Missing,
    #[error("Invalid token")]
    Invalid,
    #[error("Token authentication is not configured")]
    NotConfigured,
    #[error("cannot sign token: {0}")]
    Signing(#[source] jsonwebtoken::errors::Error),
}

impl From<AuthError> for ServiceError {
    fn from(err: AuthError) -> Self {
        match err {
            AuthError::Signing(_) => ServiceError::Internal(err.to_string()),
            _ => ServiceError::Unauthorized(err.to_string()),
        }
    }
}

struct Keys {
    encoding: EncodingKey,
    decoding: DecodingKey,
}

pub struct TokenAuthority {
    keys: Option<Keys>,
    ttl_secs: u64,
}

impl TokenAuthority {
    /// Without a secret every verification fails with
    /// [`AuthError::NotConfigured`].
    pub fn new(secret: Option<&str>, ttl_secs: u64) -> Self {
        let keys = secret.filter(|s| !s.is_empty()).map(|s| Keys {
            encoding: EncodingKey::from_secret(s.as_bytes()),
            decoding: DecodingKey::from_secret(s.as_bytes()),
        });
        Self { keys, ttl_secs }
    }

    pub fn is_configured(&self) -> bool {
        self.keys.is_some()
    }

    pub fn issue(&self, subject: &str) -> Result<String, AuthError> {
        self.issue_at(subject, jsonwebtoken::get_current_timestamp())
    }

    fn issue_at(&self, subject: &str, now: u64) -> Result<String, AuthError> {
        let keys = self.keys.as_ref().ok_or(AuthError::NotConfigured)?;
        let claims = Claims {
            sub: subject.to_string(),
            iat: now,
            exp: now.saturating_add(self.ttl_secs),
        };
        jsonwebtoken::encode(&Header::new(Algorithm::HS256), &claims, &keys.encoding)
            .map_err(AuthError::Signing)
    }

    pub fn verify(&self, token: &str) -> Result<Claims, AuthError> {
        let keys = self.keys.as_ref().ok_or(AuthError::NotConfigured)?;
        let validation = Validation::new(Algorithm::HS256);
        jsonwebtoken::decode::<Claims>(token, &keys.decoding, &validation)
            .map(|data| data.claims)
            .map_err(|e| {
                log::debug!("token rejected: {}", e);
                AuthError::Invalid
            })
    }

    /// Check an `Authorization: Bearer <token>` header value.
    pub fn verify_header(&self, header: Option<&str>) -> Result<Claims, AuthError> {
        let header = header.map(str::trim).filter(|h| !h.is_empty());
        let Some(header) = header else {
            return Err(AuthError::Missing);
        };
        let token = header
            .strip_prefix("Bearer ")
            .or_else(|| header.strip_prefix("bearer "))
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .ok_or(AuthError::Invalid)?;
        self.verify(token)
    }

    pub fn authorize(&self, headers: &HeaderMap) -> Result<Claims, AuthError> {
        let header = headers.get(AUTHORIZATION).and_then(|h| h.to_str().ok());
        self.verify_header(header)
    }
}
