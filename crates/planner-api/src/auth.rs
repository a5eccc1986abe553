//! Bearer-token authentication.
//!
//! Tokens are HS256 JWTs carrying the caller's `user_id` and display name.
//! The verified `user_id` becomes the [`OwnerId`] that scopes every record
//! operation.

use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use planner_core::{OwnerId, PlannerError};
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

pub const MIN_SECRET_LEN: usize = 32;
pub const DEFAULT_TOKEN_TTL_SECS: u64 = 3_600;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Claims {
    pub user_id: String,
    pub user_name: Option<String>,
    pub iat: u64,
    pub exp: u64,
}

#[derive(Clone)]
pub struct JwtAuthenticator {
    secret: String,
    ttl_secs: u64,
}

impl std::fmt::Debug for JwtAuthenticator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JwtAuthenticator").field("ttl_secs", &self.ttl_secs).finish_non_exhaustive()
    }
}

impl JwtAuthenticator {
    /// # Errors
    /// Returns [`PlannerError::Validation`] on `jwt_secret` when the secret is
    /// shorter than [`MIN_SECRET_LEN`] bytes.
    pub fn new(secret: impl Into<String>, ttl_secs: u64) -> Result<Self, PlannerError> {
        let secret = secret.into();
        if secret.len() < MIN_SECRET_LEN {
            return Err(PlannerError::validation(
                "jwt_secret",
                format!("must be at least {MIN_SECRET_LEN} bytes"),
            ));
        }
        Ok(Self { secret, ttl_secs })
    }

    /// Sign a token for `user_id` valid for the configured lifetime.
    ///
    /// # Errors
    /// Returns [`PlannerError::Collaborator`] when the token cannot be encoded.
    pub fn issue(&self, user_id: &str, user_name: Option<&str>) -> Result<String, PlannerError> {
        let now = unix_now()?;
        let claims = Claims {
            user_id: user_id.to_string(),
            user_name: user_name.map(str::to_string),
            iat: now,
            exp: now.saturating_add(self.ttl_secs),
        };

        encode(&Header::default(), &claims, &EncodingKey::from_secret(self.secret.as_bytes()))
            .map_err(|err| PlannerError::Collaborator(format!("failed to sign token: {err}")))
    }

    /// Verify signature and expiry, yielding the decoded claims.
    ///
    /// # Errors
    /// Returns [`PlannerError::Unauthenticated`] for an invalid, expired, or
    /// malformed token.
    pub fn verify(&self, token: &str) -> Result<Claims, PlannerError> {
        decode::<Claims>(
            token,
            &DecodingKey::from_secret(self.secret.as_bytes()),
            &Validation::default(),
        )
        .map(|data| data.claims)
        .map_err(|err| {
            let reason = match err.kind() {
                ErrorKind::ExpiredSignature => "token expired",
                ErrorKind::InvalidSignature => "invalid signature",
                _ => "invalid token",
            };
            PlannerError::Unauthenticated(reason.to_string())
        })
    }

    /// Verify a token and return the caller identity it carries.
    ///
    /// # Errors
    /// Returns [`PlannerError::Unauthenticated`] when verification fails or the
    /// token names no user.
    pub fn authenticate(&self, token: &str) -> Result<OwnerId, PlannerError> {
        let claims = self.verify(token)?;
        if claims.user_id.trim().is_empty() {
            return Err(PlannerError::Unauthenticated("token carries no user_id".to_string()));
        }
        Ok(OwnerId::new(claims.user_id))
    }
}

/// Extract the token from an `Authorization: Bearer <token>` header value.
#[must_use]
pub fn extract_token_from_header(header_value: &str) -> Option<&str> {
    let token = header_value.strip_prefix("Bearer ")?.trim();
    (!token.is_empty()).then_some(token)
}

/// Extract the `token` cookie from a `Cookie` header value.
#[must_use]
pub fn extract_token_from_cookie(cookie_header: &str) -> Option<&str> {
    cookie_header
        .split(';')
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(name, _)| *name == "token")
        .map(|(_, value)| value.trim())
        .filter(|value| !value.is_empty())
}

fn unix_now() -> Result<u64, PlannerError> {
    u64::try_from(OffsetDateTime::now_utc().unix_timestamp())
        .map_err(|err| PlannerError::Collaborator(format!("system clock is before 1970: {err}")))
}
