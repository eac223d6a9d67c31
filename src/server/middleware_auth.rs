//! Bearer-token identity for request handlers.
//!
//! Reads `Authorization: Bearer <token>`, decodes the HS256 JWT and yields the
//! requester's [`Identity`]. A missing, malformed or unverifiable token makes
//! the request anonymous; the access gates decide what anonymous requesters
//! may do.

use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use axum::http::header;
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};
use std::convert::Infallible;
use std::sync::Arc;
use tracing::debug;

use super::AppState;
use crate::access::Identity;

/// Claims carried by an identity token.
#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    /// User id.
    pub sub: String,
    #[serde(default)]
    pub email: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exp: Option<u64>,
}

/// Decode and, when a secret is configured, verify a token.
///
/// Without a secret the signature and expiry are not checked (development mode).
pub fn decode_jwt(token: &str, secret: Option<&str>) -> Result<Claims, String> {
    let mut validation = Validation::new(Algorithm::HS256);
    match secret {
        Some(secret) => {
            let key = DecodingKey::from_secret(secret.as_bytes());
            let data = decode::<Claims>(token, &key, &validation)
                .map_err(|e| format!("JWT verification failed: {}", e))?;
            Ok(data.claims)
        }
        None => {
            validation.insecure_disable_signature_validation();
            validation.validate_exp = false;
            validation.required_spec_claims.clear();
            let data = decode::<Claims>(token, &DecodingKey::from_secret(b""), &validation)
                .map_err(|e| format!("JWT decode failed: {}", e))?;
            Ok(data.claims)
        }
    }
}

fn bearer_token(parts: &Parts) -> Option<&str> {
    parts
        .headers
        .get(header::AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
}

/// The requester: identity (if any) plus the path a login should return to.
#[derive(Debug, Clone)]
pub struct Requester {
    pub identity: Option<Identity>,
    pub path: String,
}

impl Requester {
    pub fn identity(&self) -> Option<&Identity> {
        self.identity.as_ref()
    }
}

impl FromRequestParts<Arc<AppState>> for Requester {
    type Rejection = Infallible;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        let path = parts
            .uri
            .path_and_query()
            .map(|pq| pq.as_str().to_string())
            .unwrap_or_else(|| parts.uri.path().to_string());
        let identity = bearer_token(parts).and_then(|token| {
            match decode_jwt(token, state.config.jwt_secret.as_deref()) {
                Ok(claims) if !claims.sub.is_empty() => Some(Identity {
                    user_id: claims.sub,
                    email: claims.email,
                }),
                Ok(_) => None,
                Err(e) => {
                    debug!(error = %e, "ignoring bearer token");
                    None
                }
            }
        });
        Ok(Requester { identity, path })
    }
}
