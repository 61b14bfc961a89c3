use actix_web::dev::Payload;
use actix_web::error::{ErrorInternalServerError, ErrorUnauthorized};
use actix_web::http::header;
use actix_web::{web, Error, FromRequest, HttpRequest};
use base64::engine::general_purpose::{STANDARD, STANDARD_NO_PAD};
use base64::Engine;
use futures_util::future::LocalBoxFuture;
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::api::AppState;
use crate::models::User;

// ============================================================================
// Auth Collaborator - HTTP Basic credentials -> caller identity
// ============================================================================
//
// Resolves the Authorization header to a stored user or rejects the request
// with 401. The engine trusts the resolved identity for ownership checks;
// everything credential-shaped stays in this module.
//
// ============================================================================

const HASH_VERSION: &str = "v1";

/// Hash a plaintext password with a fresh random salt.
/// Format: `v1$<salt-b64>$<digest-b64>`.
pub fn hash_password(password: &str) -> String {
    let salt = Uuid::new_v4();
    let digest = salted_digest(salt.as_bytes(), password);
    format!(
        "{HASH_VERSION}${}${}",
        STANDARD_NO_PAD.encode(salt.as_bytes()),
        STANDARD_NO_PAD.encode(digest)
    )
}

/// Check a plaintext password against a stored hash. Malformed stored values
/// verify as false rather than erroring.
pub fn verify_password(password: &str, stored: &str) -> bool {
    let mut parts = stored.split('$');
    let (Some(version), Some(salt), Some(digest), None) =
        (parts.next(), parts.next(), parts.next(), parts.next())
    else {
        return false;
    };
    if version != HASH_VERSION {
        return false;
    }

    let (Ok(salt), Ok(expected)) = (STANDARD_NO_PAD.decode(salt), STANDARD_NO_PAD.decode(digest))
    else {
        return false;
    };

    constant_time_eq(&salted_digest(&salt, password), &expected)
}

/// Compare digests without short-circuiting on the first mismatching byte,
/// so verification time does not leak how much of the digest matched.
fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

fn salted_digest(salt: &[u8], password: &str) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(salt);
    hasher.update(password.as_bytes());
    hasher.finalize().into()
}

/// Decode an `Authorization: Basic <b64>` header into (email, password).
pub fn decode_basic(header_value: &str) -> Option<(String, String)> {
    let encoded = header_value.strip_prefix("Basic ")?;
    let decoded = STANDARD.decode(encoded.trim()).ok()?;
    let credentials = String::from_utf8(decoded).ok()?;
    let (email, password) = credentials.split_once(':')?;
    Some((email.to_string(), password.to_string()))
}

/// Extractor: the authenticated caller. Any handler taking `AuthUser`
/// rejects unauthenticated requests with 401 before running.
pub struct AuthUser(pub User);

impl FromRequest for AuthUser {
    type Error = Error;
    type Future = LocalBoxFuture<'static, Result<Self, Self::Error>>;

    fn from_request(req: &HttpRequest, _payload: &mut Payload) -> Self::Future {
        let state = req.app_data::<web::Data<AppState>>().cloned();
        let header = req
            .headers()
            .get(header::AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .map(str::to_owned);

        Box::pin(async move {
            let state = state.ok_or_else(|| ErrorInternalServerError("missing app state"))?;

            let (email, password) = header
                .as_deref()
                .and_then(decode_basic)
                .ok_or_else(|| ErrorUnauthorized("missing or malformed credentials"))?;

            let user = state.store.get_user_by_email(&email).await.map_err(|err| {
                tracing::error!(error = %err, "Credential lookup failed");
                ErrorInternalServerError("storage failure")
            })?;

            user.filter(|user| verify_password(&password, &user.password))
                .map(AuthUser)
                .ok_or_else(|| ErrorUnauthorized("invalid credentials"))
        })
    }
}

// ============================================================================
// Unit Tests
// ============================================================================
