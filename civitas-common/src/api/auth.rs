//! Identity primitives: password hashing, session tokens, webhook signatures
//!
//! # Architecture
//!
//! - Passwords are stored as iterated, salted SHA-256 digests (64 hex chars)
//!   next to a random per-user salt.
//! - Session tokens are 32 random bytes rendered as hex. Only the SHA-256 of
//!   a token is persisted, so a leaked database cannot be replayed.
//! - Inbound webhooks are authenticated with HMAC-SHA256 over the raw body.
//!
//! No HTTP framework dependencies live here; the axum middleware is in
//! `civitas-api`.

use hmac::{Hmac, Mac};
use rand::RngCore;
use sha2::{Digest, Sha256};

type HmacSha256 = Hmac<Sha256>;

/// Number of SHA-256 rounds applied to a password
pub const PASSWORD_HASH_ROUNDS: u32 = 10_000;

/// Authentication primitive errors
#[derive(Debug, Clone, PartialEq)]
pub enum AuthPrimitiveError {
    /// Signature header was not valid hex
    MalformedSignature,
    /// Signature did not match the body
    SignatureMismatch,
    /// Secret could not be used as an HMAC key
    InvalidKey,
}

impl std::fmt::Display for AuthPrimitiveError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AuthPrimitiveError::MalformedSignature => write!(f, "Malformed signature"),
            AuthPrimitiveError::SignatureMismatch => write!(f, "Signature mismatch"),
            AuthPrimitiveError::InvalidKey => write!(f, "Invalid HMAC key"),
        }
    }
}

impl std::error::Error for AuthPrimitiveError {}

// ========================================
// Passwords
// ========================================

/// Generate a random 16-byte salt as 32 hex characters
pub fn generate_salt() -> String {
    let mut bytes = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

/// Hash a password with the given salt
///
/// # Algorithm
///
/// 1. `digest = SHA-256(salt || password)`
/// 2. Repeat `PASSWORD_HASH_ROUNDS - 1` times: `digest = SHA-256(digest || salt)`
/// 3. Return as 64 hex characters
///
/// # Examples
///
/// ```
/// use civitas_common::api::auth::hash_password;
///
/// let a = hash_password("correct horse", "abcd");
/// let b = hash_password("correct horse", "abcd");
/// assert_eq!(a, b);
/// assert_eq!(a.len(), 64);
/// assert_ne!(a, hash_password("correct horse", "efgh"));
/// ```
pub fn hash_password(password: &str, salt: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(salt.as_bytes());
    hasher.update(password.as_bytes());
    let mut digest = hasher.finalize();

    for _ in 1..PASSWORD_HASH_ROUNDS {
        let mut hasher = Sha256::new();
        hasher.update(digest);
        hasher.update(salt.as_bytes());
        digest = hasher.finalize();
    }

    hex::encode(digest)
}

/// Check a password against a stored hash and salt
pub fn verify_password(password: &str, salt: &str, stored_hash: &str) -> bool {
    constant_time_eq(hash_password(password, salt).as_bytes(), stored_hash.as_bytes())
}

// ========================================
// Session tokens
// ========================================

/// Generate an opaque bearer token (64 hex characters)
pub fn generate_session_token() -> String {
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

/// Digest under which a session token is persisted
pub fn hash_token(token: &str) -> String {
    hex::encode(Sha256::digest(token.as_bytes()))
}

// ========================================
// Webhook signatures
// ========================================

/// HMAC-SHA256 of `body` keyed with `secret`, as lowercase hex
///
/// # Examples
///
/// ```
/// use civitas_common::api::auth::{sign_webhook, verify_webhook_signature};
///
/// let body = br#"{"message":{"id":"wamid.1"}}"#;
/// let sig = sign_webhook("s3cret", body).unwrap();
/// assert!(verify_webhook_signature("s3cret", body, &sig).is_ok());
/// assert!(verify_webhook_signature("other", body, &sig).is_err());
/// ```
pub fn sign_webhook(secret: &str, body: &[u8]) -> Result<String, AuthPrimitiveError> {
    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).map_err(|_| AuthPrimitiveError::InvalidKey)?;
    mac.update(body);
    Ok(hex::encode(mac.finalize().into_bytes()))
}

/// Verify a webhook signature header (`<hex>` or `sha256=<hex>`)
pub fn verify_webhook_signature(
    secret: &str,
    body: &[u8],
    provided: &str,
) -> Result<(), AuthPrimitiveError> {
    let provided = provided.trim();
    let provided = provided.strip_prefix("sha256=").unwrap_or(provided);
    let expected = hex::decode(provided).map_err(|_| AuthPrimitiveError::MalformedSignature)?;

    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).map_err(|_| AuthPrimitiveError::InvalidKey)?;
    mac.update(body);
    mac.verify_slice(&expected)
        .map_err(|_| AuthPrimitiveError::SignatureMismatch)
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b.iter()).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

// ========================================
// Tests
// ========================================
