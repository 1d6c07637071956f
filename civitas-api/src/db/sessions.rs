//! Bearer session persistence
//!
//! Only the SHA-256 of a token is stored; the raw token exists solely in the
//! login response and the client's `Authorization` header.

use chrono::{DateTime, TimeZone, Utc};
use civitas_common::api::{generate_session_token, hash_token};
use civitas_common::models::parse_uuid;
use civitas_common::time::unix_seconds;
use civitas_common::{Error, Result};
use sqlx::SqlitePool;
use uuid::Uuid;

/// A freshly issued session
#[derive(Debug, Clone)]
pub struct IssuedSession {
    pub token: String,
    pub expires_at: DateTime<Utc>,
}

pub async fn create_session(
    pool: &SqlitePool,
    user_id: Uuid,
    ttl_hours: i64,
) -> Result<IssuedSession> {
    let token = generate_session_token();
    let created = unix_seconds();
    let expires = ttl_hours
        .checked_mul(3600)
        .and_then(|seconds| created.checked_add(seconds))
        .ok_or_else(|| Error::InvalidInput(format!("session lifetime {}h out of range", ttl_hours)))?;

    sqlx::query(
        "INSERT INTO sessions (token_hash, user_id, created_at, expires_at) VALUES (?, ?, ?, ?)",
    )
    .bind(hash_token(&token))
    .bind(user_id.to_string())
    .bind(created)
    .bind(expires)
    .execute(pool)
    .await?;

    let expires_at = Utc
        .timestamp_opt(expires, 0)
        .single()
        .ok_or_else(|| Error::Internal(format!("session expiry {} out of range", expires)))?;

    Ok(IssuedSession { token, expires_at })
}

/// Resolve a raw token to its user id
///
/// Unknown, expired or inactive-user sessions resolve to `None`.
pub async fn resolve_session(pool: &SqlitePool, token: &str) -> Result<Option<Uuid>> {
    let user_id: Option<String> = sqlx::query_scalar(
        r#"
        SELECT s.user_id
        FROM sessions s
        JOIN users u ON u.id = s.user_id
        WHERE s.token_hash = ? AND s.expires_at > ? AND u.is_active = 1
        "#,
    )
    .bind(hash_token(token))
    .bind(unix_seconds())
    .fetch_optional(pool)
    .await?;

    user_id.as_deref().map(parse_uuid).transpose()
}

/// Revoke one session; returns false when it did not exist
pub async fn revoke_session(pool: &SqlitePool, token: &str) -> Result<bool> {
    let result = sqlx::query("DELETE FROM sessions WHERE token_hash = ?")
        .bind(hash_token(token))
        .execute(pool)
        .await?;
    Ok(result.rows_affected() > 0)
}

/// Revoke every session of a user
pub async fn revoke_user_sessions(pool: &SqlitePool, user_id: Uuid) -> Result<u64> {
    let result = sqlx::query("DELETE FROM sessions WHERE user_id = ?")
        .bind(user_id.to_string())
        .execute(pool)
        .await?;
    Ok(result.rows_affected())
}

pub async fn purge_expired_sessions(pool: &SqlitePool) -> Result<u64> {
    let result = sqlx::query("DELETE FROM sessions WHERE expires_at <= ?")
        .bind(unix_seconds())
        .execute(pool)
        .await?;
    Ok(result.rows_affected())
}
