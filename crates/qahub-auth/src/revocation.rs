//! Revoked-token set.
//!
//! `Logout` records the token here so the interceptor can reject it before
//! its natural expiry. Entries carry the token's own expiry and are purged
//! once that has passed; tokens are stored by SHA-256 digest only.

use rusqlite::{params, Connection, OptionalExtension};
use sha2::{Digest, Sha256};
use std::time::Duration;

use crate::AuthError;

/// Hex SHA-256 of the raw token string.
pub fn token_digest(token: &str) -> String {
    hex::encode(Sha256::digest(token.as_bytes()))
}

/// Marks `token` revoked for `remaining_ttl` from `now`.
///
/// A token whose remaining lifetime is already zero needs no entry and is
/// skipped. Revoking twice keeps the later expiry.
pub fn revoke(
    conn: &Connection,
    token: &str,
    remaining_ttl: Duration,
    now: i64,
) -> Result<bool, AuthError> {
    let ttl = i64::try_from(remaining_ttl.as_secs()).unwrap_or(i64::MAX);
    if ttl <= 0 {
        return Ok(false);
    }
    let expires_at = now.saturating_add(ttl);

    conn.execute(
        "INSERT INTO revoked_tokens (token_digest, expires_at, revoked_at)
         VALUES (?1, ?2, ?3)
         ON CONFLICT(token_digest) DO UPDATE SET
             expires_at = MAX(revoked_tokens.expires_at, excluded.expires_at),
             revoked_at = excluded.revoked_at",
        params![token_digest(token), expires_at, now],
    )?;

    tracing::debug!(expires_at, "token revoked");
    Ok(true)
}

/// Whether `token` is in the revocation set at `now`.
pub fn is_revoked(conn: &Connection, token: &str, now: i64) -> Result<bool, AuthError> {
    let hit = conn
        .query_row(
            "SELECT 1 FROM revoked_tokens WHERE token_digest = ?1 AND expires_at > ?2",
            params![token_digest(token), now],
            |_| Ok(()),
        )
        .optional()?;
    Ok(hit.is_some())
}

/// Deletes entries whose token has expired anyway. Returns the number removed.
pub fn purge_expired(conn: &Connection, now: i64) -> Result<usize, AuthError> {
    let removed = conn.execute(
        "DELETE FROM revoked_tokens WHERE expires_at <= ?1",
        params![now],
    )?;
    Ok(removed)
}
