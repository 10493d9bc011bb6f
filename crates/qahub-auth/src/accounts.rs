//! User accounts backing `Register` and `Login`.

use rusqlite::{params, Connection, ErrorCode, OptionalExtension};
use serde::Serialize;

use crate::AuthError;

/// bcrypt cost used when the configuration does not override it.
pub const DEFAULT_BCRYPT_COST: u32 = 10;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct User {
    pub id: i64,
    pub username: String,
    pub created_at: String,
}

pub fn hash_password(password: &str, cost: u32) -> Result<String, AuthError> {
    Ok(bcrypt::hash(password, cost)?)
}

pub fn verify_password(password: &str, hash: &str) -> Result<bool, AuthError> {
    Ok(bcrypt::verify(password, hash)?)
}

/// Creates an account. Usernames are unique and case-sensitive.
pub fn create_user(
    conn: &Connection,
    username: &str,
    password: &str,
    cost: u32,
) -> Result<User, AuthError> {
    let username = username.trim();
    if username.is_empty() {
        return Err(AuthError::InvalidInput("username must not be empty".into()));
    }
    if password.is_empty() {
        return Err(AuthError::InvalidInput("password must not be empty".into()));
    }

    let hash = hash_password(password, cost)?;
    let inserted = conn.query_row(
        "INSERT INTO users (username, password_hash) VALUES (?1, ?2)
         RETURNING id, username, created_at",
        params![username, hash],
        row_to_user,
    );

    match inserted {
        Ok(user) => {
            tracing::info!(user_id = user.id, "user registered");
            Ok(user)
        }
        Err(rusqlite::Error::SqliteFailure(e, _)) if e.code == ErrorCode::ConstraintViolation => {
            Err(AuthError::UsernameTaken(username.to_string()))
        }
        Err(e) => Err(e.into()),
    }
}

/// Checks a username/password pair and returns the account on success.
pub fn authenticate(conn: &Connection, username: &str, password: &str) -> Result<User, AuthError> {
    let row = conn
        .query_row(
            "SELECT id, username, created_at, password_hash FROM users WHERE username = ?1",
            params![username.trim()],
            |row| Ok((row_to_user(row)?, row.get::<_, String>(3)?)),
        )
        .optional()?;

    let Some((user, hash)) = row else {
        return Err(AuthError::InvalidCredentials);
    };
    if !verify_password(password, &hash)? {
        return Err(AuthError::InvalidCredentials);
    }
    Ok(user)
}

pub fn get_user(conn: &Connection, id: i64) -> Result<User, AuthError> {
    conn.query_row(
        "SELECT id, username, created_at FROM users WHERE id = ?1",
        params![id],
        row_to_user,
    )
    .optional()?
    .ok_or(AuthError::UserNotFound(id))
}

fn row_to_user(row: &rusqlite::Row<'_>) -> rusqlite::Result<User> {
    Ok(User {
        id: row.get(0)?,
        username: row.get(1)?,
        created_at: row.get(2)?,
    })
}
