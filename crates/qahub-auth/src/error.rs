use crate::token::TokenError;

/// Errors from account and revocation operations.
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("auth database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error(transparent)]
    Token(#[from] TokenError),

    #[error("password hashing failed: {0}")]
    Password(#[from] bcrypt::BcryptError),

    /// Unknown username or wrong password. Deliberately does not say which.
    #[error("invalid username or password")]
    InvalidCredentials,

    #[error("username already taken: {0}")]
    UsernameTaken(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("user not found: {0}")]
    UserNotFound(i64),
}
