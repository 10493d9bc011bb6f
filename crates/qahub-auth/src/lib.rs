//! Authentication primitives shared by every QAHub service.
//!
//! - [`TokenAuthority`] issues and parses short-lived HMAC-signed bearer
//!   tokens.
//! - [`Identity`] is the authenticated principal attached to a call.
//! - [`revocation`] keeps the set of logged-out tokens until they expire.
//! - [`accounts`] stores usernames and bcrypt password hashes for `Login`.

pub mod accounts;
mod error;
mod identity;
pub mod revocation;
mod token;

pub use accounts::User;
pub use error::AuthError;
pub use identity::{Claims, Identity};
pub use token::{IssuedToken, TokenAuthority, TokenError};
