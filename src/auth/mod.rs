//! Authentication
//!
//! Password hashing, signed session tokens and the session cookie.

pub mod cookie;
pub mod password;
pub mod token;

pub use cookie::{clear_session_cookie, session_cookie, session_token, SESSION_COOKIE};
pub use password::{hash_password, hash_password_off_thread, verify_password, verify_password_off_thread};
pub use token::{Claims, TokenSigner, SESSION_TTL_SECS};

use rand::RngCore;
use thiserror::Error;

/// Lifetime of a password reset token.
pub const RESET_TOKEN_TTL_SECS: i64 = 60 * 60;

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("password hashing failed: {0}")]
    Hash(String),
    #[error("malformed session token")]
    Malformed,
    #[error("session token signature mismatch")]
    BadSignature,
    #[error("session token expired")]
    Expired,
}

/// 32 random bytes, hex encoded.
pub fn new_reset_token() -> String {
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}
