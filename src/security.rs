// Password hashing for seeded principals
// bcrypt, so hashes stay verifiable by the portal's existing login flow

use bcrypt::{hash, verify};
use thiserror::Error;

/// Cost factor the portal has always used for stored password hashes
pub const BCRYPT_COST: u32 = 10;

#[derive(Error, Debug)]
pub enum PasswordError {
    #[error("Password hashing failed: {0}")]
    Hashing(#[from] bcrypt::BcryptError),

    #[error("Password hashing task failed: {0}")]
    Join(String),
}

/// Hash `password` on the blocking pool (bcrypt is CPU-bound)
pub async fn hash_password(password: &str) -> Result<String, PasswordError> {
    let password = password.to_string();
    tokio::task::spawn_blocking(move || hash(password, BCRYPT_COST).map_err(PasswordError::from))
        .await
        .map_err(|e| PasswordError::Join(e.to_string()))?
}

/// `Ok(false)` on mismatch; `Err` when `hash` is not a bcrypt hash
pub async fn verify_password(password: &str, hash: &str) -> Result<bool, PasswordError> {
    let password = password.to_string();
    let hash = hash.to_string();
    tokio::task::spawn_blocking(move || verify(password, &hash).map_err(PasswordError::from))
        .await
        .map_err(|e| PasswordError::Join(e.to_string()))?
}
