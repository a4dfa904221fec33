// Media Module
// Canonicalizes stored object references, issues time-limited read URLs,
// admits new uploads and removes objects

pub mod config;
pub mod reference;
pub mod signer;
pub mod upload;

pub use config::MediaConfig;
pub use reference::{preferred_reference, resolve_key, ObjectKey};
pub use signer::{
    MediaResolver, ObjectWriter, S3Signer, SignedItem, SignedUrl, UrlSigner, DEFAULT_TTL, MAX_TTL,
};
pub use upload::{upload_key, validate_upload, ALLOWED_VIDEO_TYPES, MAX_UPLOAD_BYTES};

use thiserror::Error;

/// Media errors. Each one is scoped to the single reference or call that produced it.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MediaError {
    #[error("Missing S3 key or URL")]
    MissingReference,

    #[error("Invalid object reference '{reference}': {reason}")]
    InvalidReference { reference: String, reason: String },

    #[error("Invalid object key '{key}': {reason}")]
    InvalidKey { key: String, reason: String },

    #[error("Signed URL lifetime must be between 1 second and 7 days, got {0}s")]
    InvalidTtl(u64),

    #[error("Failed to sign URL for '{key}': {message}")]
    Signing { key: String, message: String },

    #[error("Invalid file type '{0}'. Only video files are allowed.")]
    UnsupportedType(String),

    #[error("Upload of {size} bytes exceeds the {limit} byte limit")]
    TooLarge { size: u64, limit: u64 },

    #[error("Object storage request for '{key}' failed: {message}")]
    Storage { key: String, message: String },

    #[error("Object storage configuration error: {0}")]
    Config(String),
}
