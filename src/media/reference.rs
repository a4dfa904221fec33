// Object reference resolution
// Stored media references are either bare keys or one of several S3 URL shapes

use super::MediaError;
use serde::Serialize;
use std::fmt;
use url::Url;

/// Canonical key of an object inside the configured bucket. Never empty.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct ObjectKey(pub(super) String);

impl ObjectKey {
    pub fn new(key: impl Into<String>) -> Result<Self, MediaError> {
        let key = key.into();
        if key.is_empty() {
            return Err(MediaError::InvalidKey {
                key,
                reason: "empty key".to_string(),
            });
        }
        Ok(Self(key))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for ObjectKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Video rows carry both a key column and a legacy URL column; the key wins when present
pub fn preferred_reference<'a>(s3_key: Option<&'a str>, s3_url: Option<&'a str>) -> Option<&'a str> {
    s3_key
        .filter(|k| !k.trim().is_empty())
        .or_else(|| s3_url.filter(|u| !u.trim().is_empty()))
}

fn looks_like_url(reference: &str) -> bool {
    reference.starts_with("http://")
        || reference.starts_with("https://")
        || reference.contains("amazonaws.com")
}

fn invalid(reference: &str, reason: impl Into<String>) -> MediaError {
    MediaError::InvalidReference {
        reference: reference.to_string(),
        reason: reason.into(),
    }
}

/// Resolve a stored reference to the key inside `bucket`.
///
/// Bare keys pass through untouched. URLs are matched in order:
/// virtual-hosted (`{bucket}.s3...amazonaws.com/key`), path-style
/// (`.../{bucket}/key`), then the whole path as a last resort.
pub fn resolve_key(reference: &str, bucket: &str) -> Result<ObjectKey, MediaError> {
    if reference.trim().is_empty() {
        return Err(MediaError::MissingReference);
    }

    if !looks_like_url(reference) {
        return Ok(ObjectKey(reference.to_string()));
    }

    let parsed = Url::parse(reference).map_err(|e| invalid(reference, e.to_string()))?;
    let path = parsed.path();
    let host = parsed.host_str().unwrap_or_default();

    let host_prefix = format!("{}.", bucket);
    let path_segment = format!("/{}/", bucket);

    let raw_key = if !bucket.is_empty() && host.starts_with(&host_prefix) {
        path.trim_start_matches('/')
    } else if let Some(pos) = path.find(&path_segment).filter(|_| !bucket.is_empty()) {
        &path[pos + path_segment.len()..]
    } else {
        path.trim_start_matches('/')
    };

    let decoded = urlencoding::decode(raw_key).map_err(|e| invalid(reference, e.to_string()))?;
    if decoded.is_empty() {
        return Err(invalid(reference, "URL does not name an object"));
    }

    Ok(ObjectKey(decoded.into_owned()))
}
