// Upload admission and key allocation for lecture videos

use super::reference::ObjectKey;
use super::MediaError;
use chrono::Utc;
use uuid::Uuid;

/// Prefix every uploaded video is stored under
pub const UPLOAD_PREFIX: &str = "videos";

/// 500 MB
pub const MAX_UPLOAD_BYTES: u64 = 500 * 1024 * 1024;

pub const ALLOWED_VIDEO_TYPES: &[&str] = &["video/mp4", "video/webm", "video/ogg", "video/quicktime"];

/// Accept only the playable video formats, up to [`MAX_UPLOAD_BYTES`].
/// MIME parameters (`; codecs=...`) and case are ignored.
pub fn validate_upload(content_type: &str, size: u64) -> Result<(), MediaError> {
    let essence = content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase();
    if !ALLOWED_VIDEO_TYPES.contains(&essence.as_str()) {
        return Err(MediaError::UnsupportedType(content_type.to_string()));
    }
    if size > MAX_UPLOAD_BYTES {
        return Err(MediaError::TooLarge {
            size,
            limit: MAX_UPLOAD_BYTES,
        });
    }
    Ok(())
}

/// Fresh key `videos/{millis}-{random}{.ext}` keeping the original file extension
pub fn upload_key(original_name: &str) -> ObjectKey {
    let suffix = (Uuid::new_v4().as_u128() % 1_000_000_001) as u64;
    upload_key_with(Utc::now().timestamp_millis(), suffix, original_name)
}

fn upload_key_with(millis: i64, suffix: u64, original_name: &str) -> ObjectKey {
    ObjectKey(format!(
        "{}/{}-{}{}",
        UPLOAD_PREFIX,
        millis,
        suffix,
        extension(original_name)
    ))
}

/// `.ext` of the final path component, or empty. Extensions that are not plain
/// alphanumerics are dropped so the key stays a single clean segment.
fn extension(original_name: &str) -> String {
    std::path::Path::new(original_name)
        .extension()
        .and_then(|ext| ext.to_str())
        .filter(|ext| !ext.is_empty() && ext.chars().all(|c| c.is_ascii_alphanumeric()))
        .map(|ext| format!(".{}", ext))
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_allowed_types() {
        for content_type in ALLOWED_VIDEO_TYPES {
            assert!(validate_upload(content_type, 1).is_ok(), "{}", content_type);
        }
        assert!(validate_upload("Video/MP4; codecs=avc1", 1).is_ok());
    }

    #[test]
    fn test_rejected_types() {
        for content_type in ["video/x-msvideo", "image/png", "application/octet-stream", ""] {
            assert_eq!(
                validate_upload(content_type, 1),
                Err(MediaError::UnsupportedType(content_type.to_string()))
            );
        }
    }

    #[test]
    fn test_size_limit_is_inclusive() {
        assert!(validate_upload("video/mp4", MAX_UPLOAD_BYTES).is_ok());
        assert_eq!(
            validate_upload("video/mp4", MAX_UPLOAD_BYTES + 1),
            Err(MediaError::TooLarge {
                size: MAX_UPLOAD_BYTES + 1,
                limit: MAX_UPLOAD_BYTES
            })
        );
    }

    #[test]
    fn test_key_shape() {
        assert_eq!(
            upload_key_with(1_700_000_000_123, 42, "Lecture 1.mp4").as_str(),
            "videos/1700000000123-42.mp4"
        );
        assert_eq!(
            upload_key_with(1, 2, "notes/clip.MOV").as_str(),
            "videos/1-2.MOV"
        );
        assert_eq!(upload_key_with(1, 2, "no_extension").as_str(), "videos/1-2");
        assert_eq!(upload_key_with(1, 2, ".hidden").as_str(), "videos/1-2");
        assert_eq!(upload_key_with(1, 2, "weird.m p4").as_str(), "videos/1-2");
    }

    #[test]
    fn test_generated_keys_are_unique_and_prefixed() {
        let a = upload_key("a.webm");
        let b = upload_key("a.webm");
        assert_ne!(a, b);
        assert!(a.as_str().starts_with("videos/"));
        assert!(a.as_str().ends_with(".webm"));
    }
}
