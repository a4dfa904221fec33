// Object storage settings

use crate::config::{self, ConfigError, EnvLookup};

pub const DEFAULT_REGION: &str = "us-east-1";

/// Where media objects live and how to reach the bucket
#[derive(Clone)]
pub struct MediaConfig {
    pub region: String,
    pub bucket: String,
    pub access_key_id: Option<String>,
    pub secret_access_key: Option<String>,
    /// S3-compatible endpoint (MinIO, LocalStack); `None` means AWS
    pub endpoint: Option<String>,
}

impl MediaConfig {
    pub fn new(bucket: impl Into<String>, region: impl Into<String>) -> Self {
        Self {
            region: region.into(),
            bucket: bucket.into(),
            access_key_id: None,
            secret_access_key: None,
            endpoint: None,
        }
    }

    /// `S3_BUCKET_NAME` is required; everything else has a default or is optional
    pub fn from_lookup(env: &dyn EnvLookup) -> Result<Self, ConfigError> {
        Ok(Self {
            region: config::string_or(env, "AWS_REGION", DEFAULT_REGION),
            bucket: config::required(env, "S3_BUCKET_NAME")?,
            access_key_id: config::non_empty(env, "AWS_ACCESS_KEY_ID"),
            secret_access_key: config::non_empty(env, "AWS_SECRET_ACCESS_KEY"),
            endpoint: config::non_empty(env, "S3_ENDPOINT"),
        })
    }
}

impl std::fmt::Debug for MediaConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MediaConfig")
            .field("region", &self.region)
            .field("bucket", &self.bucket)
            .field("access_key_id", &self.access_key_id.as_ref().map(|_| "<set>"))
            .field("secret_access_key", &self.secret_access_key.as_ref().map(|_| "<redacted>"))
            .field("endpoint", &self.endpoint)
            .finish()
    }
}
