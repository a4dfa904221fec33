// Signed URL issuance and object writes
// Every URL is generated on demand with its own expiry; nothing is cached

use super::config::MediaConfig;
use super::reference::{resolve_key, ObjectKey};
use super::upload::{upload_key, validate_upload};
use super::MediaError;
use chrono::{DateTime, Utc};
use futures::future::join_all;
use object_store::aws::{AmazonS3, AmazonS3Builder};
use object_store::path::Path;
use object_store::signer::Signer;
use object_store::{Attribute, AttributeValue, Attributes, ObjectStore, PutOptions, PutPayload};
use serde::{Serialize, Serializer};
use std::sync::Arc;
use std::time::Duration;
use url::Url;

pub const DEFAULT_TTL: Duration = Duration::from_secs(3600);
pub const MIN_TTL: Duration = Duration::from_secs(1);
pub const MAX_TTL: Duration = Duration::from_secs(7 * 24 * 3600);

/// Message exposed to clients when one item of a batch cannot be signed
pub const BATCH_ITEM_ERROR: &str = "Failed to generate video URL";

/// Produces read-only pre-signed URLs for object paths
#[async_trait::async_trait]
pub trait UrlSigner: Send + Sync {
    async fn signed_get(&self, path: &Path, ttl: Duration) -> Result<Url, MediaError>;
}

/// Stores and removes objects in the bucket
#[async_trait::async_trait]
pub trait ObjectWriter: Send + Sync {
    async fn put(&self, path: &Path, content_type: &str, data: Vec<u8>) -> Result<(), MediaError>;

    /// Removing a missing object succeeds
    async fn delete(&self, path: &Path) -> Result<(), MediaError>;
}

fn storage_error(path: &Path, e: object_store::Error) -> MediaError {
    MediaError::Storage {
        key: path.to_string(),
        message: e.to_string(),
    }
}

/// SigV4 query-string signing against S3 or an S3-compatible endpoint
pub struct S3Signer {
    store: AmazonS3,
}

impl S3Signer {
    pub fn from_config(config: &MediaConfig) -> Result<Self, MediaError> {
        let mut builder = AmazonS3Builder::new()
            .with_bucket_name(&config.bucket)
            .with_region(&config.region);

        if let Some(endpoint) = &config.endpoint {
            builder = builder
                .with_endpoint(endpoint)
                .with_virtual_hosted_style_request(false);
            if endpoint.starts_with("http://") {
                builder = builder.with_allow_http(true);
            }
        }
        if let Some(access_key_id) = &config.access_key_id {
            builder = builder.with_access_key_id(access_key_id);
        }
        if let Some(secret_access_key) = &config.secret_access_key {
            builder = builder.with_secret_access_key(secret_access_key);
        }

        let store = builder
            .build()
            .map_err(|e| MediaError::Config(format!("S3: {}", e)))?;
        Ok(Self { store })
    }
}

#[async_trait::async_trait]
impl UrlSigner for S3Signer {
    async fn signed_get(&self, path: &Path, ttl: Duration) -> Result<Url, MediaError> {
        self.store
            .signed_url(http::Method::GET, path, ttl)
            .await
            .map_err(|e| MediaError::Signing {
                key: path.to_string(),
                message: e.to_string(),
            })
    }
}

#[async_trait::async_trait]
impl ObjectWriter for S3Signer {
    async fn put(&self, path: &Path, content_type: &str, data: Vec<u8>) -> Result<(), MediaError> {
        let attributes = Attributes::from_iter([(
            Attribute::ContentType,
            AttributeValue::from(content_type.to_string()),
        )]);
        let opts = PutOptions {
            attributes,
            ..Default::default()
        };
        self.store
            .put_opts(path, PutPayload::from(data), opts)
            .await
            .map(|_| ())
            .map_err(|e| storage_error(path, e))
    }

    async fn delete(&self, path: &Path) -> Result<(), MediaError> {
        self.store
            .delete(path)
            .await
            .map_err(|e| storage_error(path, e))
    }
}

/// A freshly issued access URL
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SignedUrl {
    pub key: ObjectKey,
    pub url: Url,
    pub expires_at: DateTime<Utc>,
}

/// Outcome for one item of [`MediaResolver::sign_batch`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedItem {
    pub id: i64,
    pub reference: String,
    pub result: Result<SignedUrl, MediaError>,
}

impl SignedItem {
    pub fn url(&self) -> Option<&Url> {
        self.result.as_ref().ok().map(|signed| &signed.url)
    }

    pub fn is_ok(&self) -> bool {
        self.result.is_ok()
    }
}

/// Serialized the way list endpoints embed it: `videoUrl` is null and `error`
/// carries a generic message when signing failed.
impl Serialize for SignedItem {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        #[derive(Serialize)]
        #[serde(rename_all = "camelCase")]
        struct Wire<'a> {
            id: i64,
            video_url: Option<&'a str>,
            #[serde(skip_serializing_if = "Option::is_none")]
            expires_at: Option<DateTime<Utc>>,
            #[serde(skip_serializing_if = "Option::is_none")]
            error: Option<&'static str>,
        }

        let wire = match &self.result {
            Ok(signed) => Wire {
                id: self.id,
                video_url: Some(signed.url.as_str()),
                expires_at: Some(signed.expires_at),
                error: None,
            },
            Err(_) => Wire {
                id: self.id,
                video_url: None,
                expires_at: None,
                error: Some(BATCH_ITEM_ERROR),
            },
        };
        wire.serialize(serializer)
    }
}

/// Resolves stored references against one bucket and signs them.
/// Uploads and deletes need an [`ObjectWriter`] as well.
pub struct MediaResolver {
    signer: Arc<dyn UrlSigner>,
    writer: Option<Arc<dyn ObjectWriter>>,
    bucket: String,
    default_ttl: Duration,
}

impl MediaResolver {
    pub fn new(signer: Arc<dyn UrlSigner>, bucket: impl Into<String>) -> Self {
        Self {
            signer,
            writer: None,
            bucket: bucket.into(),
            default_ttl: DEFAULT_TTL,
        }
    }

    /// Resolver backed by [`S3Signer`]
    pub fn from_config(config: &MediaConfig) -> Result<Self, MediaError> {
        let signer = S3Signer::from_config(config)?;
        tracing::info!(
            bucket = %config.bucket,
            region = %config.region,
            endpoint = config.endpoint.as_deref().unwrap_or("aws"),
            "Media signer configured"
        );
        let store = Arc::new(signer);
        Ok(Self::new(Arc::clone(&store) as Arc<dyn UrlSigner>, config.bucket.clone()).with_writer(store))
    }

    pub fn with_writer(mut self, writer: Arc<dyn ObjectWriter>) -> Self {
        self.writer = Some(writer);
        self
    }

    pub fn with_default_ttl(mut self, ttl: Duration) -> Result<Self, MediaError> {
        check_ttl(ttl)?;
        self.default_ttl = ttl;
        Ok(self)
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    pub fn default_ttl(&self) -> Duration {
        self.default_ttl
    }

    pub fn resolve(&self, reference: &str) -> Result<ObjectKey, MediaError> {
        resolve_key(reference, &self.bucket)
    }

    /// Issue a GET URL for `key` valid for `ttl`
    pub async fn sign(&self, key: &ObjectKey, ttl: Duration) -> Result<SignedUrl, MediaError> {
        check_ttl(ttl)?;
        let path = object_path(key)?;

        let issued_at = Utc::now();
        let url = self.signer.signed_get(&path, ttl).await?;
        let lifetime = chrono::Duration::from_std(ttl).map_err(|_| MediaError::InvalidTtl(ttl.as_secs()))?;

        Ok(SignedUrl {
            key: key.clone(),
            url,
            expires_at: issued_at + lifetime,
        })
    }

    /// Resolve then sign with the default lifetime
    pub async fn sign_reference(&self, reference: &str) -> Result<SignedUrl, MediaError> {
        let key = self.resolve(reference)?;
        self.sign(&key, self.default_ttl).await
    }

    /// Sign every `(id, reference)` pair concurrently. Output order matches input order
    /// and one failing item never affects the others.
    pub async fn sign_batch<I>(&self, items: I) -> Vec<SignedItem>
    where
        I: IntoIterator<Item = (i64, String)>,
    {
        let futures = items.into_iter().map(|(id, reference)| async move {
            let result = self.sign_reference(&reference).await;
            if let Err(e) = &result {
                tracing::warn!(id, %reference, error = %e, "Failed to generate signed URL");
            }
            SignedItem {
                id,
                reference,
                result,
            }
        });
        join_all(futures).await
    }

    /// Admit an upload and store it under a freshly allocated `videos/` key
    pub async fn upload(
        &self,
        original_name: &str,
        content_type: &str,
        data: Vec<u8>,
    ) -> Result<ObjectKey, MediaError> {
        let size = data.len() as u64;
        validate_upload(content_type, size)?;
        let writer = self.writer()?;

        let key = upload_key(original_name);
        let path = object_path(&key)?;
        writer.put(&path, content_type, data).await?;

        tracing::info!(key = %key, size, content_type, "Uploaded object");
        Ok(key)
    }

    /// Remove the object at `key`
    pub async fn delete(&self, key: &ObjectKey) -> Result<(), MediaError> {
        let writer = self.writer()?;
        let path = object_path(key)?;
        writer.delete(&path).await?;
        tracing::info!(key = %key, "Deleted object");
        Ok(())
    }

    /// Resolve a stored reference, then delete the object it names
    pub async fn delete_reference(&self, reference: &str) -> Result<ObjectKey, MediaError> {
        let key = self.resolve(reference)?;
        self.delete(&key).await?;
        Ok(key)
    }

    fn writer(&self) -> Result<&Arc<dyn ObjectWriter>, MediaError> {
        self.writer
            .as_ref()
            .ok_or_else(|| MediaError::Config("no object writer configured".to_string()))
    }
}

/// Parse `key` as an object path. `Path::parse` trims leading and trailing `/`,
/// which would address a different object than the one named, so any change is rejected.
fn object_path(key: &ObjectKey) -> Result<Path, MediaError> {
    let path = Path::parse(key.as_str()).map_err(|e| MediaError::InvalidKey {
        key: key.to_string(),
        reason: e.to_string(),
    })?;
    if path.as_ref() != key.as_str() {
        return Err(MediaError::InvalidKey {
            key: key.to_string(),
            reason: format!("key does not round-trip as an object path (parsed as '{}')", path),
        });
    }
    Ok(path)
}

fn check_ttl(ttl: Duration) -> Result<(), MediaError> {
    if ttl < MIN_TTL || ttl > MAX_TTL {
        return Err(MediaError::InvalidTtl(ttl.as_secs()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// Signs deterministically; any path containing "broken" fails
    #[derive(Default)]
    struct FakeSigner {
        calls: AtomicUsize,
    }

    #[async_trait::async_trait]
    impl UrlSigner for FakeSigner {
        async fn signed_get(&self, path: &Path, ttl: Duration) -> Result<Url, MediaError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if path.as_ref().contains("broken") {
                return Err(MediaError::Signing {
                    key: path.to_string(),
                    message: "signature rejected".to_string(),
                });
            }
            Url::parse(&format!(
                "https://lectures.s3.amazonaws.com/{}?X-Amz-Expires={}&n={}",
                path,
                ttl.as_secs(),
                n
            ))
            .map_err(|e| MediaError::Signing {
                key: path.to_string(),
                message: e.to_string(),
            })
        }
    }

    /// Records writes; any path containing "locked" fails
    #[derive(Default)]
    struct FakeWriter {
        puts: Mutex<Vec<(String, String, usize)>>,
        deletes: Mutex<Vec<String>>,
    }

    #[async_trait::async_trait]
    impl ObjectWriter for FakeWriter {
        async fn put(&self, path: &Path, content_type: &str, data: Vec<u8>) -> Result<(), MediaError> {
            self.puts
                .lock()
                .unwrap()
                .push((path.to_string(), content_type.to_string(), data.len()));
            Ok(())
        }

        async fn delete(&self, path: &Path) -> Result<(), MediaError> {
            if path.as_ref().contains("locked") {
                return Err(MediaError::Storage {
                    key: path.to_string(),
                    message: "access denied".to_string(),
                });
            }
            self.deletes.lock().unwrap().push(path.to_string());
            Ok(())
        }
    }

    fn writable() -> (Arc<FakeWriter>, MediaResolver) {
        let writer = Arc::new(FakeWriter::default());
        let (_, resolver) = resolver();
        let resolver = resolver.with_writer(Arc::clone(&writer) as Arc<dyn ObjectWriter>);
        (writer, resolver)
    }

    fn resolver() -> (Arc<FakeSigner>, MediaResolver) {
        let signer = Arc::new(FakeSigner::default());
        let resolver = MediaResolver::new(Arc::clone(&signer) as Arc<dyn UrlSigner>, "lectures");
        (signer, resolver)
    }

    #[tokio::test]
    async fn test_sign_reference_uses_default_ttl() {
        let (_, resolver) = resolver();
        let before = Utc::now();
        let signed = resolver
            .sign_reference("https://lectures.s3.amazonaws.com/videos/123.mp4")
            .await
            .unwrap();

        assert_eq!(signed.key.as_str(), "videos/123.mp4");
        assert!(signed.url.as_str().contains("X-Amz-Expires=3600"));
        assert!(signed.expires_at >= before + chrono::Duration::seconds(3600));
        assert!(signed.expires_at <= Utc::now() + chrono::Duration::seconds(3600));
    }

    #[tokio::test]
    async fn test_urls_are_never_cached() {
        let (signer, resolver) = resolver();
        let key = ObjectKey::new("videos/1.mp4").unwrap();

        let first = resolver.sign(&key, Duration::from_secs(60)).await.unwrap();
        let second = resolver.sign(&key, Duration::from_secs(60)).await.unwrap();
        assert_ne!(first.url, second.url);
        assert_eq!(signer.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_ttl_bounds() {
        let (signer, resolver) = resolver();
        let key = ObjectKey::new("videos/1.mp4").unwrap();

        assert_eq!(
            resolver.sign(&key, Duration::from_millis(500)).await,
            Err(MediaError::InvalidTtl(0))
        );
        assert_eq!(
            resolver.sign(&key, MAX_TTL + Duration::from_secs(1)).await,
            Err(MediaError::InvalidTtl(604_801))
        );
        assert!(resolver.sign(&key, MAX_TTL).await.is_ok());
        assert!(resolver.sign(&key, MIN_TTL).await.is_ok());
        assert_eq!(signer.calls.load(Ordering::SeqCst), 2);

        let (_, fresh) = self::resolver();
        assert!(fresh.with_default_ttl(Duration::ZERO).is_err());
    }

    #[tokio::test]
    async fn test_malformed_key_is_rejected_before_signing() {
        let (signer, resolver) = resolver();
        let key = ObjectKey::new("videos/../secret.mp4").unwrap();

        let err = resolver.sign(&key, DEFAULT_TTL).await.unwrap_err();
        assert!(matches!(err, MediaError::InvalidKey { .. }));
        assert_eq!(signer.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_keys_with_edge_slashes_are_not_silently_rewritten() {
        let (signer, resolver) = resolver();

        for reference in ["/videos/lead.mp4", "videos/trail/", "//videos/both/"] {
            let err = resolver.sign_reference(reference).await.unwrap_err();
            assert!(
                matches!(&err, MediaError::InvalidKey { key, .. } if key == reference),
                "{}: {:?}",
                reference,
                err
            );
        }
        assert_eq!(signer.calls.load(Ordering::SeqCst), 0);

        let signed = resolver.sign_reference("videos/lead.mp4").await.unwrap();
        assert!(signed.url.path().ends_with("/videos/lead.mp4"));
    }

    #[tokio::test]
    async fn test_batch_isolates_failures() {
        let (_, resolver) = resolver();
        let items = vec![
            (1, "videos/1.mp4".to_string()),
            (2, "https://s3.amazonaws.com/lectures/videos/2.mp4".to_string()),
            (3, String::new()),
            (4, "https://lectures.s3.us-east-1.amazonaws.com/videos/4.mp4".to_string()),
            (5, "videos/5.webm".to_string()),
        ];

        let signed = resolver.sign_batch(items).await;

        assert_eq!(signed.len(), 5);
        assert_eq!(signed.iter().map(|s| s.id).collect::<Vec<_>>(), vec![1, 2, 3, 4, 5]);
        assert_eq!(signed.iter().filter(|s| s.is_ok()).count(), 4);
        assert_eq!(signed[2].result, Err(MediaError::MissingReference));
        assert_eq!(signed[1].result.as_ref().unwrap().key.as_str(), "videos/2.mp4");
    }

    #[tokio::test]
    async fn test_batch_signing_failure_is_per_item() {
        let (_, resolver) = resolver();
        let signed = resolver
            .sign_batch(vec![
                (7, "videos/broken.mp4".to_string()),
                (8, "videos/fine.mp4".to_string()),
            ])
            .await;

        assert!(matches!(signed[0].result, Err(MediaError::Signing { .. })));
        assert!(signed[1].url().is_some());
    }

    #[tokio::test]
    async fn test_signed_item_wire_shape() {
        let (_, resolver) = resolver();
        let signed = resolver
            .sign_batch(vec![(1, "videos/1.mp4".to_string()), (2, "".to_string())])
            .await;

        let ok = serde_json::to_value(&signed[0]).unwrap();
        assert_eq!(ok["id"], 1);
        assert!(ok["videoUrl"].as_str().unwrap().starts_with("https://"));
        assert!(ok.get("error").is_none());

        let failed = serde_json::to_value(&signed[1]).unwrap();
        assert!(failed["videoUrl"].is_null());
        assert_eq!(failed["error"], BATCH_ITEM_ERROR);
    }

    #[tokio::test]
    async fn test_upload_stores_under_generated_key() {
        let (writer, resolver) = writable();
        let key = resolver
            .upload("Week 1 intro.mp4", "video/mp4", vec![0u8; 16])
            .await
            .unwrap();

        assert!(key.as_str().starts_with("videos/"));
        assert!(key.as_str().ends_with(".mp4"));
        let puts = writer.puts.lock().unwrap();
        assert_eq!(puts.as_slice(), &[(key.to_string(), "video/mp4".to_string(), 16)]);
    }

    #[tokio::test]
    async fn test_rejected_upload_writes_nothing() {
        let (writer, resolver) = writable();
        let err = resolver
            .upload("slides.pdf", "application/pdf", vec![1, 2, 3])
            .await
            .unwrap_err();

        assert_eq!(err, MediaError::UnsupportedType("application/pdf".to_string()));
        assert!(writer.puts.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_delete_by_key_and_reference() {
        let (writer, resolver) = writable();
        resolver
            .delete(&ObjectKey::new("videos/1.mp4").unwrap())
            .await
            .unwrap();
        let key = resolver
            .delete_reference("https://lectures.s3.amazonaws.com/videos/2.mp4")
            .await
            .unwrap();

        assert_eq!(key.as_str(), "videos/2.mp4");
        assert_eq!(
            writer.deletes.lock().unwrap().as_slice(),
            &["videos/1.mp4".to_string(), "videos/2.mp4".to_string()]
        );
    }

    #[tokio::test]
    async fn test_delete_failures_are_reported() {
        let (writer, resolver) = writable();

        let err = resolver.delete_reference("videos/locked.mp4").await.unwrap_err();
        assert!(matches!(err, MediaError::Storage { .. }));

        let err = resolver.delete_reference("/videos/lead.mp4").await.unwrap_err();
        assert!(matches!(err, MediaError::InvalidKey { .. }));
        assert!(writer.deletes.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_writes_need_a_writer() {
        let (_, resolver) = resolver();
        let key = ObjectKey::new("videos/1.mp4").unwrap();
        assert!(matches!(resolver.delete(&key).await, Err(MediaError::Config(_))));
        assert!(matches!(
            resolver.upload("a.mp4", "video/mp4", vec![0]).await,
            Err(MediaError::Config(_))
        ));
    }

    #[test]
    fn test_s3_signer_builds_from_config() {
        let mut config = MediaConfig::new("lectures", "us-east-1");
        config.access_key_id = Some("AKIDEXAMPLE".to_string());
        config.secret_access_key = Some("secret".to_string());
        config.endpoint = Some("http://localhost:9000".to_string());
        assert!(S3Signer::from_config(&config).is_ok());
        assert!(MediaResolver::from_config(&config).is_ok());
    }
}
