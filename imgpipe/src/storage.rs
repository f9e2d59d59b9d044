//! Object storage uploads.

use std::path::Path;

use async_trait::async_trait;
use aws_credential_types::Credentials as AwsCredentials;
use aws_sdk_s3::Client;
use aws_sdk_s3::config::{BehaviorVersion, Region};
use aws_sdk_s3::error::DisplayErrorContext;
use aws_sdk_s3::primitives::ByteStream;
use tracing::{debug, info, instrument};

use crate::config::StorageConfig;
use crate::errors::{Error, Result};
use crate::secrets::StorageCredentials;

/// Destination for pipeline artifacts.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    fn bucket(&self) -> &str;

    /// Upload the file at `path` unchanged under `key`
    async fn put_file(&self, key: &str, path: &Path) -> Result<()>;
}

/// S3 (or S3-compatible) bucket.
pub struct S3Store {
    client: Client,
    bucket: String,
}

impl S3Store {
    pub fn new(client: Client, bucket: impl Into<String>) -> Self {
        Self {
            client,
            bucket: bucket.into(),
        }
    }

    /// Build an S3 client from a resolved credential block.
    ///
    /// Explicit keys take precedence; otherwise the AWS default provider chain (environment,
    /// profile, instance metadata) supplies credentials. No request is made here.
    pub async fn connect(credentials: &StorageCredentials, bucket: impl Into<String>) -> Self {
        let mut loader = aws_config::defaults(BehaviorVersion::latest());

        if let Some(region) = &credentials.region_name {
            loader = loader.region(Region::new(region.clone()));
        }
        if let Some(profile) = &credentials.profile_name {
            loader = loader.profile_name(profile);
        }
        if let Some((access_key_id, secret_access_key)) = credentials.static_keys() {
            loader = loader.credentials_provider(AwsCredentials::new(
                access_key_id,
                secret_access_key,
                credentials.aws_session_token.clone(),
                None,
                "imgpipe-secret-store",
            ));
        }

        let sdk_config = loader.load().await;
        let mut builder = aws_sdk_s3::config::Builder::from(&sdk_config);
        if let Some(endpoint) = &credentials.aws_client_parameters.endpoint_url {
            // S3-compatible stores rarely support virtual-hosted buckets
            builder = builder.endpoint_url(endpoint).force_path_style(true);
        }

        let store = Self::new(Client::from_conf(builder.build()), bucket);
        debug!(bucket = %store.bucket, "Created S3 client");
        store
    }
}

#[async_trait]
impl ObjectStore for S3Store {
    fn bucket(&self) -> &str {
        &self.bucket
    }

    #[instrument(skip(self, path), fields(bucket = %self.bucket), err)]
    async fn put_file(&self, key: &str, path: &Path) -> Result<()> {
        let storage_error = |message: String| Error::Storage {
            bucket: self.bucket.clone(),
            key: key.to_string(),
            message,
        };

        let body = ByteStream::from_path(path)
            .await
            .map_err(|e| storage_error(format!("cannot read {}: {}", path.display(), e)))?;

        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .body(body)
            .send()
            .await
            .map_err(|e| storage_error(DisplayErrorContext(&e).to_string()))?;

        info!(key, "Uploaded to object storage");
        Ok(())
    }
}

/// Object key for a local artifact.
///
/// The key is the local file name, optionally under the configured prefix and the run's subject.
pub fn object_key(config: &StorageConfig, subject: &str, file_name: &str) -> String {
    let mut parts: Vec<&str> = Vec::with_capacity(3);
    if let Some(prefix) = config.key_prefix.as_deref().map(|p| p.trim_matches('/'))
        && !prefix.is_empty()
    {
        parts.push(prefix);
    }
    let subject = subject.trim().trim_matches('/');
    if config.prefix_with_subject && !subject.is_empty() {
        parts.push(subject);
    }
    parts.push(file_name);
    parts.join("/")
}
