//! Blob storage seam and the S3 implementation.

use crate::config::S3Config;
use crate::error::MediaError;
use async_trait::async_trait;
use std::collections::HashMap;

/// A blob ready for upload.
#[derive(Debug, Clone)]
pub struct Upload {
    pub key: String,
    pub bytes: Vec<u8>,
    pub content_type: String,
    pub cache_control: String,
    pub metadata: HashMap<String, String>,
}

/// Narrow blob-PUT interface; tests substitute an in-memory fake.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Store the blob and return its public URL.
    async fn put(&self, upload: Upload) -> Result<String, MediaError>;
}

/// S3-backed object store.
pub struct S3ObjectStore {
    client: aws_sdk_s3::Client,
    bucket: String,
    region: String,
}

impl S3ObjectStore {
    pub async fn new(config: &S3Config) -> Self {
        let aws_config = aws_config::from_env()
            .region(aws_config::Region::new(config.region.clone()))
            .load()
            .await;

        Self {
            client: aws_sdk_s3::Client::new(&aws_config),
            bucket: config.bucket.clone(),
            region: config.region.clone(),
        }
    }

    fn public_url(&self, key: &str) -> String {
        format!(
            "https://{}.s3.{}.amazonaws.com/{}",
            self.bucket, self.region, key
        )
    }
}

#[async_trait]
impl ObjectStore for S3ObjectStore {
    async fn put(&self, upload: Upload) -> Result<String, MediaError> {
        let url = self.public_url(&upload.key);

        self.client
            .put_object()
            .bucket(self.bucket.clone())
            .key(upload.key)
            .body(aws_sdk_s3::primitives::ByteStream::from(upload.bytes))
            .content_type(upload.content_type)
            .cache_control(upload.cache_control)
            .set_metadata(Some(upload.metadata))
            .send()
            .await
            .map_err(|error| MediaError::Upload(error.to_string()))?;

        Ok(url)
    }
}
