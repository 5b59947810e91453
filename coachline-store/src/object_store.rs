use async_trait::async_trait;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client;
use coachline_core::ports::ObjectStoragePort;
use coachline_core::BoxError;
use tracing::debug;
use uuid::Uuid;

use crate::app_config::StorageConfig;

/// Publicly readable ticket assets (QR codes) in an S3 bucket.
pub struct S3ObjectStorage {
    client: Client,
    bucket: String,
    public_base_url: String,
}

impl S3ObjectStorage {
    pub async fn new(config: &StorageConfig) -> Self {
        let shared = aws_config::defaults(aws_config::BehaviorVersion::latest())
            .region(aws_config::Region::new(config.region.clone()))
            .load()
            .await;

        let mut builder = aws_sdk_s3::config::Builder::from(&shared);
        if let Some(endpoint) = &config.endpoint {
            // MinIO and friends want path-style addressing
            builder = builder.endpoint_url(endpoint).force_path_style(true);
        }

        Self {
            client: Client::from_conf(builder.build()),
            bucket: config.bucket.clone(),
            public_base_url: config.public_base_url.trim_end_matches('/').to_string(),
        }
    }
}

pub fn object_key(content_type: &str) -> String {
    let extension = match content_type {
        "image/svg+xml" => "svg",
        "image/png" => "png",
        _ => "bin",
    };
    format!("qr/{}.{}", Uuid::new_v4(), extension)
}

#[async_trait]
impl ObjectStoragePort for S3ObjectStorage {
    async fn put(&self, bytes: Vec<u8>, content_type: &str) -> Result<String, BoxError> {
        let key = object_key(content_type);

        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(&key)
            .body(ByteStream::from(bytes))
            .content_type(content_type)
            .send()
            .await?;

        debug!("Stored s3://{}/{}", self.bucket, key);
        Ok(format!("{}/{}", self.public_base_url, key))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_object_key_extension() {
        let key = object_key("image/svg+xml");
        assert!(key.starts_with("qr/"));
        assert!(key.ends_with(".svg"));
    }
}
