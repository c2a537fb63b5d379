//! Object storage for course content
//!
//! Content bytes never pass through the service: clients download and upload
//! through presigned URLs, and the service only deletes objects whose rows it
//! removed.

use std::time::Duration;

use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_s3::{Client, presigning::PresigningConfig};
use thiserror::Error;
use tracing::info;

use crate::config::Settings;

/// Lifetime of a presigned download URL
pub const GET_URL_TTL: Duration = Duration::from_secs(10 * 60);
/// Lifetime of a presigned upload URL
pub const PUT_URL_TTL: Duration = Duration::from_secs(15 * 60);
/// Upper bound on a delete round trip
pub const DELETE_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Error)]
pub enum ObjectStoreError {
    #[error("Failed to presign request for {key}: {message}")]
    Presign { key: String, message: String },

    #[error("Object store request failed for {key}: {message}")]
    Request { key: String, message: String },

    #[error("Object store request timed out for {key}")]
    Timeout { key: String },
}

#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn signed_get_url(&self, key: &str) -> Result<String, ObjectStoreError>;

    async fn signed_put_url(&self, key: &str) -> Result<String, ObjectStoreError>;

    async fn delete(&self, key: &str) -> Result<(), ObjectStoreError>;
}

/// Object key of a course video
pub fn video_key(course_id: uuid::Uuid, video_id: uuid::Uuid) -> String {
    format!("courses/{course_id}/videos/{video_id}")
}

/// Object key of a course material
pub fn material_key(course_id: uuid::Uuid, material_id: uuid::Uuid) -> String {
    format!("courses/{course_id}/materials/{material_id}")
}

/// S3-compatible bucket
#[derive(Clone)]
pub struct S3ObjectStore {
    client: Client,
    bucket: String,
}

impl S3ObjectStore {
    pub fn new(client: Client, bucket: String) -> Self {
        Self { client, bucket }
    }

    /// Build the client from the ambient AWS configuration, pointing it at
    /// `S3_ENDPOINT` when one is set (MinIO, LocalStack)
    pub async fn from_settings(settings: &Settings) -> Self {
        let shared = aws_config::load_defaults(BehaviorVersion::latest()).await;
        let mut builder = aws_sdk_s3::config::Builder::from(&shared);

        if let Some(endpoint) = &settings.s3_endpoint {
            info!("Using S3 endpoint override: {}", endpoint);
            builder = builder.endpoint_url(endpoint).force_path_style(true);
        }

        Self::new(Client::from_conf(builder.build()), settings.s3_bucket.clone())
    }

    fn presigning(key: &str, ttl: Duration) -> Result<PresigningConfig, ObjectStoreError> {
        PresigningConfig::expires_in(ttl).map_err(|e| ObjectStoreError::Presign {
            key: key.to_string(),
            message: e.to_string(),
        })
    }
}

#[async_trait]
impl ObjectStore for S3ObjectStore {
    async fn signed_get_url(&self, key: &str) -> Result<String, ObjectStoreError> {
        let request = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .presigned(Self::presigning(key, GET_URL_TTL)?)
            .await
            .map_err(|e| ObjectStoreError::Presign {
                key: key.to_string(),
                message: e.to_string(),
            })?;

        Ok(request.uri().to_string())
    }

    async fn signed_put_url(&self, key: &str) -> Result<String, ObjectStoreError> {
        let request = self
            .client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .presigned(Self::presigning(key, PUT_URL_TTL)?)
            .await
            .map_err(|e| ObjectStoreError::Presign {
                key: key.to_string(),
                message: e.to_string(),
            })?;

        Ok(request.uri().to_string())
    }

    async fn delete(&self, key: &str) -> Result<(), ObjectStoreError> {
        let request = self
            .client
            .delete_object()
            .bucket(&self.bucket)
            .key(key)
            .send();

        match tokio::time::timeout(DELETE_TIMEOUT, request).await {
            Ok(Ok(_)) => {
                info!("Deleted object {}", key);
                Ok(())
            }
            Ok(Err(e)) => Err(ObjectStoreError::Request {
                key: key.to_string(),
                message: e.to_string(),
            }),
            Err(_) => Err(ObjectStoreError::Timeout {
                key: key.to_string(),
            }),
        }
    }
}

/// Store that hands out fake URLs and remembers deletions
#[cfg(test)]
#[derive(Clone, Default)]
pub struct RecordingObjectStore {
    pub deleted: std::sync::Arc<std::sync::Mutex<Vec<String>>>,
}

#[cfg(test)]
#[async_trait]
impl ObjectStore for RecordingObjectStore {
    async fn signed_get_url(&self, key: &str) -> Result<String, ObjectStoreError> {
        Ok(format!("https://objects.test/{key}?op=get"))
    }

    async fn signed_put_url(&self, key: &str) -> Result<String, ObjectStoreError> {
        Ok(format!("https://objects.test/{key}?op=put"))
    }

    async fn delete(&self, key: &str) -> Result<(), ObjectStoreError> {
        self.deleted.lock().unwrap().push(key.to_string());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn object_keys_are_scoped_by_course_and_kind() {
        let course = Uuid::nil();
        let item = Uuid::max();
        assert_eq!(
            video_key(course, item),
            format!("courses/{course}/videos/{item}")
        );
        assert_eq!(
            material_key(course, item),
            format!("courses/{course}/materials/{item}")
        );
    }

    #[tokio::test]
    async fn presigned_urls_are_generated_locally() {
        let config = aws_sdk_s3::config::Builder::new()
            .behavior_version(BehaviorVersion::latest())
            .region(aws_sdk_s3::config::Region::new("us-east-1"))
            .credentials_provider(aws_sdk_s3::config::Credentials::new(
                "AKIDEXAMPLE",
                "secret",
                None,
                None,
                "test",
            ))
            .build();
        let store = S3ObjectStore::new(Client::from_conf(config), "content".to_string());

        let url = store.signed_get_url("courses/a/videos/b").await.unwrap();
        assert!(url.contains("courses/a/videos/b"));
        assert!(url.contains("X-Amz-Expires=600"));

        let url = store.signed_put_url("courses/a/videos/b").await.unwrap();
        assert!(url.contains("X-Amz-Expires=900"));
    }
}
