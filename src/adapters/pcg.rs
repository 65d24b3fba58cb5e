use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tracing::instrument;

use crate::{
    adapters::{s3::S3Client, StorageClient},
    model::{
        Bucket, Connection, DeleteOutcome, ListResult, ObjectEnvelope, StorageResult, UrlOperation,
    },
};

pub const CLIENT_TYPE: &str = "pcg";
pub const DEFAULT_REGION: &str = "us-east-1";

/// S3-protocol variant. Every call goes through the wrapped [`S3Client`];
/// only the default region and result labels differ.
#[derive(Default)]
pub struct PcgClient {
    inner: S3Client,
}

impl PcgClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn boxed() -> Box<dyn StorageClient> {
        Box::new(Self::new())
    }
}

/// Human-readable name for a storage class reported by the service.
pub fn storage_class_label(class: &str) -> String {
    let label = match class {
        "STANDARD" => "Standard",
        "REDUCED_REDUNDANCY" => "Reduced Redundancy",
        "STANDARD_IA" => "Infrequent Access",
        "ONEZONE_IA" => "One Zone-IA",
        "INTELLIGENT_TIERING" => "Intelligent-Tiering",
        "GLACIER" => "Glacier",
        "DEEP_ARCHIVE" => "Deep Archive",
        "PCG_ARCHIVE" => "PCG Archive",
        "PCG_STANDARD" => "PCG Standard",
        other => other,
    };
    label.to_string()
}

fn label_bucket(mut bucket: Bucket) -> Bucket {
    bucket.is_pcg_bucket = Some(true);
    bucket.storage_class = bucket.storage_class.as_deref().map(storage_class_label);
    bucket
}

fn label_listing(result: ListResult) -> ListResult {
    match result {
        ListResult::Objects(entries) => ListResult::Objects(
            entries
                .into_iter()
                .map(|mut entry| {
                    entry.storage_class = entry.storage_class.as_deref().map(storage_class_label);
                    entry
                })
                .collect(),
        ),
        ListResult::Buckets(buckets) => {
            ListResult::Buckets(buckets.into_iter().map(label_bucket).collect())
        }
    }
}

#[async_trait]
impl StorageClient for PcgClient {
    fn client_type(&self) -> &str {
        CLIENT_TYPE
    }

    #[instrument(skip_all, fields(client = CLIENT_TYPE))]
    async fn initialize(&mut self, config: &Connection) -> StorageResult<()> {
        if config.region().is_some() {
            return self.inner.initialize(config).await;
        }

        let mut config = config.clone();
        config.region = Some(DEFAULT_REGION.to_string());
        self.inner.initialize(&config).await
    }

    async fn list_buckets(&self) -> StorageResult<Vec<Bucket>> {
        let buckets = self.inner.list_buckets().await?;
        Ok(buckets.into_iter().map(label_bucket).collect())
    }

    async fn list_objects(&self, bucket: &str, prefix: &str) -> StorageResult<ListResult> {
        self.inner.list_objects(bucket, prefix).await.map(label_listing)
    }

    async fn upload_object(&self, bucket: &str, key: &str, body: Bytes) -> StorageResult<()> {
        self.inner.upload_object(bucket, key, body).await
    }

    async fn get_object(&self, bucket: &str, key: &str) -> StorageResult<ObjectEnvelope> {
        self.inner.get_object(bucket, key).await
    }

    async fn get_signed_url(
        &self,
        bucket: &str,
        key: &str,
        expires_in: Duration,
    ) -> StorageResult<String> {
        self.inner.get_signed_url(bucket, key, expires_in).await
    }

    async fn get_object_url(
        &self,
        bucket: &str,
        key: &str,
        operation: UrlOperation,
    ) -> StorageResult<String> {
        self.inner.get_object_url(bucket, key, operation).await
    }

    async fn delete_object(&self, bucket: &str, key: &str) -> StorageResult<()> {
        self.inner.delete_object(bucket, key).await
    }

    async fn delete_objects(&self, bucket: &str, keys: &[String]) -> StorageResult<DeleteOutcome> {
        self.inner.delete_objects(bucket, keys).await
    }

    async fn create_folder(&self, bucket: &str, path: &str) -> StorageResult<()> {
        self.inner.create_folder(bucket, path).await
    }
}
