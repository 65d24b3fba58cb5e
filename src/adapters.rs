use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tracing::warn;

use crate::model::{
    Bucket, Connection, DeleteOutcome, ListResult, MismatchPolicy, ObjectEnvelope, StorageError,
    StorageResult, UrlOperation,
};

pub mod azure;
pub mod memory;
pub mod oss;
pub mod pcg;
pub mod s3;

/// Lifetime of URLs produced by [`StorageClient::get_object_url`], and the
/// default for [`StorageClient::get_signed_url`].
pub const DEFAULT_URL_EXPIRY: Duration = Duration::from_secs(3600);

/// Capability set every storage backend provides.
///
/// An adapter starts uninitialized; [`StorageClient::initialize`] binds it to
/// a [`Connection`] and every other operation fails with
/// [`StorageError::NotInitialized`] until that has succeeded. Instances are
/// meant to be used for one logical operation and dropped.
#[async_trait]
pub trait StorageClient: Send + Sync {
    /// Registry key this adapter answers to.
    fn client_type(&self) -> &str;

    async fn initialize(&mut self, config: &Connection) -> StorageResult<()>;

    async fn list_buckets(&self) -> StorageResult<Vec<Bucket>>;

    /// One level of hierarchy under `prefix`. Never contains `prefix` itself.
    async fn list_objects(&self, bucket: &str, prefix: &str) -> StorageResult<ListResult>;

    async fn upload_object(&self, bucket: &str, key: &str, body: Bytes) -> StorageResult<()>;

    async fn get_object(&self, bucket: &str, key: &str) -> StorageResult<ObjectEnvelope>;

    /// Read URL without response overrides.
    async fn get_signed_url(
        &self,
        bucket: &str,
        key: &str,
        expires_in: Duration,
    ) -> StorageResult<String>;

    /// Read URL for viewing inline or downloading, valid for
    /// [`DEFAULT_URL_EXPIRY`].
    async fn get_object_url(
        &self,
        bucket: &str,
        key: &str,
        operation: UrlOperation,
    ) -> StorageResult<String>;

    /// Deleting a missing key succeeds.
    async fn delete_object(&self, bucket: &str, key: &str) -> StorageResult<()>;

    /// Keys that could not be deleted are reported in `errors`, never by
    /// failing the whole call once some keys have been removed.
    async fn delete_objects(&self, bucket: &str, keys: &[String]) -> StorageResult<DeleteOutcome>;

    /// Writes a zero-length marker at `path` + `/`.
    async fn create_folder(&self, bucket: &str, path: &str) -> StorageResult<()>;
}

pub type BoxedStorageClient = Box<dyn StorageClient>;

/// Applies the connection's policy to a region mismatch raised by a listing.
pub(crate) fn apply_mismatch_policy<T: Default>(
    result: StorageResult<T>,
    policy: MismatchPolicy,
    operation: &str,
) -> StorageResult<T> {
    match result {
        Err(StorageError::RegionMismatch {
            configured,
            expected,
            ..
        }) if policy == MismatchPolicy::Empty => {
            warn!(
                configured_region = configured.as_str(),
                expected_region = expected.as_str(),
                error_group = operation,
                "region mismatch detected, returning empty result"
            );
            Ok(T::default())
        }
        other => other,
    }
}
