use std::{
    collections::{BTreeMap, HashSet},
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    time::Duration,
};

use async_trait::async_trait;
use bytes::Bytes;
use time::OffsetDateTime;
use tracing::{info, instrument};
use url::Url;

use crate::{
    adapters::{StorageClient, DEFAULT_URL_EXPIRY},
    model::{
        Bucket, Connection, DeleteOutcome, ListResult, ObjectBody, ObjectEntry, ObjectEnvelope,
        ProviderFailure, StorageError, StorageResult, UrlOperation,
    },
    util::{
        content_type::content_type_for,
        listing::{emulate_hierarchy, url_overrides, UrlOverrides},
        object::folder_key,
        signing::encode_path,
    },
};

pub const CLIENT_TYPE: &str = "memory";

#[derive(Debug, Clone)]
struct StoredObject {
    body: Bytes,
    content_type: Option<String>,
    last_modified: OffsetDateTime,
}

#[derive(Debug, Default)]
struct StoredBucket {
    created: Option<OffsetDateTime>,
    objects: BTreeMap<String, StoredObject>,
}

#[derive(Debug, Default)]
struct State {
    buckets: BTreeMap<String, StoredBucket>,
    undeletable: HashSet<String>,
}

/// Flat key space shared by every [`MemoryClient`] built from it.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    state: Arc<Mutex<State>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn create_bucket(&self, name: &str) {
        self.lock()
            .buckets
            .entry(name.to_string())
            .or_insert_with(|| StoredBucket {
                created: Some(OffsetDateTime::now_utc()),
                objects: BTreeMap::new(),
            });
    }

    /// Makes every later delete of `key` fail with `AccessDenied`.
    pub fn deny_delete(&self, key: &str) {
        self.lock().undeletable.insert(key.to_string());
    }

    pub fn contains(&self, bucket: &str, key: &str) -> bool {
        self.lock()
            .buckets
            .get(bucket)
            .is_some_and(|b| b.objects.contains_key(key))
    }
}

fn no_such_bucket(bucket: &str) -> StorageError {
    ProviderFailure::new(format!("The specified bucket does not exist: {}", bucket))
        .with_code("NoSuchBucket")
        .with_status(404)
        .into()
}

/// In-process flat-namespace backend. Folders are emulated exactly the way
/// Azure listings are, so it stands in for flat backends in tests.
pub struct MemoryClient {
    store: MemoryStore,
    ready: bool,
}

impl MemoryClient {
    pub fn with_store(store: MemoryStore) -> Self {
        Self {
            store,
            ready: false,
        }
    }

    fn ready(&self) -> StorageResult<&MemoryStore> {
        if self.ready {
            Ok(&self.store)
        } else {
            Err(StorageError::NotInitialized)
        }
    }

    fn signed_url(
        &self,
        bucket: &str,
        key: &str,
        overrides: &UrlOverrides,
        expires_in: Duration,
    ) -> StorageResult<String> {
        self.ready()?;

        let mut url = Url::parse(&format!("memory://{}/", bucket))
            .and_then(|base| base.join(&encode_path(key)))
            .map_err(|err| StorageError::InvalidArgument(err.to_string()))?;
        {
            let mut query = url.query_pairs_mut();
            query.append_pair("expires", &expires_in.as_secs().to_string());
            if let Some(disposition) = &overrides.content_disposition {
                query.append_pair("response-content-disposition", disposition);
            }
            if let Some(content_type) = &overrides.content_type {
                query.append_pair("response-content-type", content_type);
            }
        }
        Ok(url.to_string())
    }
}

#[async_trait]
impl StorageClient for MemoryClient {
    fn client_type(&self) -> &str {
        CLIENT_TYPE
    }

    async fn initialize(&mut self, config: &Connection) -> StorageResult<()> {
        if let Some(bucket) = config.bucket() {
            self.store.create_bucket(bucket);
        }
        self.ready = true;
        Ok(())
    }

    async fn list_buckets(&self) -> StorageResult<Vec<Bucket>> {
        let state = self.ready()?.lock();
        Ok(state
            .buckets
            .iter()
            .map(|(name, bucket)| Bucket {
                name: name.clone(),
                creation_date: bucket.created,
                ..Default::default()
            })
            .collect())
    }

    #[instrument(skip(self), fields(client = CLIENT_TYPE))]
    async fn list_objects(&self, bucket: &str, prefix: &str) -> StorageResult<ListResult> {
        let state = self.ready()?.lock();
        let stored = state.buckets.get(bucket).ok_or_else(|| no_such_bucket(bucket))?;

        let flat = stored
            .objects
            .range(prefix.to_string()..)
            .take_while(|(key, _)| key.starts_with(prefix))
            .map(|(key, obj)| ObjectEntry {
                content_type: obj.content_type.clone(),
                ..ObjectEntry::file(key, obj.body.len() as u64, Some(obj.last_modified))
            });

        Ok(ListResult::Objects(emulate_hierarchy(prefix, flat)))
    }

    async fn upload_object(&self, bucket: &str, key: &str, body: Bytes) -> StorageResult<()> {
        let mut state = self.ready()?.lock();
        let stored = state
            .buckets
            .get_mut(bucket)
            .ok_or_else(|| no_such_bucket(bucket))?;

        stored.objects.insert(
            key.to_string(),
            StoredObject {
                body,
                content_type: Some(content_type_for(key).to_string()),
                last_modified: OffsetDateTime::now_utc(),
            },
        );
        Ok(())
    }

    async fn get_object(&self, bucket: &str, key: &str) -> StorageResult<ObjectEnvelope> {
        let state = self.ready()?.lock();
        let obj = state
            .buckets
            .get(bucket)
            .ok_or_else(|| no_such_bucket(bucket))?
            .objects
            .get(key)
            .ok_or_else(|| StorageError::NotFound(format!("{}/{}", bucket, key)))?;

        Ok(ObjectEnvelope {
            body: ObjectBody::Bytes(obj.body.clone()),
            content_type: obj.content_type.clone(),
            content_length: Some(obj.body.len() as u64),
            last_modified: Some(obj.last_modified),
            etag: None,
        })
    }

    async fn get_signed_url(
        &self,
        bucket: &str,
        key: &str,
        expires_in: Duration,
    ) -> StorageResult<String> {
        self.signed_url(bucket, key, &UrlOverrides::default(), expires_in)
    }

    async fn get_object_url(
        &self,
        bucket: &str,
        key: &str,
        operation: UrlOperation,
    ) -> StorageResult<String> {
        self.signed_url(bucket, key, &url_overrides(key, operation), DEFAULT_URL_EXPIRY)
    }

    async fn delete_object(&self, bucket: &str, key: &str) -> StorageResult<()> {
        let mut state = self.ready()?.lock();
        if state.undeletable.contains(key) {
            return Err(ProviderFailure::new(format!("delete of {} is not allowed", key))
                .with_code("AccessDenied")
                .with_status(403)
                .into());
        }

        // a missing bucket or key is already deleted
        if let Some(stored) = state.buckets.get_mut(bucket) {
            stored.objects.remove(key);
        }
        Ok(())
    }

    #[instrument(skip(self, keys), fields(client = CLIENT_TYPE, count = keys.len()))]
    async fn delete_objects(&self, bucket: &str, keys: &[String]) -> StorageResult<DeleteOutcome> {
        self.ready()?;

        let mut outcome = DeleteOutcome::default();
        for key in keys {
            outcome.record(key, self.delete_object(bucket, key).await);
        }

        info!(
            deleted = outcome.deleted.len(),
            failed = outcome.errors.len(),
            "batch delete finished"
        );
        Ok(outcome)
    }

    async fn create_folder(&self, bucket: &str, path: &str) -> StorageResult<()> {
        let mut state = self.ready()?.lock();
        let stored = state
            .buckets
            .get_mut(bucket)
            .ok_or_else(|| no_such_bucket(bucket))?;

        stored
            .objects
            .entry(folder_key(path))
            .or_insert_with(|| StoredObject {
                body: Bytes::new(),
                content_type: None,
                last_modified: OffsetDateTime::now_utc(),
            });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn client(store: &MemoryStore) -> MemoryClient {
        let mut client = MemoryClient::with_store(store.clone());
        let conn = Connection::new("mem", CLIENT_TYPE).with_bucket("b");
        client.initialize(&conn).await.unwrap();
        client
    }

    #[tokio::test]
    async fn test_uninitialized() {
        let client = MemoryClient::with_store(MemoryStore::new());
        assert!(matches!(client.list_buckets().await, Err(StorageError::NotInitialized)));
        assert!(matches!(
            client.upload_object("b", "k", Bytes::new()).await,
            Err(StorageError::NotInitialized)
        ));
    }

    #[tokio::test]
    async fn test_store_is_shared() {
        let store = MemoryStore::new();
        let first = client(&store).await;
        first
            .upload_object("b", "a.txt", Bytes::from_static(b"hi"))
            .await
            .unwrap();

        let second = client(&store).await;
        let body = second.get_object("b", "a.txt").await.unwrap().body;
        assert_eq!(body.into_bytes().await.unwrap(), Bytes::from_static(b"hi"));
    }

    #[tokio::test]
    async fn test_missing_bucket() {
        let store = MemoryStore::new();
        let client = client(&store).await;

        let err = client.list_objects("nope", "").await.unwrap_err();
        assert_eq!(err.code(), Some("NoSuchBucket"));
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_create_folder_keeps_contents() {
        let store = MemoryStore::new();
        let client = client(&store).await;

        client.create_folder("b", "x").await.unwrap();
        client.create_folder("b", "x/").await.unwrap();
        assert!(store.contains("b", "x/"));

        let listed = client.list_objects("b", "").await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed.objects()[0].key, "x/");
        assert!(listed.objects()[0].is_folder);
        assert!(listed.objects()[0].last_modified.is_some());
    }

    #[tokio::test]
    async fn test_delete_from_missing_bucket_is_ok() {
        let store = MemoryStore::new();
        let client = client(&store).await;

        client.delete_object("nope", "k").await.unwrap();
        client.delete_object("b", "never-there").await.unwrap();

        let keys = vec!["k".to_string()];
        let outcome = client.delete_objects("nope", &keys).await.unwrap();
        assert_eq!(outcome.deleted, keys);
        assert!(outcome.is_complete());
    }

    #[tokio::test]
    async fn test_signed_url_escapes_key() {
        let store = MemoryStore::new();
        let client = client(&store).await;

        let cases = vec![
            ("what?.txt", "/what%3F.txt"),
            ("notes#1.md", "/notes%231.md"),
            ("dir/a b.txt", "/dir/a%20b.txt"),
        ];

        for (key, path) in cases {
            let url = client
                .get_signed_url("b", key, DEFAULT_URL_EXPIRY)
                .await
                .unwrap();
            let parsed = Url::parse(&url).unwrap();
            assert_eq!(parsed.path(), path, "failed for case: {}", key);
            assert!(parsed.fragment().is_none(), "failed for case: {}", key);
            assert_eq!(
                parsed.query(),
                Some("expires=3600"),
                "failed for case: {}",
                key
            );
        }
    }

    #[tokio::test]
    async fn test_signed_url() {
        let store = MemoryStore::new();
        let client = client(&store).await;

        let url = client
            .get_object_url("b", "dir/report.pdf", UrlOperation::Download)
            .await
            .unwrap();
        assert!(url.starts_with("memory://b/dir/report.pdf?expires=3600"), "{}", url);
        assert!(url.contains("response-content-disposition="), "{}", url);
    }
}
