//! Process-wide registry from connection type to adapter constructor.
//!
//! Built-in backends are registered when the registry is first touched.
//! Every call to [`create_client`] builds and initializes a fresh adapter;
//! instances are never cached or shared.

use std::{
    collections::HashMap,
    sync::{Arc, LazyLock, PoisonError, RwLock},
};

use tracing::{error, info};

use crate::{
    adapters::{
        azure::AzureBlobClient, oss::OssClient, pcg::PcgClient, s3::S3Client, BoxedStorageClient,
    },
    model::{canonical_client_type, Connection, StorageError, StorageResult, StorageType},
};

/// Builds an uninitialized adapter.
pub type ClientConstructor = Arc<dyn Fn() -> BoxedStorageClient + Send + Sync>;

static REGISTRY: LazyLock<RwLock<HashMap<String, ClientConstructor>>> =
    LazyLock::new(|| RwLock::new(builtin_constructors()));

fn builtin_constructors() -> HashMap<String, ClientConstructor> {
    StorageType::all()
        .into_iter()
        .map(|storage_type| {
            let ctor = match storage_type {
                StorageType::S3 => Arc::new(S3Client::boxed) as ClientConstructor,
                StorageType::AzureBlob => Arc::new(AzureBlobClient::boxed) as ClientConstructor,
                StorageType::AliyunOss => Arc::new(OssClient::boxed) as ClientConstructor,
                StorageType::Pcg => Arc::new(PcgClient::boxed) as ClientConstructor,
            };
            (storage_type.as_str().to_string(), ctor)
        })
        .collect()
}

fn constructor(client_type: &str) -> Option<ClientConstructor> {
    REGISTRY
        .read()
        .unwrap_or_else(PoisonError::into_inner)
        .get(canonical_client_type(client_type))
        .cloned()
}

/// Adds or replaces the constructor for `client_type`.
pub fn register_client_type(client_type: &str, ctor: ClientConstructor) {
    let client_type = canonical_client_type(client_type.trim()).to_string();
    info!(client_type = client_type.as_str(), "registering storage client type");

    REGISTRY
        .write()
        .unwrap_or_else(PoisonError::into_inner)
        .insert(client_type, ctor);
}

/// Registered type names, sorted.
pub fn get_supported_client_types() -> Vec<String> {
    let mut types: Vec<String> = REGISTRY
        .read()
        .unwrap_or_else(PoisonError::into_inner)
        .keys()
        .cloned()
        .collect();
    types.sort();
    types
}

pub fn is_supported(client_type: &str) -> bool {
    constructor(client_type).is_some()
}

/// Builds a fresh adapter for `client_type` and initializes it with `config`.
pub async fn create_client(
    client_type: &str,
    config: &Connection,
) -> StorageResult<BoxedStorageClient> {
    let ctor = constructor(client_type)
        .ok_or_else(|| StorageError::UnsupportedType(client_type.to_string()))?;

    let mut client = ctor();
    if let Err(err) = client.initialize(config).await {
        error!(error_message=%err, error_group="create_client", client_type = client_type);
        return Err(err);
    }

    Ok(client)
}

/// [`create_client`] for the type the connection declares.
pub async fn create_client_for(config: &Connection) -> StorageResult<BoxedStorageClient> {
    create_client(config.resolved_client_type(), config).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        adapters::memory::{MemoryClient, MemoryStore},
        model::UrlOperation,
    };
    use bytes::Bytes;

    fn register_memory(client_type: &str) -> MemoryStore {
        let store = MemoryStore::new();
        let shared = store.clone();
        register_client_type(
            client_type,
            Arc::new(move || -> BoxedStorageClient {
                Box::new(MemoryClient::with_store(shared.clone()))
            }),
        );
        store
    }

    async fn memory_client(client_type: &str) -> (MemoryStore, BoxedStorageClient) {
        let store = register_memory(client_type);
        let conn = Connection::new("mem", client_type).with_bucket("bucket");
        let client = create_client_for(&conn).await.unwrap();
        (store, client)
    }

    #[test]
    fn test_builtin_types() {
        let types = get_supported_client_types();
        for expected in ["aliyun-oss", "azure-blob", "pcg", "s3"] {
            assert!(
                types.contains(&expected.to_string()),
                "failed for case: {}",
                expected
            );
        }
        assert!(!types.contains(&"unknown-type".to_string()));
        assert!(is_supported("aws-s3"));

        let mut sorted = types.clone();
        sorted.sort();
        assert_eq!(types, sorted);
    }

    #[tokio::test]
    async fn test_unknown_type() {
        let conn = Connection::new("x", "unknown-type");
        let err = create_client("unknown-type", &conn).await.err().unwrap();

        assert!(matches!(err, StorageError::UnsupportedType(ref t) if t == "unknown-type"));
        assert!(!get_supported_client_types().contains(&"unknown-type".to_string()));
    }

    #[tokio::test]
    async fn test_init_error_surfaces() {
        let conn = Connection::new("azure", "azure-blob");
        let err = create_client_for(&conn).await.err().unwrap();
        assert!(matches!(err, StorageError::Init { .. }));
    }

    #[tokio::test]
    async fn test_legacy_type_resolves_to_s3() {
        let mut conn = Connection::new("old", "aws-s3").with_keys("ak", "sk");
        conn.region = Some("us-west-2".to_string());

        let client = create_client_for(&conn).await.unwrap();
        assert_eq!(client.client_type(), "s3");
    }

    #[tokio::test]
    async fn test_fresh_instance_per_call() {
        let conn = Connection::new("s3", "s3")
            .with_region("us-west-2")
            .with_keys("ak", "sk");

        let first = create_client_for(&conn).await.unwrap();
        let second = create_client_for(&conn).await.unwrap();
        let first_addr = &*first as *const _ as *const u8;
        let second_addr = &*second as *const _ as *const u8;
        assert_ne!(first_addr, second_addr);
    }

    #[tokio::test]
    async fn test_listing_never_contains_prefix() {
        let (_, client) = memory_client("memory-prefix").await;
        for key in ["a/", "a/1.txt", "a/b/", "a/b/2.txt"] {
            client
                .upload_object("bucket", key, Bytes::from_static(b"x"))
                .await
                .unwrap();
        }

        for prefix in ["", "a/", "a/b/"] {
            let listed = client.list_objects("bucket", prefix).await.unwrap();
            assert!(
                listed.objects().iter().all(|e| e.key != prefix),
                "failed for case: {}",
                prefix
            );
        }
    }

    #[tokio::test]
    async fn test_nested_file_yields_one_folder() {
        let (_, client) = memory_client("memory-nested").await;
        client
            .upload_object("bucket", "a/b/c.txt", Bytes::from_static(b"x"))
            .await
            .unwrap();

        let listed = client.list_objects("bucket", "a/").await.unwrap();
        let entries = listed.objects();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].key, "a/b/");
        assert!(entries[0].is_folder);
        assert_eq!(entries[0].size, 0);
    }

    #[tokio::test]
    async fn test_create_folder_then_list() {
        let (_, client) = memory_client("memory-folder").await;
        client.create_folder("bucket", "x").await.unwrap();

        let listed = client.list_objects("bucket", "").await.unwrap();
        assert!(listed
            .objects()
            .iter()
            .any(|e| e.key == "x/" && e.is_folder));
    }

    #[tokio::test]
    async fn test_batch_delete_partial_failure() {
        let (store, client) = memory_client("memory-delete").await;
        for key in ["k1", "k2", "k3"] {
            client
                .upload_object("bucket", key, Bytes::from_static(b"x"))
                .await
                .unwrap();
        }

        let keys: Vec<String> = ["k1", "k2", "k3"].iter().map(|k| k.to_string()).collect();
        let outcome = client.delete_objects("bucket", &keys).await.unwrap();
        assert_eq!(outcome.deleted.len(), keys.len());
        assert!(outcome.is_complete());

        for key in ["k4", "k5", "locked"] {
            client
                .upload_object("bucket", key, Bytes::from_static(b"x"))
                .await
                .unwrap();
        }
        store.deny_delete("locked");

        let keys: Vec<String> = ["k4", "missing", "locked", "k5"]
            .iter()
            .map(|k| k.to_string())
            .collect();
        let outcome = client.delete_objects("bucket", &keys).await.unwrap();
        assert_eq!(outcome.deleted, vec!["k4", "missing", "k5"]);
        assert_eq!(outcome.errors.len(), 1);
        assert_eq!(outcome.errors[0].key, "locked");
        assert_eq!(outcome.errors[0].code, "AccessDenied");
        assert!(!store.contains("bucket", "k4"));
        assert!(store.contains("bucket", "locked"));
    }

    #[tokio::test]
    async fn test_delete_missing_is_ok() {
        let (_, client) = memory_client("memory-idempotent").await;
        client.delete_object("bucket", "never-there").await.unwrap();
    }

    #[tokio::test]
    async fn test_upload_get_round_trip() {
        let (_, client) = memory_client("memory-round-trip").await;
        let payload = Bytes::from_static(b"{\"hello\":\"world\"}");
        client
            .upload_object("bucket", "data/doc.json", payload.clone())
            .await
            .unwrap();

        let envelope = client.get_object("bucket", "data/doc.json").await.unwrap();
        assert_eq!(envelope.content_type.as_deref(), Some("application/json"));
        assert_eq!(envelope.content_length, Some(payload.len() as u64));
        assert_eq!(envelope.body.into_bytes().await.unwrap(), payload);

        let missing = client.get_object("bucket", "data/none").await.err().unwrap();
        assert!(matches!(missing, StorageError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_object_url_dispositions() {
        let (_, client) = memory_client("memory-urls").await;

        let query = |url: &str| -> HashMap<String, String> {
            url::Url::parse(url)
                .unwrap()
                .query_pairs()
                .map(|(k, v)| (k.into_owned(), v.into_owned()))
                .collect()
        };

        let download = client
            .get_object_url("bucket", "dir/photo.png", UrlOperation::Download)
            .await
            .unwrap();
        assert_eq!(
            query(&download).get("response-content-disposition").map(String::as_str),
            Some("attachment; filename=\"photo.png\"")
        );

        let view = client
            .get_object_url("bucket", "dir/photo.png", UrlOperation::View)
            .await
            .unwrap();
        assert!(query(&view).get("response-content-disposition").is_none());
        assert!(query(&view).get("response-content-type").is_none());

        let pdf = client
            .get_object_url("bucket", "dir/manual.pdf", UrlOperation::View)
            .await
            .unwrap();
        assert_eq!(
            query(&pdf).get("response-content-type").map(String::as_str),
            Some("application/pdf")
        );
    }
}
