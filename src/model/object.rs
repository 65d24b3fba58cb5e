use std::{fmt, str::FromStr};

use bytes::{Bytes, BytesMut};
use futures::{stream::BoxStream, StreamExt};
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::model::error::{StorageError, StorageResult};

/// A top-level container (bucket or Azure container).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Bucket {
    #[serde(rename = "Name")]
    pub name: String,
    #[serde(rename = "CreationDate", default, with = "time::serde::rfc3339::option")]
    pub creation_date: Option<OffsetDateTime>,
    #[serde(rename = "Location", default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    #[serde(rename = "StorageClass", default, skip_serializing_if = "Option::is_none")]
    pub storage_class: Option<String>,
    #[serde(rename = "IsPCGBucket", default, skip_serializing_if = "Option::is_none")]
    pub is_pcg_bucket: Option<bool>,
    #[serde(rename = "IsAzureContainer", default, skip_serializing_if = "Option::is_none")]
    pub is_azure_container: Option<bool>,
    #[serde(rename = "IsAliyunOSS", default, skip_serializing_if = "Option::is_none")]
    pub is_aliyun_oss: Option<bool>,
}

impl Bucket {
    pub fn named(name: &str) -> Self {
        Self {
            name: name.to_string(),
            ..Default::default()
        }
    }
}

/// One entry of a single-level listing. Folder keys always end with `/`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ObjectEntry {
    #[serde(rename = "Key")]
    pub key: String,
    #[serde(rename = "isFolder")]
    pub is_folder: bool,
    #[serde(rename = "Size")]
    pub size: u64,
    #[serde(rename = "LastModified", default, with = "time::serde::rfc3339::option")]
    pub last_modified: Option<OffsetDateTime>,
    #[serde(rename = "ContentType", default, skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,
    #[serde(rename = "StorageClass", default, skip_serializing_if = "Option::is_none")]
    pub storage_class: Option<String>,
    #[serde(rename = "ETag", default, skip_serializing_if = "Option::is_none")]
    pub etag: Option<String>,
}

impl ObjectEntry {
    pub fn folder(key: &str, last_modified: Option<OffsetDateTime>) -> Self {
        Self {
            key: key.to_string(),
            is_folder: true,
            size: 0,
            last_modified,
            ..Default::default()
        }
    }

    pub fn file(key: &str, size: u64, last_modified: Option<OffsetDateTime>) -> Self {
        Self {
            key: key.to_string(),
            is_folder: false,
            size,
            last_modified,
            ..Default::default()
        }
    }
}

/// Listing result tagged the way the browsing layer switches on it:
/// `{"type": "buckets" | "objects", "data": [...]}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "lowercase")]
pub enum ListResult {
    Buckets(Vec<Bucket>),
    Objects(Vec<ObjectEntry>),
}

impl ListResult {
    pub fn len(&self) -> usize {
        match self {
            ListResult::Buckets(buckets) => buckets.len(),
            ListResult::Objects(entries) => entries.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn objects(&self) -> &[ObjectEntry] {
        match self {
            ListResult::Objects(entries) => entries,
            ListResult::Buckets(_) => &[],
        }
    }

    pub fn into_objects(self) -> Vec<ObjectEntry> {
        match self {
            ListResult::Objects(entries) => entries,
            ListResult::Buckets(_) => Vec::new(),
        }
    }
}

/// Object content as the backend handed it over.
pub enum ObjectBody {
    Bytes(Bytes),
    Stream(BoxStream<'static, StorageResult<Bytes>>),
}

impl ObjectBody {
    /// Collects either representation into one buffer.
    pub async fn into_bytes(self) -> StorageResult<Bytes> {
        match self {
            ObjectBody::Bytes(bytes) => Ok(bytes),
            ObjectBody::Stream(mut stream) => {
                let mut buf = BytesMut::new();
                while let Some(chunk) = stream.next().await {
                    buf.extend_from_slice(&chunk?);
                }
                Ok(buf.freeze())
            }
        }
    }

    pub fn is_stream(&self) -> bool {
        matches!(self, ObjectBody::Stream(_))
    }
}

impl fmt::Debug for ObjectBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ObjectBody::Bytes(bytes) => f.debug_tuple("Bytes").field(&bytes.len()).finish(),
            ObjectBody::Stream(_) => f.write_str("Stream(..)"),
        }
    }
}

#[derive(Debug)]
pub struct ObjectEnvelope {
    pub body: ObjectBody,
    pub content_type: Option<String>,
    pub content_length: Option<u64>,
    pub last_modified: Option<OffsetDateTime>,
    pub etag: Option<String>,
}

/// Intended use of a generated object URL.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UrlOperation {
    /// Render inline; no disposition override.
    View,
    /// Force a save under the key's basename.
    Download,
}

impl UrlOperation {
    pub fn as_str(&self) -> &'static str {
        match self {
            UrlOperation::View => "view",
            UrlOperation::Download => "download",
        }
    }
}

impl fmt::Display for UrlOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for UrlOperation {
    type Err = StorageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "view" => Ok(UrlOperation::View),
            "download" => Ok(UrlOperation::Download),
            other => Err(StorageError::InvalidArgument(format!(
                "unknown url operation: {}",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeleteFailure {
    #[serde(rename = "Key")]
    pub key: String,
    #[serde(rename = "Code")]
    pub code: String,
    #[serde(rename = "Message")]
    pub message: String,
}

/// Batch delete report. Successes are kept even when other keys fail.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DeleteOutcome {
    pub deleted: Vec<String>,
    pub errors: Vec<DeleteFailure>,
}

impl DeleteOutcome {
    pub fn is_complete(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn merge(&mut self, other: DeleteOutcome) {
        self.deleted.extend(other.deleted);
        self.errors.extend(other.errors);
    }

    pub fn record(&mut self, key: &str, result: StorageResult<()>) {
        match result {
            Ok(()) => self.deleted.push(key.to_string()),
            Err(err) => self.errors.push(DeleteFailure {
                key: key.to_string(),
                code: err.code().unwrap_or("Error").to_string(),
                message: err.to_string(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::error::ProviderFailure;

    #[test]
    fn test_list_result_tagging() {
        let result = ListResult::Objects(vec![ObjectEntry::folder("a/", None)]);
        let json = serde_json::to_value(&result).unwrap();

        assert_eq!(json["type"], "objects");
        assert_eq!(json["data"][0]["Key"], "a/");
        assert_eq!(json["data"][0]["isFolder"], true);
        assert_eq!(json["data"][0]["Size"], 0);

        let buckets = ListResult::Buckets(vec![Bucket::named("photos")]);
        let json = serde_json::to_value(&buckets).unwrap();
        assert_eq!(json["type"], "buckets");
        assert_eq!(json["data"][0]["Name"], "photos");
        assert!(json["data"][0].get("IsPCGBucket").is_none());
    }

    #[test]
    fn test_url_operation_parse() {
        assert_eq!("view".parse::<UrlOperation>().unwrap(), UrlOperation::View);
        assert_eq!("download".parse::<UrlOperation>().unwrap(), UrlOperation::Download);
        assert!(matches!(
            "print".parse::<UrlOperation>(),
            Err(StorageError::InvalidArgument(_))
        ));
    }

    #[tokio::test]
    async fn test_body_into_bytes() {
        let body = ObjectBody::Bytes(Bytes::from_static(b"hello"));
        assert_eq!(body.into_bytes().await.unwrap(), Bytes::from_static(b"hello"));

        let chunks: Vec<StorageResult<Bytes>> =
            vec![Ok(Bytes::from_static(b"hel")), Ok(Bytes::from_static(b"lo"))];
        let body = ObjectBody::Stream(futures::stream::iter(chunks).boxed());
        assert!(body.is_stream());
        assert_eq!(body.into_bytes().await.unwrap(), Bytes::from_static(b"hello"));
    }

    #[tokio::test]
    async fn test_body_stream_error() {
        let chunks: Vec<StorageResult<Bytes>> = vec![
            Ok(Bytes::from_static(b"hel")),
            Err(ProviderFailure::new("reset").into()),
        ];
        let body = ObjectBody::Stream(futures::stream::iter(chunks).boxed());
        assert!(body.into_bytes().await.is_err());
    }

    #[test]
    fn test_delete_outcome_record() {
        let mut outcome = DeleteOutcome::default();
        outcome.record("a.txt", Ok(()));
        outcome.record(
            "b.txt",
            Err(ProviderFailure::new("locked").with_code("LeaseIdMissing").into()),
        );

        assert_eq!(outcome.deleted, vec!["a.txt".to_string()]);
        assert_eq!(outcome.errors.len(), 1);
        assert_eq!(outcome.errors[0].key, "b.txt");
        assert_eq!(outcome.errors[0].code, "LeaseIdMissing");
        assert!(!outcome.is_complete());
    }
}
