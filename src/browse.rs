//! Operations the file browser performs on top of a [`StorageClient`].

use std::path::Path;

use bytes::Bytes;
use futures::StreamExt;
use serde::Serialize;
use tokio::io::AsyncWriteExt;
use tracing::{info, instrument};

use crate::{
    adapters::{StorageClient, DEFAULT_URL_EXPIRY},
    model::{Connection, DeleteOutcome, ListResult, ObjectBody, StorageResult},
    util::object::{extension, folder_key},
};

/// Extensions previewed inline as text.
pub const TEXT_EXTENSIONS: &[&str] = &[
    "txt", "json", "js", "css", "xml", "md", "markdown", "yaml", "yml", "ini", "csv", "log",
];

/// Either the decoded text of an object (`type == "text"`) or a signed URL
/// tagged with the key's extension.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Preview {
    #[serde(rename = "type")]
    pub kind: String,
    pub content: String,
}

impl Preview {
    pub fn is_text(&self) -> bool {
        self.kind == "text"
    }
}

pub fn is_text_previewable(key: &str) -> bool {
    extension(key).is_some_and(|ext| TEXT_EXTENSIONS.contains(&ext.as_str()))
}

/// Buckets when no bucket is known, otherwise one level of `bucket`.
#[instrument(skip(client, connection), fields(connection_name = connection.name.as_str()))]
pub async fn list(
    client: &dyn StorageClient,
    connection: &Connection,
    bucket: Option<&str>,
    prefix: &str,
) -> StorageResult<ListResult> {
    let target = bucket
        .map(str::trim)
        .filter(|b| !b.is_empty())
        .or_else(|| connection.bucket());

    match target {
        Some(bucket) => client.list_objects(bucket, prefix).await,
        None => {
            info!("no bucket given, listing buckets");
            Ok(ListResult::Buckets(client.list_buckets().await?))
        }
    }
}

/// Deletes everything under `key` and then the folder marker itself.
#[instrument(skip(client))]
pub async fn delete_folder(
    client: &dyn StorageClient,
    bucket: &str,
    key: &str,
) -> StorageResult<DeleteOutcome> {
    let folder = folder_key(key);

    let mut keys = Vec::new();
    let mut pending = vec![folder.clone()];
    while let Some(prefix) = pending.pop() {
        for entry in client.list_objects(bucket, &prefix).await?.into_objects() {
            if entry.is_folder {
                pending.push(entry.key.clone());
            }
            keys.push(entry.key);
        }
    }

    // files first, then markers deepest first
    keys.sort_by_key(|k| (k.ends_with('/'), std::cmp::Reverse(k.matches('/').count())));

    let mut outcome = if keys.is_empty() {
        DeleteOutcome::default()
    } else {
        client.delete_objects(bucket, &keys).await?
    };
    outcome.record(&folder, client.delete_object(bucket, &folder).await);

    info!(
        deleted = outcome.deleted.len(),
        failed = outcome.errors.len(),
        "deleted folder"
    );
    Ok(outcome)
}

#[instrument(skip(client))]
pub async fn preview(client: &dyn StorageClient, bucket: &str, key: &str) -> StorageResult<Preview> {
    if is_text_previewable(key) {
        let body = client.get_object(bucket, key).await?.body.into_bytes().await?;
        return Ok(Preview {
            kind: "text".to_string(),
            content: String::from_utf8_lossy(&body).into_owned(),
        });
    }

    let url = client.get_signed_url(bucket, key, DEFAULT_URL_EXPIRY).await?;
    Ok(Preview {
        kind: extension(key).unwrap_or_default(),
        content: url,
    })
}

#[instrument(skip(client, path), fields(local_path = %path.as_ref().display()))]
pub async fn upload_file(
    client: &dyn StorageClient,
    bucket: &str,
    key: &str,
    path: impl AsRef<Path>,
) -> StorageResult<u64> {
    let body = tokio::fs::read(path.as_ref()).await?;
    let size = body.len() as u64;

    client.upload_object(bucket, key, Bytes::from(body)).await?;
    info!(size = size, "uploaded file");
    Ok(size)
}

/// Writes the object to `path`, streaming when the backend streams.
#[instrument(skip(client, path), fields(local_path = %path.as_ref().display()))]
pub async fn download_file(
    client: &dyn StorageClient,
    bucket: &str,
    key: &str,
    path: impl AsRef<Path>,
) -> StorageResult<u64> {
    let envelope = client.get_object(bucket, key).await?;

    let written = match envelope.body {
        ObjectBody::Bytes(bytes) => {
            tokio::fs::write(path.as_ref(), &bytes).await?;
            bytes.len() as u64
        }
        ObjectBody::Stream(mut stream) => {
            let mut file = tokio::fs::File::create(path.as_ref()).await?;
            let mut written = 0u64;
            while let Some(chunk) = stream.next().await {
                let chunk = chunk?;
                file.write_all(&chunk).await?;
                written += chunk.len() as u64;
            }
            file.flush().await?;
            written
        }
    };

    info!(size = written, "downloaded file");
    Ok(written)
}
