use std::time::Duration;

use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_s3::{
    config::{Builder as S3ConfigBuilder, Credentials, Region},
    error::{DisplayErrorContext, ProvideErrorMetadata, SdkError},
    operation::list_objects_v2::ListObjectsV2Output,
    presigning::PresigningConfig,
    primitives::{ByteStream, DateTime as AwsDateTime},
    types::{Delete, ObjectIdentifier},
};
use bytes::Bytes;
use futures::StreamExt;
use time::OffsetDateTime;
use tracing::{error, info, instrument, warn};

use crate::{
    adapters::{self, StorageClient, DEFAULT_URL_EXPIRY},
    model::{
        Bucket, Connection, DeleteFailure, DeleteOutcome, ListResult, MismatchPolicy, ObjectBody,
        ObjectEntry, ObjectEnvelope, ProviderFailure, StorageError, StorageResult, UrlOperation,
    },
    normalize,
    util::{
        content_type::content_type_for,
        listing::{exclude_prefix, url_overrides, UrlOverrides},
        object::{folder_key, DELIMITER},
    },
};

pub const CLIENT_TYPE: &str = "s3";
/// Signing region used when only an explicit endpoint is configured.
pub const DEFAULT_SIGNING_REGION: &str = "us-east-1";
pub const DEFAULT_STORAGE_CLASS: &str = "STANDARD";
const MAX_DELETE_BATCH: usize = 1000;

struct Ready {
    client: aws_sdk_s3::Client,
    region: String,
    policy: MismatchPolicy,
}

impl Ready {
    fn classify(&self, failure: ProviderFailure) -> StorageError {
        normalize::classify(failure, &self.region)
    }
}

/// S3 adapter. Delimiter listing and batch delete are native here.
#[derive(Default)]
pub struct S3Client {
    state: Option<Ready>,
}

impl S3Client {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn boxed() -> Box<dyn StorageClient> {
        Box::new(Self::new())
    }

    /// Region requests are signed for, once initialized.
    pub fn region(&self) -> Option<&str> {
        self.state.as_ref().map(|ready| ready.region.as_str())
    }

    fn ready(&self) -> StorageResult<&Ready> {
        self.state.as_ref().ok_or(StorageError::NotInitialized)
    }

    async fn list_level(
        &self,
        ready: &Ready,
        bucket: &str,
        prefix: &str,
    ) -> StorageResult<Vec<ObjectEntry>> {
        let mut folders = Vec::new();
        let mut files = Vec::new();
        let mut continuation_token: Option<String> = None;

        loop {
            let mut req = ready
                .client
                .list_objects_v2()
                .bucket(bucket)
                .prefix(prefix)
                .delimiter(DELIMITER.to_string());

            if let Some(tok) = continuation_token {
                req = req.continuation_token(tok);
            }

            let page = req
                .send()
                .await
                .map_err(|err| ready.classify(provider_failure(err)))?;

            let (page_folders, page_files) = entries_from_page(&page);
            folders.extend(page_folders);
            files.extend(page_files);

            continuation_token = page.next_continuation_token().map(|tok| tok.to_string());
            if continuation_token.is_none() {
                break;
            }
        }

        folders.extend(files);
        Ok(exclude_prefix(folders, prefix))
    }

    async fn presign(
        &self,
        bucket: &str,
        key: &str,
        overrides: &UrlOverrides,
        expires_in: Duration,
    ) -> StorageResult<String> {
        let ready = self.ready()?;
        let presigning = PresigningConfig::expires_in(expires_in)
            .map_err(|err| StorageError::InvalidArgument(err.to_string()))?;

        let mut req = ready.client.get_object().bucket(bucket).key(key);
        if let Some(disposition) = &overrides.content_disposition {
            req = req.response_content_disposition(disposition);
        }
        if let Some(content_type) = &overrides.content_type {
            req = req.response_content_type(content_type);
        }

        let presigned = req
            .presigned(presigning)
            .await
            .map_err(|err| ready.classify(provider_failure(err)))?;

        Ok(presigned.uri().to_string())
    }

    async fn delete_batch(&self, ready: &Ready, bucket: &str, keys: &[String]) -> DeleteOutcome {
        let mut outcome = DeleteOutcome::default();

        let objects = keys
            .iter()
            .map(|key| ObjectIdentifier::builder().key(key).build())
            .collect::<Result<Vec<_>, _>>();
        let delete = objects.and_then(|objects| {
            Delete::builder()
                .set_objects(Some(objects))
                .quiet(false)
                .build()
        });
        let delete = match delete {
            Ok(delete) => delete,
            Err(err) => {
                for key in keys {
                    outcome.record(key, Err(StorageError::InvalidArgument(err.to_string())));
                }
                return outcome;
            }
        };

        let res = ready
            .client
            .delete_objects()
            .bucket(bucket)
            .delete(delete)
            .send()
            .await;

        match res {
            Ok(out) => {
                outcome
                    .deleted
                    .extend(out.deleted().iter().filter_map(|d| d.key()).map(str::to_string));
                outcome.errors.extend(out.errors().iter().map(|e| DeleteFailure {
                    key: e.key().unwrap_or_default().to_string(),
                    code: e.code().unwrap_or("Error").to_string(),
                    message: e.message().unwrap_or_default().to_string(),
                }));
            }
            Err(err) => {
                let err = ready.classify(provider_failure(err));
                error!(error_message=%err, error_group="delete_objects");
                let code = err.code().unwrap_or("Error").to_string();
                let message = err.to_string();
                outcome.errors.extend(keys.iter().map(|key| DeleteFailure {
                    key: key.clone(),
                    code: code.clone(),
                    message: message.clone(),
                }));
            }
        }

        outcome
    }
}

#[async_trait]
impl StorageClient for S3Client {
    fn client_type(&self) -> &str {
        CLIENT_TYPE
    }

    #[instrument(skip_all, fields(client = CLIENT_TYPE))]
    async fn initialize(&mut self, config: &Connection) -> StorageResult<()> {
        let endpoint = config.endpoint_url();
        let region = match (config.region(), &endpoint) {
            (Some(region), _) => region.to_string(),
            (None, Some(_)) => DEFAULT_SIGNING_REGION.to_string(),
            (None, None) => {
                return Err(StorageError::init(
                    CLIENT_TYPE,
                    "a region is required unless an explicit endpoint is given",
                ))
            }
        };

        let client = build_client(config, &region, endpoint.as_deref()).await?;
        let ready = Ready {
            client,
            region,
            policy: config.region_mismatch,
        };

        if let Some(bucket) = config.bucket() {
            probe(&ready, bucket).await;
        }

        self.state = Some(ready);
        Ok(())
    }

    #[instrument(skip(self), fields(client = CLIENT_TYPE))]
    async fn list_buckets(&self) -> StorageResult<Vec<Bucket>> {
        let ready = self.ready()?;

        let result = ready
            .client
            .list_buckets()
            .send()
            .await
            .map_err(|err| ready.classify(provider_failure(err)))
            .map(|out| {
                out.buckets()
                    .iter()
                    .map(|b| Bucket {
                        name: b.name().unwrap_or_default().to_string(),
                        creation_date: b.creation_date().and_then(to_offset_date_time),
                        ..Default::default()
                    })
                    .collect::<Vec<_>>()
            });

        let buckets = adapters::apply_mismatch_policy(result, ready.policy, "list_buckets")?;
        info!(count = buckets.len(), "listed buckets");
        Ok(buckets)
    }

    #[instrument(skip(self), fields(client = CLIENT_TYPE))]
    async fn list_objects(&self, bucket: &str, prefix: &str) -> StorageResult<ListResult> {
        let ready = self.ready()?;
        let result = self.list_level(ready, bucket, prefix).await;
        let entries = adapters::apply_mismatch_policy(result, ready.policy, "list_objects")?;

        Ok(ListResult::Objects(entries))
    }

    #[instrument(skip(self, body), fields(client = CLIENT_TYPE, size = body.len()))]
    async fn upload_object(&self, bucket: &str, key: &str, body: Bytes) -> StorageResult<()> {
        let ready = self.ready()?;

        ready
            .client
            .put_object()
            .bucket(bucket)
            .key(key)
            .content_type(content_type_for(key))
            .body(ByteStream::from(body))
            .send()
            .await
            .map_err(|err| ready.classify(provider_failure(err)))?;

        Ok(())
    }

    #[instrument(skip(self), fields(client = CLIENT_TYPE))]
    async fn get_object(&self, bucket: &str, key: &str) -> StorageResult<ObjectEnvelope> {
        let ready = self.ready()?;

        let out = ready
            .client
            .get_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .map_err(|err| {
                let failure = provider_failure(err);
                if failure.is_not_found() {
                    StorageError::NotFound(format!("{}/{}", bucket, key))
                } else {
                    ready.classify(failure)
                }
            })?;

        let content_type = out.content_type().map(str::to_string);
        let content_length = out.content_length().map(|len| len.max(0) as u64);
        let last_modified = out.last_modified().and_then(to_offset_date_time);
        let etag = out.e_tag().map(str::to_string);

        let stream = futures::stream::unfold(out.body, |mut body| async move {
            body.next().await.map(|chunk| {
                let chunk = chunk.map_err(|err| {
                    StorageError::from(
                        ProviderFailure::new(format!("failed to read body: {}", err))
                            .with_source(err),
                    )
                });
                (chunk, body)
            })
        });

        Ok(ObjectEnvelope {
            body: ObjectBody::Stream(stream.boxed()),
            content_type,
            content_length,
            last_modified,
            etag,
        })
    }

    #[instrument(skip(self), fields(client = CLIENT_TYPE))]
    async fn get_signed_url(
        &self,
        bucket: &str,
        key: &str,
        expires_in: Duration,
    ) -> StorageResult<String> {
        self.presign(bucket, key, &UrlOverrides::default(), expires_in)
            .await
    }

    #[instrument(skip(self), fields(client = CLIENT_TYPE))]
    async fn get_object_url(
        &self,
        bucket: &str,
        key: &str,
        operation: UrlOperation,
    ) -> StorageResult<String> {
        let url = self
            .presign(bucket, key, &url_overrides(key, operation), DEFAULT_URL_EXPIRY)
            .await?;
        info!(operation = operation.as_str(), "generated signed url");
        Ok(url)
    }

    #[instrument(skip(self), fields(client = CLIENT_TYPE))]
    async fn delete_object(&self, bucket: &str, key: &str) -> StorageResult<()> {
        let ready = self.ready()?;

        match ready.client.delete_object().bucket(bucket).key(key).send().await {
            Ok(_) => Ok(()),
            Err(err) => {
                let failure = provider_failure(err);
                if failure.is_not_found() {
                    return Ok(());
                }
                Err(ready.classify(failure))
            }
        }
    }

    #[instrument(skip(self, keys), fields(client = CLIENT_TYPE, count = keys.len()))]
    async fn delete_objects(&self, bucket: &str, keys: &[String]) -> StorageResult<DeleteOutcome> {
        let ready = self.ready()?;
        let mut outcome = DeleteOutcome::default();

        for chunk in keys.chunks(MAX_DELETE_BATCH) {
            outcome.merge(self.delete_batch(ready, bucket, chunk).await);
        }

        Ok(outcome)
    }

    #[instrument(skip(self), fields(client = CLIENT_TYPE))]
    async fn create_folder(&self, bucket: &str, path: &str) -> StorageResult<()> {
        let ready = self.ready()?;

        ready
            .client
            .put_object()
            .bucket(bucket)
            .key(folder_key(path))
            .body(ByteStream::from_static(b""))
            .send()
            .await
            .map_err(|err| ready.classify(provider_failure(err)))?;

        Ok(())
    }
}

async fn build_client(
    config: &Connection,
    region: &str,
    endpoint: Option<&str>,
) -> StorageResult<aws_sdk_s3::Client> {
    let access_key = config.access_key.as_deref().filter(|k| !k.is_empty());
    let secret_key = config.secret_key.as_deref().filter(|k| !k.is_empty());

    let mut builder = match (access_key, secret_key) {
        (Some(access_key), Some(secret_key)) => S3ConfigBuilder::new()
            .behavior_version(BehaviorVersion::latest())
            .credentials_provider(Credentials::new(
                access_key,
                secret_key,
                None,
                None,
                "connection",
            )),
        (None, None) => {
            let shared = aws_config::defaults(BehaviorVersion::latest())
                .region(Region::new(region.to_string()))
                .load()
                .await;
            S3ConfigBuilder::from(&shared)
        }
        _ => {
            return Err(StorageError::init(
                CLIENT_TYPE,
                "accessKey and secretKey must be given together",
            ))
        }
    };

    builder = builder.region(Region::new(region.to_string()));

    if let Some(endpoint) = endpoint {
        url::Url::parse(endpoint).map_err(|err| {
            StorageError::init(CLIENT_TYPE, format!("invalid endpoint {}: {}", endpoint, err))
        })?;
        builder = builder
            .endpoint_url(endpoint)
            .force_path_style(config.path_style.unwrap_or(true));
    } else if let Some(path_style) = config.path_style {
        builder = builder.force_path_style(path_style);
    }

    Ok(aws_sdk_s3::Client::from_conf(builder.build()))
}

/// One-key listing to surface a region mismatch early. Never fails.
async fn probe(ready: &Ready, bucket: &str) {
    let res = ready
        .client
        .list_objects_v2()
        .bucket(bucket)
        .max_keys(1)
        .send()
        .await;

    match res {
        Ok(_) => info!(region = ready.region.as_str(), bucket = bucket, "validated configuration"),
        Err(err) => match ready.classify(provider_failure(err)) {
            StorageError::RegionMismatch {
                configured,
                expected,
                ..
            } => warn!(
                configured_region = configured.as_str(),
                expected_region = expected.as_str(),
                error_group = "initialize",
                "region mismatch detected during initialization, keeping configured region"
            ),
            err => warn!(error_message=%err, error_group="initialize", "probe failed"),
        },
    }
}

/// Captures code, status and region hint before the SDK error is boxed.
pub(crate) fn provider_failure<E>(err: SdkError<E>) -> ProviderFailure
where
    E: ProvideErrorMetadata + std::error::Error + Send + Sync + 'static,
{
    let message = err
        .message()
        .map(str::to_string)
        .unwrap_or_else(|| DisplayErrorContext(&err).to_string());
    let mut failure = ProviderFailure::new(message);

    if let Some(code) = err.code() {
        failure = failure.with_code(code);
    }

    if let Some(raw) = err.raw_response() {
        failure = failure.with_status(raw.status().as_u16());

        let hint = raw
            .headers()
            .get("x-amz-bucket-region")
            .map(str::to_string)
            .or_else(|| {
                raw.body()
                    .bytes()
                    .and_then(|body| std::str::from_utf8(body).ok())
                    .and_then(|body| {
                        normalize::ErrorBody::parse(body).region().map(str::to_string)
                    })
            });
        if let Some(region) = hint {
            failure = failure.with_expected_region(region);
        }
    }

    failure.with_source(err)
}

pub(crate) fn entries_from_page(page: &ListObjectsV2Output) -> (Vec<ObjectEntry>, Vec<ObjectEntry>) {
    let folders = page
        .common_prefixes()
        .iter()
        .filter_map(|cp| cp.prefix())
        .map(|prefix| ObjectEntry::folder(prefix, None))
        .collect();

    let files = page
        .contents()
        .iter()
        .filter_map(|o| {
            let key = o.key()?;
            let is_folder = key.ends_with(DELIMITER);

            Some(ObjectEntry {
                key: key.to_string(),
                is_folder,
                size: if is_folder { 0 } else { o.size().unwrap_or(0).max(0) as u64 },
                last_modified: o.last_modified().and_then(to_offset_date_time),
                content_type: if is_folder {
                    None
                } else {
                    Some(content_type_for(key).to_string())
                },
                storage_class: Some(
                    o.storage_class()
                        .map(|class| class.as_str())
                        .unwrap_or(DEFAULT_STORAGE_CLASS)
                        .to_string(),
                ),
                etag: o.e_tag().map(str::to_string),
            })
        })
        .collect();

    (folders, files)
}

fn to_offset_date_time(dt: &AwsDateTime) -> Option<OffsetDateTime> {
    OffsetDateTime::from_unix_timestamp(dt.secs())
        .ok()
        .map(|t| t + time::Duration::nanoseconds(dt.subsec_nanos() as i64))
}
