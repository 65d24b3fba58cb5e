use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::{
    header::{HeaderValue, AUTHORIZATION},
    Method, Request, Response,
};
use serde::Deserialize;
use time::OffsetDateTime;
use tracing::{error, info, instrument};
use url::Url;

use crate::{
    adapters::{self, StorageClient, DEFAULT_URL_EXPIRY},
    model::{
        Bucket, Connection, DeleteFailure, DeleteOutcome, ListResult, MismatchPolicy, ObjectEntry,
        ObjectEnvelope, ProviderFailure, StorageError, StorageResult, UrlOperation,
    },
    normalize::{self, ErrorBody},
    util::{
        content_type::content_type_for,
        http,
        listing::{exclude_prefix, url_overrides, UrlOverrides},
        object::{folder_key, DELIMITER},
        signing,
    },
};

pub const CLIENT_TYPE: &str = "aliyun-oss";
pub const FOLDER_CONTENT_TYPE: &str = "application/x-directory";
const HOST_SUFFIX: &str = ".aliyuncs.com";
const MAX_DELETE_BATCH: usize = 1000;
const MAX_KEYS: &str = "1000";

struct Ready {
    http: reqwest::Client,
    access_key: String,
    secret_key: String,
    host: String,
    region: String,
    policy: MismatchPolicy,
}

impl Ready {
    fn service_url(&self, query: &[(&str, &str)]) -> StorageResult<Url> {
        parse_url(&format!("https://{}/{}", self.host, query_string(query)))
    }

    fn bucket_url(&self, bucket: &str, key: &str, query: &[(&str, &str)]) -> StorageResult<Url> {
        parse_url(&format!(
            "https://{}.{}/{}{}",
            bucket,
            self.host,
            signing::encode_path(key),
            query_string(query)
        ))
    }

    fn classify(&self, failure: ProviderFailure) -> StorageError {
        normalize::classify(failure, &self.region)
    }

    /// Signs and sends one request against `resource`, the canonical
    /// `/bucket/key?subresource` form.
    async fn execute(
        &self,
        method: Method,
        url: Url,
        resource: &str,
        headers: &[(&str, &str)],
        body: Option<Bytes>,
    ) -> StorageResult<Response> {
        let mut builder = self
            .http
            .request(method, url)
            .header("date", signing::http_date(OffsetDateTime::now_utc()));
        for (name, value) in headers {
            builder = builder.header(*name, *value);
        }
        if let Some(body) = body {
            builder = builder.body(body);
        }

        let mut req = builder
            .build()
            .map_err(|err| StorageError::from(http::transport_failure(err)))?;
        let signature =
            signing::hmac_sha1_base64(self.secret_key.as_bytes(), &header_string_to_sign(&req, resource))?;
        let auth = HeaderValue::from_str(&format!("OSS {}:{}", self.access_key, signature))
            .map_err(|err| StorageError::InvalidArgument(err.to_string()))?;
        req.headers_mut().insert(AUTHORIZATION, auth);

        let resp = self
            .http
            .execute(req)
            .await
            .map_err(|err| StorageError::from(http::transport_failure(err)))?;

        if resp.status().is_success() {
            return Ok(resp);
        }

        let (failure, body) = http::response_failure(resp, None).await;
        Err(self.classify(with_endpoint_hint(failure, &body)))
    }

    async fn read_text(resp: Response) -> StorageResult<String> {
        resp.text()
            .await
            .map_err(|err| StorageError::from(http::transport_failure(err)))
    }

    async fn list_level(&self, bucket: &str, prefix: &str) -> StorageResult<Vec<ObjectEntry>> {
        let mut folders = Vec::new();
        let mut files = Vec::new();
        let mut marker: Option<String> = None;
        let delimiter = DELIMITER.to_string();

        loop {
            let mut query = vec![("delimiter", delimiter.as_str()), ("max-keys", MAX_KEYS)];
            if !prefix.is_empty() {
                query.push(("prefix", prefix));
            }
            if let Some(marker) = marker.as_deref() {
                query.push(("marker", marker));
            }

            let url = self.bucket_url(bucket, "", &query)?;
            let resource = format!("/{}/", bucket);
            let resp = self.execute(Method::GET, url, &resource, &[], None).await?;
            let page = parse_object_list(&Self::read_text(resp).await?)?;

            folders.extend(page.folders);
            files.extend(page.files);

            marker = page.next_marker;
            if marker.is_none() {
                break;
            }
        }

        folders.extend(files);
        Ok(exclude_prefix(folders, prefix))
    }

    fn signed_url(
        &self,
        bucket: &str,
        key: &str,
        overrides: &UrlOverrides,
        expires_in: Duration,
    ) -> StorageResult<String> {
        let expires = i64::try_from(expires_in.as_secs())
            .ok()
            .and_then(|secs| OffsetDateTime::now_utc().unix_timestamp().checked_add(secs))
            .ok_or_else(|| {
                StorageError::InvalidArgument(format!("expiry out of range: {:?}", expires_in))
            })?;
        let resource = format!("/{}/{}", bucket, key);
        let string_to_sign = url_string_to_sign(expires, &resource, overrides);
        let signature = signing::hmac_sha1_base64(self.secret_key.as_bytes(), &string_to_sign)?;

        let mut query = vec![
            ("OSSAccessKeyId".to_string(), self.access_key.clone()),
            ("Expires".to_string(), expires.to_string()),
            ("Signature".to_string(), signature),
        ];
        for (name, value) in response_params(overrides) {
            query.push((name.to_string(), value.to_string()));
        }
        let query: Vec<(&str, &str)> = query
            .iter()
            .map(|(name, value)| (name.as_str(), value.as_str()))
            .collect();

        Ok(self.bucket_url(bucket, key, &query)?.to_string())
    }

    async fn delete_batch(&self, bucket: &str, keys: &[String]) -> DeleteOutcome {
        let body = delete_request_body(keys);
        let md5 = signing::md5_base64(body.as_bytes());
        let headers = [("content-md5", md5.as_str()), ("content-type", "application/xml")];
        let resource = format!("/{}/?delete", bucket);

        let result = async {
            let url = self.bucket_url(bucket, "", &[("delete", "")])?;
            let resp = self
                .execute(Method::POST, url, &resource, &headers, Some(Bytes::from(body)))
                .await?;
            parse_delete_result(&Self::read_text(resp).await?)
        }
        .await;

        match result {
            Ok(deleted) => reconcile_deleted(keys, deleted),
            Err(err) => {
                error!(error_message=%err, error_group="delete_objects");
                let code = err.code().unwrap_or("Error").to_string();
                let message = err.to_string();
                DeleteOutcome {
                    deleted: Vec::new(),
                    errors: keys
                        .iter()
                        .map(|key| DeleteFailure {
                            key: key.clone(),
                            code: code.clone(),
                            message: message.clone(),
                        })
                        .collect(),
                }
            }
        }
    }
}

/// Aliyun OSS over the REST API with V1 (HMAC-SHA1) signatures. Listing and
/// batch delete are native. Always HTTPS, virtual-hosted bucket addressing.
#[derive(Default)]
pub struct OssClient {
    state: Option<Ready>,
}

impl OssClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn boxed() -> Box<dyn StorageClient> {
        Box::new(Self::new())
    }

    fn ready(&self) -> StorageResult<&Ready> {
        self.state.as_ref().ok_or(StorageError::NotInitialized)
    }
}

#[async_trait]
impl StorageClient for OssClient {
    fn client_type(&self) -> &str {
        CLIENT_TYPE
    }

    #[instrument(skip_all, fields(client = CLIENT_TYPE))]
    async fn initialize(&mut self, config: &Connection) -> StorageResult<()> {
        let access_key = config.access_key.as_deref().filter(|k| !k.trim().is_empty());
        let secret_key = config.secret_key.as_deref().filter(|k| !k.trim().is_empty());
        let (access_key, secret_key) = match (access_key, secret_key) {
            (Some(ak), Some(sk)) => (ak.trim().to_string(), sk.trim().to_string()),
            _ => {
                return Err(StorageError::init(
                    CLIENT_TYPE,
                    "accessKey and secretKey are required",
                ))
            }
        };

        let host = match (config.endpoint(), config.region()) {
            (Some(endpoint), _) => endpoint_host(endpoint),
            (None, Some(region)) => host_for_region(region),
            (None, None) => {
                return Err(StorageError::init(CLIENT_TYPE, "an endpoint or region is required"))
            }
        };
        if host.is_empty() {
            return Err(StorageError::init(CLIENT_TYPE, "endpoint has no host"));
        }
        Url::parse(&format!("https://{}/", host)).map_err(|err| {
            StorageError::init(CLIENT_TYPE, format!("invalid endpoint {}: {}", host, err))
        })?;

        let region = config
            .region()
            .map(|region| region.strip_prefix("oss-").unwrap_or(region).to_string())
            .or_else(|| region_from_host(&host))
            .unwrap_or_default();

        info!(host = host.as_str(), region = region.as_str(), "initialized");
        self.state = Some(Ready {
            http: http::build_client(CLIENT_TYPE, config.timeout())?,
            access_key,
            secret_key,
            host,
            region,
            policy: config.region_mismatch,
        });
        Ok(())
    }

    #[instrument(skip(self), fields(client = CLIENT_TYPE))]
    async fn list_buckets(&self) -> StorageResult<Vec<Bucket>> {
        let ready = self.ready()?;

        let result = async {
            let mut buckets = Vec::new();
            let mut marker: Option<String> = None;
            loop {
                let mut query = vec![("max-keys", MAX_KEYS)];
                if let Some(marker) = marker.as_deref() {
                    query.push(("marker", marker));
                }

                let resp = ready
                    .execute(Method::GET, ready.service_url(&query)?, "/", &[], None)
                    .await?;
                let page = parse_bucket_list(&Ready::read_text(resp).await?)?;
                buckets.extend(page.buckets);

                marker = page.next_marker;
                if marker.is_none() {
                    break;
                }
            }
            Ok::<_, StorageError>(buckets)
        }
        .await;

        adapters::apply_mismatch_policy(result, ready.policy, "list_buckets")
    }

    #[instrument(skip(self), fields(client = CLIENT_TYPE))]
    async fn list_objects(&self, bucket: &str, prefix: &str) -> StorageResult<ListResult> {
        let ready = self.ready()?;
        let result = ready.list_level(bucket, prefix).await;
        let entries = adapters::apply_mismatch_policy(result, ready.policy, "list_objects")?;

        Ok(ListResult::Objects(entries))
    }

    #[instrument(skip(self, body), fields(client = CLIENT_TYPE, size = body.len()))]
    async fn upload_object(&self, bucket: &str, key: &str, body: Bytes) -> StorageResult<()> {
        let ready = self.ready()?;
        let resource = format!("/{}/{}", bucket, key);

        ready
            .execute(
                Method::PUT,
                ready.bucket_url(bucket, key, &[])?,
                &resource,
                &[("content-type", content_type_for(key))],
                Some(body),
            )
            .await?;
        Ok(())
    }

    #[instrument(skip(self), fields(client = CLIENT_TYPE))]
    async fn get_object(&self, bucket: &str, key: &str) -> StorageResult<ObjectEnvelope> {
        let ready = self.ready()?;
        let resource = format!("/{}/{}", bucket, key);

        match ready
            .execute(Method::GET, ready.bucket_url(bucket, key, &[])?, &resource, &[], None)
            .await
        {
            Ok(resp) => Ok(http::envelope(resp)),
            Err(err) if err.is_not_found() => {
                Err(StorageError::NotFound(format!("{}/{}", bucket, key)))
            }
            Err(err) => Err(err),
        }
    }

    #[instrument(skip(self), fields(client = CLIENT_TYPE))]
    async fn get_signed_url(
        &self,
        bucket: &str,
        key: &str,
        expires_in: Duration,
    ) -> StorageResult<String> {
        self.ready()?
            .signed_url(bucket, key, &UrlOverrides::default(), expires_in)
    }

    #[instrument(skip(self), fields(client = CLIENT_TYPE))]
    async fn get_object_url(
        &self,
        bucket: &str,
        key: &str,
        operation: UrlOperation,
    ) -> StorageResult<String> {
        self.ready()?
            .signed_url(bucket, key, &url_overrides(key, operation), DEFAULT_URL_EXPIRY)
    }

    #[instrument(skip(self), fields(client = CLIENT_TYPE))]
    async fn delete_object(&self, bucket: &str, key: &str) -> StorageResult<()> {
        let ready = self.ready()?;
        let resource = format!("/{}/{}", bucket, key);

        match ready
            .execute(Method::DELETE, ready.bucket_url(bucket, key, &[])?, &resource, &[], None)
            .await
        {
            Ok(_) => Ok(()),
            Err(err) if err.is_not_found() => Ok(()),
            Err(err) => Err(err),
        }
    }

    #[instrument(skip(self, keys), fields(client = CLIENT_TYPE, count = keys.len()))]
    async fn delete_objects(&self, bucket: &str, keys: &[String]) -> StorageResult<DeleteOutcome> {
        let ready = self.ready()?;
        let mut outcome = DeleteOutcome::default();

        for chunk in keys.chunks(MAX_DELETE_BATCH) {
            outcome.merge(ready.delete_batch(bucket, chunk).await);
        }

        Ok(outcome)
    }

    #[instrument(skip(self), fields(client = CLIENT_TYPE))]
    async fn create_folder(&self, bucket: &str, path: &str) -> StorageResult<()> {
        let ready = self.ready()?;
        let key = folder_key(path);
        let resource = format!("/{}/{}", bucket, key);

        ready
            .execute(
                Method::PUT,
                ready.bucket_url(bucket, &key, &[])?,
                &resource,
                &[("content-type", FOLDER_CONTENT_TYPE)],
                Some(Bytes::new()),
            )
            .await?;
        Ok(())
    }
}

/// `cn-hangzhou` and `oss-cn-hangzhou` both name `oss-cn-hangzhou.aliyuncs.com`.
pub fn host_for_region(region: &str) -> String {
    let region = region.strip_prefix("oss-").unwrap_or(region);
    format!("oss-{}{}", region, HOST_SUFFIX)
}

/// Host part of a configured endpoint; any scheme is dropped since HTTPS is
/// always used.
pub fn endpoint_host(endpoint: &str) -> String {
    let endpoint = endpoint
        .trim()
        .trim_start_matches("https://")
        .trim_start_matches("http://");
    endpoint.split('/').next().unwrap_or_default().to_string()
}

/// `oss-cn-beijing.aliyuncs.com` or `oss-cn-beijing-internal.aliyuncs.com`
/// to `cn-beijing`.
pub fn region_from_host(host: &str) -> Option<String> {
    let name = host.strip_suffix(HOST_SUFFIX)?.strip_prefix("oss-")?;
    let name = name.strip_suffix("-internal").unwrap_or(name);
    if name.is_empty() {
        None
    } else {
        Some(name.to_string())
    }
}

fn response_params(overrides: &UrlOverrides) -> Vec<(&'static str, &str)> {
    let mut params = Vec::new();
    if let Some(disposition) = &overrides.content_disposition {
        params.push(("response-content-disposition", disposition.as_str()));
    }
    if let Some(content_type) = &overrides.content_type {
        params.push(("response-content-type", content_type.as_str()));
    }
    params
}

/// String-to-sign for a header-authorized request.
pub(crate) fn header_string_to_sign(req: &Request, resource: &str) -> String {
    let headers = req.headers();
    let value = |name: &str| http::header(headers, name).unwrap_or("");

    format!(
        "{}\n{}\n{}\n{}\n{}{}",
        req.method().as_str(),
        value("content-md5"),
        value("content-type"),
        value("date"),
        http::canonical_headers(headers, "x-oss-"),
        resource
    )
}

/// String-to-sign for a query-authorized URL. Override values go in raw.
pub(crate) fn url_string_to_sign(expires: i64, resource: &str, overrides: &UrlOverrides) -> String {
    let mut params = response_params(overrides);
    params.sort();

    let mut resource = resource.to_string();
    if !params.is_empty() {
        let joined = params
            .iter()
            .map(|(name, value)| format!("{}={}", name, value))
            .collect::<Vec<_>>()
            .join("&");
        resource = format!("{}?{}", resource, joined);
    }

    format!("GET\n\n\n{}\n{}", expires, resource)
}

fn query_string(query: &[(&str, &str)]) -> String {
    if query.is_empty() {
        return String::new();
    }
    let joined = query
        .iter()
        .map(|(name, value)| {
            if value.is_empty() {
                name.to_string()
            } else {
                format!("{}={}", name, signing::encode(value))
            }
        })
        .collect::<Vec<_>>()
        .join("&");
    format!("?{}", joined)
}

fn parse_url(raw: &str) -> StorageResult<Url> {
    Url::parse(raw).map_err(|err| StorageError::InvalidArgument(format!("{}: {}", raw, err)))
}

pub(crate) fn delete_request_body(keys: &[String]) -> String {
    let mut body = String::from("<?xml version=\"1.0\" encoding=\"UTF-8\"?><Delete><Quiet>false</Quiet>");
    for key in keys {
        body.push_str("<Object><Key>");
        body.push_str(&quick_xml::escape::escape(key.as_str()));
        body.push_str("</Key></Object>");
    }
    body.push_str("</Delete>");
    body
}

#[derive(Debug, Deserialize)]
struct BucketListing {
    #[serde(rename = "Buckets", default)]
    buckets: BucketItems,
    #[serde(rename = "IsTruncated", default)]
    is_truncated: Option<String>,
    #[serde(rename = "NextMarker", default)]
    next_marker: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct BucketItems {
    #[serde(rename = "Bucket", default)]
    items: Vec<BucketItem>,
}

#[derive(Debug, Deserialize)]
struct BucketItem {
    #[serde(rename = "Name")]
    name: String,
    #[serde(rename = "CreationDate", default)]
    creation_date: Option<String>,
    #[serde(rename = "Location", default)]
    location: Option<String>,
    #[serde(rename = "StorageClass", default)]
    storage_class: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ObjectListing {
    #[serde(rename = "Contents", default)]
    contents: Vec<ObjectItem>,
    #[serde(rename = "CommonPrefixes", default)]
    common_prefixes: Vec<PrefixItem>,
    #[serde(rename = "IsTruncated", default)]
    is_truncated: Option<String>,
    #[serde(rename = "NextMarker", default)]
    next_marker: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ObjectItem {
    #[serde(rename = "Key")]
    key: String,
    #[serde(rename = "LastModified", default)]
    last_modified: Option<String>,
    #[serde(rename = "ETag", default)]
    etag: Option<String>,
    #[serde(rename = "Size", default)]
    size: Option<String>,
    #[serde(rename = "StorageClass", default)]
    storage_class: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PrefixItem {
    #[serde(rename = "Prefix")]
    prefix: String,
}

#[derive(Debug, Deserialize)]
struct DeleteResult {
    #[serde(rename = "Deleted", default)]
    deleted: Vec<DeletedItem>,
}

#[derive(Debug, Deserialize)]
struct DeletedItem {
    #[serde(rename = "Key")]
    key: String,
}

pub(crate) struct BucketPage {
    pub buckets: Vec<Bucket>,
    pub next_marker: Option<String>,
}

pub(crate) struct ObjectPage {
    pub folders: Vec<ObjectEntry>,
    pub files: Vec<ObjectEntry>,
    pub next_marker: Option<String>,
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

/// Marker to continue from, only when the page says it was cut short.
fn continuation(is_truncated: Option<String>, next_marker: Option<String>) -> Option<String> {
    match is_truncated.as_deref().map(str::trim) {
        Some("true") => non_empty(next_marker),
        _ => None,
    }
}

fn parse_error(err: quick_xml::DeError) -> StorageError {
    StorageError::from(ProviderFailure::new(format!("unreadable response: {}", err)).with_source(err))
}

pub(crate) fn parse_bucket_list(body: &str) -> StorageResult<BucketPage> {
    let doc: BucketListing = quick_xml::de::from_str(body).map_err(parse_error)?;

    let buckets = doc
        .buckets
        .items
        .into_iter()
        .map(|item| Bucket {
            name: item.name,
            creation_date: item.creation_date.as_deref().and_then(signing::parse_timestamp),
            location: non_empty(item.location),
            storage_class: non_empty(item.storage_class),
            is_aliyun_oss: Some(true),
            ..Default::default()
        })
        .collect();

    Ok(BucketPage {
        buckets,
        next_marker: continuation(doc.is_truncated, doc.next_marker),
    })
}

pub(crate) fn parse_object_list(body: &str) -> StorageResult<ObjectPage> {
    let doc: ObjectListing = quick_xml::de::from_str(body).map_err(parse_error)?;

    let folders = doc
        .common_prefixes
        .into_iter()
        .map(|item| ObjectEntry::folder(&item.prefix, None))
        .collect();

    let files = doc
        .contents
        .into_iter()
        .map(|item| {
            let is_folder = item.key.ends_with(DELIMITER);
            ObjectEntry {
                is_folder,
                size: item
                    .size
                    .as_deref()
                    .and_then(|size| size.trim().parse().ok())
                    .unwrap_or(0),
                last_modified: item.last_modified.as_deref().and_then(signing::parse_timestamp),
                content_type: (!is_folder).then(|| content_type_for(&item.key).to_string()),
                storage_class: non_empty(item.storage_class),
                etag: non_empty(item.etag),
                key: item.key,
            }
        })
        .collect();

    Ok(ObjectPage {
        folders,
        files,
        next_marker: continuation(doc.is_truncated, doc.next_marker),
    })
}

pub(crate) fn parse_delete_result(body: &str) -> StorageResult<Vec<String>> {
    if body.trim().is_empty() {
        return Ok(Vec::new());
    }
    let doc: DeleteResult = quick_xml::de::from_str(body).map_err(parse_error)?;
    Ok(doc.deleted.into_iter().map(|item| item.key).collect())
}

/// OSS names the endpoint a bucket must be addressed through; its region is
/// the expected one.
pub(crate) fn with_endpoint_hint(failure: ProviderFailure, body: &ErrorBody) -> ProviderFailure {
    match body.endpoint().and_then(region_from_host) {
        Some(region) => failure.with_expected_region(region),
        None => failure,
    }
}

/// OSS only reports keys it deleted. Requested keys missing from the
/// response are failures, so every requested key lands in exactly one list.
pub(crate) fn reconcile_deleted(keys: &[String], deleted: Vec<String>) -> DeleteOutcome {
    let confirmed: std::collections::HashSet<String> = deleted.into_iter().collect();

    let mut outcome = DeleteOutcome::default();
    for key in keys {
        if confirmed.contains(key) {
            outcome.deleted.push(key.clone());
        } else {
            outcome.errors.push(DeleteFailure {
                key: key.clone(),
                code: "NotDeleted".to_string(),
                message: "key missing from DeleteResult".to_string(),
            });
        }
    }
    outcome
}
