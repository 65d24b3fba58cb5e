use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures::{future::BoxFuture, stream, FutureExt, StreamExt};
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
        Bucket, Connection, DeleteOutcome, ListResult, MismatchPolicy, ObjectEntry,
        ObjectEnvelope, StorageError, StorageResult, UrlOperation,
    },
    normalize,
    util::{
        content_type::content_type_for,
        http,
        listing::{emulate_hierarchy, url_overrides, UrlOverrides},
        object::{folder_key, DELIMITER},
        signing,
    },
};

pub const CLIENT_TYPE: &str = "azure-blob";
pub const API_VERSION: &str = "2020-12-06";
pub const FOLDER_CONTENT_TYPE: &str = "application/directory";
pub const DEFAULT_ACCESS_TIER: &str = "Standard";
const DELETE_CONCURRENCY: usize = 4;
const ERROR_CODE_HEADER: &str = "x-ms-error-code";
/// Backdates SAS start times to absorb clock skew.
const SAS_CLOCK_SKEW: time::Duration = time::Duration::minutes(5);

struct Ready {
    http: reqwest::Client,
    account: String,
    key: Vec<u8>,
    base: String,
    region: String,
    policy: MismatchPolicy,
}

impl Ready {
    fn service_url(&self, query: &[(&str, &str)]) -> StorageResult<Url> {
        parse_url(&format!("{}/{}", self.base, query_string(query)))
    }

    fn container_url(&self, container: &str, query: &[(&str, &str)]) -> StorageResult<Url> {
        parse_url(&format!(
            "{}/{}{}",
            self.base,
            signing::encode(container),
            query_string(query)
        ))
    }

    fn blob_url(&self, container: &str, key: &str) -> StorageResult<Url> {
        parse_url(&format!(
            "{}/{}/{}",
            self.base,
            signing::encode(container),
            signing::encode_path(key)
        ))
    }

    /// Signs and sends one request. Non-success statuses come back as errors.
    async fn execute(
        &self,
        method: Method,
        url: Url,
        headers: &[(&str, &str)],
        body: Option<Bytes>,
    ) -> StorageResult<Response> {
        let mut builder = self
            .http
            .request(method, url)
            .header("x-ms-date", signing::http_date(OffsetDateTime::now_utc()))
            .header("x-ms-version", API_VERSION);
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
            signing::hmac_sha256_base64(&self.key, &shared_key_string_to_sign(&self.account, &req))?;
        let auth = HeaderValue::from_str(&format!("SharedKey {}:{}", self.account, signature))
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

        let (failure, _) = http::response_failure(resp, Some(ERROR_CODE_HEADER)).await;
        Err(normalize::classify(failure, &self.region))
    }

    async fn delete_blob(&self, container: &str, key: &str) -> StorageResult<()> {
        let url = self.blob_url(container, key)?;
        match self.execute(Method::DELETE, url, &[], None).await {
            Ok(_) => Ok(()),
            Err(err) if err.is_not_found() => Ok(()),
            Err(err) => Err(err),
        }
    }

    async fn flat_listing(&self, container: &str, prefix: &str) -> StorageResult<Vec<ObjectEntry>> {
        let mut entries = Vec::new();
        let mut marker: Option<String> = None;

        loop {
            let mut query = vec![("restype", "container"), ("comp", "list")];
            if !prefix.is_empty() {
                query.push(("prefix", prefix));
            }
            if let Some(marker) = marker.as_deref() {
                query.push(("marker", marker));
            }

            let url = self.container_url(container, &query)?;
            let body = self.execute(Method::GET, url, &[], None).await?;
            let body = body
                .text()
                .await
                .map_err(|err| StorageError::from(http::transport_failure(err)))?;

            let page = parse_blob_list(&body)?;
            entries.extend(page.entries);

            marker = page.next_marker;
            if marker.is_none() {
                break;
            }
        }

        Ok(entries)
    }

    fn signed_url(
        &self,
        container: &str,
        key: &str,
        overrides: &UrlOverrides,
        expires_in: Duration,
    ) -> StorageResult<String> {
        let now = OffsetDateTime::now_utc();
        let expires_in = time::Duration::try_from(expires_in)
            .map_err(|err| StorageError::InvalidArgument(err.to_string()))?;
        let expiry = now.checked_add(expires_in).ok_or_else(|| {
            StorageError::InvalidArgument(format!("expiry out of range: {}", expires_in))
        })?;

        let sas = SasToken {
            permissions: "r",
            start: signing::iso_seconds(now - SAS_CLOCK_SKEW),
            expiry: signing::iso_seconds(expiry),
            resource: format!("/blob/{}/{}/{}", self.account, container, key),
            content_disposition: overrides.content_disposition.clone(),
            content_type: overrides.content_type.clone(),
        };
        let signature = signing::hmac_sha256_base64(&self.key, &sas.string_to_sign())?;

        Ok(format!(
            "{}?{}",
            self.blob_url(container, key)?,
            sas.query(&signature)
        ))
    }
}

/// Azure Blob Storage over the REST API with Shared Key auth. The namespace
/// is flat, so one level of hierarchy is rebuilt from prefix scans.
#[derive(Default)]
pub struct AzureBlobClient {
    state: Option<Ready>,
}

impl AzureBlobClient {
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
impl StorageClient for AzureBlobClient {
    fn client_type(&self) -> &str {
        CLIENT_TYPE
    }

    #[instrument(skip_all, fields(client = CLIENT_TYPE))]
    async fn initialize(&mut self, config: &Connection) -> StorageResult<()> {
        let account = config
            .account_name
            .as_deref()
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .ok_or_else(|| StorageError::init(CLIENT_TYPE, "accountName is required"))?;
        let key = config
            .account_key
            .as_deref()
            .filter(|key| !key.trim().is_empty())
            .ok_or_else(|| StorageError::init(CLIENT_TYPE, "accountKey is required"))?;
        let key = signing::decode_base64(key)
            .ok_or_else(|| StorageError::init(CLIENT_TYPE, "accountKey is not valid base64"))?;

        let base = config
            .endpoint_url()
            .unwrap_or_else(|| format!("https://{}.blob.core.windows.net", account));
        Url::parse(&base).map_err(|err| {
            StorageError::init(CLIENT_TYPE, format!("invalid endpoint {}: {}", base, err))
        })?;

        self.state = Some(Ready {
            http: http::build_client(CLIENT_TYPE, config.timeout())?,
            account: account.to_string(),
            key,
            base,
            region: config.region().unwrap_or_default().to_string(),
            policy: config.region_mismatch,
        });

        info!(account = account, "initialized");
        Ok(())
    }

    #[instrument(skip(self), fields(client = CLIENT_TYPE))]
    async fn list_buckets(&self) -> StorageResult<Vec<Bucket>> {
        let ready = self.ready()?;

        let result = async {
            let mut buckets = Vec::new();
            let mut marker: Option<String> = None;
            loop {
                let mut query = vec![("comp", "list")];
                if let Some(marker) = marker.as_deref() {
                    query.push(("marker", marker));
                }

                let resp = ready
                    .execute(Method::GET, ready.service_url(&query)?, &[], None)
                    .await?;
                let body = resp
                    .text()
                    .await
                    .map_err(|err| StorageError::from(http::transport_failure(err)))?;

                let page = parse_container_list(&body)?;
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

        let result = ready
            .flat_listing(bucket, prefix)
            .await
            .map(|flat| emulate_hierarchy(prefix, flat));
        let entries = adapters::apply_mismatch_policy(result, ready.policy, "list_objects")?;

        Ok(ListResult::Objects(entries))
    }

    #[instrument(skip(self, body), fields(client = CLIENT_TYPE, size = body.len()))]
    async fn upload_object(&self, bucket: &str, key: &str, body: Bytes) -> StorageResult<()> {
        let ready = self.ready()?;
        let headers = [
            ("x-ms-blob-type", "BlockBlob"),
            ("content-type", content_type_for(key)),
        ];

        ready
            .execute(Method::PUT, ready.blob_url(bucket, key)?, &headers, Some(body))
            .await?;
        Ok(())
    }

    #[instrument(skip(self), fields(client = CLIENT_TYPE))]
    async fn get_object(&self, bucket: &str, key: &str) -> StorageResult<ObjectEnvelope> {
        let ready = self.ready()?;

        match ready
            .execute(Method::GET, ready.blob_url(bucket, key)?, &[], None)
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
        self.ready()?.delete_blob(bucket, key).await
    }

    #[instrument(skip(self, keys), fields(client = CLIENT_TYPE, count = keys.len()))]
    async fn delete_objects(&self, bucket: &str, keys: &[String]) -> StorageResult<DeleteOutcome> {
        let ready = self.ready()?;

        let deletes: Vec<BoxFuture<'_, (&String, StorageResult<()>)>> = keys
            .iter()
            .map(|key| async move { (key, ready.delete_blob(bucket, key).await) }.boxed())
            .collect();
        let results = stream::iter(deletes)
            .buffered(DELETE_CONCURRENCY)
            .collect::<Vec<_>>()
            .await;

        let mut outcome = DeleteOutcome::default();
        for (key, result) in results {
            if let Err(err) = &result {
                error!(error_message=%err, error_group="delete_objects", key = key.as_str());
            }
            outcome.record(key, result);
        }

        Ok(outcome)
    }

    #[instrument(skip(self), fields(client = CLIENT_TYPE))]
    async fn create_folder(&self, bucket: &str, path: &str) -> StorageResult<()> {
        let ready = self.ready()?;
        let headers = [
            ("x-ms-blob-type", "BlockBlob"),
            ("content-type", FOLDER_CONTENT_TYPE),
        ];

        ready
            .execute(
                Method::PUT,
                ready.blob_url(bucket, &folder_key(path))?,
                &headers,
                Some(Bytes::new()),
            )
            .await?;
        Ok(())
    }
}

/// Shared Key string-to-sign for a built request.
pub(crate) fn shared_key_string_to_sign(account: &str, req: &Request) -> String {
    let headers = req.headers();
    let value = |name: &str| http::header(headers, name).unwrap_or("");

    let content_length = req
        .body()
        .and_then(|body| body.as_bytes())
        .map(|body| body.len())
        .filter(|len| *len > 0)
        .map(|len| len.to_string())
        .unwrap_or_default();

    let mut lines = vec![
        req.method().as_str().to_string(),
        value("content-encoding").to_string(),
        value("content-language").to_string(),
        content_length,
        value("content-md5").to_string(),
        value("content-type").to_string(),
        String::new(),
        value("if-modified-since").to_string(),
        value("if-match").to_string(),
        value("if-none-match").to_string(),
        value("if-unmodified-since").to_string(),
        value("range").to_string(),
    ]
    .join("\n");
    lines.push('\n');
    lines.push_str(&http::canonical_headers(headers, "x-ms-"));
    lines.push_str(&canonical_resource(account, req.url()));
    lines
}

fn canonical_resource(account: &str, url: &Url) -> String {
    let mut params: std::collections::BTreeMap<String, Vec<String>> = Default::default();
    for (name, value) in url.query_pairs() {
        params
            .entry(name.to_lowercase())
            .or_default()
            .push(value.into_owned());
    }

    let mut resource = format!("/{}{}", account, url.path());
    for (name, mut values) in params {
        values.sort();
        resource.push_str(&format!("\n{}:{}", name, values.join(",")));
    }
    resource
}

/// Service SAS for reading a single blob.
pub(crate) struct SasToken {
    pub permissions: &'static str,
    pub start: String,
    pub expiry: String,
    pub resource: String,
    pub content_disposition: Option<String>,
    pub content_type: Option<String>,
}

impl SasToken {
    pub fn string_to_sign(&self) -> String {
        [
            self.permissions,
            self.start.as_str(),
            self.expiry.as_str(),
            self.resource.as_str(),
            "",
            "",
            "",
            API_VERSION,
            "b",
            "",
            "",
            "",
            self.content_disposition.as_deref().unwrap_or(""),
            "",
            "",
            self.content_type.as_deref().unwrap_or(""),
        ]
        .join("\n")
    }

    pub fn query(&self, signature: &str) -> String {
        let mut pairs = vec![
            ("sv", API_VERSION),
            ("st", self.start.as_str()),
            ("se", self.expiry.as_str()),
            ("sr", "b"),
            ("sp", self.permissions),
        ];
        if let Some(disposition) = &self.content_disposition {
            pairs.push(("rscd", disposition));
        }
        if let Some(content_type) = &self.content_type {
            pairs.push(("rsct", content_type));
        }
        pairs.push(("sig", signature));

        pairs
            .into_iter()
            .map(|(name, value)| format!("{}={}", name, signing::encode(value)))
            .collect::<Vec<_>>()
            .join("&")
    }
}

fn query_string(query: &[(&str, &str)]) -> String {
    if query.is_empty() {
        return String::new();
    }
    let joined = query
        .iter()
        .map(|(name, value)| format!("{}={}", name, signing::encode(value)))
        .collect::<Vec<_>>()
        .join("&");
    format!("?{}", joined)
}

fn parse_url(raw: &str) -> StorageResult<Url> {
    Url::parse(raw).map_err(|err| StorageError::InvalidArgument(format!("{}: {}", raw, err)))
}

#[derive(Debug, Deserialize)]
struct ContainerEnumeration {
    #[serde(rename = "Containers", default)]
    containers: ContainerItems,
    #[serde(rename = "NextMarker", default)]
    next_marker: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct ContainerItems {
    #[serde(rename = "Container", default)]
    items: Vec<ContainerItem>,
}

#[derive(Debug, Deserialize)]
struct ContainerItem {
    #[serde(rename = "Name")]
    name: String,
    #[serde(rename = "Properties", default)]
    properties: Properties,
}

#[derive(Debug, Deserialize)]
struct BlobEnumeration {
    #[serde(rename = "Blobs", default)]
    blobs: BlobItems,
    #[serde(rename = "NextMarker", default)]
    next_marker: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct BlobItems {
    #[serde(rename = "Blob", default)]
    items: Vec<BlobItem>,
}

#[derive(Debug, Deserialize)]
struct BlobItem {
    #[serde(rename = "Name")]
    name: String,
    #[serde(rename = "Properties", default)]
    properties: Properties,
}

#[derive(Debug, Default, Deserialize)]
struct Properties {
    #[serde(rename = "Last-Modified", default)]
    last_modified: Option<String>,
    #[serde(rename = "Content-Length", default)]
    content_length: Option<String>,
    #[serde(rename = "Content-Type", default)]
    content_type: Option<String>,
    #[serde(rename = "Etag", default)]
    etag: Option<String>,
    #[serde(rename = "AccessTier", default)]
    access_tier: Option<String>,
}

pub(crate) struct ContainerPage {
    pub buckets: Vec<Bucket>,
    pub next_marker: Option<String>,
}

pub(crate) struct BlobPage {
    pub entries: Vec<ObjectEntry>,
    pub next_marker: Option<String>,
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

fn parse_error(err: quick_xml::DeError) -> StorageError {
    StorageError::from(
        crate::model::ProviderFailure::new(format!("unreadable listing: {}", err)).with_source(err),
    )
}

pub(crate) fn parse_container_list(body: &str) -> StorageResult<ContainerPage> {
    let doc: ContainerEnumeration = quick_xml::de::from_str(body).map_err(parse_error)?;

    let buckets = doc
        .containers
        .items
        .into_iter()
        .map(|item| Bucket {
            name: item.name,
            creation_date: item
                .properties
                .last_modified
                .as_deref()
                .and_then(signing::parse_timestamp),
            is_azure_container: Some(true),
            ..Default::default()
        })
        .collect();

    Ok(ContainerPage {
        buckets,
        next_marker: non_empty(doc.next_marker),
    })
}

pub(crate) fn parse_blob_list(body: &str) -> StorageResult<BlobPage> {
    let doc: BlobEnumeration = quick_xml::de::from_str(body).map_err(parse_error)?;

    let entries = doc
        .blobs
        .items
        .into_iter()
        .map(|item| {
            let props = item.properties;
            let is_folder = item.name.ends_with(DELIMITER);
            let content_type = non_empty(props.content_type)
                .or_else(|| (!is_folder).then(|| content_type_for(&item.name).to_string()));

            ObjectEntry {
                is_folder,
                size: props
                    .content_length
                    .as_deref()
                    .and_then(|len| len.trim().parse().ok())
                    .unwrap_or(0),
                last_modified: props.last_modified.as_deref().and_then(signing::parse_timestamp),
                content_type,
                storage_class: Some(
                    non_empty(props.access_tier).unwrap_or_else(|| DEFAULT_ACCESS_TIER.to_string()),
                ),
                etag: non_empty(props.etag),
                key: item.name,
            }
        })
        .collect();

    Ok(BlobPage {
        entries,
        next_marker: non_empty(doc.next_marker),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    // base64("devstoreaccount1-key")
    const KEY: &str = "ZGV2c3RvcmVhY2NvdW50MS1rZXk=";

    fn connection() -> Connection {
        Connection::new("azure", CLIENT_TYPE).with_account("myaccount", KEY)
    }

    async fn ready_client() -> AzureBlobClient {
        let mut client = AzureBlobClient::new();
        client.initialize(&connection()).await.unwrap();
        client
    }

    fn query(url: &str) -> HashMap<String, String> {
        Url::parse(url)
            .unwrap()
            .query_pairs()
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect()
    }

    #[tokio::test]
    async fn test_initialize_validation() {
        let cases = vec![
            ("missing account", Connection::new("a", CLIENT_TYPE)),
            (
                "missing key",
                Connection {
                    account_name: Some("acct".to_string()),
                    ..Connection::new("a", CLIENT_TYPE)
                },
            ),
            (
                "key not base64",
                Connection::new("a", CLIENT_TYPE).with_account("acct", "not base64!"),
            ),
            (
                "bad endpoint",
                Connection::new("a", CLIENT_TYPE)
                    .with_account("acct", KEY)
                    .with_endpoint("http://[::1"),
            ),
        ];

        for (name, conn) in cases {
            let mut client = AzureBlobClient::new();
            let result = client.initialize(&conn).await;
            assert!(
                matches!(result, Err(StorageError::Init { .. })),
                "failed for case: {}",
                name
            );
        }
    }

    #[tokio::test]
    async fn test_default_and_custom_endpoint() {
        let client = ready_client().await;
        let url = client
            .get_signed_url("docs", "a b/c.txt", Duration::from_secs(60))
            .await
            .unwrap();
        assert!(
            url.starts_with("https://myaccount.blob.core.windows.net/docs/a%20b/c.txt?"),
            "{}",
            url
        );

        let mut emulator = AzureBlobClient::new();
        let conn = Connection::new("azurite", CLIENT_TYPE)
            .with_account("devstoreaccount1", KEY)
            .with_endpoint("http://127.0.0.1:10000/devstoreaccount1/");
        emulator.initialize(&conn).await.unwrap();
        let url = emulator
            .get_signed_url("docs", "a.txt", Duration::from_secs(60))
            .await
            .unwrap();
        assert!(
            url.starts_with("http://127.0.0.1:10000/devstoreaccount1/docs/a.txt?"),
            "{}",
            url
        );
    }

    #[tokio::test]
    async fn test_object_url_overrides() {
        let client = ready_client().await;

        let cases = vec![
            (
                "reports/q1.csv",
                UrlOperation::Download,
                Some("attachment; filename=\"q1.csv\""),
                None,
            ),
            ("reports/q1.pdf", UrlOperation::View, None, Some("application/pdf")),
            ("img/cat.png", UrlOperation::View, None, None),
        ];

        for (key, operation, disposition, content_type) in cases {
            let url = client.get_object_url("docs", key, operation).await.unwrap();
            let params = query(&url);

            assert_eq!(params.get("sp").map(String::as_str), Some("r"), "failed for case: {}", key);
            assert_eq!(params.get("sr").map(String::as_str), Some("b"), "failed for case: {}", key);
            assert_eq!(params.get("sv").map(String::as_str), Some(API_VERSION));
            assert!(params.contains_key("sig"), "failed for case: {}", key);
            assert_eq!(
                params.get("rscd").map(String::as_str),
                disposition,
                "failed for case: {}",
                key
            );
            assert_eq!(
                params.get("rsct").map(String::as_str),
                content_type,
                "failed for case: {}",
                key
            );
        }
    }

    #[tokio::test]
    async fn test_signed_url_expiry_out_of_range() {
        let client = ready_client().await;

        let cases = vec![
            (Duration::from_secs(1_000_000_000_000), false),
            (Duration::from_secs(u64::MAX), false),
            (Duration::from_secs(60), true),
        ];
        for (expires_in, ok) in cases {
            let result = client.get_signed_url("docs", "a.txt", expires_in).await;
            assert_eq!(result.is_ok(), ok, "failed for case: {:?}", expires_in);
            if !ok {
                assert!(matches!(result, Err(StorageError::InvalidArgument(_))));
            }
        }
    }

    #[test]
    fn test_sas_string_to_sign() {
        let sas = SasToken {
            permissions: "r",
            start: "2024-01-01T00:00:00Z".to_string(),
            expiry: "2024-01-01T01:00:00Z".to_string(),
            resource: "/blob/myaccount/docs/a.txt".to_string(),
            content_disposition: Some("attachment; filename=\"a.txt\"".to_string()),
            content_type: None,
        };

        assert_eq!(
            sas.string_to_sign(),
            "r\n2024-01-01T00:00:00Z\n2024-01-01T01:00:00Z\n/blob/myaccount/docs/a.txt\n\n\n\n2020-12-06\nb\n\n\n\nattachment; filename=\"a.txt\"\n\n\n"
        );
        assert_eq!(
            sas.query("abc+/="),
            "sv=2020-12-06&st=2024-01-01T00%3A00%3A00Z&se=2024-01-01T01%3A00%3A00Z&sr=b&sp=r&rscd=attachment%3B%20filename%3D%22a.txt%22&sig=abc%2B%2F%3D"
        );
    }

    #[test]
    fn test_sas_field_layout() {
        let sas = SasToken {
            permissions: "r",
            start: "s".to_string(),
            expiry: "e".to_string(),
            resource: "/blob/a/c/k".to_string(),
            content_disposition: Some("D".to_string()),
            content_type: Some("T".to_string()),
        };

        let signed = sas.string_to_sign();
        let fields: Vec<&str> = signed.split('\n').collect();
        assert_eq!(fields.len(), 16);

        let cases = vec![
            (0, "r"),
            (3, "/blob/a/c/k"),
            (7, API_VERSION),
            (8, "b"),
            (12, "D"),
            (15, "T"),
        ];
        for (index, expected) in cases {
            assert_eq!(fields[index], expected, "failed for case: {}", index);
        }
    }

    #[test]
    fn test_shared_key_string_to_sign() {
        let req = reqwest::Client::new()
            .get("https://myaccount.blob.core.windows.net/docs?restype=container&comp=list&prefix=a%2F")
            .header("x-ms-date", "Wed, 21 Oct 2015 07:28:00 GMT")
            .header("x-ms-version", API_VERSION)
            .build()
            .unwrap();

        assert_eq!(
            shared_key_string_to_sign("myaccount", &req),
            "GET\n\n\n\n\n\n\n\n\n\n\n\nx-ms-date:Wed, 21 Oct 2015 07:28:00 GMT\nx-ms-version:2020-12-06\n/myaccount/docs\ncomp:list\nprefix:a/\nrestype:container"
        );

        let put = reqwest::Client::new()
            .put("https://myaccount.blob.core.windows.net/docs/a.txt")
            .header("x-ms-blob-type", "BlockBlob")
            .header("content-type", "text/plain")
            .body("hello")
            .build()
            .unwrap();

        assert_eq!(
            shared_key_string_to_sign("myaccount", &put),
            "PUT\n\n\n5\n\ntext/plain\n\n\n\n\n\n\nx-ms-blob-type:BlockBlob\n/myaccount/docs/a.txt"
        );
    }

    #[test]
    fn test_parse_container_list() {
        let body = r#"<?xml version="1.0" encoding="utf-8"?>
<EnumerationResults ServiceEndpoint="https://myaccount.blob.core.windows.net/">
  <Containers>
    <Container>
      <Name>docs</Name>
      <Properties>
        <Last-Modified>Wed, 21 Oct 2015 07:28:00 GMT</Last-Modified>
        <Etag>"0x8D"</Etag>
      </Properties>
    </Container>
    <Container>
      <Name>photos</Name>
      <Properties />
    </Container>
  </Containers>
  <NextMarker>photos-next</NextMarker>
</EnumerationResults>"#;

        let page = parse_container_list(body).unwrap();
        let names: Vec<&str> = page.buckets.iter().map(|b| b.name.as_str()).collect();
        assert_eq!(names, vec!["docs", "photos"]);
        assert!(page.buckets.iter().all(|b| b.is_azure_container == Some(true)));
        assert_eq!(
            page.buckets[0].creation_date.map(|t| t.unix_timestamp()),
            Some(1_445_412_480)
        );
        assert_eq!(page.next_marker.as_deref(), Some("photos-next"));
    }

    #[test]
    fn test_parse_blob_list_and_emulate() {
        let body = r#"<?xml version="1.0" encoding="utf-8"?>
<EnumerationResults ServiceEndpoint="https://myaccount.blob.core.windows.net/" ContainerName="docs">
  <Prefix>a/</Prefix>
  <Blobs>
    <Blob>
      <Name>a/</Name>
      <Properties>
        <Last-Modified>Wed, 21 Oct 2015 07:28:00 GMT</Last-Modified>
        <Content-Length>0</Content-Length>
        <Content-Type>application/directory</Content-Type>
      </Properties>
    </Blob>
    <Blob>
      <Name>a/b/c.txt</Name>
      <Properties>
        <Content-Length>12</Content-Length>
      </Properties>
    </Blob>
    <Blob>
      <Name>a/report.pdf</Name>
      <Properties>
        <Content-Length>2048</Content-Length>
        <Content-Type>application/pdf</Content-Type>
        <Etag>0x8D4BCC2E4835CD0</Etag>
        <AccessTier>Cool</AccessTier>
      </Properties>
    </Blob>
  </Blobs>
  <NextMarker />
</EnumerationResults>"#;

        let page = parse_blob_list(body).unwrap();
        assert_eq!(page.next_marker, None);
        assert_eq!(page.entries.len(), 3);
        assert!(page.entries[0].is_folder);
        assert_eq!(page.entries[1].storage_class.as_deref(), Some(DEFAULT_ACCESS_TIER));
        assert_eq!(page.entries[1].content_type.as_deref(), Some("text/plain"));

        let entries = emulate_hierarchy("a/", page.entries);
        let keys: Vec<(&str, bool)> = entries.iter().map(|e| (e.key.as_str(), e.is_folder)).collect();
        assert_eq!(keys, vec![("a/b/", true), ("a/report.pdf", false)]);

        let pdf = &entries[1];
        assert_eq!(pdf.size, 2048);
        assert_eq!(pdf.storage_class.as_deref(), Some("Cool"));
        assert_eq!(pdf.etag.as_deref(), Some("0x8D4BCC2E4835CD0"));
    }

    #[tokio::test]
    async fn test_uninitialized() {
        let client = AzureBlobClient::new();
        assert!(matches!(
            client.delete_objects("docs", &["a".to_string()]).await,
            Err(StorageError::NotInitialized)
        ));
    }
}
