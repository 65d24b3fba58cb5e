//! Plumbing shared by the backends that talk REST through `reqwest`.

use std::{collections::BTreeMap, time::Duration};

use futures::StreamExt;
use reqwest::{header::HeaderMap, Response};

use crate::{
    model::{ObjectBody, ObjectEnvelope, ProviderFailure, StorageError, StorageResult},
    normalize::ErrorBody,
    util::signing::parse_http_date,
};

pub fn build_client(client_type: &str, timeout: Duration) -> StorageResult<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|err| StorageError::init(client_type, err.to_string()))
}

/// A request that never produced a response.
pub fn transport_failure(err: reqwest::Error) -> ProviderFailure {
    let mut failure = ProviderFailure::new(err.to_string());
    if let Some(status) = err.status() {
        failure = failure.with_status(status.as_u16());
    }
    failure.with_source(err)
}

/// Reads a non-success response into a failure. The parsed error document
/// is returned alongside so callers can pick provider-specific hints out of it.
pub async fn response_failure(
    resp: Response,
    code_header: Option<&str>,
) -> (ProviderFailure, ErrorBody) {
    let status = resp.status();
    let header_code = code_header
        .and_then(|name| header(resp.headers(), name))
        .map(str::to_string);
    let body = ErrorBody::parse(&resp.text().await.unwrap_or_default());

    let code = header_code.or_else(|| body.code().map(str::to_string));
    let message = body.message().map(str::to_string).unwrap_or_else(|| {
        status
            .canonical_reason()
            .unwrap_or("request failed")
            .to_string()
    });

    let mut failure = ProviderFailure::new(message).with_status(status.as_u16());
    if let Some(code) = code {
        failure = failure.with_code(code);
    }
    (failure, body)
}

pub fn header<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .filter(|value| !value.is_empty())
}

/// Headers starting with `prefix`, lowercased and sorted, one
/// `name:value\n` line each.
pub fn canonical_headers(headers: &HeaderMap, prefix: &str) -> String {
    let mut selected = BTreeMap::new();
    for (name, value) in headers {
        if name.as_str().starts_with(prefix) {
            if let Ok(value) = value.to_str() {
                selected.insert(name.as_str().to_string(), value.trim().to_string());
            }
        }
    }

    selected
        .into_iter()
        .map(|(name, value)| format!("{}:{}\n", name, value))
        .collect()
}

/// Wraps a successful GET response without buffering its body.
pub fn envelope(resp: Response) -> ObjectEnvelope {
    let headers = resp.headers();
    let content_type = header(headers, "content-type").map(str::to_string);
    let content_length = header(headers, "content-length").and_then(|len| len.parse().ok());
    let last_modified = header(headers, "last-modified").and_then(parse_http_date);
    let etag = header(headers, "etag").map(str::to_string);

    let stream = resp
        .bytes_stream()
        .map(|chunk| chunk.map_err(|err| StorageError::from(transport_failure(err))));

    ObjectEnvelope {
        body: ObjectBody::Stream(stream.boxed()),
        content_type,
        content_length,
        last_modified,
        etag,
    }
}
