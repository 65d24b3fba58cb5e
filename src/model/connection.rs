use std::{fmt, str::FromStr, time::Duration};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::model::error::StorageError;

pub const DEFAULT_CLIENT_TYPE: &str = "s3";
pub const DEFAULT_TIMEOUT_MS: u64 = 60_000;

/// Built-in storage backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StorageType {
    S3,
    AzureBlob,
    AliyunOss,
    Pcg,
}

impl StorageType {
    pub fn all() -> Vec<StorageType> {
        vec![
            StorageType::S3,
            StorageType::AzureBlob,
            StorageType::AliyunOss,
            StorageType::Pcg,
        ]
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            StorageType::S3 => "s3",
            StorageType::AzureBlob => "azure-blob",
            StorageType::AliyunOss => "aliyun-oss",
            StorageType::Pcg => "pcg",
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            StorageType::S3 => "Amazon S3",
            StorageType::AzureBlob => "Azure Blob Storage",
            StorageType::AliyunOss => "Aliyun OSS",
            StorageType::Pcg => "PCG",
        }
    }
}

impl fmt::Display for StorageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for StorageType {
    type Err = StorageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match canonical_client_type(s) {
            "s3" => Ok(StorageType::S3),
            "azure-blob" => Ok(StorageType::AzureBlob),
            "aliyun-oss" => Ok(StorageType::AliyunOss),
            "pcg" => Ok(StorageType::Pcg),
            other => Err(StorageError::UnsupportedType(other.to_string())),
        }
    }
}

/// Maps legacy type names onto the registered ones.
pub fn canonical_client_type(client_type: &str) -> &str {
    match client_type {
        "aws-s3" => "s3",
        other => other,
    }
}

/// What `list_buckets` / `list_objects` do when the provider reports that
/// the bucket lives in another region.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MismatchPolicy {
    /// Return `StorageError::RegionMismatch`.
    #[default]
    Surface,
    /// Log the mismatch and return an empty listing.
    Empty,
}

/// How to reach one storage account. Read-only to the storage layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Connection {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(rename = "type", default = "default_client_type")]
    pub client_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secret_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub account_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub account_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bucket: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prefix: Option<String>,
    #[serde(default = "default_secure")]
    pub secure: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path_style: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<u64>,
    #[serde(default)]
    pub region_mismatch: MismatchPolicy,
}

fn default_client_type() -> String {
    DEFAULT_CLIENT_TYPE.to_string()
}

fn default_secure() -> bool {
    true
}

impl Connection {
    pub fn new(name: &str, client_type: &str) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            name: name.to_string(),
            client_type: client_type.to_string(),
            endpoint: None,
            region: None,
            access_key: None,
            secret_key: None,
            account_name: None,
            account_key: None,
            bucket: None,
            prefix: None,
            secure: true,
            path_style: None,
            timeout: None,
            region_mismatch: MismatchPolicy::default(),
        }
    }

    /// Registry key for this connection, with legacy and empty values
    /// resolved to `s3`.
    pub fn resolved_client_type(&self) -> &str {
        let trimmed = self.client_type.trim();
        if trimmed.is_empty() {
            DEFAULT_CLIENT_TYPE
        } else {
            canonical_client_type(trimmed)
        }
    }

    pub fn endpoint(&self) -> Option<&str> {
        non_empty(self.endpoint.as_deref())
    }

    pub fn region(&self) -> Option<&str> {
        non_empty(self.region.as_deref())
    }

    pub fn bucket(&self) -> Option<&str> {
        non_empty(self.bucket.as_deref())
    }

    pub fn prefix(&self) -> &str {
        self.prefix.as_deref().unwrap_or("")
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout.unwrap_or(DEFAULT_TIMEOUT_MS))
    }

    /// Endpoint with a scheme, chosen from `secure` when the stored value
    /// has none.
    pub fn endpoint_url(&self) -> Option<String> {
        self.endpoint().map(|endpoint| with_scheme(endpoint, self.secure))
    }

    pub fn with_endpoint(mut self, endpoint: &str) -> Self {
        self.endpoint = Some(endpoint.to_string());
        self
    }

    pub fn with_region(mut self, region: &str) -> Self {
        self.region = Some(region.to_string());
        self
    }

    pub fn with_keys(mut self, access_key: &str, secret_key: &str) -> Self {
        self.access_key = Some(access_key.to_string());
        self.secret_key = Some(secret_key.to_string());
        self
    }

    pub fn with_account(mut self, account_name: &str, account_key: &str) -> Self {
        self.account_name = Some(account_name.to_string());
        self.account_key = Some(account_key.to_string());
        self
    }

    pub fn with_bucket(mut self, bucket: &str) -> Self {
        self.bucket = Some(bucket.to_string());
        self
    }
}

pub fn with_scheme(endpoint: &str, secure: bool) -> String {
    let endpoint = endpoint.trim_end_matches('/');
    if endpoint.starts_with("http://") || endpoint.starts_with("https://") {
        endpoint.to_string()
    } else if secure {
        format!("https://{}", endpoint)
    } else {
        format!("http://{}", endpoint)
    }
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}
