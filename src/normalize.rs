//! Classification of provider failures.
//!
//! Adapters call [`classify`] once, at the provider boundary. It decides what
//! kind of failure happened, never whether the caller should recover from it.

use serde::Deserialize;

use crate::model::error::{ProviderFailure, StorageError};

/// Error codes providers use when a signed request reached the wrong region.
pub const AUTHORIZATION_CODES: &[&str] = &[
    "AuthorizationHeaderMalformed",
    "AuthorizationQueryParametersError",
    "AccessDenied",
    "PermanentRedirect",
];

pub fn is_authorization_code(code: Option<&str>) -> bool {
    code.is_some_and(|code| AUTHORIZATION_CODES.contains(&code))
}

/// Turns a provider failure into a [`StorageError`].
///
/// An authorization-class code with an expected region that differs from
/// `configured_region` becomes [`StorageError::RegionMismatch`]; the failure
/// is kept as its source. Everything else passes through untouched.
pub fn classify(failure: ProviderFailure, configured_region: &str) -> StorageError {
    if is_authorization_code(failure.code.as_deref()) {
        let expected = failure
            .expected_region
            .clone()
            .or_else(|| expected_region_from_message(&failure.message));

        if let Some(expected) = expected {
            if expected != configured_region {
                return StorageError::RegionMismatch {
                    configured: configured_region.to_string(),
                    expected,
                    source: failure,
                };
            }
        }
    }

    StorageError::Transport(failure)
}

/// Pulls `eu-west-1` out of messages like
/// `the region 'us-east-1' is wrong; expecting 'eu-west-1'`.
pub fn expected_region_from_message(message: &str) -> Option<String> {
    let start = message.find("expecting '")? + "expecting '".len();
    let len = message[start..].find('\'')?;
    let region = &message[start..start + len];

    if region.is_empty() {
        None
    } else {
        Some(region.to_string())
    }
}

/// The `<Error>` document S3, OSS and Azure return on failure.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ErrorBody {
    code: Option<String>,
    message: Option<String>,
    region: Option<String>,
    endpoint: Option<String>,
}

impl ErrorBody {
    /// Bodies that are empty or not XML yield no fields.
    pub fn parse(body: &str) -> Self {
        if body.trim().is_empty() {
            return Self::default();
        }
        quick_xml::de::from_str(body).unwrap_or_default()
    }

    pub fn code(&self) -> Option<&str> {
        non_empty(&self.code)
    }

    pub fn message(&self) -> Option<&str> {
        non_empty(&self.message)
    }

    pub fn region(&self) -> Option<&str> {
        non_empty(&self.region)
    }

    pub fn endpoint(&self) -> Option<&str> {
        non_empty(&self.endpoint)
    }
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}
