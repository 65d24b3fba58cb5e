use std::fmt;

use thiserror::Error;

pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// A failed provider call, before classification.
///
/// Adapters build one of these at the provider boundary and hand it to
/// [`crate::normalize::classify`], which is the only way to turn it into a
/// [`StorageError`].
#[derive(Debug)]
pub struct ProviderFailure {
    pub code: Option<String>,
    pub message: String,
    pub status: Option<u16>,
    /// Region (or endpoint region) the provider says the target lives in.
    pub expected_region: Option<String>,
    pub source: Option<BoxError>,
}

impl ProviderFailure {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            code: None,
            message: message.into(),
            status: None,
            expected_region: None,
            source: None,
        }
    }

    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }

    pub fn with_status(mut self, status: u16) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_expected_region(mut self, region: impl Into<String>) -> Self {
        self.expected_region = Some(region.into());
        self
    }

    pub fn with_source(mut self, source: impl Into<BoxError>) -> Self {
        self.source = Some(source.into());
        self
    }

    pub fn is_not_found(&self) -> bool {
        self.status == Some(404)
            || matches!(
                self.code.as_deref(),
                Some("NoSuchKey" | "NotFound" | "BlobNotFound" | "NoSuchBucket" | "ContainerNotFound")
            )
    }
}

impl fmt::Display for ProviderFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.code {
            Some(code) => write!(f, "{}: {}", code, self.message),
            None => write!(f, "{}", self.message),
        }
    }
}

impl std::error::Error for ProviderFailure {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source
            .as_deref()
            .map(|err| err as &(dyn std::error::Error + 'static))
    }
}

/// Errors that can occur during storage operations
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Unsupported storage client type: {0}")]
    UnsupportedType(String),

    #[error("Failed to initialize {client_type} client: {message}")]
    Init { client_type: String, message: String },

    #[error(
        "Region mismatch: You configured the connection to use '{configured}' but the bucket is in '{expected}'. Please update your connection settings to use the correct region."
    )]
    RegionMismatch {
        configured: String,
        expected: String,
        #[source]
        source: ProviderFailure,
    },

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("{0}")]
    Transport(#[from] ProviderFailure),

    #[error("Storage client is not initialized")]
    NotInitialized,

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Local file error: {0}")]
    Io(#[from] std::io::Error),
}

impl StorageError {
    pub fn init(client_type: &str, message: impl Into<String>) -> Self {
        StorageError::Init {
            client_type: client_type.to_string(),
            message: message.into(),
        }
    }

    pub fn is_region_mismatch(&self) -> bool {
        matches!(self, StorageError::RegionMismatch { .. })
    }

    pub fn is_not_found(&self) -> bool {
        match self {
            StorageError::NotFound(_) => true,
            StorageError::Transport(failure) => failure.is_not_found(),
            _ => false,
        }
    }

    /// Provider error code, if the error came from a provider call.
    pub fn code(&self) -> Option<&str> {
        match self {
            StorageError::RegionMismatch { source, .. } => source.code.as_deref(),
            StorageError::Transport(failure) => failure.code.as_deref(),
            StorageError::NotFound(_) => Some("NotFound"),
            _ => None,
        }
    }
}

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;
