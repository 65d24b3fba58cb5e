pub mod connection;
pub mod error;
pub mod object;

pub use connection::{canonical_client_type, Connection, MismatchPolicy, StorageType};
pub use error::{ProviderFailure, StorageError, StorageResult};
pub use object::{
    Bucket, DeleteFailure, DeleteOutcome, ListResult, ObjectBody, ObjectEntry, ObjectEnvelope,
    UrlOperation,
};
