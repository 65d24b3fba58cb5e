//! Uniform access to S3, Azure Blob, Aliyun OSS and PCG object storage.

pub mod adapters;
pub mod browse;
pub mod config;
pub mod factory;
pub mod model;
pub mod normalize;
pub mod util;

pub use adapters::{BoxedStorageClient, StorageClient, DEFAULT_URL_EXPIRY};
pub use factory::{
    create_client, create_client_for, get_supported_client_types, is_supported,
    register_client_type,
};
pub use model::{Connection, StorageError, StorageResult};
