//! Error types for the object-backed blob store.

use common::blob::BlobStoreError;

#[derive(Debug, thiserror::Error)]
pub enum ObjectBlobStoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("object storage error: {0}")]
    ObjectStore(#[from] object_store::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// A stored headers column that no longer parses
    #[error("corrupt attributes for blob {blob_id}: {source}")]
    CorruptAttributes {
        blob_id: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// S3 bucket not found - must be created before use
    #[error("S3 bucket '{0}' does not exist. Create it before opening the blob store.")]
    BucketNotFound(String),
}

pub type Result<T> = std::result::Result<T, ObjectBlobStoreError>;

impl From<ObjectBlobStoreError> for BlobStoreError {
    fn from(err: ObjectBlobStoreError) -> Self {
        match err {
            ObjectBlobStoreError::Io(io) => BlobStoreError::Io(io),
            other => BlobStoreError::Backend(anyhow::Error::new(other)),
        }
    }
}
