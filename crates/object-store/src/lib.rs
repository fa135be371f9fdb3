//! SQLite + Object Storage Blob Store
//!
//! A [`common::blob::BlobStore`] that keeps blob attributes in SQLite and blob
//! content in pluggable object storage (S3/MinIO/local filesystem/memory).
//!
//! # Features
//!
//! - Soft delete, undelete and hard delete with the attribute row as the source of truth
//! - Paged id listing and an indexed "updated since" query
//! - Recovery support: rebuild attribute rows from object storage
//!
//! # Example
//!
//! ```rust,no_run
//! use depot_object_store::ObjectBlobStore;
//! use std::path::Path;
//!
//! # async fn example() -> Result<(), depot_object_store::ObjectBlobStoreError> {
//! let store = ObjectBlobStore::new_local("default", Path::new("/tmp/blobs")).await?;
//! let stats = store.recover_attributes().await?;
//! println!("recovered {} blobs", stats.added);
//! # Ok(())
//! # }
//! ```

mod blob_store;
mod database;
mod error;
mod storage;

pub use blob_store::{ObjectBlobStore, RecoveryStats};
pub use error::{ObjectBlobStoreError, Result};
pub use storage::ObjectStoreConfig;
