/**
 * Blob store abstraction: identifiers, attributes,
 *  the store trait itself and an in-memory store.
 */
pub mod blob;
/**
 * Repository and asset metadata: the catalog side
 *  of the two stores, plus maintenance helpers.
 */
pub mod content;
/**
 * Forward consistency check, metadata -> blob.
 */
pub mod dead_blobs;
/**
 * Reverse consistency check, blob -> metadata.
 */
pub mod orphans;
/**
 * Metadata reconstruction from blob headers and
 *  the per-format integrity checks that follow it.
 */
pub mod restore;
/**
 * Long running job plumbing: cancellation, progress
 *  logging and the conflicting task registry.
 */
pub mod task;
/**
 * Reversible deletes: move-to-trash, undelete and
 *  age based purging of the trash namespace.
 */
pub mod trash;

pub mod prelude {
    pub use crate::blob::{
        BlobAttributes, BlobId, BlobStore, BlobStoreError, BlobStoreManager, MemoryBlobStore,
    };
    pub use crate::content::{
        Asset, BlobRef, ContentError, MemoryMetadataStore, MetadataStore, Repository,
        RepositoryKind,
    };
    pub use crate::dead_blobs::{DeadBlobFinder, DeadBlobResult, ResultState};
    pub use crate::orphans::{OrphanedBlob, OrphanedBlobFinder};
    pub use crate::restore::{RestoreMetadataConfig, RestoreMetadataTask, RestoreSummary};
    pub use crate::task::CancellationToken;
    pub use crate::trash::{DeleteOperation, DeleteRequest, TrashManager};
}
