pub mod blobs;
pub mod dead_blobs;
pub mod init;
pub mod orphans;
pub mod repository;
pub mod restore;
pub mod trash;
pub mod version;

pub use blobs::Blobs;
pub use dead_blobs::DeadBlobs;
pub use init::Init;
pub use orphans::Orphans;
pub use repository::Repository;
pub use restore::Restore;
pub use trash::Trash;
pub use version::Version;
