pub mod args;
pub mod op;
pub mod ops;

pub use ops::{Blobs, DeadBlobs, Init, Orphans, Repository, Restore, Trash, Version};
