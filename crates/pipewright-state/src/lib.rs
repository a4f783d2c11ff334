//! pipewright-state: storage seams for the pipewright pipeline engine
//!
//! Two external collaborators sit behind async traits:
//!
//! - `CacheStore`: key -> byte blob storage that survives across runs
//! - `DeployTarget`: a published artifact tree with a commit history
//!
//! Filesystem backends (`FsCacheStore`, `FsDeployTarget`) are used by the
//! CLI; in-memory fakes live in [`fakes`] for tests.

mod error;
pub mod fakes;
pub mod fs_cache;
pub mod fs_target;
pub mod storage_traits;
pub mod tree;

pub use error::StorageError;
pub use fs_cache::FsCacheStore;
pub use fs_target::FsDeployTarget;
pub use storage_traits::{
    CacheKey, CacheStore, Changeset, DeployCommit, DeployTarget, StorageResult,
};
pub use tree::{read_tree, validate_relative, Tree};
