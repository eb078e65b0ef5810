//! Domain types shared by the engine
//!
//! - [`RepoId`] - an `owner/name` repository identifier
//! - [`RepoPair`] - one configured source-file/target-branch pair
//! - [`CommitRecord`] - read-only projection of a remote commit

mod commit;
mod pair;
mod repo;

pub use commit::CommitRecord;
pub use pair::{RepoPair, slug};
pub use repo::RepoId;
