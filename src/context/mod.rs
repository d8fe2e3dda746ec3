//! Application trees and build contexts

pub mod archive;
pub mod snapshot;

pub use archive::{BuildContext, ContextEntry, DOCKERFILE_NAME};
pub use snapshot::{EntryKind, SnapshotError, TreeEntry, TreeSnapshot};
