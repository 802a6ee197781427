pub mod aof;
pub mod snapshot;

pub use aof::AofHandle;
pub use snapshot::{Manifest, SnapshotObject, Snapshotter};
