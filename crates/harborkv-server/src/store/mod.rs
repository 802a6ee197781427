pub mod entry;
pub mod eviction;
pub mod expiry;
pub mod keyspace;

pub use entry::{KeyEntry, Value};
pub use eviction::EvictionIndex;
pub use keyspace::Keyspace;
