pub mod file;
pub mod memory;
pub mod noop;
pub mod variant;

pub use file::FileStore;
pub use memory::MemoryStore;
pub use noop::NoopStore;
pub use variant::SnapshotStoreVariant;
