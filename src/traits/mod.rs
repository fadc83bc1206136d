pub mod driver;
pub mod execution;
pub mod snapshot;

pub use driver::Driver;
pub use execution::ExecutionQueue;
pub use snapshot::SnapshotStore;
