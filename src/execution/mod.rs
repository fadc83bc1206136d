pub mod mock;
pub mod sim;
pub mod variant;

pub use mock::MockQueue;
pub use sim::SimQueue;
pub use variant::ExecutionQueueVariant;
