// Library exports for testing and external use

pub mod config;
pub mod driver;
pub mod error;
pub mod events;
pub mod execution;
pub mod projection;
pub mod snapshot;
pub mod snapshot_store;
pub mod startup;
pub mod state;
pub mod targetsmith;
pub mod telemetry;
pub mod tracker;
pub mod traits;
pub mod types;

// Re-export commonly used types and traits
pub use config::{
    BaseConfig, DriverType, FailedTargetPolicy, Mode, QueueType, SnapshotStoreType, StartupType,
};
pub use error::SchedulerError;
pub use events::{EventBus, SchedulerEvent};
pub use targetsmith::TargetSmith;
pub use traits::{Driver, ExecutionQueue, SnapshotStore};
pub use types::{
    DetailedState, ExecutableItem, ItemEvent, ItemState, Observation, QueueStatus,
    ScheduledTargetsInfo, SkyPosition, SurveyTopology, Target, TargetId,
};

// Re-export variant enums for convenience
pub use driver::{DriverVariant, MockDriver, SequentialDriver};
pub use execution::{ExecutionQueueVariant, MockQueue, SimQueue};
pub use snapshot_store::{FileStore, MemoryStore, NoopStore, SnapshotStoreVariant};
