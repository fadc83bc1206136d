pub mod mock;
pub mod sequential;
pub mod variant;

pub use mock::MockDriver;
pub use sequential::{ScriptedVisit, SequentialDriver};
pub use variant::DriverVariant;
