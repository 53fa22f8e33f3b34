pub mod coordinator;
pub mod diff;
pub mod watches;

pub use coordinator::{RefreshCoordinator, Watch};
