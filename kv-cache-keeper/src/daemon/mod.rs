//! Process lifecycle: signals and shutdown.

pub mod shutdown;

pub use shutdown::{ShutdownCoordinator, ShutdownHandle};
