//! Process lifecycle: signals and graceful shutdown.

pub mod shutdown;

pub use shutdown::{wait_for_signal, ShutdownController, ShutdownSignal, DRAIN_TIMEOUT};
