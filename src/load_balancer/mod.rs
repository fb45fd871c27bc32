//! Endpoint selection: smooth weighted round-robin with passive ejection.

pub mod pool;
pub mod smooth_wrr;

pub use pool::BalancerPool;
pub use smooth_wrr::{PeerHandle, SmoothWrr};
