//! Outbound transports: pooled per-service clients and TLS material.

pub mod registry;
pub mod tls;

pub use registry::{HttpClient, Transports};
pub use tls::TlsError;
