//! The L7 side: router assembly, the forwarding engine, header hygiene.

pub mod forward;
pub mod headers;
pub mod server;

pub use forward::{Gateway, SharedGateway, TlsTerminated};
pub use server::{router, serve_plain, serve_tls};
