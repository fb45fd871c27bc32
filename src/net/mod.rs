//! The L4 side: raw TCP splicing.

pub mod tcp_proxy;

pub use tcp_proxy::TcpProxy;
