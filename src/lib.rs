//! edgegate: a dual-layer network gateway.
//!
//! An L7 HTTP reverse proxy and an L4 TCP proxy driven by a single
//! declarative YAML configuration.
//!
//! # Architecture Overview
//!
//! ```text
//!                       ┌──────────────────────────────────────────────┐
//!                       │                  EDGEGATE                    │
//!   HTTP client ────────┼─▶ http::server ─▶ routing ─▶ load_balancer ──┼──▶ upstream
//!                       │        │             │             │         │    (pooled
//!                       │        ▼             │             ▼         │     transports)
//!                       │  http::forward ◀─────┴── state (ArcSwap) ◀───┼── config watcher
//!                       │                                              │
//!   TCP client ─────────┼─▶ net::tcp_proxy ──▶ load_balancer ──────────┼──▶ upstream
//!                       │                                              │
//!                       │  observability: access log + metrics         │
//!                       │  security: per-route rate limiting           │
//!                       └──────────────────────────────────────────────┘
//! ```
//!
//! Requests sample the live state once at entry; a hot reload publishes a
//! new state tuple atomically and never disturbs in-flight requests.

// Core subsystems
pub mod config;
pub mod http;
pub mod net;
pub mod routing;

// Traffic management
pub mod load_balancer;
pub mod state;
pub mod transport;

// Cross-cutting concerns
pub mod lifecycle;
pub mod observability;
pub mod security;

pub use config::Config;
pub use http::{Gateway, SharedGateway};
pub use lifecycle::ShutdownController;
pub use state::{LiveState, StateHolder};
