//! Live routing state and its atomic holder.
//!
//! A request samples the state exactly once at entry and keeps that
//! snapshot for its whole lifetime; reload publishes a freshly built tuple
//! and never mutates a published one.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;

use crate::config::model::{AccessLogPolicy, Config, Service};
use crate::load_balancer::BalancerPool;
use crate::routing::RouteTable;

/// Everything the L7 forwarder consults, as one immutable tuple.
pub struct LiveState {
    pub table: RouteTable,
    pub services: HashMap<String, Service>,
    pub balancers: BalancerPool,
    pub upstream_timeout: Duration,
    pub access_log: AccessLogPolicy,
}

impl LiveState {
    pub fn build(config: &Config) -> Self {
        Self {
            table: RouteTable::new(&config.routes),
            balancers: BalancerPool::new(&config.services),
            services: config.services.clone(),
            upstream_timeout: config.timeouts.upstream,
            access_log: config.access_log.clone(),
        }
    }
}

/// Atomic reference to the current [`LiveState`]. Reads are wait-free;
/// writes publish a complete replacement.
pub struct StateHolder {
    current: ArcSwap<LiveState>,
}

impl StateHolder {
    pub fn new(state: LiveState) -> Self {
        Self {
            current: ArcSwap::from_pointee(state),
        }
    }

    /// One snapshot per request.
    pub fn snapshot(&self) -> Arc<LiveState> {
        self.current.load_full()
    }

    /// Publish a new state; in-flight requests keep their snapshots.
    pub fn publish(&self, state: LiveState) {
        self.current.store(Arc::new(state));
    }
}
