//! Per-service balancer pool.

use std::collections::HashMap;
use std::sync::Arc;

use crate::config::model::Service;
use crate::load_balancer::SmoothWrr;

/// One balancer per service, rebuilt wholesale on reload so peer state
/// never leaks across config generations.
pub struct BalancerPool {
    balancers: HashMap<String, Arc<SmoothWrr>>,
}

impl BalancerPool {
    pub fn new(services: &HashMap<String, Service>) -> Self {
        let balancers = services
            .iter()
            .map(|(name, svc)| (name.clone(), SmoothWrr::for_service(svc)))
            .collect();
        Self { balancers }
    }

    pub fn get(&self, service: &str) -> Option<&Arc<SmoothWrr>> {
        self.balancers.get(service)
    }
}
