//! Smooth weighted round-robin with passive health ejection.
//!
//! # Responsibilities
//! - Spread selections across peers in proportion to their weights,
//!   without bursts (Nginx's smooth WRR)
//! - Track per-peer consecutive failures and eject a peer for a cooldown
//!   once it crosses the threshold
//!
//! All peer state lives behind one Mutex; a selection or a feedback call is
//! a single short critical section with no awaits inside.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use crate::config::model::{Endpoint, PassiveHealth, Service};

struct Peer {
    endpoint: Arc<Endpoint>,
    weight: i64,
    current_weight: i64,
    fails: u32,
    skip_until: Option<Instant>,
}

/// One balancer per service.
pub struct SmoothWrr {
    peers: Mutex<Vec<Peer>>,
    max_fails: u32,
    cooldown: Duration,
}

impl SmoothWrr {
    pub fn new(endpoints: &[Endpoint], health: PassiveHealth) -> Arc<Self> {
        let peers = endpoints
            .iter()
            .map(|e| Peer {
                endpoint: Arc::new(e.clone()),
                weight: e.weight.max(1) as i64,
                current_weight: 0,
                fails: 0,
                skip_until: None,
            })
            .collect();
        Arc::new(Self {
            peers: Mutex::new(peers),
            max_fails: health.max_fails.max(1),
            cooldown: health.cooldown,
        })
    }

    pub fn for_service(service: &Service) -> Arc<Self> {
        Self::new(&service.endpoints, service.passive_health)
    }

    /// Pick the next endpoint. Returns `None` when every peer is ejected;
    /// ejection state is not cleared here, peers become eligible again only
    /// once their cooldown elapses.
    pub fn next(self: &Arc<Self>) -> Option<PeerHandle> {
        let now = Instant::now();
        let mut peers = self.peers.lock().expect("balancer mutex poisoned");

        let mut best: Option<usize> = None;
        let mut best_weight = i64::MIN;
        let mut total = 0i64;
        for (i, p) in peers.iter_mut().enumerate() {
            if p.skip_until.is_some_and(|until| now < until) {
                continue;
            }
            p.current_weight += p.weight;
            total += p.weight;
            // Largest current_weight wins; ties keep the first peer.
            if best.is_none() || p.current_weight > best_weight {
                best = Some(i);
                best_weight = p.current_weight;
            }
        }

        let chosen = best?;
        peers[chosen].current_weight -= total;
        let endpoint = peers[chosen].endpoint.clone();
        drop(peers);

        Some(PeerHandle {
            balancer: self.clone(),
            index: chosen,
            endpoint,
        })
    }
}

/// Handle to the selected peer; carries feedback back into the balancer.
pub struct PeerHandle {
    balancer: Arc<SmoothWrr>,
    index: usize,
    endpoint: Arc<Endpoint>,
}

impl PeerHandle {
    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    /// Report the outcome of using this endpoint. A success resets the
    /// failure streak and lifts any ejection; the threshold-th consecutive
    /// failure ejects the peer for the configured cooldown.
    pub fn feedback(&self, success: bool) {
        let mut peers = self.balancer.peers.lock().expect("balancer mutex poisoned");
        let Some(peer) = peers.get_mut(self.index) else {
            return;
        };
        if success {
            peer.fails = 0;
            peer.skip_until = None;
        } else {
            peer.fails += 1;
            if peer.fails >= self.balancer.max_fails {
                peer.skip_until = Some(Instant::now() + self.balancer.cooldown);
                tracing::info!(
                    endpoint = %peer.endpoint.url,
                    fails = peer.fails,
                    cooldown_secs = self.balancer.cooldown.as_secs_f64(),
                    "ejecting unhealthy endpoint"
                );
            }
        }
    }
}
