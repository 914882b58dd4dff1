//! Multi-hop routing: a distance-vector-style route table and a path finder
//! for on-demand route discovery.

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{oneshot, Mutex};

/// One entry in the route table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Route {
    pub destination: String,
    pub next_hop: String,
    pub hop_count: u8,
    pub metric: u32,
    pub last_updated: u64,
    pub expires_at: u64,
}

impl Route {
    fn score(&self) -> u32 {
        self.hop_count as u32 * 100 + self.metric
    }

    pub fn is_direct_neighbor(&self) -> bool {
        self.hop_count == 0 && self.next_hop == self.destination
    }
}

/// The route table. Not thread-shared internally — callers wrap it for
/// concurrent access as the orchestrator requires.
pub struct RouteTable {
    routes: HashMap<String, Route>,
    max_routes: usize,
}

impl RouteTable {
    pub fn new(max_routes: usize) -> Self {
        Self {
            routes: HashMap::new(),
            max_routes,
        }
    }

    /// Apply the replacement rule of the route entity: accept a new route
    /// only if it scores strictly lower than the current one, or if it
    /// refreshes the existing next hop.
    pub fn add_route(&mut self, candidate: Route) {
        let accept = match self.routes.get(&candidate.destination) {
            None => true,
            Some(current) => {
                candidate.score() < current.score() || candidate.next_hop == current.next_hop
            }
        };
        if !accept {
            return;
        }
        self.routes.insert(candidate.destination.clone(), candidate);
        self.evict_if_over_capacity();
    }

    fn evict_if_over_capacity(&mut self) {
        while self.routes.len() > self.max_routes {
            if let Some(oldest_dest) = self
                .routes
                .values()
                .min_by_key(|r| r.last_updated)
                .map(|r| r.destination.clone())
            {
                self.routes.remove(&oldest_dest);
            } else {
                break;
            }
        }
    }

    pub fn get_next_hop(&self, destination: &str, now_ms: u64) -> Option<&str> {
        self.routes
            .get(destination)
            .filter(|route| now_ms <= route.expires_at)
            .map(|route| route.next_hop.as_str())
    }

    pub fn remove_routes_via(&mut self, peer: &str) {
        self.routes.retain(|_, route| route.next_hop != peer);
    }

    pub fn cleanup(&mut self, now_ms: u64) {
        self.routes.retain(|_, route| now_ms <= route.expires_at);
    }

    pub fn get_all_routes(&self) -> Vec<&Route> {
        self.routes.values().collect()
    }

    pub fn get_neighbors(&self) -> Vec<&Route> {
        self.routes.values().filter(|r| r.hop_count == 0).collect()
    }
}

/// Outcome of a route-discovery round: the destination either already had a
/// valid route, or discovery was initiated and the caller awaits its result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiscoveryOutcome {
    Found(String),
    TimedOut,
}

struct PendingDiscovery {
    waiters: Vec<oneshot::Sender<DiscoveryOutcome>>,
}

/// Coordinates on-demand route discovery. Concurrent discoveries for the
/// same destination share the first completion.
pub struct PathFinder {
    pending: Mutex<HashMap<String, PendingDiscovery>>,
}

impl PathFinder {
    pub fn new() -> Self {
        Self {
            pending: Mutex::new(HashMap::new()),
        }
    }

    /// Register interest in a destination's discovery, returning a receiver
    /// that resolves when discovery completes or times out. Returns `None`
    /// (and starts a new request) if this caller is first for the
    /// destination; otherwise joins the existing request.
    pub async fn await_or_start(&self, destination: &str) -> (bool, oneshot::Receiver<DiscoveryOutcome>) {
        let mut pending = self.pending.lock().await;
        let (tx, rx) = oneshot::channel();
        match pending.get_mut(destination) {
            Some(entry) => {
                entry.waiters.push(tx);
                (false, rx)
            }
            None => {
                pending.insert(
                    destination.to_string(),
                    PendingDiscovery { waiters: vec![tx] },
                );
                (true, rx)
            }
        }
    }

    /// Complete a pending discovery for `destination`, notifying every
    /// waiter that joined before completion.
    pub async fn complete(&self, destination: &str, outcome: DiscoveryOutcome) {
        let mut pending = self.pending.lock().await;
        if let Some(entry) = pending.remove(destination) {
            for waiter in entry.waiters {
                let _ = waiter.send(outcome.clone());
            }
        }
    }
}

impl Default for PathFinder {
    fn default() -> Self {
        Self::new()
    }
}

pub type SharedPathFinder = Arc<PathFinder>;

pub fn new_path_finder() -> SharedPathFinder {
    Arc::new(PathFinder::new())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn route(dest: &str, next_hop: &str, hop_count: u8, metric: u32) -> Route {
        Route {
            destination: dest.to_string(),
            next_hop: next_hop.to_string(),
            hop_count,
            metric,
            last_updated: 0,
            expires_at: 1_000_000,
        }
    }

    #[test]
    fn worse_route_does_not_displace_better_one() {
        let mut table = RouteTable::new(16);
        table.add_route(route("C", "B", 1, 0));
        table.add_route(route("C", "D", 2, 0));
        assert_eq!(table.get_next_hop("C", 0), Some("B"));
    }

    #[test]
    fn refreshing_current_next_hop_is_accepted_even_if_not_strictly_better() {
        let mut table = RouteTable::new(16);
        table.add_route(route("C", "B", 1, 0));
        table.add_route(route("C", "B", 2, 5));
        let all = table.get_all_routes();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].hop_count, 2);
    }

    #[test]
    fn strictly_better_route_displaces_current() {
        let mut table = RouteTable::new(16);
        table.add_route(route("C", "D", 3, 0));
        table.add_route(route("C", "B", 1, 0));
        assert_eq!(table.get_next_hop("C", 0), Some("B"));
    }

    #[test]
    fn expired_route_is_not_returned() {
        let mut table = RouteTable::new(16);
        table.add_route(Route {
            expires_at: 500,
            ..route("C", "B", 1, 0)
        });
        assert_eq!(table.get_next_hop("C", 1_000), None);
    }

    #[test]
    fn remove_routes_via_drops_routes_through_lost_neighbor() {
        let mut table = RouteTable::new(16);
        table.add_route(route("B", "B", 0, 0));
        table.add_route(route("C", "B", 1, 0));
        table.remove_routes_via("B");
        assert!(table.get_all_routes().is_empty());
    }

    #[test]
    fn over_capacity_evicts_least_recently_updated() {
        let mut table = RouteTable::new(2);
        table.add_route(Route {
            last_updated: 0,
            ..route("A", "A", 0, 0)
        });
        table.add_route(Route {
            last_updated: 10,
            ..route("B", "B", 0, 0)
        });
        table.add_route(Route {
            last_updated: 20,
            ..route("C", "C", 0, 0)
        });
        assert_eq!(table.get_all_routes().len(), 2);
        assert!(table.get_next_hop("A", 0).is_none());
    }

    #[test]
    fn direct_neighbor_detection() {
        let r = route("B", "B", 0, 0);
        assert!(r.is_direct_neighbor());
        let r2 = route("C", "B", 1, 0);
        assert!(!r2.is_direct_neighbor());
    }

    #[tokio::test]
    async fn concurrent_discoveries_share_first_completion() {
        let finder = PathFinder::new();
        let (first, rx1) = finder.await_or_start("dest").await;
        let (second, rx2) = finder.await_or_start("dest").await;
        assert!(first);
        assert!(!second);

        finder
            .complete("dest", DiscoveryOutcome::Found("via-b".to_string()))
            .await;

        assert_eq!(rx1.await.unwrap(), DiscoveryOutcome::Found("via-b".to_string()));
        assert_eq!(rx2.await.unwrap(), DiscoveryOutcome::Found("via-b".to_string()));
    }
}
