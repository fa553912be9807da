//! Cluster coordinator: partitions the shared webhook/event stream across
//! gateway replicas via a leader lease, heartbeats, and round-robin
//! assignment. Transient dual leaders are bounded by the lease TTL;
//! consumers are expected to be idempotent at partition level.

pub mod store;

pub use store::{ClusterNode, CoordinationStore, InMemoryCoordinationStore};

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::Notify;
use tokio::task::JoinHandle;

use crate::config::CoordinatorConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeRole {
    Follower,
    Candidate,
    Leader,
}

/// Deterministic round-robin assignment of partitions `0..P-1` over the
/// id-sorted live node set. Every partition lands on exactly one node and
/// no node carries more than ceil(P/N).
pub fn compute_assignments(node_ids: &[String], partitions: u32) -> HashMap<String, Vec<u32>> {
    let mut sorted: Vec<&String> = node_ids.iter().collect();
    sorted.sort();
    sorted.dedup();

    let mut assignments: HashMap<String, Vec<u32>> = sorted
        .iter()
        .map(|id| ((*id).clone(), Vec::new()))
        .collect();
    if sorted.is_empty() {
        return assignments;
    }
    for partition in 0..partitions {
        let owner = sorted[(partition as usize) % sorted.len()];
        assignments
            .get_mut(owner.as_str())
            .expect("owner present")
            .push(partition);
    }
    assignments
}

struct CoordinatorState {
    role: NodeRole,
    assigned: Vec<u32>,
    leader_absent_since: Option<Instant>,
    last_rebalance: Option<Instant>,
    last_node_set: Vec<String>,
}

pub struct Coordinator {
    node_id: String,
    config: CoordinatorConfig,
    store: Arc<dyn CoordinationStore>,
    state: Mutex<CoordinatorState>,
    running: AtomicBool,
    shutdown: Notify,
    handle: tokio::sync::Mutex<Option<JoinHandle<()>>>,
}

impl Coordinator {
    pub fn new(config: CoordinatorConfig, store: Arc<dyn CoordinationStore>) -> Self {
        let node_id = config
            .node_id
            .clone()
            .unwrap_or_else(|| format!("node-{}", uuid::Uuid::new_v4()));
        Self {
            node_id,
            config,
            store,
            state: Mutex::new(CoordinatorState {
                role: NodeRole::Follower,
                assigned: Vec::new(),
                leader_absent_since: None,
                last_rebalance: None,
                last_node_set: Vec::new(),
            }),
            running: AtomicBool::new(false),
            shutdown: Notify::new(),
            handle: tokio::sync::Mutex::new(None),
        }
    }

    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    pub fn is_leader(&self) -> bool {
        self.state.lock().expect("state lock").role == NodeRole::Leader
    }

    pub fn role(&self) -> NodeRole {
        self.state.lock().expect("state lock").role
    }

    /// Partitions this replica should consume right now.
    pub fn assigned_partitions(&self) -> Vec<u32> {
        self.state.lock().expect("state lock").assigned.clone()
    }

    fn leader_ttl(&self) -> Duration {
        Duration::from_secs(self.config.leader_timeout_secs)
    }

    pub async fn start(self: Arc<Self>) {
        if self.running.swap(true, Ordering::SeqCst) {
            return;
        }
        let coordinator = self.clone();
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_secs(
                coordinator.config.heartbeat_interval_secs.max(1),
            ));
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = ticker.tick() => coordinator.tick().await,
                    _ = coordinator.shutdown.notified() => break,
                }
            }
            // Leave the cluster cleanly.
            let _ = coordinator.store.release_leader(&coordinator.node_id).await;
            let _ = coordinator.store.remove_node(&coordinator.node_id).await;
        });
        *self.handle.lock().await = Some(handle);
    }

    pub async fn stop(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }
        self.shutdown.notify_one();
        if let Some(handle) = self.handle.lock().await.take() {
            let _ = handle.await;
        }
        let mut state = self.state.lock().expect("state lock");
        state.role = NodeRole::Follower;
        state.assigned.clear();
    }

    /// One heartbeat round: refresh our node entry, maintain the lease, run
    /// an election when the lease is gone, rebalance when leading.
    pub async fn tick(&self) {
        let assigned = match self
            .store
            .heartbeat(&self.node_id, self.leader_ttl())
            .await
        {
            Ok(assigned) => assigned,
            Err(e) => {
                tracing::warn!(node_id = %self.node_id, "heartbeat failed: {e}");
                return;
            }
        };
        {
            let mut state = self.state.lock().expect("state lock");
            state.assigned = assigned;
        }

        let leader = match self.store.current_leader().await {
            Ok(leader) => leader,
            Err(e) => {
                tracing::warn!(node_id = %self.node_id, "leader lookup failed: {e}");
                return;
            }
        };

        match leader {
            Some(holder) if holder == self.node_id => {
                let renewed = self
                    .store
                    .refresh_leader(&self.node_id, self.leader_ttl())
                    .await
                    .unwrap_or(false);
                if renewed {
                    self.set_role(NodeRole::Leader);
                    self.maybe_rebalance().await;
                } else {
                    tracing::warn!(node_id = %self.node_id, "lost leader lease");
                    self.set_role(NodeRole::Follower);
                }
            }
            Some(_) => {
                self.set_role(NodeRole::Follower);
                self.state.lock().expect("state lock").leader_absent_since = None;
            }
            None => self.run_election().await,
        }
    }

    async fn run_election(&self) {
        let election_timeout = Duration::from_secs(self.config.election_timeout_secs);
        let should_attempt = {
            let mut state = self.state.lock().expect("state lock");
            match state.leader_absent_since {
                Some(since) => since.elapsed() >= election_timeout,
                None => {
                    state.leader_absent_since = Some(Instant::now());
                    state.role = NodeRole::Candidate;
                    false
                }
            }
        };
        if !should_attempt {
            return;
        }

        let won = self
            .store
            .try_acquire_leader(&self.node_id, self.leader_ttl())
            .await
            .unwrap_or(false);
        {
            let mut state = self.state.lock().expect("state lock");
            state.leader_absent_since = None;
            state.role = if won {
                NodeRole::Leader
            } else {
                NodeRole::Follower
            };
        }
        if won {
            tracing::info!(node_id = %self.node_id, "elected leader");
            self.maybe_rebalance().await;
        }
    }

    /// Leader-only: recompute assignments on membership change, partition
    /// count change, or the scheduled rebalance tick.
    async fn maybe_rebalance(&self) {
        let nodes = match self.store.list_nodes().await {
            Ok(nodes) => nodes,
            Err(e) => {
                tracing::warn!("node listing failed: {e}");
                return;
            }
        };
        let node_ids: Vec<String> = nodes.iter().map(|n| n.node_id.clone()).collect();

        let due = {
            let state = self.state.lock().expect("state lock");
            let membership_changed = state.last_node_set != node_ids;
            let interval_elapsed = state
                .last_rebalance
                .map(|at| at.elapsed() >= Duration::from_secs(self.config.rebalance_interval_secs))
                .unwrap_or(true);
            membership_changed || interval_elapsed
        };
        if !due || node_ids.is_empty() {
            return;
        }

        let assignments = compute_assignments(&node_ids, self.config.stream_partitions);
        for (node_id, partitions) in &assignments {
            match self.store.set_assignments(node_id, partitions).await {
                Ok(true) => {}
                Ok(false) => {
                    tracing::debug!(node_id, "assignment skipped; node entry expired")
                }
                Err(e) => tracing::warn!(node_id, "assignment write failed: {e}"),
            }
        }

        let mut state = self.state.lock().expect("state lock");
        if let Some(own) = assignments.get(&self.node_id) {
            state.assigned = own.clone();
        }
        state.last_node_set = node_ids;
        state.last_rebalance = Some(Instant::now());
        tracing::info!(
            node_id = %self.node_id,
            nodes = state.last_node_set.len(),
            partitions = self.config.stream_partitions,
            "partitions rebalanced"
        );
    }

    fn set_role(&self, role: NodeRole) {
        let mut state = self.state.lock().expect("state lock");
        if state.role != role {
            tracing::info!(node_id = %self.node_id, ?role, "role changed");
        }
        state.role = role;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn assignments_cover_all_partitions_disjointly() {
        let nodes = vec!["b".to_string(), "a".to_string(), "c".to_string()];
        let assignments = compute_assignments(&nodes, 8);

        let mut seen: Vec<u32> = assignments.values().flatten().copied().collect();
        seen.sort();
        assert_eq!(seen, (0..8).collect::<Vec<u32>>());

        // ceil(8/3) = 3
        assert!(assignments.values().all(|p| p.len() <= 3));
    }

    #[test]
    fn assignments_are_deterministic_and_sorted_by_id() {
        let a = compute_assignments(&["n2".to_string(), "n1".to_string()], 5);
        let b = compute_assignments(&["n1".to_string(), "n2".to_string()], 5);
        assert_eq!(a, b);
        // n1 sorts first so it takes partition 0
        assert!(a["n1"].contains(&0));
        assert_eq!(a["n1"].len(), 3);
        assert_eq!(a["n2"].len(), 2);
    }

    #[test]
    fn empty_node_set_assigns_nothing() {
        assert!(compute_assignments(&[], 8).is_empty());
    }

    #[test]
    fn single_node_takes_everything() {
        let assignments = compute_assignments(&["only".to_string()], 4);
        assert_eq!(assignments["only"], vec![0, 1, 2, 3]);
    }
}
