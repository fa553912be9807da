use std::sync::Arc;

use crate::config::CoordinatorConfig;
use crate::coordinator::{Coordinator, CoordinationStore, InMemoryCoordinationStore};

fn config(node_id: &str) -> CoordinatorConfig {
    CoordinatorConfig {
        node_id: Some(node_id.to_string()),
        stream_partitions: 8,
        heartbeat_interval_secs: 1,
        // Zero so the election attempt happens on the tick after absence is
        // first observed; ticks are driven manually below.
        election_timeout_secs: 0,
        leader_timeout_secs: 1,
        rebalance_interval_secs: 1,
    }
}

async fn tick_all(nodes: &[Arc<Coordinator>], rounds: usize) {
    for _ in 0..rounds {
        for node in nodes {
            node.tick().await;
        }
    }
}

fn leaders(nodes: &[Arc<Coordinator>]) -> Vec<String> {
    nodes
        .iter()
        .filter(|n| n.is_leader())
        .map(|n| n.node_id().to_string())
        .collect()
}

#[tokio::test]
async fn exactly_one_leader_is_elected() {
    let store: Arc<dyn CoordinationStore> = Arc::new(InMemoryCoordinationStore::new());
    let nodes: Vec<Arc<Coordinator>> = ["n1", "n2", "n3"]
        .iter()
        .map(|id| Arc::new(Coordinator::new(config(id), store.clone())))
        .collect();

    tick_all(&nodes, 3).await;
    assert_eq!(leaders(&nodes).len(), 1);
}

#[tokio::test]
async fn partitions_cover_exactly_once_across_nodes() {
    let store: Arc<dyn CoordinationStore> = Arc::new(InMemoryCoordinationStore::new());
    let nodes: Vec<Arc<Coordinator>> = ["n1", "n2", "n3"]
        .iter()
        .map(|id| Arc::new(Coordinator::new(config(id), store.clone())))
        .collect();

    // Elect, rebalance, then let every follower pick up its assignment via
    // heartbeat.
    tick_all(&nodes, 4).await;

    let mut all: Vec<u32> = nodes
        .iter()
        .flat_map(|n| n.assigned_partitions())
        .collect();
    all.sort();
    assert_eq!(all, (0..8).collect::<Vec<u32>>());

    // ceil(8/3) = 3
    for node in &nodes {
        assert!(node.assigned_partitions().len() <= 3);
    }
}

#[tokio::test]
async fn leader_failure_triggers_reelection_and_full_coverage() {
    let store: Arc<dyn CoordinationStore> = Arc::new(InMemoryCoordinationStore::new());
    let nodes: Vec<Arc<Coordinator>> = ["n1", "n2", "n3"]
        .iter()
        .map(|id| Arc::new(Coordinator::new(config(id), store.clone())))
        .collect();

    tick_all(&nodes, 3).await;
    let first_leader = leaders(&nodes)[0].clone();

    // Kill the leader: lease released, node entry gone.
    store.release_leader(&first_leader).await.unwrap();
    store.remove_node(&first_leader).await.unwrap();
    let survivors: Vec<Arc<Coordinator>> = nodes
        .iter()
        .filter(|n| n.node_id() != first_leader)
        .cloned()
        .collect();

    tick_all(&survivors, 4).await;
    let new_leaders = leaders(&survivors);
    assert_eq!(new_leaders.len(), 1);
    assert_ne!(new_leaders[0], first_leader);

    // Total assigned partitions still equal P, disjointly.
    let mut all: Vec<u32> = survivors
        .iter()
        .flat_map(|n| n.assigned_partitions())
        .collect();
    all.sort();
    assert_eq!(all, (0..8).collect::<Vec<u32>>());
}

#[tokio::test]
async fn node_join_triggers_rebalance() {
    let store: Arc<dyn CoordinationStore> = Arc::new(InMemoryCoordinationStore::new());
    let n1 = Arc::new(Coordinator::new(config("n1"), store.clone()));
    tick_all(std::slice::from_ref(&n1), 3).await;
    assert!(n1.is_leader());
    assert_eq!(n1.assigned_partitions().len(), 8);

    let n2 = Arc::new(Coordinator::new(config("n2"), store.clone()));
    let both = vec![n1.clone(), n2.clone()];
    tick_all(&both, 3).await;

    assert_eq!(n1.assigned_partitions().len(), 4);
    assert_eq!(n2.assigned_partitions().len(), 4);
}

#[tokio::test]
async fn background_loop_elects_and_stops_cleanly() {
    let store: Arc<dyn CoordinationStore> = Arc::new(InMemoryCoordinationStore::new());
    let node = Arc::new(Coordinator::new(config("solo"), store.clone()));
    node.clone().start().await;

    let mut elected = false;
    for _ in 0..50 {
        if node.is_leader() {
            elected = true;
            break;
        }
        tokio::time::sleep(std::time::Duration::from_millis(100)).await;
    }
    assert!(elected, "solo node never became leader");

    node.stop().await;
    assert!(!node.is_leader());
    assert_eq!(store.current_leader().await.unwrap(), None);
}
