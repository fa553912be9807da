//! Shared coordination store: node heartbeats, the leader lease, and
//! partition assignments. In-memory for tests and single-node runs; redis
//! behind the `redis` cargo feature for real clusters.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterNode {
    pub node_id: String,
    pub heartbeat_ts: DateTime<Utc>,
    pub assigned_partitions: Vec<u32>,
}

#[async_trait]
pub trait CoordinationStore: Send + Sync {
    /// Refresh the node's heartbeat (registering it if absent) and return
    /// its current partition assignment.
    async fn heartbeat(&self, node_id: &str, ttl: Duration) -> anyhow::Result<Vec<u32>>;

    /// Nodes whose entries have not expired.
    async fn list_nodes(&self) -> anyhow::Result<Vec<ClusterNode>>;

    async fn remove_node(&self, node_id: &str) -> anyhow::Result<()>;

    /// Atomic set-if-absent on the leader key with TTL.
    async fn try_acquire_leader(&self, node_id: &str, ttl: Duration) -> anyhow::Result<bool>;

    /// Renew the lease; fails when the key is held by someone else or gone.
    async fn refresh_leader(&self, node_id: &str, ttl: Duration) -> anyhow::Result<bool>;

    /// Drop the lease if held by this node.
    async fn release_leader(&self, node_id: &str) -> anyhow::Result<()>;

    async fn current_leader(&self) -> anyhow::Result<Option<String>>;

    /// Leader-only write of a node's assignment. False when the node entry
    /// has expired.
    async fn set_assignments(&self, node_id: &str, partitions: &[u32]) -> anyhow::Result<bool>;
}

struct NodeEntry {
    node: ClusterNode,
    expires_at: Instant,
}

#[derive(Default)]
pub struct InMemoryCoordinationStore {
    nodes: Mutex<HashMap<String, NodeEntry>>,
    leader: Mutex<Option<(String, Instant)>>,
}

impl InMemoryCoordinationStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CoordinationStore for InMemoryCoordinationStore {
    async fn heartbeat(&self, node_id: &str, ttl: Duration) -> anyhow::Result<Vec<u32>> {
        let mut nodes = self.nodes.lock().expect("nodes lock");
        let entry = nodes.entry(node_id.to_string()).or_insert_with(|| NodeEntry {
            node: ClusterNode {
                node_id: node_id.to_string(),
                heartbeat_ts: Utc::now(),
                assigned_partitions: Vec::new(),
            },
            expires_at: Instant::now() + ttl,
        });
        entry.node.heartbeat_ts = Utc::now();
        entry.expires_at = Instant::now() + ttl;
        Ok(entry.node.assigned_partitions.clone())
    }

    async fn list_nodes(&self) -> anyhow::Result<Vec<ClusterNode>> {
        let mut nodes = self.nodes.lock().expect("nodes lock");
        let now = Instant::now();
        nodes.retain(|_, entry| entry.expires_at > now);
        let mut list: Vec<ClusterNode> = nodes.values().map(|e| e.node.clone()).collect();
        list.sort_by(|a, b| a.node_id.cmp(&b.node_id));
        Ok(list)
    }

    async fn remove_node(&self, node_id: &str) -> anyhow::Result<()> {
        self.nodes.lock().expect("nodes lock").remove(node_id);
        Ok(())
    }

    async fn try_acquire_leader(&self, node_id: &str, ttl: Duration) -> anyhow::Result<bool> {
        let mut leader = self.leader.lock().expect("leader lock");
        let now = Instant::now();
        match leader.as_ref() {
            Some((_, expires_at)) if *expires_at > now => Ok(false),
            _ => {
                *leader = Some((node_id.to_string(), now + ttl));
                Ok(true)
            }
        }
    }

    async fn refresh_leader(&self, node_id: &str, ttl: Duration) -> anyhow::Result<bool> {
        let mut leader = self.leader.lock().expect("leader lock");
        let now = Instant::now();
        match leader.as_ref() {
            Some((holder, expires_at)) if holder == node_id && *expires_at > now => {
                *leader = Some((node_id.to_string(), now + ttl));
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn release_leader(&self, node_id: &str) -> anyhow::Result<()> {
        let mut leader = self.leader.lock().expect("leader lock");
        if matches!(leader.as_ref(), Some((holder, _)) if holder == node_id) {
            *leader = None;
        }
        Ok(())
    }

    async fn current_leader(&self) -> anyhow::Result<Option<String>> {
        let mut leader = self.leader.lock().expect("leader lock");
        if matches!(leader.as_ref(), Some((_, expires_at)) if *expires_at <= Instant::now()) {
            *leader = None;
        }
        Ok(leader.as_ref().map(|(holder, _)| holder.clone()))
    }

    async fn set_assignments(&self, node_id: &str, partitions: &[u32]) -> anyhow::Result<bool> {
        let mut nodes = self.nodes.lock().expect("nodes lock");
        match nodes.get_mut(node_id) {
            Some(entry) if entry.expires_at > Instant::now() => {
                entry.node.assigned_partitions = partitions.to_vec();
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}

#[cfg(feature = "redis")]
pub use redis_store::RedisCoordinationStore;

#[cfg(feature = "redis")]
mod redis_store {
    use super::*;
    use redis::AsyncCommands;

    pub struct RedisCoordinationStore {
        client: redis::Client,
        prefix: String,
    }

    impl RedisCoordinationStore {
        pub fn new(redis_url: &str, prefix: Option<String>) -> anyhow::Result<Self> {
            let client = redis::Client::open(redis_url)?;
            Ok(Self {
                client,
                prefix: prefix.unwrap_or_else(|| "meshgate:coord".to_string()),
            })
        }

        fn node_key(&self, node_id: &str) -> String {
            format!("{}:node:{}", self.prefix, node_id)
        }

        fn nodes_key(&self) -> String {
            format!("{}:nodes", self.prefix)
        }

        fn leader_key(&self) -> String {
            format!("{}:leader", self.prefix)
        }
    }

    #[async_trait]
    impl CoordinationStore for RedisCoordinationStore {
        async fn heartbeat(&self, node_id: &str, ttl: Duration) -> anyhow::Result<Vec<u32>> {
            let mut conn = self.client.get_async_connection().await?;
            let key = self.node_key(node_id);
            let existing: Option<String> = conn.get(&key).await?;
            let mut node = match existing {
                Some(raw) => serde_json::from_str::<ClusterNode>(&raw)?,
                None => ClusterNode {
                    node_id: node_id.to_string(),
                    heartbeat_ts: Utc::now(),
                    assigned_partitions: Vec::new(),
                },
            };
            node.heartbeat_ts = Utc::now();
            let raw = serde_json::to_string(&node)?;
            let _: () = conn.set_ex(&key, raw, ttl.as_secs() as usize).await?;
            let _: () = conn.sadd(self.nodes_key(), node_id).await?;
            Ok(node.assigned_partitions)
        }

        async fn list_nodes(&self) -> anyhow::Result<Vec<ClusterNode>> {
            let mut conn = self.client.get_async_connection().await?;
            let ids: Vec<String> = conn.smembers(self.nodes_key()).await?;
            let mut nodes = Vec::new();
            for id in ids {
                let raw: Option<String> = conn.get(self.node_key(&id)).await?;
                match raw {
                    Some(raw) => nodes.push(serde_json::from_str::<ClusterNode>(&raw)?),
                    // Entry expired; prune from the set.
                    None => {
                        let _: () = conn.srem(self.nodes_key(), &id).await?;
                    }
                }
            }
            nodes.sort_by(|a, b| a.node_id.cmp(&b.node_id));
            Ok(nodes)
        }

        async fn remove_node(&self, node_id: &str) -> anyhow::Result<()> {
            let mut conn = self.client.get_async_connection().await?;
            let _: () = conn.del(self.node_key(node_id)).await?;
            let _: () = conn.srem(self.nodes_key(), node_id).await?;
            Ok(())
        }

        async fn try_acquire_leader(&self, node_id: &str, ttl: Duration) -> anyhow::Result<bool> {
            let mut conn = self.client.get_async_connection().await?;
            let acquired: Option<String> = redis::cmd("SET")
                .arg(self.leader_key())
                .arg(node_id)
                .arg("NX")
                .arg("PX")
                .arg(ttl.as_millis() as u64)
                .query_async(&mut conn)
                .await?;
            Ok(acquired.is_some())
        }

        async fn refresh_leader(&self, node_id: &str, ttl: Duration) -> anyhow::Result<bool> {
            let mut conn = self.client.get_async_connection().await?;
            let holder: Option<String> = conn.get(self.leader_key()).await?;
            if holder.as_deref() != Some(node_id) {
                return Ok(false);
            }
            let _: () = redis::cmd("PEXPIRE")
                .arg(self.leader_key())
                .arg(ttl.as_millis() as u64)
                .query_async(&mut conn)
                .await?;
            Ok(true)
        }

        async fn release_leader(&self, node_id: &str) -> anyhow::Result<()> {
            let mut conn = self.client.get_async_connection().await?;
            let holder: Option<String> = conn.get(self.leader_key()).await?;
            if holder.as_deref() == Some(node_id) {
                let _: () = conn.del(self.leader_key()).await?;
            }
            Ok(())
        }

        async fn current_leader(&self) -> anyhow::Result<Option<String>> {
            let mut conn = self.client.get_async_connection().await?;
            Ok(conn.get(self.leader_key()).await?)
        }

        async fn set_assignments(&self, node_id: &str, partitions: &[u32]) -> anyhow::Result<bool> {
            let mut conn = self.client.get_async_connection().await?;
            let key = self.node_key(node_id);
            let raw: Option<String> = conn.get(&key).await?;
            let Some(raw) = raw else {
                return Ok(false);
            };
            let mut node: ClusterNode = serde_json::from_str(&raw)?;
            node.assigned_partitions = partitions.to_vec();
            let ttl_ms: i64 = conn.pttl(&key).await?;
            let raw = serde_json::to_string(&node)?;
            if ttl_ms > 0 {
                let _: () = redis::cmd("SET")
                    .arg(&key)
                    .arg(raw)
                    .arg("PX")
                    .arg(ttl_ms as u64)
                    .query_async(&mut conn)
                    .await?;
            } else {
                let _: () = conn.set(&key, raw).await?;
            }
            Ok(true)
        }
    }
}
