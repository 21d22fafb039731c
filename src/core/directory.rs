// src/core/directory.rs

//! C1: Node Directory. An in-memory, ordered view of registered nodes,
//! read-through from the cluster-wide metadata table.

use crate::core::errors::EngineError;
use crate::core::types::{Node, NodeId};
use std::sync::Arc;
use tokio::sync::Mutex as AsyncMutex;

/// A source of `Node` records. In production this is backed by the
/// metadata store client (C4); tests can supply a fixed snapshot directly.
#[async_trait::async_trait]
pub trait NodeSource: Send + Sync {
    async fn fetch_all(&self) -> Result<Vec<Node>, EngineError>;
}

/// Materialises an ordered sequence of `Node` records. `refresh()` is
/// idempotent; concurrent refreshes serialize on the directory's writer
/// ticket (§4.1) rather than each issuing their own store read.
pub struct NodeDirectory {
    source: Arc<dyn NodeSource>,
    snapshot: AsyncMutex<Vec<Node>>,
}

impl NodeDirectory {
    pub fn new(source: Arc<dyn NodeSource>) -> Self {
        Self {
            source,
            snapshot: AsyncMutex::new(Vec::new()),
        }
    }

    /// Repopulates the directory from the store. Callers must tolerate a
    /// stale snapshot being visible to concurrent readers while a refresh is
    /// in flight.
    pub async fn refresh(&self) -> Result<(), EngineError> {
        let mut guard = self.snapshot.lock().await;
        let mut nodes = self.source.fetch_all().await?;
        nodes.sort_by_key(|n| n.node_id);
        *guard = nodes;
        Ok(())
    }

    pub async fn get(&self, node_id: NodeId) -> Option<Node> {
        self.snapshot
            .lock()
            .await
            .iter()
            .find(|n| n.node_id == node_id)
            .cloned()
    }

    /// All active standbys of the same cluster, excluding `node_id` itself
    /// and witnesses.
    pub async fn peers_of(&self, node_id: NodeId) -> Vec<Node> {
        self.snapshot
            .lock()
            .await
            .iter()
            .filter(|n| n.node_id != node_id && n.active && !n.is_witness())
            .cloned()
            .collect()
    }

    /// All other active standbys sharing the same upstream as `node_id`
    /// (siblings under the same primary). Witnesses are never siblings;
    /// callers that want them in the voter set add them separately.
    pub async fn siblings_of(&self, node_id: NodeId) -> Vec<Node> {
        let snapshot = self.snapshot.lock().await;
        let Some(me) = snapshot.iter().find(|n| n.node_id == node_id) else {
            return Vec::new();
        };
        let upstream = me.upstream_node_id;
        snapshot
            .iter()
            .filter(|n| n.node_id != node_id && n.active && !n.is_witness() && n.upstream_node_id == upstream)
            .cloned()
            .collect()
    }

    pub async fn witnesses(&self) -> Vec<Node> {
        self.snapshot
            .lock()
            .await
            .iter()
            .filter(|n| n.is_witness() && n.active)
            .cloned()
            .collect()
    }

    pub async fn all(&self) -> Vec<Node> {
        self.snapshot.lock().await.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::Role;

    struct FixedSource(Vec<Node>);

    #[async_trait::async_trait]
    impl NodeSource for FixedSource {
        async fn fetch_all(&self) -> Result<Vec<Node>, EngineError> {
            Ok(self.0.clone())
        }
    }

    fn node(id: NodeId, role: Role, upstream: Option<NodeId>) -> Node {
        Node {
            node_id: id,
            name: format!("n{id}"),
            role,
            location: "dc1".into(),
            priority: 100,
            conninfo: "host=localhost".into(),
            upstream_node_id: upstream,
            slot_name: None,
            active: true,
        }
    }

    #[tokio::test]
    async fn peers_of_excludes_self_and_witnesses() {
        let nodes = vec![
            node(1, Role::Primary, None),
            node(2, Role::Standby, Some(1)),
            node(3, Role::Standby, Some(1)),
            node(4, Role::Witness, None),
        ];
        let dir = NodeDirectory::new(Arc::new(FixedSource(nodes)));
        dir.refresh().await.unwrap();

        let peers = dir.peers_of(2).await;
        let ids: Vec<_> = peers.iter().map(|n| n.node_id).collect();
        assert_eq!(ids, vec![1, 3]);
    }

    #[tokio::test]
    async fn siblings_of_shares_upstream() {
        let nodes = vec![
            node(1, Role::Primary, None),
            node(2, Role::Standby, Some(1)),
            node(3, Role::Standby, Some(1)),
        ];
        let dir = NodeDirectory::new(Arc::new(FixedSource(nodes)));
        dir.refresh().await.unwrap();

        let siblings = dir.siblings_of(2).await;
        assert_eq!(siblings.len(), 1);
        assert_eq!(siblings[0].node_id, 3);
    }
}
