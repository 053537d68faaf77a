//! Connection registry: `client_id → record`.
//!
//! Purely informational. Fan-out goes through room membership
//! ([`crate::rooms`]), never through this map. Sessions keep the two
//! consistent: they put on join and remove on disconnect.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use flux_core::{ClientId, UserId, WorkspaceId};
use serde::Serialize;

/// What the relay knows about one live connection.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionRecord {
    /// Connection ID.
    pub client_id: ClientId,
    /// Namespace tenant.
    pub workspace_id: WorkspaceId,
    /// Authenticated user.
    pub user_id: UserId,
    /// Email attached by upstream auth, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_email: Option<String>,
    /// Join time.
    pub connected_at: DateTime<Utc>,
}

/// Lock-striped map of live connections.
#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    records: DashMap<ClientId, ConnectionRecord>,
}

impl ConnectionRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or overwrite the record for `client_id`.
    pub fn put(&self, client_id: ClientId, record: ConnectionRecord) {
        let _ = self.records.insert(client_id, record);
    }

    /// Remove the record for `client_id`. Removing an absent key is a no-op.
    pub fn remove(&self, client_id: &ClientId) -> Option<ConnectionRecord> {
        self.records.remove(client_id).map(|(_, record)| record)
    }

    /// Copy of one record.
    pub fn get(&self, client_id: &ClientId) -> Option<ConnectionRecord> {
        self.records.get(client_id).map(|r| r.value().clone())
    }

    /// Number of records.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Whether the registry is empty.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Number of records for one workspace.
    pub fn workspace_size(&self, workspace_id: &WorkspaceId) -> usize {
        self.records
            .iter()
            .filter(|r| &r.workspace_id == workspace_id)
            .count()
    }

    /// Snapshot of all records. Not atomic across shards.
    pub fn records(&self) -> Vec<ConnectionRecord> {
        self.records.iter().map(|r| r.value().clone()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn record(client: &ClientId, workspace: &str) -> ConnectionRecord {
        ConnectionRecord {
            client_id: client.clone(),
            workspace_id: WorkspaceId::from_raw(workspace),
            user_id: UserId::from_raw("U1"),
            user_email: None,
            connected_at: Utc::now(),
        }
    }

    #[test]
    fn put_get_remove() {
        let reg = ConnectionRegistry::new();
        let id = ClientId::new();
        reg.put(id.clone(), record(&id, "W1"));
        assert_eq!(reg.len(), 1);
        assert_eq!(reg.get(&id).unwrap().workspace_id.as_str(), "W1");

        let removed = reg.remove(&id).unwrap();
        assert_eq!(removed.client_id, id);
        assert!(reg.is_empty());
        assert!(reg.get(&id).is_none());
    }

    #[test]
    fn put_overwrites() {
        let reg = ConnectionRegistry::new();
        let id = ClientId::new();
        reg.put(id.clone(), record(&id, "W1"));
        reg.put(id.clone(), record(&id, "W2"));
        assert_eq!(reg.len(), 1);
        assert_eq!(reg.get(&id).unwrap().workspace_id.as_str(), "W2");
    }

    #[test]
    fn remove_is_idempotent() {
        let reg = ConnectionRegistry::new();
        let id = ClientId::new();
        assert!(reg.remove(&id).is_none());
        reg.put(id.clone(), record(&id, "W1"));
        assert!(reg.remove(&id).is_some());
        assert!(reg.remove(&id).is_none());
        assert!(reg.is_empty());
    }

    #[test]
    fn workspace_size_counts_per_workspace() {
        let reg = ConnectionRegistry::new();
        for ws in ["W1", "W1", "W2"] {
            let id = ClientId::new();
            reg.put(id.clone(), record(&id, ws));
        }
        assert_eq!(reg.workspace_size(&WorkspaceId::from_raw("W1")), 2);
        assert_eq!(reg.workspace_size(&WorkspaceId::from_raw("W2")), 1);
        assert_eq!(reg.workspace_size(&WorkspaceId::from_raw("W3")), 0);
        assert_eq!(reg.records().len(), 3);
    }

    #[test]
    fn record_serializes_camel_case() {
        let id = ClientId::from_raw("client_1");
        let value = serde_json::to_value(record(&id, "W1")).unwrap();
        assert_eq!(value["clientId"], "client_1");
        assert_eq!(value["workspaceId"], "W1");
        assert!(value.get("userEmail").is_none());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_churn_leaves_registry_consistent() {
        let reg = Arc::new(ConnectionRegistry::new());
        let mut tasks = Vec::new();
        for i in 0..32 {
            let reg = reg.clone();
            tasks.push(tokio::spawn(async move {
                let keep = ClientId::new();
                reg.put(keep.clone(), record(&keep, "W1"));
                for _ in 0..50 {
                    let id = ClientId::new();
                    reg.put(id.clone(), record(&id, "W1"));
                    tokio::task::yield_now().await;
                    let _ = reg.remove(&id);
                    let _ = reg.remove(&id);
                }
                if i % 2 == 0 {
                    let _ = reg.remove(&keep);
                }
            }));
        }
        for t in tasks {
            t.await.unwrap();
        }
        assert_eq!(reg.len(), 16);
        assert_eq!(reg.workspace_size(&WorkspaceId::from_raw("W1")), 16);
    }
}
