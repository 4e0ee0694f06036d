//! Persistent paired-node records.

use std::{collections::HashMap, path::PathBuf};

use {
    anyhow::Result,
    serde::{Deserialize, Serialize},
    tokio::sync::Mutex,
};

use clawdis_common::{fsio, redact::Secret, time::now_ms};

/// One paired companion device. The token serializes into the store file
/// (nodes re-present it on reconnect) but never into events or logs.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PairedNode {
    pub node_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub platform: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_family: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_identifier: Option<String>,
    pub token: Secret,
    #[serde(default)]
    pub caps: Vec<String>,
    #[serde(default)]
    pub commands: Vec<String>,
    pub created_at_ms: u64,
    pub last_seen_at_ms: u64,
}

impl PairedNode {
    /// Event/RPC view with the token redacted away.
    #[must_use]
    pub fn public_view(&self) -> serde_json::Value {
        serde_json::json!({
            "nodeId": self.node_id,
            "displayName": self.display_name,
            "platform": self.platform,
            "version": self.version,
            "deviceFamily": self.device_family,
            "modelIdentifier": self.model_identifier,
            "caps": self.caps,
            "commands": self.commands,
            "createdAtMs": self.created_at_ms,
            "lastSeenAtMs": self.last_seen_at_ms,
        })
    }
}

/// `bridge/paired-nodes.json`, `{ [nodeId]: PairedNode }`, single writer.
pub struct NodeStore {
    path: PathBuf,
    nodes: Mutex<HashMap<String, PairedNode>>,
}

impl NodeStore {
    pub fn open(path: PathBuf) -> Result<Self> {
        let nodes = fsio::read_json(&path)?.unwrap_or_default();
        Ok(Self {
            path,
            nodes: Mutex::new(nodes),
        })
    }

    pub async fn get(&self, node_id: &str) -> Option<PairedNode> {
        self.nodes.lock().await.get(node_id).cloned()
    }

    pub async fn contains(&self, node_id: &str) -> bool {
        self.nodes.lock().await.contains_key(node_id)
    }

    /// Check a presented token against the stored record.
    pub async fn verify_token(&self, node_id: &str, token: &str) -> bool {
        self.nodes
            .lock()
            .await
            .get(node_id)
            .is_some_and(|n| n.token.expose() == token)
    }

    pub async fn insert(&self, node: PairedNode) -> Result<()> {
        let mut nodes = self.nodes.lock().await;
        nodes.insert(node.node_id.clone(), node);
        fsio::write_json_atomic(&self.path, &*nodes)
    }

    pub async fn touch_last_seen(&self, node_id: &str) -> Result<()> {
        let mut nodes = self.nodes.lock().await;
        if let Some(node) = nodes.get_mut(node_id) {
            node.last_seen_at_ms = now_ms();
            fsio::write_json_atomic(&self.path, &*nodes)?;
        }
        Ok(())
    }

    pub async fn remove(&self, node_id: &str) -> Result<bool> {
        let mut nodes = self.nodes.lock().await;
        let removed = nodes.remove(node_id).is_some();
        if removed {
            fsio::write_json_atomic(&self.path, &*nodes)?;
        }
        Ok(removed)
    }

    /// Redacted listing for events and RPC responses.
    pub async fn list_public(&self) -> Vec<serde_json::Value> {
        let nodes = self.nodes.lock().await;
        let mut out: Vec<_> = nodes.values().map(PairedNode::public_view).collect();
        out.sort_by(|a, b| a["nodeId"].as_str().cmp(&b["nodeId"].as_str()));
        out
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    fn node(id: &str, token: &str) -> PairedNode {
        PairedNode {
            node_id: id.into(),
            display_name: Some("Office iPad".into()),
            platform: Some("ios".into()),
            version: None,
            device_family: None,
            model_identifier: None,
            token: Secret::new(token),
            caps: vec!["canvas".into()],
            commands: vec!["canvas.show".into()],
            created_at_ms: 1,
            last_seen_at_ms: 1,
        }
    }

    #[tokio::test]
    async fn roundtrip_and_verify() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("paired-nodes.json");
        let store = NodeStore::open(path.clone()).unwrap();
        store.insert(node("n1", "tok-1")).await.unwrap();

        assert!(store.verify_token("n1", "tok-1").await);
        assert!(!store.verify_token("n1", "wrong").await);
        assert!(!store.verify_token("ghost", "tok-1").await);

        // Tokens survive reopen (nodes reconnect with the stored token).
        let reopened = NodeStore::open(path).unwrap();
        assert!(reopened.verify_token("n1", "tok-1").await);
    }

    #[tokio::test]
    async fn public_view_never_carries_token() {
        let tmp = tempfile::TempDir::new().unwrap();
        let store = NodeStore::open(tmp.path().join("nodes.json")).unwrap();
        store.insert(node("n1", "super-secret")).await.unwrap();

        let listed = store.list_public().await;
        let as_text = serde_json::to_string(&listed).unwrap();
        assert!(!as_text.contains("super-secret"));
        assert_eq!(listed[0]["nodeId"], "n1");
        assert_eq!(listed[0]["caps"][0], "canvas");
    }

    #[tokio::test]
    async fn touch_updates_last_seen() {
        let tmp = tempfile::TempDir::new().unwrap();
        let store = NodeStore::open(tmp.path().join("nodes.json")).unwrap();
        store.insert(node("n1", "t")).await.unwrap();
        store.touch_last_seen("n1").await.unwrap();
        let n = store.get("n1").await.unwrap();
        assert!(n.last_seen_at_ms > 1);
    }
}
