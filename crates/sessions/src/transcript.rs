//! Append-only JSONL transcripts, one file per session.

use std::path::PathBuf;

use anyhow::Result;

use clawdis_common::{fsio, time::now_ms};

use crate::key::key_to_filename;

/// Writer/reader for per-session transcript logs under `sessions/`.
#[derive(Clone)]
pub struct TranscriptStore {
    base_dir: PathBuf,
}

impl TranscriptStore {
    #[must_use]
    pub fn new(base_dir: PathBuf) -> Self {
        Self { base_dir }
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.base_dir.join(format!("{}.jsonl", key_to_filename(key)))
    }

    /// Append one turn to the session transcript.
    pub async fn append(&self, key: &str, role: &str, text: &str) -> Result<()> {
        let record = serde_json::json!({
            "role": role,
            "text": text,
            "at": now_ms(),
        });
        fsio::append_jsonl(self.path_for(key), &record).await
    }

    /// Read the full transcript, oldest first.
    pub async fn read(&self, key: &str) -> Result<Vec<serde_json::Value>> {
        fsio::read_jsonl(self.path_for(key)).await
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn append_and_read_in_order() {
        let tmp = tempfile::TempDir::new().unwrap();
        let store = TranscriptStore::new(tmp.path().to_path_buf());
        store.append("agent:main:main", "user", "hi").await.unwrap();
        store
            .append("agent:main:main", "assistant", "hello")
            .await
            .unwrap();
        let turns = store.read("agent:main:main").await.unwrap();
        assert_eq!(turns.len(), 2);
        assert_eq!(turns[0]["role"], "user");
        assert_eq!(turns[1]["text"], "hello");
    }

    #[tokio::test]
    async fn sessions_are_isolated() {
        let tmp = tempfile::TempDir::new().unwrap();
        let store = TranscriptStore::new(tmp.path().to_path_buf());
        store.append("a", "user", "one").await.unwrap();
        store.append("b", "user", "two").await.unwrap();
        assert_eq!(store.read("a").await.unwrap().len(), 1);
        assert_eq!(store.read("b").await.unwrap().len(), 1);
    }
}
