//! Atomic JSON and append-only JSONL file I/O.
//!
//! All persistent state (session index, paired nodes, cron jobs) goes
//! through these helpers: JSON documents are written via temp-file +
//! rename so readers never observe a torn write, and JSONL appends take an
//! advisory file lock.

use std::{
    fs::{self, OpenOptions},
    io::{BufRead, BufReader, Write},
    path::{Path, PathBuf},
};

use {anyhow::Result, serde::Serialize, serde::de::DeserializeOwned};

/// Read and deserialize a JSON document. Returns `None` when the file does
/// not exist.
pub fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    if !path.exists() {
        return Ok(None);
    }
    let raw = fs::read_to_string(path)?;
    Ok(Some(serde_json::from_str(&raw)?))
}

/// Serialize and atomically write a JSON document (temp file + rename).
pub fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let data = serde_json::to_string_pretty(value)?;
    let tmp = tmp_sibling(path);
    fs::write(&tmp, data)?;
    fs::rename(&tmp, path)?;
    Ok(())
}

fn tmp_sibling(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "state".into());
    name.push_str(&format!(".{}.tmp", uuid::Uuid::new_v4().simple()));
    path.with_file_name(name)
}

/// Append one JSON value as a line to a JSONL file, under an advisory lock.
pub async fn append_jsonl(path: PathBuf, value: &serde_json::Value) -> Result<()> {
    let line = serde_json::to_string(value)?;
    tokio::task::spawn_blocking(move || -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        let mut lock = fd_lock::RwLock::new(file);
        let mut guard = lock
            .write()
            .map_err(|e| anyhow::anyhow!("lock failed: {e}"))?;
        writeln!(*guard, "{line}")?;
        Ok(())
    })
    .await??;
    Ok(())
}

/// Read every line of a JSONL file as JSON values. Malformed lines are
/// skipped so a single torn append cannot poison the whole log.
pub async fn read_jsonl(path: PathBuf) -> Result<Vec<serde_json::Value>> {
    tokio::task::spawn_blocking(move || -> Result<Vec<serde_json::Value>> {
        if !path.exists() {
            return Ok(Vec::new());
        }
        let file = fs::File::open(&path)?;
        let reader = BufReader::new(file);
        let mut out = Vec::new();
        for line in reader.lines() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            if let Ok(v) = serde_json::from_str(&line) {
                out.push(v);
            }
        }
        Ok(out)
    })
    .await?
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn json_roundtrip() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("nested/dir/state.json");
        write_json_atomic(&path, &serde_json::json!({"a": 1})).unwrap();
        let back: Option<serde_json::Value> = read_json(&path).unwrap();
        assert_eq!(back.unwrap()["a"], 1);
    }

    #[test]
    fn missing_file_reads_none() {
        let tmp = tempfile::TempDir::new().unwrap();
        let back: Option<serde_json::Value> = read_json(&tmp.path().join("nope.json")).unwrap();
        assert!(back.is_none());
    }

    #[tokio::test]
    async fn jsonl_append_and_read() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("log.jsonl");
        append_jsonl(path.clone(), &serde_json::json!({"n": 1}))
            .await
            .unwrap();
        append_jsonl(path.clone(), &serde_json::json!({"n": 2}))
            .await
            .unwrap();
        let lines = read_jsonl(path).await.unwrap();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[1]["n"], 2);
    }

    #[tokio::test]
    async fn jsonl_skips_malformed_lines() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("log.jsonl");
        fs::write(&path, "{\"ok\":true}\nnot json\n{\"ok\":false}\n").unwrap();
        let lines = read_jsonl(path).await.unwrap();
        assert_eq!(lines.len(), 2);
    }
}
