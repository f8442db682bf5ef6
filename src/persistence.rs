//! History file
//!
//! Durable copy of the conversation store: one human-readable JSON document
//! mapping the stringified chat ID to its ordered `{role, content}` turns.
//! Rewritten in full after every exchange, atomically via a temp file.

use serde::Serialize;
use serde_json::ser::PrettyFormatter;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::conversation::{ConversationId, HistoryStore, Snapshot, Turn};

/// Persistence errors
#[derive(Error, Debug)]
pub enum PersistenceError {
    #[error("IO error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("Invalid conversation id {0:?} in history file")]
    InvalidKey(String),
}

impl PersistenceError {
    fn io(path: &Path, source: std::io::Error) -> Self {
        PersistenceError::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// JSON history file with serialized writers
pub struct HistoryFile {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl HistoryFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the persisted snapshot. A missing file is an empty history.
    pub async fn load(&self) -> Result<Snapshot, PersistenceError> {
        let data = match tokio::fs::read_to_string(&self.path).await {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                warn!(
                    "No history file at {}, starting with empty history",
                    self.path.display()
                );
                return Ok(Snapshot::new());
            }
            Err(e) => return Err(PersistenceError::io(&self.path, e)),
        };

        let snapshot = decode(&data)?;
        info!(
            "Loaded history for {} conversations from {}",
            snapshot.len(),
            self.path.display()
        );
        Ok(snapshot)
    }

    /// Write a snapshot, replacing the file atomically
    pub async fn save(&self, snapshot: &Snapshot) -> Result<(), PersistenceError> {
        let _guard = self.write_lock.lock().await;
        self.write(snapshot).await
    }

    /// Snapshot `store` and write it, both under the writer lock so a stale
    /// snapshot can never land after a newer one.
    pub async fn save_store(&self, store: &HistoryStore) -> Result<(), PersistenceError> {
        let _guard = self.write_lock.lock().await;
        let snapshot = store.snapshot();
        self.write(&snapshot).await
    }

    /// `<file>.tmp` next to the history file
    fn temp_path(&self) -> PathBuf {
        let mut name = self.path.as_os_str().to_owned();
        name.push(".tmp");
        PathBuf::from(name)
    }

    async fn write(&self, snapshot: &Snapshot) -> Result<(), PersistenceError> {
        let data = encode(snapshot)?;

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| PersistenceError::io(parent, e))?;
        }

        // Write atomically via temp file
        let temp_path = self.temp_path();
        tokio::fs::write(&temp_path, data)
            .await
            .map_err(|e| PersistenceError::io(&temp_path, e))?;
        if let Err(e) = tokio::fs::rename(&temp_path, &self.path).await {
            let _ = tokio::fs::remove_file(&temp_path).await;
            return Err(PersistenceError::io(&self.path, e));
        }

        debug!("Saved {} conversations to {}", snapshot.len(), self.path.display());
        Ok(())
    }
}

/// Snapshot as pretty JSON with 2-space indentation, keys in id order
pub fn encode(snapshot: &Snapshot) -> Result<Vec<u8>, PersistenceError> {
    let ordered: BTreeMap<ConversationId, &Vec<Turn>> =
        snapshot.iter().map(|(id, turns)| (*id, turns)).collect();

    let mut buf = Vec::new();
    let mut ser = serde_json::Serializer::with_formatter(&mut buf, PrettyFormatter::with_indent(b"  "));
    KeyedById(&ordered).serialize(&mut ser)?;
    Ok(buf)
}

/// Parse a history document back into a snapshot
pub fn decode(data: &str) -> Result<Snapshot, PersistenceError> {
    let raw: BTreeMap<String, Vec<Turn>> = serde_json::from_str(data)?;
    let mut snapshot = Snapshot::with_capacity(raw.len());
    for (key, turns) in raw {
        let id = match key.parse::<ConversationId>() {
            Ok(id) => id,
            Err(_) => return Err(PersistenceError::InvalidKey(key)),
        };
        // "5" and "05" name the same chat
        if snapshot.insert(id, turns).is_some() {
            return Err(PersistenceError::InvalidKey(key));
        }
    }
    Ok(snapshot)
}

/// JSON object keyed by the decimal chat ID, in numeric order
struct KeyedById<'a>(&'a BTreeMap<ConversationId, &'a Vec<Turn>>);

impl Serialize for KeyedById<'_> {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_map(self.0.iter().map(|(id, turns)| (id.to_string(), turns)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn sample() -> Snapshot {
        let mut snapshot = Snapshot::new();
        snapshot.insert(
            ConversationId(123),
            vec![Turn::user("Hi"), Turn::assistant("Hello! 👋")],
        );
        snapshot.insert(ConversationId(-100987), vec![Turn::user("[image]")]);
        snapshot
    }

    #[test]
    fn test_encode_format() {
        let mut snapshot = Snapshot::new();
        snapshot.insert(ConversationId(5), vec![Turn::user("héllo")]);

        let text = String::from_utf8(encode(&snapshot).unwrap()).unwrap();
        assert_eq!(
            text,
            "{\n  \"5\": [\n    {\n      \"role\": \"user\",\n      \"content\": \"héllo\"\n    }\n  ]\n}"
        );
    }

    #[test]
    fn test_encode_decode() {
        let snapshot = sample();
        let text = String::from_utf8(encode(&snapshot).unwrap()).unwrap();
        assert_eq!(decode(&text).unwrap(), snapshot);
    }

    #[test]
    fn test_decode_rejects_bad_key() {
        let err = decode(r#"{"not-a-chat": []}"#).unwrap_err();
        assert!(matches!(err, PersistenceError::InvalidKey(k) if k == "not-a-chat"));
    }

    #[test]
    fn test_decode_rejects_duplicate_id() {
        let err = decode(r#"{"5": [], "05": [{"role": "user", "content": "x"}]}"#).unwrap_err();
        assert!(matches!(err, PersistenceError::InvalidKey(k) if k == "5"));
    }

    #[test]
    fn test_decode_rejects_bad_role() {
        let err = decode(r#"{"1": [{"role": "system", "content": "x"}]}"#).unwrap_err();
        assert!(matches!(err, PersistenceError::Serialization(_)));
    }

    #[tokio::test]
    async fn test_missing_file_loads_empty() {
        let dir = tempdir().unwrap();
        let file = HistoryFile::new(dir.path().join("chat_histories.json"));
        assert!(file.load().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_save_leaves_no_temp_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("chat_histories.json");
        let file = HistoryFile::new(&path);

        file.save(&sample()).await.unwrap();

        assert!(path.exists());
        assert!(!dir.path().join("chat_histories.json.tmp").exists());
    }

    #[tokio::test]
    async fn test_failed_rename_removes_temp_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("chat_histories.json");
        std::fs::create_dir(&path).unwrap();
        std::fs::write(path.join("keep"), b"").unwrap();
        let file = HistoryFile::new(&path);

        let err = file.save(&sample()).await.unwrap_err();

        assert!(matches!(err, PersistenceError::Io { .. }));
        assert!(!dir.path().join("chat_histories.json.tmp").exists());
        assert!(path.join("keep").exists());
    }

    #[tokio::test]
    async fn test_save_creates_parent_dirs() {
        let dir = tempdir().unwrap();
        let file = HistoryFile::new(dir.path().join("nested/state/history.json"));
        file.save(&sample()).await.unwrap();
        assert_eq!(file.load().await.unwrap(), sample());
    }
}
