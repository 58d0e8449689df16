//! Persistence of the session registry.
//!
//! The durable snapshot lives in `sessions.json` under the configured state
//! path, keyed by session id. Saves are best-effort projections written
//! after mutations and on every autosave tick; a missing or unreadable file
//! on load is treated as "no saved sessions", never as an error.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;

use cw_domain::error::Result;

use crate::registry::PersistedSession;

/// Durably saves and loads the set of active sessions.
#[async_trait]
pub trait PersistenceStore: Send + Sync {
    /// Replace the snapshot with `sessions`, returning the count written.
    async fn save(&self, sessions: &[PersistedSession]) -> Result<usize>;

    /// Load the snapshot. An absent snapshot yields an empty vec.
    async fn load(&self) -> Result<Vec<PersistedSession>>;
}

/// Default [`PersistenceStore`] backed by a JSON file.
pub struct JsonFileStore {
    sessions_path: PathBuf,
}

impl JsonFileStore {
    /// Create the store at `state_path/sessions.json`, creating the
    /// directory if needed.
    pub fn new(state_path: &Path) -> Result<Self> {
        std::fs::create_dir_all(state_path)?;
        Ok(Self {
            sessions_path: state_path.join("sessions.json"),
        })
    }
}

#[async_trait]
impl PersistenceStore for JsonFileStore {
    async fn save(&self, sessions: &[PersistedSession]) -> Result<usize> {
        let map: HashMap<&str, &PersistedSession> =
            sessions.iter().map(|s| (s.id.as_str(), s)).collect();
        let json = serde_json::to_string_pretty(&map)?;
        std::fs::write(&self.sessions_path, json)?;
        Ok(sessions.len())
    }

    async fn load(&self) -> Result<Vec<PersistedSession>> {
        if !self.sessions_path.exists() {
            return Ok(Vec::new());
        }
        let raw = std::fs::read_to_string(&self.sessions_path)?;
        // Tolerate a corrupt snapshot: recovery must not wedge on bad state.
        let map: HashMap<String, PersistedSession> =
            serde_json::from_str(&raw).unwrap_or_default();
        tracing::info!(
            sessions = map.len(),
            path = %self.sessions_path.display(),
            "session snapshot loaded"
        );
        Ok(map.into_values().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn record(id: &str, owner_id: &str) -> PersistedSession {
        let now = Utc::now();
        PersistedSession {
            id: id.into(),
            owner_id: owner_id.into(),
            phone_identifier: Some("33612345678".into()),
            created_at: now,
            restored_at: None,
            last_activity_at: now,
        }
    }

    #[tokio::test]
    async fn save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::new(dir.path()).unwrap();

        let count = store
            .save(&[record("s1", "u1"), record("s2", "u2")])
            .await
            .unwrap();
        assert_eq!(count, 2);

        let mut loaded = store.load().await.unwrap();
        loaded.sort_by(|a, b| a.id.cmp(&b.id));
        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded[0].id, "s1");
        assert_eq!(loaded[1].owner_id, "u2");
    }

    #[tokio::test]
    async fn missing_snapshot_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::new(dir.path()).unwrap();
        assert!(store.load().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn corrupt_snapshot_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("sessions.json"), "{not json").unwrap();
        let store = JsonFileStore::new(dir.path()).unwrap();
        assert!(store.load().await.unwrap().is_empty());
    }
}
