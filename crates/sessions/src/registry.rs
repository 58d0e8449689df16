//! In-memory registry of supervised sessions.
//!
//! The registry is the single source of truth for "what sessions exist
//! right now"; the on-disk snapshot is a derived projection written after
//! mutations. Insert-if-absent is the only operation with a
//! correctness-relevant race, so every mutation goes through one coarse
//! `RwLock` around the map.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use cw_domain::error::{Error, Result};

use crate::client::ConnectionClient;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Status
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Lifecycle state of a session.
///
/// `NotFound` is a query-surface projection for an absent session id; the
/// registry never stores it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Initializing,
    QrCodeReady,
    Connected,
    Disconnected,
    NotFound,
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Initializing => "initializing",
            Self::QrCodeReady => "qr_code_ready",
            Self::Connected => "connected",
            Self::Disconnected => "disconnected",
            Self::NotFound => "not_found",
        };
        f.write_str(s)
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Session record
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// A supervised session. Owns its connection handle exclusively.
pub struct Session {
    pub id: String,
    pub owner_id: String,
    pub status: SessionStatus,
    /// Present only while `status == QrCodeReady`.
    pub pairing_code: Option<String>,
    /// Populated once `status == Connected`.
    pub phone_identifier: Option<String>,
    pub created_at: DateTime<Utc>,
    /// Set only when the session was recreated by the restore flow.
    pub restored_at: Option<DateTime<Utc>>,
    /// Updated whenever an inbound message is accepted for processing.
    pub last_activity_at: DateTime<Utc>,
    pub client: Arc<dyn ConnectionClient>,
    /// Event pump task, aborted on destroy.
    pub(crate) pump: Option<tokio::task::JoinHandle<()>>,
}

impl Session {
    /// Full serializable view of the record (everything but the handle).
    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            id: self.id.clone(),
            owner_id: self.owner_id.clone(),
            status: self.status,
            pairing_code: self.pairing_code.clone(),
            phone_identifier: self.phone_identifier.clone(),
            created_at: self.created_at,
            restored_at: self.restored_at,
            last_activity_at: self.last_activity_at,
        }
    }

    /// Durable subset saved to the persistence store.
    pub fn persisted(&self) -> PersistedSession {
        PersistedSession {
            id: self.id.clone(),
            owner_id: self.owner_id.clone(),
            phone_identifier: self.phone_identifier.clone(),
            created_at: self.created_at,
            restored_at: self.restored_at,
            last_activity_at: self.last_activity_at,
        }
    }

    fn overview(&self) -> SessionOverview {
        SessionOverview {
            id: self.id.clone(),
            owner_id: self.owner_id.clone(),
            status: self.status,
            last_activity_at: self.last_activity_at,
            phone_identifier: self.phone_identifier.clone(),
            created_at: self.created_at,
            restored_at: self.restored_at,
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Projections
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Full serializable projection of a session record.
#[derive(Debug, Clone, Serialize)]
pub struct SessionSnapshot {
    pub id: String,
    pub owner_id: String,
    pub status: SessionStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pairing_code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phone_identifier: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub restored_at: Option<DateTime<Utc>>,
    pub last_activity_at: DateTime<Utc>,
}

/// The durable projection written to the persistence store. Deliberately a
/// separate type from [`SessionSnapshot`] so transient fields (status,
/// pairing code) can never leak into the snapshot file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistedSession {
    pub id: String,
    pub owner_id: String,
    #[serde(default)]
    pub phone_identifier: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub restored_at: Option<DateTime<Utc>>,
    pub last_activity_at: DateTime<Utc>,
}

/// Status projection returned by the status query. For an unknown id every
/// field except `id` and `status` is absent.
#[derive(Debug, Clone, Serialize)]
pub struct SessionStatusView {
    pub id: String,
    pub status: SessionStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub owner_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_activity_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phone_identifier: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pairing_code: Option<String>,
}

impl SessionStatusView {
    fn not_found(id: &str) -> Self {
        Self {
            id: id.to_owned(),
            status: SessionStatus::NotFound,
            owner_id: None,
            last_activity_at: None,
            phone_identifier: None,
            pairing_code: None,
        }
    }
}

/// Summary row returned by the list query.
#[derive(Debug, Clone, Serialize)]
pub struct SessionOverview {
    pub id: String,
    pub owner_id: String,
    pub status: SessionStatus,
    pub last_activity_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phone_identifier: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub restored_at: Option<DateTime<Utc>>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Registry
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Thread-safe id-keyed map of session records.
pub struct SessionRegistry {
    sessions: RwLock<HashMap<String, Session>>,
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
        }
    }

    /// Insert a new record. Rejects a duplicate id without mutating state;
    /// the check and the insert happen under one write lock.
    pub fn insert_if_absent(&self, session: Session) -> Result<()> {
        let mut sessions = self.sessions.write();
        if sessions.contains_key(&session.id) {
            return Err(Error::DuplicateSession(session.id));
        }
        sessions.insert(session.id.clone(), session);
        Ok(())
    }

    /// Remove a record, returning it so the caller can abort its pump.
    pub fn remove(&self, id: &str) -> Option<Session> {
        self.sessions.write().remove(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.sessions.read().contains_key(id)
    }

    /// The connection handle for a session, if it exists.
    pub fn client(&self, id: &str) -> Option<Arc<dyn ConnectionClient>> {
        self.sessions.read().get(id).map(|s| s.client.clone())
    }

    /// Apply a mutation to a session under the write lock. Returns `None`
    /// when the session no longer exists.
    pub fn update<T>(&self, id: &str, f: impl FnOnce(&mut Session) -> T) -> Option<T> {
        self.sessions.write().get_mut(id).map(f)
    }

    /// Attach the event pump handle after the record has been inserted.
    pub(crate) fn set_pump(&self, id: &str, pump: tokio::task::JoinHandle<()>) {
        if let Some(session) = self.sessions.write().get_mut(id) {
            session.pump = Some(pump);
        } else {
            // Destroyed before the pump was registered; stop it.
            pump.abort();
        }
    }

    pub fn snapshot(&self, id: &str) -> Option<SessionSnapshot> {
        self.sessions.read().get(id).map(Session::snapshot)
    }

    pub fn status_view(&self, id: &str) -> SessionStatusView {
        match self.sessions.read().get(id) {
            Some(s) => SessionStatusView {
                id: s.id.clone(),
                status: s.status,
                owner_id: Some(s.owner_id.clone()),
                last_activity_at: Some(s.last_activity_at),
                phone_identifier: s.phone_identifier.clone(),
                pairing_code: s.pairing_code.clone(),
            },
            None => SessionStatusView::not_found(id),
        }
    }

    pub fn qr_code(&self, id: &str) -> Option<String> {
        self.sessions
            .read()
            .get(id)
            .and_then(|s| s.pairing_code.clone())
    }

    pub fn overviews(&self) -> Vec<SessionOverview> {
        self.sessions.read().values().map(Session::overview).collect()
    }

    /// Durable projection of every record, for the persistence store.
    pub fn persisted(&self) -> Vec<PersistedSession> {
        self.sessions.read().values().map(Session::persisted).collect()
    }

    pub fn ids(&self) -> Vec<String> {
        self.sessions.read().keys().cloned().collect()
    }

    pub fn ids_for_owner(&self, owner_id: &str) -> Vec<String> {
        self.sessions
            .read()
            .values()
            .filter(|s| s.owner_id == owner_id)
            .map(|s| s.id.clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.sessions.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.read().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    struct FakeClient;

    #[async_trait]
    impl ConnectionClient for FakeClient {
        async fn initialize(&self) -> Result<()> {
            Ok(())
        }
        async fn destroy(&self) -> Result<()> {
            Ok(())
        }
        fn identity(&self) -> Option<String> {
            None
        }
    }

    fn make_session(id: &str, owner_id: &str) -> Session {
        let now = Utc::now();
        Session {
            id: id.into(),
            owner_id: owner_id.into(),
            status: SessionStatus::Initializing,
            pairing_code: None,
            phone_identifier: None,
            created_at: now,
            restored_at: None,
            last_activity_at: now,
            client: Arc::new(FakeClient),
            pump: None,
        }
    }

    #[test]
    fn duplicate_insert_rejected() {
        let reg = SessionRegistry::new();
        reg.insert_if_absent(make_session("s1", "u1")).unwrap();
        let err = reg.insert_if_absent(make_session("s1", "u2")).unwrap_err();
        assert!(matches!(err, Error::DuplicateSession(id) if id == "s1"));
        assert_eq!(reg.len(), 1);
        // The original record was not touched.
        assert_eq!(reg.snapshot("s1").unwrap().owner_id, "u1");
    }

    #[test]
    fn status_view_for_missing_session() {
        let reg = SessionRegistry::new();
        let view = reg.status_view("ghost");
        assert_eq!(view.status, SessionStatus::NotFound);
        assert!(view.owner_id.is_none());
        assert!(view.pairing_code.is_none());
    }

    #[test]
    fn owner_filter() {
        let reg = SessionRegistry::new();
        reg.insert_if_absent(make_session("s1", "u1")).unwrap();
        reg.insert_if_absent(make_session("s2", "u2")).unwrap();
        reg.insert_if_absent(make_session("s3", "u1")).unwrap();

        let mut ids = reg.ids_for_owner("u1");
        ids.sort();
        assert_eq!(ids, vec!["s1", "s3"]);
        assert_eq!(reg.ids_for_owner("u3"), Vec::<String>::new());
    }

    #[test]
    fn remove_returns_record() {
        let reg = SessionRegistry::new();
        reg.insert_if_absent(make_session("s1", "u1")).unwrap();
        assert!(reg.remove("s1").is_some());
        assert!(reg.remove("s1").is_none());
        assert!(reg.is_empty());
    }

    #[test]
    fn update_on_missing_session_is_none() {
        let reg = SessionRegistry::new();
        let touched = reg.update("ghost", |s| s.status = SessionStatus::Connected);
        assert!(touched.is_none());
    }
}
