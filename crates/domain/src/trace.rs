use serde::Serialize;

/// Structured trace events emitted across all chatwire crates.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event")]
pub enum TraceEvent {
    SessionCreated {
        session_id: String,
        owner_id: String,
        restored: bool,
    },
    SessionStateChanged {
        session_id: String,
        from: String,
        to: String,
    },
    SessionDestroyed {
        session_id: String,
        existed: bool,
    },
    SessionsRestored {
        restored_count: usize,
    },
    SnapshotSaved {
        session_count: usize,
    },
    ConnectedNotified {
        session_id: String,
        phone_identifier: String,
    },
}

impl TraceEvent {
    pub fn emit(&self) {
        let json = serde_json::to_string(self).unwrap_or_default();
        tracing::info!(trace_event = %json, "cw_event");
    }
}
