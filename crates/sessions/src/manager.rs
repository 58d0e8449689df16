//! The session lifecycle manager.
//!
//! Owns the [`SessionRegistry`] and drives every connection's lifecycle:
//! creation (sync or background initialization), event-driven state
//! transitions, idempotent teardown, crash-recovery restoration from the
//! persistence store, and the autosave loop. Collaborators (persistence,
//! artifact cleanup, connected notification, the connection library itself)
//! are trait objects injected at construction.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use parking_lot::Mutex;
use serde::Serialize;
use tokio::task::JoinHandle;

use cw_domain::config::Config;
use cw_domain::error::{Error, Result};
use cw_domain::trace::TraceEvent;

use crate::cleanup::{AuthDirCleaner, ResourceCleaner};
use crate::client::{
    ClientEvent, ClientFactory, ConnectionClient, EventStream, MessageHandler, NoopHandler,
};
use crate::notify::{NotificationSink, NullNotifier, WebhookNotifier};
use crate::registry::{
    Session, SessionOverview, SessionRegistry, SessionSnapshot, SessionStatus, SessionStatusView,
};
use crate::store::{JsonFileStore, PersistenceStore};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Operation outcomes
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Options for [`SessionManager::create_session`].
#[derive(Debug, Clone, Copy, Default)]
pub struct CreateOptions {
    /// When set, the call returns before `initialize()` settles;
    /// initialization failures surface only through later status queries.
    pub async_init: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct CreateOutcome {
    pub id: String,
    pub owner_id: String,
    pub status: SessionStatus,
    /// `true` when initialization was left running in the background.
    pub initializing: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct DestroyOutcome {
    pub id: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct BulkDestroyOutcome {
    pub destroyed: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RestoreOutcome {
    pub restored_count: usize,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Manager
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct SessionManager {
    registry: Arc<SessionRegistry>,
    factory: Arc<dyn ClientFactory>,
    store: Arc<dyn PersistenceStore>,
    cleaner: Arc<dyn ResourceCleaner>,
    notifier: Arc<dyn NotificationSink>,
    /// In-flight guard for the restoration flow. The one place where a true
    /// race would double-create sessions if unguarded.
    restoring: AtomicBool,
    autosave: Mutex<Option<JoinHandle<()>>>,
}

impl SessionManager {
    pub fn new(
        factory: Arc<dyn ClientFactory>,
        store: Arc<dyn PersistenceStore>,
        cleaner: Arc<dyn ResourceCleaner>,
        notifier: Arc<dyn NotificationSink>,
    ) -> Self {
        Self {
            registry: Arc::new(SessionRegistry::new()),
            factory,
            store,
            cleaner,
            notifier,
            restoring: AtomicBool::new(false),
            autosave: Mutex::new(None),
        }
    }

    /// Wire the default collaborators (JSON file store, auth-dir cleaner,
    /// webhook or null notifier) from config.
    pub fn from_config(config: &Config, factory: Arc<dyn ClientFactory>) -> Result<Self> {
        let store = Arc::new(JsonFileStore::new(&config.state.state_path)?);
        let cleaner = Arc::new(AuthDirCleaner::new(&config.state.auth_path));
        let notifier: Arc<dyn NotificationSink> = match WebhookNotifier::from_config(&config.notify)
        {
            Some(webhook) => Arc::new(webhook),
            None => Arc::new(NullNotifier),
        };
        Ok(Self::new(factory, store, cleaner, notifier))
    }

    // ── Creation ─────────────────────────────────────────────────────

    /// Create and start supervising a new session.
    ///
    /// With `async_init` unset the call waits for `initialize()`; on failure
    /// the half-initialized session is torn down before the error is
    /// returned, so the registry never retains it.
    pub async fn create_session(
        &self,
        id: &str,
        owner_id: &str,
        handler: Arc<dyn MessageHandler>,
        options: CreateOptions,
    ) -> Result<CreateOutcome> {
        self.create_session_inner(id, owner_id, handler, options.async_init, false)
            .await
    }

    async fn create_session_inner(
        &self,
        id: &str,
        owner_id: &str,
        handler: Arc<dyn MessageHandler>,
        async_init: bool,
        restored: bool,
    ) -> Result<CreateOutcome> {
        // Cheap duplicate check before touching the connection library; the
        // insert below re-checks under the write lock.
        if self.registry.contains(id) {
            return Err(Error::DuplicateSession(id.to_owned()));
        }

        let (client, events) = self.factory.create(id)?;

        let now = Utc::now();
        let session = Session {
            id: id.to_owned(),
            owner_id: owner_id.to_owned(),
            status: SessionStatus::Initializing,
            pairing_code: None,
            phone_identifier: None,
            created_at: now,
            restored_at: restored.then_some(now),
            last_activity_at: now,
            client: client.clone(),
            pump: None,
        };

        if let Err(e) = self.registry.insert_if_absent(session) {
            // Lost a creation race for the same id; release the handle we
            // just built and report the duplicate.
            tokio::spawn(async move {
                let _ = client.destroy().await;
            });
            return Err(e);
        }

        let pump = self.spawn_event_pump(id.to_owned(), owner_id.to_owned(), client.clone(), events, handler);
        self.registry.set_pump(id, pump);

        if async_init {
            let init_client = client;
            let session_id = id.to_owned();
            tokio::spawn(async move {
                if let Err(e) = init_client.initialize().await {
                    tracing::warn!(
                        session_id = %session_id,
                        error = %e,
                        "background initialization failed"
                    );
                }
            });
        } else if let Err(e) = client.initialize().await {
            tracing::warn!(session_id = %id, error = %e, "initialization failed, tearing down");
            self.force_destroy(id).await;
            return Err(Error::Init {
                session_id: id.to_owned(),
                message: e.to_string(),
            });
        }

        self.persist_best_effort().await;
        TraceEvent::SessionCreated {
            session_id: id.to_owned(),
            owner_id: owner_id.to_owned(),
            restored,
        }
        .emit();

        Ok(CreateOutcome {
            id: id.to_owned(),
            owner_id: owner_id.to_owned(),
            status: SessionStatus::Initializing,
            initializing: async_init,
        })
    }

    // ── Event wiring ─────────────────────────────────────────────────

    /// One pump task per session: consumes the client's event stream in
    /// emission order and applies state transitions. Exits when the stream
    /// closes or the session disappears from the registry.
    fn spawn_event_pump(
        &self,
        id: String,
        owner_id: String,
        client: Arc<dyn ConnectionClient>,
        mut events: EventStream,
        handler: Arc<dyn MessageHandler>,
    ) -> JoinHandle<()> {
        let registry = self.registry.clone();
        let notifier = self.notifier.clone();

        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                match event {
                    ClientEvent::PairingReady { code } => {
                        let from = registry.update(&id, |s| {
                            let from = s.status;
                            s.status = SessionStatus::QrCodeReady;
                            s.pairing_code = Some(code.clone());
                            s.phone_identifier = None;
                            from
                        });
                        let Some(from) = from else { break };
                        tracing::info!(session_id = %id, "pairing code ready");
                        emit_state_change(&id, from, SessionStatus::QrCodeReady);
                    }
                    ClientEvent::Ready => {
                        let identity = client.identity();
                        let from = registry.update(&id, |s| {
                            let from = s.status;
                            s.status = SessionStatus::Connected;
                            s.pairing_code = None;
                            s.phone_identifier = identity.clone();
                            from
                        });
                        let Some(from) = from else { break };
                        tracing::info!(
                            session_id = %id,
                            phone_identifier = identity.as_deref().unwrap_or(""),
                            "session connected"
                        );
                        emit_state_change(&id, from, SessionStatus::Connected);

                        // Best-effort detached notification; failures are
                        // logged with session context, never joined.
                        if let (Some(phone), Some(snapshot)) =
                            (identity, registry.snapshot(&id))
                        {
                            let notifier = notifier.clone();
                            let session_id = id.clone();
                            let owner = owner_id.clone();
                            tokio::spawn(async move {
                                match notifier
                                    .notify_connected(&session_id, &phone, &snapshot)
                                    .await
                                {
                                    Ok(()) => TraceEvent::ConnectedNotified {
                                        session_id,
                                        phone_identifier: phone,
                                    }
                                    .emit(),
                                    Err(e) => tracing::warn!(
                                        session_id = %session_id,
                                        owner_id = %owner,
                                        error = %e,
                                        "connected notification failed"
                                    ),
                                }
                            });
                        }
                    }
                    ClientEvent::Message(message) => {
                        if message.is_group_origin() {
                            tracing::debug!(
                                session_id = %id,
                                sender = %message.sender,
                                "dropping group-origin message"
                            );
                            continue;
                        }
                        let snapshot = registry.update(&id, |s| {
                            s.last_activity_at = Utc::now();
                            s.snapshot()
                        });
                        let Some(snapshot) = snapshot else { break };
                        handler.on_message(message, snapshot).await;
                    }
                    ClientEvent::Disconnected => {
                        let from = registry.update(&id, |s| {
                            let from = s.status;
                            s.status = SessionStatus::Disconnected;
                            from
                        });
                        let Some(from) = from else { break };
                        tracing::warn!(session_id = %id, "session disconnected");
                        emit_state_change(&id, from, SessionStatus::Disconnected);
                    }
                }
            }
        })
    }

    // ── Destruction ──────────────────────────────────────────────────

    /// Idempotent, best-effort teardown. Never fails from the caller's
    /// perspective: a missing session and a destroyed session are
    /// observationally equivalent.
    pub async fn force_destroy(&self, id: &str) -> DestroyOutcome {
        // Release the handle before removing the record; a failure here must
        // not abort the rest of the teardown.
        let client = self.registry.client(id);
        let existed = client.is_some();
        if let Some(client) = client {
            if let Err(e) = client.destroy().await {
                tracing::warn!(session_id = %id, error = %e, "connection teardown failed");
            }
        }

        if let Some(session) = self.registry.remove(id) {
            if let Some(pump) = session.pump {
                pump.abort();
            }
        }

        if existed {
            if let Err(e) = self.cleaner.cleanup(id).await {
                tracing::warn!(session_id = %id, error = %e, "auth artifact cleanup failed");
            }
            self.persist_best_effort().await;
        }

        TraceEvent::SessionDestroyed {
            session_id: id.to_owned(),
            existed,
        }
        .emit();

        DestroyOutcome { id: id.to_owned() }
    }

    /// Destroy every session belonging to `owner_id`.
    pub async fn destroy_all_user_sessions(&self, owner_id: &str) -> BulkDestroyOutcome {
        self.destroy_each(self.registry.ids_for_owner(owner_id)).await
    }

    /// Destroy every session.
    pub async fn destroy_all_sessions(&self) -> BulkDestroyOutcome {
        self.destroy_each(self.registry.ids()).await
    }

    async fn destroy_each(&self, ids: Vec<String>) -> BulkDestroyOutcome {
        let mut destroyed = Vec::with_capacity(ids.len());
        for id in ids {
            self.force_destroy(&id).await;
            destroyed.push(id);
        }
        BulkDestroyOutcome { destroyed }
    }

    // ── Restoration ──────────────────────────────────────────────────

    /// Recreate sessions from the persisted snapshot. Intended to run once
    /// at process start; a concurrent call fails fast without touching the
    /// registry or the store.
    pub async fn restore_sessions_from_persistence(&self) -> Result<RestoreOutcome> {
        if self
            .restoring
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(Error::RestoreInProgress);
        }

        let result = self.restore_inner().await;
        self.restoring.store(false, Ordering::SeqCst);
        result
    }

    async fn restore_inner(&self) -> Result<RestoreOutcome> {
        let saved = match self.store.load().await {
            Ok(saved) => saved,
            // Absence of saved state is not an error.
            Err(e) => {
                tracing::warn!(error = %e, "could not load persisted sessions, starting empty");
                return Ok(RestoreOutcome { restored_count: 0 });
            }
        };

        if saved.is_empty() {
            tracing::info!("no persisted sessions to restore");
            return Ok(RestoreOutcome { restored_count: 0 });
        }

        let mut restored_count = 0usize;
        for record in saved {
            // Counted per record: with background initialization, creation
            // failures surface later through status queries, not here.
            restored_count += 1;
            if let Err(e) = self
                .create_session_inner(&record.id, &record.owner_id, Arc::new(NoopHandler), true, true)
                .await
            {
                tracing::warn!(
                    session_id = %record.id,
                    owner_id = %record.owner_id,
                    error = %e,
                    "failed to recreate persisted session"
                );
            }
        }

        TraceEvent::SessionsRestored { restored_count }.emit();
        Ok(RestoreOutcome { restored_count })
    }

    // ── Persistence & autosave ───────────────────────────────────────

    /// Write the current registry snapshot to the persistence store.
    pub async fn save_active_sessions(&self) -> Result<usize> {
        let snapshot = self.registry.persisted();
        let count = self.store.save(&snapshot).await?;
        TraceEvent::SnapshotSaved {
            session_count: count,
        }
        .emit();
        Ok(count)
    }

    async fn persist_best_effort(&self) {
        if let Err(e) = self.save_active_sessions().await {
            tracing::warn!(error = %e, "failed to persist session snapshot");
        }
    }

    /// Start the periodic snapshot task. Starting while already running
    /// replaces the previous schedule.
    pub fn start_autosave(&self, interval_minutes: u64) {
        let mut slot = self.autosave.lock();
        if let Some(previous) = slot.take() {
            previous.abort();
        }

        let registry = self.registry.clone();
        let store = self.store.clone();
        let handle = tokio::spawn(async move {
            let mut ticker =
                tokio::time::interval(Duration::from_secs(interval_minutes.max(1) * 60));
            // The first tick completes immediately; the first save should
            // wait a full period.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let snapshot = registry.persisted();
                match store.save(&snapshot).await {
                    Ok(count) => TraceEvent::SnapshotSaved {
                        session_count: count,
                    }
                    .emit(),
                    Err(e) => tracing::warn!(error = %e, "autosave failed"),
                }
            }
        });

        *slot = Some(handle);
        tracing::info!(interval_minutes, "autosave started");
    }

    /// Stop the autosave task. No-op when not running.
    pub fn stop_autosave(&self) {
        if let Some(handle) = self.autosave.lock().take() {
            handle.abort();
            tracing::info!("autosave stopped");
        }
    }

    pub fn autosave_running(&self) -> bool {
        self.autosave.lock().is_some()
    }

    // ── Query surface ────────────────────────────────────────────────

    pub fn get_session(&self, id: &str) -> Option<SessionSnapshot> {
        self.registry.snapshot(id)
    }

    pub fn get_session_status(&self, id: &str) -> SessionStatusView {
        self.registry.status_view(id)
    }

    pub fn get_qr_code(&self, id: &str) -> Option<String> {
        self.registry.qr_code(id)
    }

    pub fn get_all_sessions(&self) -> Vec<SessionOverview> {
        self.registry.overviews()
    }

    pub fn session_count(&self) -> usize {
        self.registry.len()
    }
}

impl Drop for SessionManager {
    fn drop(&mut self) {
        if let Some(handle) = self.autosave.lock().take() {
            handle.abort();
        }
    }
}

fn emit_state_change(session_id: &str, from: SessionStatus, to: SessionStatus) {
    TraceEvent::SessionStateChanged {
        session_id: session_id.to_owned(),
        from: from.to_string(),
        to: to.to_string(),
    }
    .emit();
}
