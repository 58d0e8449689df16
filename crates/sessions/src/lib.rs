//! Session lifecycle supervision for chatwire.
//!
//! Owns the registry of live connections to the external messaging service:
//! creation with QR-style pairing, asynchronous state transitions driven by
//! client events, idempotent teardown with on-disk artifact cleanup,
//! crash-recovery restoration from a persisted snapshot, and periodic
//! autosave of the registry.

pub mod cleanup;
pub mod client;
pub mod manager;
pub mod notify;
pub mod registry;
pub mod store;

pub use cleanup::{AuthDirCleaner, ResourceCleaner};
pub use client::{
    ClientEvent, ClientFactory, ConnectionClient, EventStream, InboundMessage, MessageHandler,
    NoopHandler,
};
pub use manager::{
    BulkDestroyOutcome, CreateOptions, CreateOutcome, DestroyOutcome, RestoreOutcome,
    SessionManager,
};
pub use notify::{NotificationSink, NullNotifier, WebhookNotifier};
pub use registry::{
    PersistedSession, Session, SessionOverview, SessionRegistry, SessionSnapshot, SessionStatus,
    SessionStatusView,
};
pub use store::{JsonFileStore, PersistenceStore};
