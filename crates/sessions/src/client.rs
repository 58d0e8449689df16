//! The seam between the session supervisor and the messaging-service
//! connection library.
//!
//! The wire protocol itself is out of scope; a connector implements
//! [`ConnectionClient`] + [`ClientFactory`] and feeds [`ClientEvent`]s
//! through the channel returned at creation time. Events for one session
//! are consumed in emission order by that session's pump task.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use cw_domain::error::Result;

use crate::registry::SessionSnapshot;

/// Suffix marking group-style addressing in the messaging service's
/// sender identifiers (individual senders use `@c.us`).
const GROUP_SENDER_SUFFIX: &str = "@g.us";

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Events
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Lifecycle events emitted by a connection client.
#[derive(Debug, Clone)]
pub enum ClientEvent {
    /// A pairing code is ready for out-of-band display.
    PairingReady { code: String },
    /// The connection is fully established; the client's identity is
    /// readable from this point on.
    Ready,
    /// An inbound message arrived.
    Message(InboundMessage),
    /// The connection dropped. The session record stays in the registry
    /// until an explicit destroy.
    Disconnected,
}

/// One inbound message from the messaging service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InboundMessage {
    /// Raw sender identifier (e.g. `"33612345678@c.us"`).
    pub sender: String,
    pub body: String,
    pub timestamp: DateTime<Utc>,
}

impl InboundMessage {
    /// `true` when the sender identifier uses group-style addressing.
    /// Group-origin messages are dropped before they reach the handler.
    pub fn is_group_origin(&self) -> bool {
        self.sender.ends_with(GROUP_SENDER_SUFFIX)
    }
}

/// Receiving end of a client's event stream.
pub type EventStream = mpsc::Receiver<ClientEvent>;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Client capability set
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// One live connection to the messaging service.
///
/// The handle is exclusively owned by its session; the manager releases it
/// exactly once, via [`destroy`](Self::destroy), during teardown.
#[async_trait]
pub trait ConnectionClient: Send + Sync {
    /// Start the connection. Resolves once the underlying client has
    /// settled; pairing and readiness arrive later as events.
    async fn initialize(&self) -> Result<()>;

    /// Release the connection. Safe to call while initialization is still
    /// pending.
    async fn destroy(&self) -> Result<()>;

    /// Phone identity of the connected account. `None` until the client
    /// has emitted [`ClientEvent::Ready`].
    fn identity(&self) -> Option<String>;
}

/// Builds connection clients for new sessions.
pub trait ClientFactory: Send + Sync {
    /// Create a client for `session_id` together with its event stream.
    fn create(&self, session_id: &str) -> Result<(Arc<dyn ConnectionClient>, EventStream)>;
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Message handler
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Callback invoked for every accepted (individual-origin) inbound message.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    async fn on_message(&self, message: InboundMessage, session: SessionSnapshot);
}

/// Handler that drops every message. Used for sessions recreated by the
/// restore flow, where the embedding layer re-attaches its own handler later.
pub struct NoopHandler;

#[async_trait]
impl MessageHandler for NoopHandler {
    async fn on_message(&self, _message: InboundMessage, _session: SessionSnapshot) {}
}
