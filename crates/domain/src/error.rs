/// Shared error type used across all chatwire crates.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("IO: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("session already exists: {0}")]
    DuplicateSession(String),

    #[error("session {session_id} failed to initialize: {message}")]
    Init {
        session_id: String,
        message: String,
    },

    #[error("restoration already in progress")]
    RestoreInProgress,

    #[error("connection client: {0}")]
    Client(String),

    #[error("persistence: {0}")]
    Persistence(String),

    #[error("notify: {0}")]
    Notify(String),

    #[error("config: {0}")]
    Config(String),

    #[error("{0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, Error>;
