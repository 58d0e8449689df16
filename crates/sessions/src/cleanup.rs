//! Removal of on-disk auth artifacts after a session is destroyed.

use std::path::{Path, PathBuf};

use async_trait::async_trait;

use cw_domain::error::Result;

/// Removes external resources tied to a session id. Failures are logged by
/// the caller and never abort a teardown.
#[async_trait]
pub trait ResourceCleaner: Send + Sync {
    async fn cleanup(&self, session_id: &str) -> Result<()>;
}

/// Default [`ResourceCleaner`] deleting `<auth_root>/session-<id>/`.
pub struct AuthDirCleaner {
    auth_root: PathBuf,
}

impl AuthDirCleaner {
    pub fn new(auth_root: &Path) -> Self {
        Self {
            auth_root: auth_root.to_path_buf(),
        }
    }

    fn session_dir(&self, session_id: &str) -> PathBuf {
        self.auth_root.join(format!("session-{session_id}"))
    }
}

#[async_trait]
impl ResourceCleaner for AuthDirCleaner {
    async fn cleanup(&self, session_id: &str) -> Result<()> {
        let dir = self.session_dir(session_id);
        match tokio::fs::remove_dir_all(&dir).await {
            Ok(()) => {
                tracing::info!(
                    session_id = %session_id,
                    path = %dir.display(),
                    "auth artifacts removed"
                );
                Ok(())
            }
            // Nothing on disk for this session — already clean.
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
