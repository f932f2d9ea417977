//! Persisted sign-in, one file per backend.

use color_eyre::{eyre::eyre, Result};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::backend::types::Session;

pub struct SessionStore {
  path: PathBuf,
}

impl SessionStore {
  /// Session file for `backend_url` under the platform data directory.
  pub fn open(backend_url: &str) -> Result<Self> {
    let data_dir = dirs::data_dir().ok_or_else(|| eyre!("Could not determine data directory"))?;
    Ok(Self::in_dir(&data_dir.join("duet"), backend_url))
  }

  pub fn in_dir(dir: &Path, backend_url: &str) -> Self {
    Self {
      path: dir.join(format!("session-{}.json", Self::backend_digest(backend_url))),
    }
  }

  /// Short stable digest of the normalized backend url
  fn backend_digest(backend_url: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(backend_url.trim().trim_end_matches('/').as_bytes());
    let digest = hex::encode(hasher.finalize());
    digest[..16].to_string()
  }

  pub fn path(&self) -> &Path {
    &self.path
  }

  /// The stored session, or `None` if there is none or it cannot be read.
  pub fn load(&self) -> Option<Session> {
    let contents = std::fs::read_to_string(&self.path).ok()?;
    match serde_json::from_str(&contents) {
      Ok(session) => Some(session),
      Err(e) => {
        warn!("Ignoring unreadable session file {}: {}", self.path.display(), e);
        None
      }
    }
  }

  pub fn save(&self, session: &Session) -> Result<()> {
    if let Some(parent) = self.path.parent() {
      std::fs::create_dir_all(parent)
        .map_err(|e| eyre!("Failed to create {}: {}", parent.display(), e))?;
    }
    let contents = serde_json::to_string_pretty(session)?;
    std::fs::write(&self.path, contents)
      .map_err(|e| eyre!("Failed to write session file {}: {}", self.path.display(), e))?;
    debug!("Saved session for {}", session.user.email);
    Ok(())
  }

  /// Forget the stored session. Missing file is not an error.
  pub fn clear(&self) -> Result<()> {
    match std::fs::remove_file(&self.path) {
      Ok(()) => Ok(()),
      Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
      Err(e) => Err(eyre!(
        "Failed to remove session file {}: {}",
        self.path.display(),
        e
      )),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::testing::session;

  #[test]
  fn test_save_load_clear() {
    let dir = tempfile::tempdir().unwrap();
    let store = SessionStore::in_dir(dir.path(), "http://127.0.0.1:8090");
    assert_eq!(store.load(), None);

    store.save(&session("u1")).unwrap();
    assert_eq!(store.load(), Some(session("u1")));

    store.clear().unwrap();
    assert_eq!(store.load(), None);
    store.clear().unwrap();
  }

  #[test]
  fn test_backends_do_not_share_a_file() {
    let dir = tempfile::tempdir().unwrap();
    let a = SessionStore::in_dir(dir.path(), "http://a.example.com");
    let b = SessionStore::in_dir(dir.path(), "http://b.example.com");
    let a_slash = SessionStore::in_dir(dir.path(), "http://a.example.com/");

    assert_ne!(a.path(), b.path());
    assert_eq!(a.path(), a_slash.path());
  }

  #[test]
  fn test_corrupt_file_reads_as_signed_out() {
    let dir = tempfile::tempdir().unwrap();
    let store = SessionStore::in_dir(dir.path(), "http://a.example.com");
    std::fs::write(store.path(), "{not json").unwrap();
    assert_eq!(store.load(), None);
  }
}
