//! Error taxonomy shared by the backend binding and the sync cache.

/// Errors surfaced by cache reads, mutations and the remote store.
///
/// `Clone` because a single in-flight fetch result is handed to every caller
/// that coalesced onto it.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SyncError {
  /// No current user; scoped fetches are disabled rather than failed.
  #[error("not logged in")]
  NotAuthenticated,

  /// An expected-absent lookup came back empty.
  #[error("{collection} record not found")]
  NotFound { collection: String },

  /// Network or server error on a remote call.
  #[error("remote request failed: {message}")]
  Remote {
    status: Option<u16>,
    message: String,
  },

  /// Input rejected before any remote call was made.
  #[error("invalid input: {0}")]
  Validation(String),

  /// Remote data violates an invariant the client relies on.
  #[error("data integrity error: {0}")]
  Integrity(String),

  /// A remote payload could not be decoded.
  #[error("failed to decode {what}: {message}")]
  Decode { what: String, message: String },
}

impl SyncError {
  pub fn remote(message: impl Into<String>) -> Self {
    Self::Remote {
      status: None,
      message: message.into(),
    }
  }

  pub fn not_found(collection: &str) -> Self {
    Self::NotFound {
      collection: collection.to_string(),
    }
  }

  pub fn decode(what: &str, err: impl std::fmt::Display) -> Self {
    Self::Decode {
      what: what.to_string(),
      message: err.to_string(),
    }
  }

  pub fn is_not_found(&self) -> bool {
    matches!(self, Self::NotFound { .. })
  }
}

impl From<reqwest::Error> for SyncError {
  fn from(err: reqwest::Error) -> Self {
    Self::Remote {
      status: err.status().map(|s| s.as_u16()),
      message: err.to_string(),
    }
  }
}

pub type SyncResult<T> = Result<T, SyncError>;
