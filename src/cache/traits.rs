//! Core traits and types for the sync cache.

use std::fmt;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::backend::types::Session;
use crate::error::{SyncError, SyncResult};

/// Trait for records that can be held in a cached collection.
pub trait Cacheable: Clone + fmt::Debug + PartialEq + Send + Sync + 'static {
  /// Identifier of this record within its collection (server or temporary id)
  fn cache_key(&self) -> &str;
}

/// Records that support optimistic local writes.
pub trait Record: Cacheable {
  /// Payload for a create
  type Draft: Clone + fmt::Debug + Send + Sync + 'static;
  /// Partial update; fields left unset are untouched
  type Patch: Clone + fmt::Debug + Default + Send + Sync + 'static;

  /// Build the provisional record shown until the server confirms a create.
  fn provisional(draft: &Self::Draft, id: String, scope: &str, now: DateTime<Utc>) -> Self;

  /// Apply a patch to the local copy.
  fn apply_patch(&mut self, patch: &Self::Patch, now: DateTime<Utc>);

  /// Fold `next` into `base` so later fields win.
  fn merge_patch(base: &mut Self::Patch, next: &Self::Patch);

  fn validate_draft(_draft: &Self::Draft) -> SyncResult<()> {
    Ok(())
  }

  fn validate_patch(_patch: &Self::Patch) -> SyncResult<()> {
    Ok(())
  }
}

/// Remote write side for a record type.
#[async_trait]
pub trait RemoteWriter<T: Record>: Send + Sync {
  async fn create(&self, session: &Session, draft: &T::Draft) -> SyncResult<T>;

  async fn update(&self, session: &Session, id: &str, patch: &T::Patch) -> SyncResult<T>;

  async fn delete(&self, session: &Session, id: &str) -> SyncResult<()>;
}

/// Identity of a cached query: logical collection plus scope.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct QueryKey {
  pub collection: &'static str,
  pub scope: String,
}

impl fmt::Display for QueryKey {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}:{}", self.collection, self.scope)
  }
}

/// Lifecycle of a cache entry as seen by readers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryStatus {
  /// No scope; nothing is fetched
  Disabled,
  /// Scoped, but never requested
  Idle,
  /// A fetch is in flight
  Loading,
  /// Snapshot is fresh
  Ready,
  /// Snapshot is aged or invalidated; the next read refetches
  Stale,
  /// Last fetch failed; `data` holds the last good snapshot
  Error,
  /// Local writes are applied and awaiting the server
  Optimistic,
  /// The last pending write failed and its snapshot was restored
  RolledBack,
}

/// What a reader sees for one `(collection, scope)`.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryResult<T> {
  pub data: Vec<T>,
  pub status: EntryStatus,
  pub error: Option<SyncError>,
  pub fetched_at: Option<DateTime<Utc>>,
  pub pending_mutations: usize,
}

impl<T> QueryResult<T> {
  pub fn disabled() -> Self {
    Self::empty(EntryStatus::Disabled)
  }

  pub fn idle() -> Self {
    Self::empty(EntryStatus::Idle)
  }

  fn empty(status: EntryStatus) -> Self {
    Self {
      data: Vec::new(),
      status,
      error: None,
      fetched_at: None,
      pending_mutations: 0,
    }
  }

  pub fn is_loading(&self) -> bool {
    self.status == EntryStatus::Loading
  }

  pub fn is_error(&self) -> bool {
    self.status == EntryStatus::Error
  }

  pub fn is_disabled(&self) -> bool {
    self.status == EntryStatus::Disabled
  }

  pub fn is_optimistic(&self) -> bool {
    self.pending_mutations > 0
  }
}

/// A write against one scope.
#[derive(Debug, Clone)]
pub enum Mutation<T: Record> {
  Create(T::Draft),
  Update { id: String, patch: T::Patch },
  Delete { id: String },
}

impl<T: Record> Mutation<T> {
  pub fn kind(&self) -> &'static str {
    match self {
      Self::Create(_) => "create",
      Self::Update { .. } => "update",
      Self::Delete { .. } => "delete",
    }
  }
}

/// Result of a settled mutation.
#[derive(Debug, Clone, PartialEq)]
pub enum MutationOutcome<T> {
  Created(T),
  Updated(T),
  Deleted,
  /// Applied locally against a record that only has a temporary id; it is
  /// sent once the pending create settles.
  Deferred,
}
