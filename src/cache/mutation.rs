//! Optimistic write path: snapshot, apply, send, then commit or roll back.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::layer::{CollectionCache, Ticket};
use super::traits::{Mutation, MutationOutcome, Record, RemoteWriter};
use crate::backend::types::Session;
use crate::error::{SyncError, SyncResult};

const TEMP_ID_PREFIX: &str = "temp-";

static TEMP_SEQ: AtomicU64 = AtomicU64::new(0);

/// Server ids never contain '-', so the prefix cannot collide with them.
pub fn is_temporary_id(id: &str) -> bool {
  id.starts_with(TEMP_ID_PREFIX)
}

fn next_temporary_id(now: DateTime<Utc>) -> String {
  let seq = TEMP_SEQ.fetch_add(1, Ordering::Relaxed);
  format!("{}{}-{}", TEMP_ID_PREFIX, now.timestamp_millis(), seq)
}

/// Local operations recorded against a record the server hasn't confirmed yet.
#[derive(Debug)]
struct PendingCreate<P> {
  deleted: bool,
  patch: Option<P>,
}

impl<P> Default for PendingCreate<P> {
  fn default() -> Self {
    Self {
      deleted: false,
      patch: None,
    }
  }
}

/// Bookkeeping for a temporary id.
///
/// A confirmed entry keeps routing writes that still carry the temporary id
/// (from a list shown before the swap) to the server id.
#[derive(Debug)]
enum TempRecord<P> {
  Unconfirmed(PendingCreate<P>),
  Confirmed(String),
}

/// What has to be sent after the local apply.
enum RemoteAction<T: Record> {
  Create { temp_id: String, draft: T::Draft },
  Update { id: String, patch: T::Patch },
  Delete { id: String },
  /// Targets an unconfirmed temporary id; folded into the pending create
  Local,
}

/// A cached collection that accepts optimistic writes.
pub struct OptimisticCollection<T: Record> {
  cache: CollectionCache<T>,
  writer: Arc<dyn RemoteWriter<T>>,
  temp_records: Arc<Mutex<HashMap<String, TempRecord<T::Patch>>>>,
}

impl<T: Record> OptimisticCollection<T> {
  pub fn new(cache: CollectionCache<T>, writer: Arc<dyn RemoteWriter<T>>) -> Self {
    Self {
      cache,
      writer,
      temp_records: Arc::new(Mutex::new(HashMap::new())),
    }
  }

  /// The read side of this collection.
  pub fn cache(&self) -> &CollectionCache<T> {
    &self.cache
  }

  fn temp_records(&self) -> MutexGuard<'_, HashMap<String, TempRecord<T::Patch>>> {
    self.temp_records.lock().unwrap_or_else(|e| e.into_inner())
  }

  /// Apply `mutation` to `scope` immediately, then reconcile with the server.
  ///
  /// Validation failures return before anything is applied. On a remote
  /// failure the scope is restored to the snapshot taken right before this
  /// write and the error is returned; nothing is retried.
  pub async fn mutate(&self, session: &Session, scope: &str, mutation: Mutation<T>) -> SyncResult<MutationOutcome<T>> {
    self.begin(scope, mutation)?.settle(session).await
  }

  /// Validate and apply locally; the returned write still has to be settled.
  fn begin(&self, scope: &str, mutation: Mutation<T>) -> SyncResult<PendingWrite<T>> {
    match &mutation {
      Mutation::Create(draft) => T::validate_draft(draft)?,
      Mutation::Update { patch, .. } => T::validate_patch(patch)?,
      Mutation::Delete { .. } => {}
    }

    let kind = mutation.kind();
    let now = Utc::now();
    let (ticket, action) = self
      .cache
      .begin_mutation(scope, |data| self.apply_local(data, mutation, scope, now));
    debug!(key = %ticket.key, kind, "applied optimistically");

    Ok(PendingWrite {
      collection: self.clone(),
      scope: scope.to_string(),
      kind,
      ticket,
      action,
    })
  }

  fn apply_local(&self, data: &mut Vec<T>, mutation: Mutation<T>, scope: &str, now: DateTime<Utc>) -> RemoteAction<T> {
    match mutation {
      Mutation::Create(draft) => {
        let temp_id = next_temporary_id(now);
        data.push(T::provisional(&draft, temp_id.clone(), scope, now));
        self
          .temp_records()
          .insert(temp_id.clone(), TempRecord::Unconfirmed(PendingCreate::default()));
        RemoteAction::Create { temp_id, draft }
      }
      Mutation::Update { id, patch } => {
        let remote_id = self.route(&id, |pending| match &mut pending.patch {
          Some(base) => T::merge_patch(base, &patch),
          None => pending.patch = Some(patch.clone()),
        });
        let server_id = remote_id.as_deref();
        for record in data
          .iter_mut()
          .filter(|r| r.cache_key() == id || Some(r.cache_key()) == server_id)
        {
          record.apply_patch(&patch, now);
        }
        match remote_id {
          Some(id) => RemoteAction::Update { id, patch },
          None => RemoteAction::Local,
        }
      }
      Mutation::Delete { id } => {
        let remote_id = self.route(&id, |pending| pending.deleted = true);
        let server_id = remote_id.as_deref();
        data.retain(|r| r.cache_key() != id && Some(r.cache_key()) != server_id);
        match remote_id {
          Some(id) => RemoteAction::Delete { id },
          None => RemoteAction::Local,
        }
      }
    }
  }

  /// The id a write against `id` must be sent to, or `None` when it stays
  /// local. Writes against an unconfirmed create are recorded by `fold`.
  fn route(&self, id: &str, fold: impl FnOnce(&mut PendingCreate<T::Patch>)) -> Option<String> {
    let mut temp_records = self.temp_records();
    match temp_records.get_mut(id) {
      Some(TempRecord::Unconfirmed(pending)) => {
        fold(pending);
        None
      }
      Some(TempRecord::Confirmed(server_id)) => Some(server_id.clone()),
      None if is_temporary_id(id) => None,
      None => Some(id.to_string()),
    }
  }

  async fn send(&self, session: &Session, scope: &str, action: RemoteAction<T>) -> SyncResult<MutationOutcome<T>> {
    match action {
      RemoteAction::Create { temp_id, draft } => {
        let created = self.writer.create(session, &draft).await?;
        let followup = self.confirm(scope, &temp_id, &created);
        Ok(self.replay(session, created, followup).await)
      }
      RemoteAction::Update { id, patch } => Ok(MutationOutcome::Updated(
        self.writer.update(session, &id, &patch).await?,
      )),
      RemoteAction::Delete { id } => {
        self.writer.delete(session, &id).await?;
        Ok(MutationOutcome::Deleted)
      }
      RemoteAction::Local => Ok(MutationOutcome::Deferred),
    }
  }

  /// Swap the provisional row for the server record and start routing the
  /// temporary id to the server id. Both happen under the cache lock, so no
  /// write can land between them. Returns what was recorded against the
  /// temporary id while the create was in flight.
  fn confirm(&self, scope: &str, temp_id: &str, created: &T) -> PendingCreate<T::Patch> {
    self.cache.with_rows(scope, |rows| {
      let mut temp_records = self.temp_records();
      let followup = match temp_records.remove(temp_id) {
        Some(TempRecord::Unconfirmed(pending)) => pending,
        _ => PendingCreate::default(),
      };
      if followup.deleted {
        return followup;
      }
      temp_records.insert(
        temp_id.to_string(),
        TempRecord::Confirmed(created.cache_key().to_string()),
      );

      if let Some(row) = rows.and_then(|rows| rows.iter_mut().find(|r| r.cache_key() == temp_id)) {
        let mut confirmed = created.clone();
        if let Some(patch) = &followup.patch {
          confirmed.apply_patch(patch, Utc::now());
        }
        *row = confirmed;
      }
      followup
    })
  }

  /// Forward operations made against the temporary id to the server id.
  ///
  /// The create itself succeeded, so a failure here is logged rather than
  /// rolled back; the reconciling refetch shows the server's state.
  async fn replay(&self, session: &Session, created: T, followup: PendingCreate<T::Patch>) -> MutationOutcome<T> {
    let id = created.cache_key().to_string();
    if followup.deleted {
      debug!(id = %id, "deleting record removed before its create settled");
      if let Err(err) = self.writer.delete(session, &id).await {
        warn!(id = %id, error = %err, "follow-up delete failed");
      }
      return MutationOutcome::Created(created);
    }
    if let Some(patch) = followup.patch {
      debug!(id = %id, "sending edits made before create settled");
      match self.writer.update(session, &id, &patch).await {
        Ok(updated) => return MutationOutcome::Created(updated),
        Err(err) => warn!(id = %id, error = %err, "follow-up update failed"),
      }
    }
    MutationOutcome::Created(created)
  }
}

impl<T: Record> Clone for OptimisticCollection<T> {
  fn clone(&self) -> Self {
    Self {
      cache: self.cache.clone(),
      writer: Arc::clone(&self.writer),
      temp_records: Arc::clone(&self.temp_records),
    }
  }
}

/// A write applied to the cache and not yet confirmed by the server.
struct PendingWrite<T: Record> {
  collection: OptimisticCollection<T>,
  scope: String,
  kind: &'static str,
  ticket: Ticket<T>,
  action: RemoteAction<T>,
}

impl<T: Record> PendingWrite<T> {
  async fn settle(self, session: &Session) -> SyncResult<MutationOutcome<T>> {
    let PendingWrite {
      collection,
      scope,
      kind,
      ticket,
      action,
    } = self;
    let temp_id = match &action {
      RemoteAction::Create { temp_id, .. } => Some(temp_id.clone()),
      _ => None,
    };

    match collection.send(session, &scope, action).await {
      Ok(outcome) => {
        info!(key = %ticket.key, kind, "write confirmed");
        if collection.cache.commit(ticket) {
          collection.cache.refetch(session, Some(&scope)).await;
        }
        Ok(outcome)
      }
      Err(err) => {
        warn!(key = %ticket.key, kind, error = %err, "write failed, rolling back");
        if let Some(temp_id) = temp_id {
          collection.temp_records().remove(&temp_id);
        }
        if collection.cache.rollback(ticket) {
          collection.cache.refetch(session, Some(&scope)).await;
        }
        Err(err)
      }
    }
  }
}

/// Consumer handle for one kind of write: `invoke`, `invoke_async`,
/// `is_in_flight`, `last_error`.
pub struct MutationHandle<T: Record> {
  collection: OptimisticCollection<T>,
  in_flight: Arc<AtomicUsize>,
  last_error: Arc<Mutex<Option<SyncError>>>,
}

struct InFlightGuard(Arc<AtomicUsize>);

impl Drop for InFlightGuard {
  fn drop(&mut self) {
    self.0.fetch_sub(1, Ordering::SeqCst);
  }
}

impl<T: Record> MutationHandle<T> {
  pub fn new(collection: OptimisticCollection<T>) -> Self {
    Self {
      collection,
      in_flight: Arc::new(AtomicUsize::new(0)),
      last_error: Arc::new(Mutex::new(None)),
    }
  }

  /// Run the write and wait for it to settle.
  pub async fn invoke_async(&self, session: &Session, scope: &str, mutation: Mutation<T>) -> SyncResult<MutationOutcome<T>> {
    let _guard = self.enter();
    let result = self.collection.mutate(session, scope, mutation).await;
    self.record(&result);
    result
  }

  /// Fire-and-forget. The local change is visible once this returns; the
  /// outcome lands in `last_error` and the cache.
  pub fn invoke(&self, session: Session, scope: String, mutation: Mutation<T>) -> JoinHandle<SyncResult<MutationOutcome<T>>> {
    let guard = self.enter();
    let begun = self.collection.begin(&scope, mutation);
    let this = self.clone();
    tokio::spawn(async move {
      let _guard = guard;
      let result = match begun {
        Ok(write) => write.settle(&session).await,
        Err(err) => Err(err),
      };
      this.record(&result);
      result
    })
  }

  fn enter(&self) -> InFlightGuard {
    self.in_flight.fetch_add(1, Ordering::SeqCst);
    self.set_last_error(None);
    InFlightGuard(Arc::clone(&self.in_flight))
  }

  fn record(&self, result: &SyncResult<MutationOutcome<T>>) {
    if let Err(err) = result {
      self.set_last_error(Some(err.clone()));
    }
  }

  pub fn is_in_flight(&self) -> bool {
    self.in_flight.load(Ordering::SeqCst) > 0
  }

  pub fn last_error(&self) -> Option<SyncError> {
    self.last_error.lock().unwrap_or_else(|e| e.into_inner()).clone()
  }

  fn set_last_error(&self, err: Option<SyncError>) {
    *self.last_error.lock().unwrap_or_else(|e| e.into_inner()) = err;
  }
}

impl<T: Record> Clone for MutationHandle<T> {
  fn clone(&self) -> Self {
    Self {
      collection: self.collection.clone(),
      in_flight: Arc::clone(&self.in_flight),
      last_error: Arc::clone(&self.last_error),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_temporary_ids_are_distinct_and_recognisable() {
    let now = Utc::now();
    let a = next_temporary_id(now);
    let b = next_temporary_id(now);
    assert_ne!(a, b);
    assert!(is_temporary_id(&a));
    assert!(!is_temporary_id("abc123def456ghi"));
  }
}
