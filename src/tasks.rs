//! The signed-in user's own task list: cached reads plus optimistic writes.

use std::sync::Arc;

use async_trait::async_trait;
use futures::FutureExt;
use serde_json::Value;

use crate::backend::api_types::{decode_record, encode_body};
use crate::backend::cache::TASKS;
use crate::backend::filter::{Filter, ListQuery, Sort};
use crate::backend::store::RecordStore;
use crate::backend::types::{Session, Task, TaskDraft, TaskPatch};
use crate::cache::{
  CacheSettings, CollectionCache, Loader, Mutation, MutationHandle, MutationOutcome,
  OptimisticCollection, QueryResult, RemoteWriter,
};
use crate::error::{SyncError, SyncResult};

/// Loads every task owned by the scope user, in `sort` order.
pub fn owner_loader(store: Arc<dyn RecordStore>, sort: Sort) -> Loader<Task> {
  Arc::new(move |session: Session, owner: String| {
    let query = ListQuery::filtered(Filter::eq("owner", &owner)).sorted_by(sort.clone());
    list_tasks(Arc::clone(&store), session, query).boxed()
  })
}

async fn list_tasks(store: Arc<dyn RecordStore>, session: Session, query: ListQuery) -> SyncResult<Vec<Task>> {
  store
    .list(&session, TASKS, &query)
    .await?
    .into_iter()
    .map(|record| decode_record(TASKS, record))
    .collect()
}

/// Sends task writes to the record store.
struct TaskWriter {
  store: Arc<dyn RecordStore>,
}

#[async_trait]
impl RemoteWriter<Task> for TaskWriter {
  async fn create(&self, session: &Session, draft: &TaskDraft) -> SyncResult<Task> {
    let mut body = encode_body(TASKS, draft)?;
    if let Value::Object(fields) = &mut body {
      fields.insert("owner".to_string(), Value::String(session.user_id().to_string()));
    }
    let record = self.store.create(session, TASKS, body).await?;
    decode_record(TASKS, record)
  }

  async fn update(&self, session: &Session, id: &str, patch: &TaskPatch) -> SyncResult<Task> {
    let body = encode_body(TASKS, patch)?;
    let record = self.store.update(session, TASKS, id, body).await?;
    decode_record(TASKS, record)
  }

  async fn delete(&self, session: &Session, id: &str) -> SyncResult<()> {
    self.store.delete(session, TASKS, id).await
  }
}

/// Accessor for the current user's tasks.
///
/// Reads are scoped by the session's user id; with no session every read is
/// disabled. Each write kind has its own handle so callers can watch
/// `is_in_flight` / `last_error` per kind.
#[derive(Clone)]
pub struct Tasks {
  collection: OptimisticCollection<Task>,
  create: MutationHandle<Task>,
  update: MutationHandle<Task>,
  delete: MutationHandle<Task>,
}

impl Tasks {
  pub fn new(store: Arc<dyn RecordStore>, settings: CacheSettings) -> Self {
    let cache = CollectionCache::new(
      TASKS,
      owner_loader(Arc::clone(&store), Sort::asc("created")),
      settings,
    );
    let collection = OptimisticCollection::new(cache, Arc::new(TaskWriter { store }));

    Self {
      create: MutationHandle::new(collection.clone()),
      update: MutationHandle::new(collection.clone()),
      delete: MutationHandle::new(collection.clone()),
      collection,
    }
  }

  fn scope(session: Option<&Session>) -> Option<&str> {
    session.map(Session::user_id)
  }

  pub async fn fetch(&self, session: Option<&Session>) -> QueryResult<Task> {
    match session {
      Some(s) => self.collection.cache().fetch(s, Some(s.user_id())).await,
      None => QueryResult::disabled(),
    }
  }

  pub async fn refetch(&self, session: Option<&Session>) -> QueryResult<Task> {
    match session {
      Some(s) => self.collection.cache().refetch(s, Some(s.user_id())).await,
      None => QueryResult::disabled(),
    }
  }

  /// Current snapshot, optimistic writes included.
  pub fn read(&self, session: Option<&Session>) -> QueryResult<Task> {
    self.collection.cache().read(Self::scope(session))
  }

  pub fn teardown(&self, session: &Session) {
    self.collection.cache().teardown(session.user_id());
  }

  pub fn creates(&self) -> &MutationHandle<Task> {
    &self.create
  }

  pub fn updates(&self) -> &MutationHandle<Task> {
    &self.update
  }

  pub fn deletes(&self) -> &MutationHandle<Task> {
    &self.delete
  }

  pub fn is_mutating(&self) -> bool {
    self.create.is_in_flight() || self.update.is_in_flight() || self.delete.is_in_flight()
  }

  pub async fn add(&self, session: &Session, description: &str) -> SyncResult<MutationOutcome<Task>> {
    let mutation = Mutation::Create(TaskDraft::new(description));
    self.create.invoke_async(session, session.user_id(), mutation).await
  }

  pub async fn edit(&self, session: &Session, id: &str, description: &str) -> SyncResult<MutationOutcome<Task>> {
    let mutation = Mutation::Update {
      id: id.to_string(),
      patch: TaskPatch::describe(description),
    };
    self.update.invoke_async(session, session.user_id(), mutation).await
  }

  /// Flip completion of the task as currently cached.
  pub async fn toggle(&self, session: &Session, id: &str) -> SyncResult<MutationOutcome<Task>> {
    let mutation = self.toggle_mutation(session, id)?;
    self.update.invoke_async(session, session.user_id(), mutation).await
  }

  pub async fn remove(&self, session: &Session, id: &str) -> SyncResult<MutationOutcome<Task>> {
    let mutation = Mutation::Delete { id: id.to_string() };
    self.delete.invoke_async(session, session.user_id(), mutation).await
  }

  pub fn toggle_mutation(&self, session: &Session, id: &str) -> SyncResult<Mutation<Task>> {
    let current = self
      .read(Some(session))
      .data
      .into_iter()
      .find(|t| t.id == id)
      .ok_or_else(|| SyncError::not_found(TASKS))?;
    Ok(Mutation::Update {
      id: id.to_string(),
      patch: TaskPatch::complete(!current.completed),
    })
  }
}
