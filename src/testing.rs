//! Test doubles shared by the module tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{Duration, TimeZone, Utc};
use serde_json::{json, Value};
use tokio::sync::Notify;

use crate::backend::api_types::pb_datetime;
use crate::backend::filter::{Filter, ListQuery};
use crate::backend::store::RecordStore;
use crate::backend::types::{Session, User};
use crate::error::{SyncError, SyncResult};

pub fn session(user_id: &str) -> Session {
  Session {
    token: format!("token-{}", user_id),
    user: User {
      id: user_id.to_string(),
      email: format!("{}@example.com", user_id),
      name: None,
      username: None,
      verified: true,
    },
  }
}

/// Yield to other tasks until `cond` holds.
pub async fn wait_until(mut cond: impl FnMut() -> bool) {
  for _ in 0..1000 {
    if cond() {
      return;
    }
    tokio::task::yield_now().await;
  }
  panic!("condition not reached");
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Op {
  List,
  GetOne,
  GetFirst,
  Create,
  Update,
  Delete,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Call {
  pub op: Op,
  pub collection: String,
  pub id: Option<String>,
}

/// In-memory record store with a call log, failure injection and hold gates.
#[derive(Default)]
pub struct MemoryStore {
  collections: Mutex<HashMap<String, Vec<Value>>>,
  calls: Mutex<Vec<Call>>,
  failures: Mutex<HashMap<Op, usize>>,
  holds: Mutex<HashMap<Op, Arc<Notify>>>,
  clock: AtomicU64,
}

impl MemoryStore {
  pub fn new() -> Arc<Self> {
    Arc::new(Self::default())
  }

  fn tick(&self) -> (String, String) {
    let n = self.clock.fetch_add(1, Ordering::SeqCst) + 1;
    let base = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
    let at = base + Duration::seconds(n as i64);
    (format!("rec{:012}", n), pb_datetime::format(&at))
  }

  /// Seed a record, filling in server-assigned fields that are missing.
  pub fn insert(&self, collection: &str, mut record: Value) -> Value {
    let (id, now) = self.tick();
    if let Some(obj) = record.as_object_mut() {
      obj.entry("id").or_insert_with(|| json!(id));
      obj.entry("created").or_insert_with(|| json!(now));
      obj.entry("updated").or_insert_with(|| json!(now));
    }
    self
      .collections
      .lock()
      .unwrap()
      .entry(collection.to_string())
      .or_default()
      .push(record.clone());
    record
  }

  pub fn records(&self, collection: &str) -> Vec<Value> {
    self
      .collections
      .lock()
      .unwrap()
      .get(collection)
      .cloned()
      .unwrap_or_default()
  }

  pub fn calls(&self) -> Vec<Call> {
    self.calls.lock().unwrap().clone()
  }

  pub fn count(&self, op: Op, collection: &str) -> usize {
    self
      .calls()
      .iter()
      .filter(|c| c.op == op && c.collection == collection)
      .count()
  }

  /// Make the next `n` calls of `op` fail with a remote error.
  pub fn fail_next(&self, op: Op, n: usize) {
    *self.failures.lock().unwrap().entry(op).or_default() += n;
  }

  /// Park every call of `op` until the returned gate is notified once per call.
  pub fn hold(&self, op: Op) -> Arc<Notify> {
    let gate = Arc::new(Notify::new());
    self.holds.lock().unwrap().insert(op, gate.clone());
    gate
  }

  async fn enter(&self, op: Op, collection: &str, id: Option<&str>) -> SyncResult<()> {
    self.calls.lock().unwrap().push(Call {
      op,
      collection: collection.to_string(),
      id: id.map(String::from),
    });

    let gate = self.holds.lock().unwrap().get(&op).cloned();
    if let Some(gate) = gate {
      gate.notified().await;
    }

    let mut failures = self.failures.lock().unwrap();
    if let Some(n) = failures.get_mut(&op).filter(|n| **n > 0) {
      *n -= 1;
      return Err(SyncError::Remote {
        status: Some(500),
        message: "injected failure".to_string(),
      });
    }
    Ok(())
  }

  fn matching(&self, collection: &str, query: &ListQuery) -> Vec<Value> {
    let mut records: Vec<Value> = self
      .records(collection)
      .into_iter()
      .filter(|r| query.filter.as_ref().map(|f| f.matches(r)).unwrap_or(true))
      .collect();
    for sort in query.sort.iter().rev() {
      records.sort_by(|a, b| sort.compare(a, b));
    }
    records
  }
}

#[async_trait]
impl RecordStore for MemoryStore {
  async fn list(&self, _auth: &Session, collection: &str, query: &ListQuery) -> SyncResult<Vec<Value>> {
    self.enter(Op::List, collection, None).await?;
    Ok(self.matching(collection, query))
  }

  async fn get_one(&self, _auth: &Session, collection: &str, id: &str) -> SyncResult<Value> {
    self.enter(Op::GetOne, collection, Some(id)).await?;
    self
      .records(collection)
      .into_iter()
      .find(|r| r["id"] == id)
      .ok_or_else(|| SyncError::not_found(collection))
  }

  async fn get_first(&self, _auth: &Session, collection: &str, filter: &Filter) -> SyncResult<Value> {
    self.enter(Op::GetFirst, collection, None).await?;
    self
      .matching(collection, &ListQuery::filtered(filter.clone()))
      .into_iter()
      .next()
      .ok_or_else(|| SyncError::not_found(collection))
  }

  async fn create(&self, _auth: &Session, collection: &str, body: Value) -> SyncResult<Value> {
    self.enter(Op::Create, collection, None).await?;
    Ok(self.insert(collection, body))
  }

  async fn update(&self, _auth: &Session, collection: &str, id: &str, body: Value) -> SyncResult<Value> {
    self.enter(Op::Update, collection, Some(id)).await?;
    let (_, now) = self.tick();
    let mut collections = self.collections.lock().unwrap();
    let record = collections
      .get_mut(collection)
      .and_then(|records| records.iter_mut().find(|r| r["id"] == id))
      .ok_or_else(|| SyncError::not_found(collection))?;
    if let (Some(target), Some(fields)) = (record.as_object_mut(), body.as_object()) {
      for (k, v) in fields {
        target.insert(k.clone(), v.clone());
      }
      target.insert("updated".to_string(), json!(now));
    }
    Ok(record.clone())
  }

  async fn delete(&self, _auth: &Session, collection: &str, id: &str) -> SyncResult<()> {
    self.enter(Op::Delete, collection, Some(id)).await?;
    let mut collections = self.collections.lock().unwrap();
    let records = collections
      .get_mut(collection)
      .ok_or_else(|| SyncError::not_found(collection))?;
    let before = records.len();
    records.retain(|r| r["id"] != id);
    if records.len() == before {
      return Err(SyncError::not_found(collection));
    }
    Ok(())
  }
}
