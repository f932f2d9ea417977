//! Seams between the sync cache and the hosted backend.

use async_trait::async_trait;
use serde_json::Value;

use crate::error::SyncResult;

use super::filter::{Filter, ListQuery};
use super::types::Session;

/// Remote collection store.
///
/// Records cross this boundary as raw JSON so one store serves every
/// collection; typed decoding happens in the callers.
#[async_trait]
pub trait RecordStore: Send + Sync {
  /// Every record matching the query (all pages).
  async fn list(&self, auth: &Session, collection: &str, query: &ListQuery) -> SyncResult<Vec<Value>>;

  async fn get_one(&self, auth: &Session, collection: &str, id: &str) -> SyncResult<Value>;

  /// First record matching `filter`, or `SyncError::NotFound`.
  async fn get_first(&self, auth: &Session, collection: &str, filter: &Filter) -> SyncResult<Value>;

  async fn create(&self, auth: &Session, collection: &str, body: Value) -> SyncResult<Value>;

  async fn update(&self, auth: &Session, collection: &str, id: &str, body: Value) -> SyncResult<Value>;

  async fn delete(&self, auth: &Session, collection: &str, id: &str) -> SyncResult<()>;
}

/// Session/identity provider. Logout is local and lives with the session store.
#[async_trait]
pub trait IdentityProvider: Send + Sync {
  async fn login(&self, email: &str, password: &str) -> SyncResult<Session>;

  async fn register(&self, email: &str, password: &str, confirmation: &str) -> SyncResult<Session>;
}
