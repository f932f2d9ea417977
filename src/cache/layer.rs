//! Cache layer that owns per-scope snapshots and orchestrates fetching.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Duration, Utc};
use futures::future::{BoxFuture, FutureExt, Shared};
use tracing::{debug, warn};

use super::traits::{Cacheable, EntryStatus, QueryKey, QueryResult};
use crate::backend::types::Session;
use crate::error::{SyncError, SyncResult};

/// Loads the full snapshot for one scope.
pub type Loader<T> = Arc<dyn Fn(Session, String) -> BoxFuture<'static, SyncResult<Vec<T>>> + Send + Sync>;

type SharedFetch<T> = Shared<BoxFuture<'static, SyncResult<Vec<T>>>>;

/// Freshness and retry policy for a cache.
#[derive(Debug, Clone, Copy)]
pub struct CacheSettings {
  /// How long before a loaded snapshot is considered stale
  pub stale_time: Duration,
  /// Automatic retries for a failing fetch (mutations never retry)
  pub retries: u32,
}

impl Default for CacheSettings {
  fn default() -> Self {
    Self {
      stale_time: Duration::minutes(5),
      retries: 1,
    }
  }
}

struct InFlight<T> {
  seq: u64,
  fetch: SharedFetch<T>,
}

struct Entry<T> {
  /// Unique per entry lifetime, so results for a torn-down entry are dropped
  id: u64,
  data: Vec<T>,
  status: EntryStatus,
  error: Option<SyncError>,
  fetched_at: Option<DateTime<Utc>>,
  invalidated: bool,
  pending_mutations: usize,
  /// A commit skipped its refetch because other writes were still pending
  refetch_owed: bool,
  inflight: Option<InFlight<T>>,
}

impl<T: Cacheable> Entry<T> {
  fn new(id: u64) -> Self {
    Self {
      id,
      data: Vec::new(),
      status: EntryStatus::Idle,
      error: None,
      fetched_at: None,
      invalidated: false,
      pending_mutations: 0,
      refetch_owed: false,
      inflight: None,
    }
  }

  fn is_fresh(&self, stale_time: Duration) -> bool {
    self.status == EntryStatus::Ready
      && !self.invalidated
      && self
        .fetched_at
        .map(|at| Utc::now() - at <= stale_time)
        .unwrap_or(false)
  }

  fn view(&self, stale_time: Duration) -> QueryResult<T> {
    let status = match self.status {
      EntryStatus::Ready if !self.is_fresh(stale_time) => EntryStatus::Stale,
      other => other,
    };
    QueryResult {
      data: self.data.clone(),
      status,
      error: self.error.clone(),
      fetched_at: self.fetched_at,
      pending_mutations: self.pending_mutations,
    }
  }

  fn settle_fetch(&mut self, seq: u64, result: SyncResult<Vec<T>>) {
    match &self.inflight {
      Some(inflight) if inflight.seq == seq => {}
      // Replaced by a refetch or cancelled by a mutation
      _ => return,
    }
    self.inflight = None;

    match result {
      Ok(data) => {
        self.data = data;
        self.status = EntryStatus::Ready;
        self.error = None;
        self.fetched_at = Some(Utc::now());
        self.invalidated = false;
        self.refetch_owed = false;
      }
      Err(err) => {
        self.status = EntryStatus::Error;
        self.error = Some(err);
      }
    }
  }
}

struct CacheState<T> {
  entries: HashMap<QueryKey, Entry<T>>,
  next_id: u64,
  next_seq: u64,
}

impl<T: Cacheable> CacheState<T> {
  fn entry(&mut self, key: &QueryKey) -> &mut Entry<T> {
    let next_id = &mut self.next_id;
    self.entries.entry(key.clone()).or_insert_with(|| {
      *next_id += 1;
      Entry::new(*next_id)
    })
  }
}

/// A fetch the caller must await and then settle.
struct PendingFetch<T> {
  entry_id: u64,
  seq: u64,
  fetch: SharedFetch<T>,
}

/// Snapshot taken immediately before a write was applied.
pub(super) struct Ticket<T> {
  pub(super) key: QueryKey,
  entry_id: u64,
  snapshot: Vec<T>,
}

/// Client-side cache for one logical collection, keyed by scope.
///
/// The cache is the only writer of its snapshots. The lock is held only for
/// synchronous bookkeeping and never across a remote call.
pub struct CollectionCache<T: Cacheable> {
  name: &'static str,
  loader: Loader<T>,
  settings: CacheSettings,
  state: Arc<Mutex<CacheState<T>>>,
}

impl<T: Cacheable> CollectionCache<T> {
  pub fn new(name: &'static str, loader: Loader<T>, settings: CacheSettings) -> Self {
    Self {
      name,
      loader,
      settings,
      state: Arc::new(Mutex::new(CacheState {
        entries: HashMap::new(),
        next_id: 0,
        next_seq: 0,
      })),
    }
  }

  pub fn key(&self, scope: &str) -> QueryKey {
    QueryKey {
      collection: self.name,
      scope: scope.to_string(),
    }
  }

  fn lock(&self) -> MutexGuard<'_, CacheState<T>> {
    // Entries are only mutated under short synchronous sections, so a
    // poisoned lock still guards a consistent map.
    self.state.lock().unwrap_or_else(|e| e.into_inner())
  }

  /// Current view without touching the network.
  pub fn read(&self, scope: Option<&str>) -> QueryResult<T> {
    let Some(scope) = scope else {
      return QueryResult::disabled();
    };
    let state = self.lock();
    match state.entries.get(&self.key(scope)) {
      Some(entry) => entry.view(self.settings.stale_time),
      None => QueryResult::idle(),
    }
  }

  /// Cache-first read.
  ///
  /// 1. No scope: disabled, nothing is fetched
  /// 2. Writes pending: serve the optimistic snapshot
  /// 3. Fresh snapshot: serve it
  /// 4. Otherwise join the in-flight fetch or start one
  pub async fn fetch(&self, session: &Session, scope: Option<&str>) -> QueryResult<T> {
    let Some(scope) = scope else {
      return QueryResult::disabled();
    };
    let key = self.key(scope);

    let pending = {
      let mut state = self.lock();
      let entry = state.entry(&key);
      if entry.pending_mutations > 0 {
        debug!(key = %key, "serving optimistic snapshot");
        return entry.view(self.settings.stale_time);
      }
      if entry.is_fresh(self.settings.stale_time) {
        debug!(key = %key, "cache hit");
        return entry.view(self.settings.stale_time);
      }
      self.join_or_start(&mut state, &key, session, false)
    };

    self.complete(&key, pending).await
  }

  /// Re-issue the fetch regardless of freshness (manual retry).
  ///
  /// While writes are pending the scope is only invalidated; the last write to
  /// settle performs the refetch.
  pub async fn refetch(&self, session: &Session, scope: Option<&str>) -> QueryResult<T> {
    let Some(scope) = scope else {
      return QueryResult::disabled();
    };
    let key = self.key(scope);

    let pending = {
      let mut state = self.lock();
      let entry = state.entry(&key);
      if entry.pending_mutations > 0 {
        entry.invalidated = true;
        entry.refetch_owed = true;
        return entry.view(self.settings.stale_time);
      }
      self.join_or_start(&mut state, &key, session, true)
    };

    self.complete(&key, pending).await
  }

  /// Drop a scope. Results still in flight for it are discarded on arrival.
  pub fn teardown(&self, scope: &str) {
    let key = self.key(scope);
    if self.lock().entries.remove(&key).is_some() {
      debug!(key = %key, "torn down");
    }
  }

  fn join_or_start(
    &self,
    state: &mut CacheState<T>,
    key: &QueryKey,
    session: &Session,
    force: bool,
  ) -> PendingFetch<T> {
    state.next_seq += 1;
    let seq = state.next_seq;
    let entry = state.entry(key);

    if !force {
      if let Some(inflight) = &entry.inflight {
        debug!(key = %key, "joining in-flight fetch");
        return PendingFetch {
          entry_id: entry.id,
          seq: inflight.seq,
          fetch: inflight.fetch.clone(),
        };
      }
    }

    let fetch = self.spawn_fetch(session, &key.scope);
    entry.inflight = Some(InFlight {
      seq,
      fetch: fetch.clone(),
    });
    entry.status = EntryStatus::Loading;
    debug!(key = %key, seq, "fetch started");

    PendingFetch {
      entry_id: entry.id,
      seq,
      fetch,
    }
  }

  fn spawn_fetch(&self, session: &Session, scope: &str) -> SharedFetch<T> {
    let loader = Arc::clone(&self.loader);
    let session = session.clone();
    let scope = scope.to_string();
    let retries = self.settings.retries;
    let name = self.name;

    async move {
      let mut attempt = 0;
      loop {
        match loader(session.clone(), scope.clone()).await {
          Ok(data) => return Ok(data),
          Err(err @ SyncError::Remote { .. }) if attempt < retries => {
            attempt += 1;
            warn!(collection = name, scope = %scope, attempt, error = %err, "fetch failed, retrying");
          }
          Err(err) => return Err(err),
        }
      }
    }
    .boxed()
    .shared()
  }

  async fn complete(&self, key: &QueryKey, pending: PendingFetch<T>) -> QueryResult<T> {
    let result = pending.fetch.await;
    if let Err(err) = &result {
      warn!(key = %key, error = %err, "fetch failed");
    }

    let mut state = self.lock();
    match state.entries.get_mut(key) {
      Some(entry) if entry.id == pending.entry_id => {
        entry.settle_fetch(pending.seq, result);
        entry.view(self.settings.stale_time)
      }
      _ => {
        debug!(key = %key, "dropping result for torn-down scope");
        QueryResult::idle()
      }
    }
  }

  // --------------------------------------------------------------------------
  // Hooks for the optimistic write path
  // --------------------------------------------------------------------------

  /// Snapshot the scope, then apply `apply` to it, atomically.
  ///
  /// Any in-flight fetch for the scope is cancelled so a list response that
  /// predates this write cannot overwrite it.
  pub(super) fn begin_mutation<R>(&self, scope: &str, apply: impl FnOnce(&mut Vec<T>) -> R) -> (Ticket<T>, R) {
    let key = self.key(scope);
    let mut state = self.lock();
    let entry = state.entry(&key);

    if entry.inflight.take().is_some() {
      debug!(key = %key, "cancelled in-flight fetch for write");
    }
    let snapshot = entry.data.clone();
    let applied = apply(&mut entry.data);
    entry.pending_mutations += 1;
    entry.status = EntryStatus::Optimistic;

    let ticket = Ticket {
      key,
      entry_id: entry.id,
      snapshot,
    };
    (ticket, applied)
  }

  /// Run `apply` on the rows of `scope` under the cache lock. Rows are `None`
  /// once the scope has been torn down.
  pub(super) fn with_rows<R>(&self, scope: &str, apply: impl FnOnce(Option<&mut Vec<T>>) -> R) -> R {
    let key = self.key(scope);
    let mut state = self.lock();
    apply(state.entries.get_mut(&key).map(|entry| &mut entry.data))
  }

  /// Record a successful write. Returns true when the caller should refetch.
  pub(super) fn commit(&self, ticket: Ticket<T>) -> bool {
    let mut state = self.lock();
    let Some(entry) = live_entry(&mut state, &ticket) else {
      return false;
    };
    entry.pending_mutations -= 1;
    entry.invalidated = true;
    if entry.pending_mutations > 0 {
      entry.refetch_owed = true;
      return false;
    }
    entry.status = EntryStatus::Ready;
    true
  }

  /// Restore the snapshot taken for `ticket`. Returns true when an earlier
  /// successful write is still owed its refetch.
  pub(super) fn rollback(&self, ticket: Ticket<T>) -> bool {
    let mut state = self.lock();
    let Some(entry) = live_entry(&mut state, &ticket) else {
      return false;
    };
    entry.data = ticket.snapshot;
    entry.pending_mutations -= 1;
    entry.invalidated = true;
    if entry.pending_mutations > 0 {
      return false;
    }
    entry.status = EntryStatus::RolledBack;
    entry.refetch_owed
  }
}

fn live_entry<'a, T: Cacheable>(state: &'a mut CacheState<T>, ticket: &Ticket<T>) -> Option<&'a mut Entry<T>> {
  match state.entries.get_mut(&ticket.key) {
    Some(entry) if entry.id == ticket.entry_id => Some(entry),
    _ => {
      debug!(key = %ticket.key, "write settled after teardown");
      None
    }
  }
}

impl<T: Cacheable> Clone for CollectionCache<T> {
  fn clone(&self) -> Self {
    Self {
      name: self.name,
      loader: Arc::clone(&self.loader),
      settings: self.settings,
      state: Arc::clone(&self.state),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::testing::{session, wait_until};
  use std::sync::atomic::{AtomicUsize, Ordering};
  use tokio::sync::Notify;

  #[derive(Debug, Clone, PartialEq)]
  struct Item {
    id: String,
  }

  impl Cacheable for Item {
    fn cache_key(&self) -> &str {
      &self.id
    }
  }

  fn item(id: &str) -> Item {
    Item { id: id.to_string() }
  }

  /// Loader returning the scope as a single item, counting calls.
  fn counting_loader(calls: Arc<AtomicUsize>) -> Loader<Item> {
    Arc::new(move |_session: Session, scope: String| {
      let calls = calls.clone();
      async move {
        calls.fetch_add(1, Ordering::SeqCst);
        Ok::<_, SyncError>(vec![item(&scope)])
      }
      .boxed()
    })
  }

  fn cache(loader: Loader<Item>) -> CollectionCache<Item> {
    CollectionCache::new("items", loader, CacheSettings::default())
  }

  #[tokio::test]
  async fn test_disabled_scope_does_not_fetch() {
    let calls = Arc::new(AtomicUsize::new(0));
    let cache = cache(counting_loader(calls.clone()));

    let result = cache.fetch(&session("u1"), None).await;

    assert!(result.is_disabled());
    assert!(!result.is_loading());
    assert!(!result.is_error());
    assert!(result.data.is_empty());
    assert_eq!(calls.load(Ordering::SeqCst), 0);
  }

  #[tokio::test]
  async fn test_fresh_snapshot_is_served_from_cache() {
    let calls = Arc::new(AtomicUsize::new(0));
    let cache = cache(counting_loader(calls.clone()));
    let s = session("u1");

    let first = cache.fetch(&s, Some("u1")).await;
    let second = cache.fetch(&s, Some("u1")).await;

    assert_eq!(first.status, EntryStatus::Ready);
    assert_eq!(second.data, vec![item("u1")]);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
  }

  #[tokio::test]
  async fn test_scopes_are_cached_separately() {
    let calls = Arc::new(AtomicUsize::new(0));
    let cache = cache(counting_loader(calls.clone()));
    let s = session("u1");

    cache.fetch(&s, Some("u1")).await;
    let other = cache.fetch(&s, Some("u2")).await;

    assert_eq!(other.data, vec![item("u2")]);
    assert_eq!(calls.load(Ordering::SeqCst), 2);
  }

  #[tokio::test]
  async fn test_zero_stale_time_refetches() {
    let calls = Arc::new(AtomicUsize::new(0));
    let cache = CollectionCache::new(
      "items",
      counting_loader(calls.clone()),
      CacheSettings {
        stale_time: Duration::zero(),
        retries: 0,
      },
    );
    let s = session("u1");

    cache.fetch(&s, Some("u1")).await;
    tokio::time::sleep(std::time::Duration::from_millis(5)).await;
    assert_eq!(cache.read(Some("u1")).status, EntryStatus::Stale);
    cache.fetch(&s, Some("u1")).await;

    assert_eq!(calls.load(Ordering::SeqCst), 2);
  }

  #[tokio::test]
  async fn test_concurrent_fetches_coalesce() {
    let calls = Arc::new(AtomicUsize::new(0));
    let gate = Arc::new(Notify::new());
    let loader: Loader<Item> = {
      let calls = calls.clone();
      let gate = gate.clone();
      Arc::new(move |_session: Session, scope: String| {
        let calls = calls.clone();
        let gate = gate.clone();
        async move {
          calls.fetch_add(1, Ordering::SeqCst);
          gate.notified().await;
          Ok::<_, SyncError>(vec![item(&scope)])
        }
        .boxed()
      })
    };
    let cache = cache(loader);
    let s = session("u1");

    let (a, b, _) = tokio::join!(cache.fetch(&s, Some("u1")), cache.fetch(&s, Some("u1")), async {
      tokio::task::yield_now().await;
      gate.notify_one();
    });

    assert_eq!(a.data, vec![item("u1")]);
    assert_eq!(b.data, vec![item("u1")]);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
  }

  #[tokio::test]
  async fn test_error_keeps_last_snapshot_and_refetch_recovers() {
    let fail = Arc::new(std::sync::atomic::AtomicBool::new(false));
    let loader: Loader<Item> = {
      let fail = fail.clone();
      Arc::new(move |_session: Session, scope: String| {
        let fail = fail.load(Ordering::SeqCst);
        async move {
          if fail {
            Err(SyncError::remote("boom"))
          } else {
            Ok::<_, SyncError>(vec![item(&scope)])
          }
        }
        .boxed()
      })
    };
    let cache = CollectionCache::new(
      "items",
      loader,
      CacheSettings {
        stale_time: Duration::minutes(5),
        retries: 0,
      },
    );
    let s = session("u1");

    cache.fetch(&s, Some("u1")).await;
    fail.store(true, Ordering::SeqCst);
    let failed = cache.refetch(&s, Some("u1")).await;

    assert!(failed.is_error());
    assert_eq!(failed.error, Some(SyncError::remote("boom")));
    assert_eq!(failed.data, vec![item("u1")]);

    fail.store(false, Ordering::SeqCst);
    let recovered = cache.refetch(&s, Some("u1")).await;
    assert_eq!(recovered.status, EntryStatus::Ready);
    assert_eq!(recovered.error, None);
  }

  #[tokio::test]
  async fn test_remote_failure_is_retried_once() {
    let calls = Arc::new(AtomicUsize::new(0));
    let loader: Loader<Item> = {
      let calls = calls.clone();
      Arc::new(move |_session: Session, scope: String| {
        let n = calls.fetch_add(1, Ordering::SeqCst);
        async move {
          if n == 0 {
            Err(SyncError::remote("flaky"))
          } else {
            Ok::<_, SyncError>(vec![item(&scope)])
          }
        }
        .boxed()
      })
    };
    let cache = cache(loader);

    let result = cache.fetch(&session("u1"), Some("u1")).await;

    assert_eq!(result.status, EntryStatus::Ready);
    assert_eq!(calls.load(Ordering::SeqCst), 2);
  }

  #[tokio::test]
  async fn test_late_result_after_teardown_is_dropped() {
    let gate = Arc::new(Notify::new());
    let loader: Loader<Item> = {
      let gate = gate.clone();
      Arc::new(move |_session: Session, scope: String| {
        let gate = gate.clone();
        async move {
          gate.notified().await;
          Ok::<_, SyncError>(vec![item(&scope)])
        }
        .boxed()
      })
    };
    let cache = cache(loader);
    let s = session("u1");

    let task = {
      let cache = cache.clone();
      let s = s.clone();
      tokio::spawn(async move { cache.fetch(&s, Some("u1")).await })
    };
    wait_until(|| cache.read(Some("u1")).is_loading()).await;
    cache.teardown("u1");
    gate.notify_one();
    let late = task.await.unwrap();

    assert_eq!(late.status, EntryStatus::Idle);
    assert_eq!(cache.read(Some("u1")).status, EntryStatus::Idle);
  }

  #[tokio::test]
  async fn test_write_cancels_in_flight_fetch() {
    let gate = Arc::new(Notify::new());
    let loader: Loader<Item> = {
      let gate = gate.clone();
      Arc::new(move |_session: Session, _scope: String| {
        let gate = gate.clone();
        async move {
          gate.notified().await;
          Ok::<_, SyncError>(vec![item("from-server")])
        }
        .boxed()
      })
    };
    let cache = cache(loader);
    let s = session("u1");

    let task = {
      let cache = cache.clone();
      let s = s.clone();
      tokio::spawn(async move { cache.fetch(&s, Some("u1")).await })
    };
    wait_until(|| cache.read(Some("u1")).is_loading()).await;
    let (ticket, ()) = cache.begin_mutation("u1", |data| data.push(item("local")));
    gate.notify_one();
    task.await.unwrap();

    let view = cache.read(Some("u1"));
    assert_eq!(view.data, vec![item("local")]);
    assert_eq!(view.status, EntryStatus::Optimistic);

    assert!(!cache.rollback(ticket));
    assert!(cache.read(Some("u1")).data.is_empty());
  }
}
