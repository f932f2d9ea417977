//! Read-only view of the partner's tasks, derived through `partnerships`.
//!
//! The partner's id is resolved from the partnership naming the current user,
//! then used as the scope of a separate task cache. Nothing here can write:
//! the view holds plain `CollectionCache`s, which have no mutation path.

use std::sync::Arc;

use futures::FutureExt;
use tracing::debug;

use crate::backend::api_types::decode_record;
use crate::backend::cache::{PARTNERSHIPS, PARTNER_PROFILES, PARTNER_TASKS};
use crate::backend::filter::{Filter, Sort};
use crate::backend::store::RecordStore;
use crate::backend::types::{Partnership, Session, Task, User};
use crate::cache::{CacheSettings, CollectionCache, EntryStatus, Loader, QueryResult};
use crate::error::{SyncError, SyncResult};
use crate::tasks::owner_loader;

/// The id of the other party in `partnership`, never `user_id` itself.
pub fn other_party(partnership: &Partnership, user_id: &str) -> SyncResult<String> {
  let Partnership {
    id,
    partner1,
    partner2,
  } = partnership;

  if partner1 == partner2 {
    return Err(SyncError::Integrity(format!(
      "partnership {} pairs {} with itself",
      id, partner1
    )));
  }
  let other = if partner1 == user_id {
    partner2
  } else if partner2 == user_id {
    partner1
  } else {
    return Err(SyncError::Integrity(format!(
      "partnership {} does not include user {}",
      id, user_id
    )));
  };
  if other.is_empty() {
    return Err(SyncError::Integrity(format!(
      "partnership {} has an empty partner",
      id
    )));
  }
  Ok(other.clone())
}

/// Loads the (at most one) partnership naming the scope user on either side.
fn partnership_loader(store: Arc<dyn RecordStore>) -> Loader<Partnership> {
  Arc::new(move |session: Session, user_id: String| {
    find_partnership(Arc::clone(&store), session, user_id).boxed()
  })
}

async fn find_partnership(store: Arc<dyn RecordStore>, session: Session, user_id: String) -> SyncResult<Vec<Partnership>> {
  let filter = Filter::or([
    Filter::eq("partner1", &user_id),
    Filter::eq("partner2", &user_id),
  ]);
  match store.get_first(&session, PARTNERSHIPS, &filter).await {
    Ok(record) => Ok(vec![decode_record(PARTNERSHIPS, record)?]),
    // No partner yet is an expected state, not an error
    Err(err) if err.is_not_found() => Ok(Vec::new()),
    Err(err) => Err(err),
  }
}

/// Loads the user record of the scope id.
fn profile_loader(store: Arc<dyn RecordStore>, users: String) -> Loader<User> {
  Arc::new(move |session: Session, user_id: String| {
    find_profile(Arc::clone(&store), users.clone(), session, user_id).boxed()
  })
}

async fn find_profile(store: Arc<dyn RecordStore>, users: String, session: Session, user_id: String) -> SyncResult<Vec<User>> {
  let record = store.get_one(&session, &users, &user_id).await?;
  Ok(vec![decode_record(&users, record)?])
}

/// What the partner panel shows.
#[derive(Debug, Clone, PartialEq)]
pub struct PartnerView {
  pub partner_id: Option<String>,
  /// "Partner" when the user record can't be read
  pub partner_name: String,
  pub tasks: QueryResult<Task>,
  /// Failure resolving the partner; task errors live on `tasks`
  pub error: Option<SyncError>,
}

impl PartnerView {
  fn without_partner(error: Option<SyncError>) -> Self {
    Self {
      partner_id: None,
      partner_name: FALLBACK_NAME.to_string(),
      tasks: QueryResult::disabled(),
      error,
    }
  }

  pub fn error(&self) -> Option<&SyncError> {
    self.error.as_ref().or(self.tasks.error.as_ref())
  }
}

const FALLBACK_NAME: &str = "Partner";

/// Accessor for the partner's tasks.
#[derive(Clone)]
pub struct PartnerTasks {
  partnerships: CollectionCache<Partnership>,
  profiles: CollectionCache<User>,
  tasks: CollectionCache<Task>,
}

impl PartnerTasks {
  pub fn new(store: Arc<dyn RecordStore>, users_collection: &str, settings: CacheSettings) -> Self {
    Self {
      partnerships: CollectionCache::new(
        PARTNERSHIPS,
        partnership_loader(Arc::clone(&store)),
        settings,
      ),
      profiles: CollectionCache::new(
        PARTNER_PROFILES,
        profile_loader(Arc::clone(&store), users_collection.to_string()),
        settings,
      ),
      tasks: CollectionCache::new(PARTNER_TASKS, owner_loader(store, Sort::desc("created")), settings),
    }
  }

  /// Resolve the partner's user id; `None` when no partnership exists.
  pub async fn resolve_partner_scope(&self, session: &Session) -> SyncResult<Option<String>> {
    let user_id = session.user_id();
    let result = self.partnerships.fetch(session, Some(user_id)).await;
    match Self::partner_from(&result, user_id) {
      (Some(partner_id), _) => Ok(Some(partner_id)),
      (None, Some(err)) => Err(err),
      (None, None) => Ok(None),
    }
  }

  /// The partner named by the cached partnership, and any lookup failure.
  /// A failed refresh keeps the last partnership, so both can be set.
  fn partner_from(result: &QueryResult<Partnership>, user_id: &str) -> (Option<String>, Option<SyncError>) {
    let lookup_error = Self::lookup_error(result);
    match result.data.first().map(|p| other_party(p, user_id)) {
      Some(Ok(partner_id)) => (Some(partner_id), lookup_error),
      Some(Err(integrity)) => (None, Some(integrity)),
      None => (None, lookup_error),
    }
  }

  fn lookup_error(result: &QueryResult<Partnership>) -> Option<SyncError> {
    match result.status {
      EntryStatus::Error => result.error.clone(),
      _ => None,
    }
  }

  pub async fn fetch(&self, session: Option<&Session>) -> PartnerView {
    let Some(session) = session else {
      return PartnerView::without_partner(None);
    };
    let partner_id = match self.resolve_partner_scope(session).await {
      Ok(Some(id)) => id,
      Ok(None) => return PartnerView::without_partner(None),
      Err(err) => return PartnerView::without_partner(Some(err)),
    };
    let error = Self::lookup_error(&self.partnerships.read(Some(session.user_id())));

    let (profile, tasks) = tokio::join!(
      self.profiles.fetch(session, Some(&partner_id)),
      self.tasks.fetch(session, Some(&partner_id))
    );
    Self::view(partner_id, &profile, tasks, error)
  }

  /// Manual retry of every hop.
  pub async fn refetch(&self, session: Option<&Session>) -> PartnerView {
    let Some(session) = session else {
      return PartnerView::without_partner(None);
    };
    let user_id = session.user_id();
    let result = self.partnerships.refetch(session, Some(user_id)).await;
    let (partner_id, error) = Self::partner_from(&result, user_id);
    let Some(partner_id) = partner_id else {
      return PartnerView::without_partner(error);
    };

    let (profile, tasks) = tokio::join!(
      self.profiles.refetch(session, Some(&partner_id)),
      self.tasks.refetch(session, Some(&partner_id))
    );
    Self::view(partner_id, &profile, tasks, error)
  }

  fn view(partner_id: String, profile: &QueryResult<User>, tasks: QueryResult<Task>, error: Option<SyncError>) -> PartnerView {
    if let Some(err) = &profile.error {
      debug!(partner = %partner_id, error = %err, "partner profile unavailable");
    }
    let partner_name = profile
      .data
      .first()
      .map_or(FALLBACK_NAME, User::display_name)
      .to_string();
    PartnerView {
      partner_id: Some(partner_id),
      partner_name,
      tasks,
      error,
    }
  }

  /// Forget every hop for this user (view closed or logout).
  pub fn teardown(&self, session: &Session) {
    let user_id = session.user_id();
    let partner = self.partnerships.read(Some(user_id)).data.into_iter().next();
    if let Some(partner_id) = partner.and_then(|p| other_party(&p, user_id).ok()) {
      self.profiles.teardown(&partner_id);
      self.tasks.teardown(&partner_id);
    }
    self.partnerships.teardown(user_id);
  }
}
