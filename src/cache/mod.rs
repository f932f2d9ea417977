//! Synchronized collection cache.
//!
//! This module keeps client-side snapshots of remote collections and:
//! - Keys snapshots by `(collection, scope)`, one per scope
//! - Coalesces concurrent fetches of the same scope
//! - Serves fresh snapshots without a request, refetches stale ones
//! - Applies writes optimistically and commits or rolls them back per write
//! - Drops late results for scopes that were torn down

mod layer;
mod mutation;
mod traits;

pub use layer::{CacheSettings, CollectionCache, Loader};
pub use mutation::{is_temporary_id, MutationHandle, OptimisticCollection};
pub use traits::{
  Cacheable, EntryStatus, Mutation, MutationOutcome, QueryKey, QueryResult, Record, RemoteWriter,
};
