//! Caching implementations for backend types.

use chrono::{DateTime, Utc};

use crate::cache::{Cacheable, Record};
use crate::error::{SyncError, SyncResult};

use super::types::{Partnership, Task, TaskDraft, TaskPatch, User};

// ============================================================================
// Collection names
// ============================================================================

pub const TASKS: &str = "tasks";
pub const PARTNERSHIPS: &str = "partnerships";
/// Logical cache name for tasks read through a partnership
pub const PARTNER_TASKS: &str = "partnerTasks";
/// Logical cache name for the partner's user record
pub const PARTNER_PROFILES: &str = "partnerProfiles";

// ============================================================================
// Cacheable implementations
// ============================================================================

impl Cacheable for Task {
  fn cache_key(&self) -> &str {
    &self.id
  }
}

impl Cacheable for Partnership {
  fn cache_key(&self) -> &str {
    &self.id
  }
}

impl Cacheable for User {
  fn cache_key(&self) -> &str {
    &self.id
  }
}

impl Record for Task {
  type Draft = TaskDraft;
  type Patch = TaskPatch;

  fn provisional(draft: &TaskDraft, id: String, scope: &str, now: DateTime<Utc>) -> Self {
    Task {
      id,
      owner: scope.to_string(),
      description: draft.description.clone(),
      completed: draft.completed,
      created: now,
      updated: now,
    }
  }

  fn apply_patch(&mut self, patch: &TaskPatch, now: DateTime<Utc>) {
    if let Some(description) = &patch.description {
      self.description = description.clone();
    }
    if let Some(completed) = patch.completed {
      self.completed = completed;
    }
    self.updated = now;
  }

  fn merge_patch(base: &mut TaskPatch, next: &TaskPatch) {
    if next.description.is_some() {
      base.description = next.description.clone();
    }
    if next.completed.is_some() {
      base.completed = next.completed;
    }
  }

  fn validate_draft(draft: &TaskDraft) -> SyncResult<()> {
    validate_description(&draft.description)
  }

  fn validate_patch(patch: &TaskPatch) -> SyncResult<()> {
    if patch.is_empty() {
      return Err(SyncError::Validation("nothing to update".to_string()));
    }
    match &patch.description {
      Some(description) => validate_description(description),
      None => Ok(()),
    }
  }
}

fn validate_description(description: &str) -> SyncResult<()> {
  if description.trim().is_empty() {
    return Err(SyncError::Validation(
      "task description cannot be empty".to_string(),
    ));
  }
  Ok(())
}

#[cfg(test)]
mod tests {
  use super::*;

  fn task() -> Task {
    let now = Utc::now();
    Task::provisional(&TaskDraft::new("  Buy milk "), "temp-1-0".to_string(), "u1", now)
  }

  #[test]
  fn test_provisional_task_is_incomplete_and_owned_by_scope() {
    let t = task();
    assert_eq!(t.description, "Buy milk");
    assert_eq!(t.owner, "u1");
    assert!(!t.completed);
    assert_eq!(t.created, t.updated);
  }

  #[test]
  fn test_patch_leaves_unset_fields() {
    let mut t = task();
    t.apply_patch(&TaskPatch::complete(true), Utc::now());
    assert!(t.completed);
    assert_eq!(t.description, "Buy milk");
  }

  #[test]
  fn test_merge_patch_later_wins() {
    let mut base = TaskPatch::describe("one");
    Task::merge_patch(&mut base, &TaskPatch::complete(true));
    Task::merge_patch(&mut base, &TaskPatch::describe("two"));
    assert_eq!(base.description.as_deref(), Some("two"));
    assert_eq!(base.completed, Some(true));
  }

  #[test]
  fn test_validation() {
    assert!(Task::validate_draft(&TaskDraft::new("   ")).is_err());
    assert!(Task::validate_patch(&TaskPatch::default()).is_err());
    assert!(Task::validate_patch(&TaskPatch::describe(" ")).is_err());
    assert!(Task::validate_patch(&TaskPatch::complete(false)).is_ok());
  }
}
