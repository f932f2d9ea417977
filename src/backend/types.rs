use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::api_types::pb_datetime;

/// A single task owned by one user
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
  pub id: String,
  pub owner: String,
  #[serde(default)]
  pub description: String,
  #[serde(default)]
  pub completed: bool,
  #[serde(with = "pb_datetime")]
  pub created: DateTime<Utc>,
  #[serde(with = "pb_datetime")]
  pub updated: DateTime<Utc>,
}

/// Pairing between exactly two users
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Partnership {
  pub id: String,
  pub partner1: String,
  pub partner2: String,
}

/// Authenticated user record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
  pub id: String,
  #[serde(default)]
  pub email: String,
  #[serde(default)]
  pub name: Option<String>,
  #[serde(default)]
  pub username: Option<String>,
  #[serde(default)]
  pub verified: bool,
}

impl User {
  /// `name`, else `username`, else "Partner".
  pub fn display_name(&self) -> &str {
    [&self.name, &self.username]
      .into_iter()
      .flatten()
      .map(|s| s.trim())
      .find(|s| !s.is_empty())
      .unwrap_or("Partner")
  }
}

/// Identity plus credential, passed explicitly into every remote operation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
  pub token: String,
  pub user: User,
}

impl Session {
  pub fn user_id(&self) -> &str {
    &self.user.id
  }
}

/// Payload for creating a task. The owner comes from the session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TaskDraft {
  pub description: String,
  pub completed: bool,
}

impl TaskDraft {
  pub fn new(description: &str) -> Self {
    Self {
      description: description.trim().to_string(),
      completed: false,
    }
  }
}

/// Partial update for a task; `None` fields are left untouched
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TaskPatch {
  #[serde(skip_serializing_if = "Option::is_none")]
  pub description: Option<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub completed: Option<bool>,
}

impl TaskPatch {
  pub fn describe(description: &str) -> Self {
    Self {
      description: Some(description.trim().to_string()),
      completed: None,
    }
  }

  pub fn complete(completed: bool) -> Self {
    Self {
      description: None,
      completed: Some(completed),
    }
  }

  pub fn is_empty(&self) -> bool {
    self.description.is_none() && self.completed.is_none()
  }
}
