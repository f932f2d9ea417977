//! Serde types matching PocketBase REST responses.
//!
//! These are kept apart from the domain types so the wire shapes (paging
//! envelopes, error bodies, timestamp format) don't leak into the cache.

use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::Value;

use crate::error::SyncError;

/// Decode a raw record into a typed value, naming the collection on failure.
pub fn decode_record<T: DeserializeOwned>(collection: &str, value: Value) -> Result<T, SyncError> {
  serde_json::from_value(value).map_err(|e| SyncError::decode(collection, e))
}

/// Encode a payload into the JSON body sent to the store.
pub fn encode_body<T: Serialize>(collection: &str, value: &T) -> Result<Value, SyncError> {
  serde_json::to_value(value).map_err(|e| SyncError::decode(collection, e))
}

// ============================================================================
// List endpoint
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct ApiListResponse {
  #[serde(default)]
  pub page: i64,
  /// `-1` when the request was made with `skipTotal`
  #[serde(rename = "totalPages", default)]
  pub total_pages: i64,
  #[serde(default)]
  pub items: Vec<Value>,
}

// ============================================================================
// Auth endpoints
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct ApiAuthResponse {
  pub token: String,
  pub record: Value,
}

#[derive(Debug, Serialize)]
pub struct ApiPasswordAuth<'a> {
  pub identity: &'a str,
  pub password: &'a str,
}

#[derive(Debug, Serialize)]
pub struct ApiRegister<'a> {
  pub email: &'a str,
  pub password: &'a str,
  #[serde(rename = "passwordConfirm")]
  pub password_confirm: &'a str,
}

// ============================================================================
// Errors
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct ApiError {
  #[serde(default)]
  pub code: u16,
  #[serde(default)]
  pub message: String,
  #[serde(default)]
  pub data: Value,
}

impl ApiError {
  /// Flatten field-level validation messages into one line.
  pub fn summary(&self) -> String {
    let fields: Vec<String> = self
      .data
      .as_object()
      .map(|obj| {
        obj
          .iter()
          .filter_map(|(field, detail)| {
            detail
              .get("message")
              .and_then(Value::as_str)
              .map(|msg| format!("{}: {}", field, msg))
          })
          .collect()
      })
      .unwrap_or_default();

    let message = match self.message.trim() {
      "" => format!("error {}", self.code),
      message => message.to_string(),
    };
    if fields.is_empty() {
      message
    } else {
      format!("{} ({})", message, fields.join(", "))
    }
  }
}

/// Timestamp format used by PocketBase (`2024-05-01 10:00:00.123Z`).
///
/// Deserialization also accepts RFC 3339 so hand-written fixtures and other
/// compatible backends work.
pub mod pb_datetime {
  use chrono::{DateTime, NaiveDateTime, Utc};
  use serde::{Deserialize, Deserializer, Serializer};

  const FORMAT: &str = "%Y-%m-%d %H:%M:%S%.3fZ";

  pub fn format(dt: &DateTime<Utc>) -> String {
    dt.format(FORMAT).to_string()
  }

  pub fn parse(s: &str) -> Option<DateTime<Utc>> {
    let s = s.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
      return Some(dt.with_timezone(&Utc));
    }
    let naive = s.strip_suffix('Z').unwrap_or(s);
    NaiveDateTime::parse_from_str(naive, "%Y-%m-%d %H:%M:%S%.f")
      .ok()
      .map(|dt| dt.and_utc())
  }

  pub fn serialize<S: Serializer>(dt: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&format(dt))
  }

  pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<DateTime<Utc>, D::Error> {
    let raw = String::deserialize(deserializer)?;
    parse(&raw).ok_or_else(|| serde::de::Error::custom(format!("invalid timestamp '{}'", raw)))
  }
}
