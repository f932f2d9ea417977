//! Filter and sort expressions for collection queries.
//!
//! Renders to the PocketBase filter syntax (`owner="u1" || owner="u2"`).
//! Only the subset the client needs is modelled: equality, AND, OR.

use std::fmt;

#[cfg(test)]
use serde_json::Value;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Filter {
  Eq { field: String, value: String },
  #[cfg(test)]
  And(Vec<Filter>),
  Or(Vec<Filter>),
}

impl Filter {
  pub fn eq(field: &str, value: &str) -> Self {
    Self::Eq {
      field: field.to_string(),
      value: value.to_string(),
    }
  }

  pub fn or(filters: impl IntoIterator<Item = Filter>) -> Self {
    Self::Or(filters.into_iter().collect())
  }

  #[cfg(test)]
  pub fn and(filters: impl IntoIterator<Item = Filter>) -> Self {
    Self::And(filters.into_iter().collect())
  }

  /// Evaluate against a raw record. String fields compare as-is; other JSON
  /// scalars compare by their JSON text, matching how the server coerces.
  #[cfg(test)]
  pub fn matches(&self, record: &Value) -> bool {
    match self {
      Self::Eq { field, value } => match record.get(field) {
        Some(Value::String(s)) => s == value,
        Some(Value::Null) | None => value.is_empty(),
        Some(other) => other.to_string() == *value,
      },
      Self::And(filters) => filters.iter().all(|f| f.matches(record)),
      Self::Or(filters) => filters.iter().any(|f| f.matches(record)),
    }
  }

  fn fmt_joined(f: &mut fmt::Formatter<'_>, filters: &[Filter], op: &str) -> fmt::Result {
    match filters {
      [] => f.write_str("true"),
      [single] => write!(f, "{}", single),
      many => {
        f.write_str("(")?;
        for (i, filter) in many.iter().enumerate() {
          if i > 0 {
            write!(f, " {} ", op)?;
          }
          write!(f, "{}", filter)?;
        }
        f.write_str(")")
      }
    }
  }
}

impl fmt::Display for Filter {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Self::Eq { field, value } => write!(f, "{}=\"{}\"", field, escape(value)),
      #[cfg(test)]
      Self::And(filters) => Self::fmt_joined(f, filters, "&&"),
      Self::Or(filters) => Self::fmt_joined(f, filters, "||"),
    }
  }
}

fn escape(value: &str) -> String {
  value.replace('\\', "\\\\").replace('"', "\\\"")
}

/// Ordering on one field; `-field` means descending.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sort {
  pub field: String,
  pub descending: bool,
}

impl Sort {
  pub fn asc(field: &str) -> Self {
    Self {
      field: field.to_string(),
      descending: false,
    }
  }

  pub fn desc(field: &str) -> Self {
    Self {
      field: field.to_string(),
      descending: true,
    }
  }

  /// Compare two records on this key. Missing fields sort first.
  #[cfg(test)]
  pub fn compare(&self, a: &Value, b: &Value) -> std::cmp::Ordering {
    let key = |v: &Value| v.get(&self.field).map(sort_text).unwrap_or_default();
    let ord = key(a).cmp(&key(b));
    if self.descending {
      ord.reverse()
    } else {
      ord
    }
  }
}

#[cfg(test)]
fn sort_text(v: &Value) -> String {
  match v {
    Value::String(s) => s.clone(),
    other => other.to_string(),
  }
}

impl fmt::Display for Sort {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    if self.descending {
      write!(f, "-{}", self.field)
    } else {
      write!(f, "{}", self.field)
    }
  }
}

/// A list request: optional filter plus ordering
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListQuery {
  pub filter: Option<Filter>,
  pub sort: Vec<Sort>,
}

impl ListQuery {
  pub fn filtered(filter: Filter) -> Self {
    Self {
      filter: Some(filter),
      sort: Vec::new(),
    }
  }

  pub fn sorted_by(mut self, sort: Sort) -> Self {
    self.sort.push(sort);
    self
  }

  /// The `sort` query parameter, or `None` when no ordering was requested.
  pub fn sort_param(&self) -> Option<String> {
    if self.sort.is_empty() {
      return None;
    }
    Some(
      self
        .sort
        .iter()
        .map(|s| s.to_string())
        .collect::<Vec<_>>()
        .join(","),
    )
  }
}
