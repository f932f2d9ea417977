//! Plain-text rendering of task lists for the terminal.

use std::fmt::Write;

use chrono::{DateTime, Utc};

use crate::backend::types::Task;
use crate::cache::{is_temporary_id, EntryStatus, QueryResult};
use crate::partner::PartnerView;

fn status_label(result: &QueryResult<Task>) -> Option<String> {
  if result.is_optimistic() {
    return Some(format!("saving {}", result.pending_mutations));
  }
  match result.status {
    EntryStatus::Disabled | EntryStatus::Ready => None,
    EntryStatus::Idle => Some("not loaded".to_string()),
    EntryStatus::Loading => Some("loading".to_string()),
    EntryStatus::Stale => Some("stale".to_string()),
    EntryStatus::Optimistic => Some("saving".to_string()),
    EntryStatus::RolledBack => Some("change reverted".to_string()),
    EntryStatus::Error => Some(match &result.error {
      Some(err) => format!("error: {}", err),
      None => "error".to_string(),
    }),
  }
}

/// How long an open task has been waiting; nothing under a week.
fn age_badge(created: DateTime<Utc>, now: DateTime<Utc>) -> Option<String> {
  let days = (now - created).num_days().abs();
  match days {
    0..=6 => None,
    7..=29 => Some(format!("{}w old", days / 7)),
    30..=364 => Some(format!("{}m old", days / 30)),
    _ => Some(format!("{}y old", days / 365)),
  }
}

fn task_line(out: &mut String, position: usize, task: &Task, numbered: bool, now: DateTime<Utc>) {
  let check = if task.completed { "x" } else { " " };
  let mut suffix = String::new();
  if let Some(age) = age_badge(task.created, now).filter(|_| !task.completed) {
    let _ = write!(suffix, "  ({})", age);
  }
  if is_temporary_id(&task.id) {
    suffix.push_str("  (unsaved)");
  }
  let _ = if numbered {
    writeln!(out, "{:>3}. [{}] {}{}", position, check, task.description, suffix)
  } else {
    writeln!(out, "     [{}] {}{}", check, task.description, suffix)
  };
}

/// Numbered list of the user's own tasks. Numbers are what `edit`/`toggle`/`rm` take.
pub fn own_tasks(result: &QueryResult<Task>) -> String {
  let mut out = String::new();
  let open = result.data.iter().filter(|t| !t.completed).count();
  let _ = write!(out, "Your tasks ({} open / {})", open, result.data.len());
  if let Some(label) = status_label(result) {
    let _ = write!(out, " [{}]", label);
  }
  out.push('\n');

  if result.is_disabled() {
    out.push_str("     not signed in\n");
  } else if result.data.is_empty() && !result.is_loading() {
    out.push_str("     nothing yet, try: add <text>\n");
  }
  let now = Utc::now();
  for (i, task) in result.data.iter().enumerate() {
    task_line(&mut out, i + 1, task, true, now);
  }
  out
}

/// The partner's tasks, newest first, without numbers since they are read-only.
pub fn partner_tasks(view: &PartnerView) -> String {
  let mut out = String::new();
  if view.partner_id.is_none() {
    let _ = match &view.error {
      Some(err) => writeln!(out, "Partner [error: {}]", err),
      None => writeln!(out, "Partner: none linked"),
    };
    return out;
  }

  let tasks = &view.tasks;
  let open = tasks.data.iter().filter(|t| !t.completed).count();
  let _ = write!(out, "{}'s tasks ({} open / {})", view.partner_name, open, tasks.data.len());
  // A failed partnership refresh still shows the last rows
  let label = match &view.error {
    Some(err) => Some(format!("error: {}", err)),
    None => status_label(tasks),
  };
  if let Some(label) = label {
    let _ = write!(out, " [{}]", label);
  }
  out.push('\n');
  let now = Utc::now();
  for (i, task) in tasks.data.iter().enumerate() {
    task_line(&mut out, i + 1, task, false, now);
  }
  out
}

/// The task at a 1-based position in the rendered list.
pub fn nth_task(result: &QueryResult<Task>, position: usize) -> Option<&Task> {
  position
    .checked_sub(1)
    .and_then(|index| result.data.get(index))
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::error::SyncError;
  use chrono::Duration;

  fn task(id: &str, description: &str, completed: bool) -> Task {
    Task {
      id: id.to_string(),
      owner: "u1".to_string(),
      description: description.to_string(),
      completed,
      created: Utc::now(),
      updated: Utc::now(),
    }
  }

  fn ready(data: Vec<Task>) -> QueryResult<Task> {
    QueryResult {
      data,
      status: EntryStatus::Ready,
      error: None,
      fetched_at: Some(Utc::now()),
      pending_mutations: 0,
    }
  }

  #[test]
  fn test_own_tasks_numbers_and_marks() {
    let result = ready(vec![
      task("a", "Buy milk", false),
      task("b", "Walk dog", true),
      task("temp-1-0", "Call mum", false),
    ]);
    let text = own_tasks(&result);

    assert!(text.starts_with("Your tasks (2 open / 3)\n"));
    assert!(text.contains("  1. [ ] Buy milk\n"));
    assert!(text.contains("  2. [x] Walk dog\n"));
    assert!(text.contains("  3. [ ] Call mum  (unsaved)\n"));
  }

  #[test]
  fn test_error_keeps_rows() {
    let mut result = ready(vec![task("a", "Buy milk", false)]);
    result.status = EntryStatus::Error;
    result.error = Some(SyncError::remote("offline"));
    let text = own_tasks(&result);

    assert!(text.contains("[error: remote request failed: offline]"));
    assert!(text.contains("Buy milk"));
  }

  #[test]
  fn test_signed_out() {
    assert!(own_tasks(&QueryResult::disabled()).contains("not signed in"));
  }

  fn partner_view(partner_id: Option<&str>, tasks: QueryResult<Task>, error: Option<SyncError>) -> PartnerView {
    PartnerView {
      partner_id: partner_id.map(str::to_string),
      partner_name: "Bee".to_string(),
      tasks,
      error,
    }
  }

  #[test]
  fn test_partner_without_link() {
    let view = partner_view(None, QueryResult::disabled(), None);
    assert_eq!(partner_tasks(&view), "Partner: none linked\n");
  }

  #[test]
  fn test_partner_rows_are_unnumbered() {
    let view = partner_view(Some("u2"), ready(vec![task("c", "Fix sink", false)]), None);
    let text = partner_tasks(&view);
    assert!(text.starts_with("Bee's tasks (1 open / 1)\n"));
    assert!(text.contains("     [ ] Fix sink\n"));
  }

  #[test]
  fn test_partner_error_keeps_rows() {
    let view = partner_view(
      Some("u2"),
      ready(vec![task("c", "Fix sink", false)]),
      Some(SyncError::remote("offline")),
    );
    let text = partner_tasks(&view);
    assert!(text.starts_with("Bee's tasks (1 open / 1) [error: remote request failed: offline]\n"));
    assert!(text.contains("     [ ] Fix sink\n"));
  }

  #[test]
  fn test_partner_error_without_partner() {
    let view = partner_view(None, QueryResult::disabled(), Some(SyncError::remote("offline")));
    assert_eq!(partner_tasks(&view), "Partner [error: remote request failed: offline]\n");
  }

  #[test]
  fn test_age_badge_boundaries() {
    let now = Utc::now();
    let aged = |days: i64| age_badge(now - Duration::days(days), now);
    assert_eq!(aged(0), None);
    assert_eq!(aged(6), None);
    assert_eq!(aged(7).as_deref(), Some("1w old"));
    assert_eq!(aged(29).as_deref(), Some("4w old"));
    assert_eq!(aged(30).as_deref(), Some("1m old"));
    assert_eq!(aged(364).as_deref(), Some("12m old"));
    assert_eq!(aged(365).as_deref(), Some("1y old"));
    assert_eq!(aged(800).as_deref(), Some("2y old"));
  }

  #[test]
  fn test_age_badge_only_on_open_tasks() {
    let now = Utc::now();
    let mut old = task("a", "Sort garage", false);
    old.created = now - Duration::days(10);
    let mut line = String::new();
    task_line(&mut line, 1, &old, true, now);
    assert_eq!(line, "  1. [ ] Sort garage  (1w old)\n");

    old.completed = true;
    let mut line = String::new();
    task_line(&mut line, 1, &old, true, now);
    assert_eq!(line, "  1. [x] Sort garage\n");
  }

  #[test]
  fn test_nth_task_is_one_based() {
    let result = ready(vec![task("a", "first", false), task("b", "second", false)]);
    assert_eq!(nth_task(&result, 1).map(|t| t.id.as_str()), Some("a"));
    assert_eq!(nth_task(&result, 2).map(|t| t.id.as_str()), Some("b"));
    assert!(nth_task(&result, 0).is_none());
    assert!(nth_task(&result, 3).is_none());
  }
}
