use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use anyhow::anyhow;
use chrono::{
  DateTime,
  Utc
};
use serde::{
  Deserialize,
  Deserializer,
  Serialize,
  Serializer
};
use tracing::trace;

use crate::task::{
  Category,
  Priority,
  Task
};

#[derive(
  Debug,
  Clone,
  Copy,
  Serialize,
  Deserialize,
  PartialEq,
  Eq,
  Default,
)]
#[serde(rename_all = "lowercase")]
pub enum StatusFilter {
  #[default]
  All,
  Active,
  Completed,
  Overdue
}

impl StatusFilter {
  fn keeps(
    self,
    task: &Task,
    now: DateTime<Utc>
  ) -> bool {
    match self {
      | StatusFilter::All => true,
      | StatusFilter::Active => {
        !task.completed
      }
      | StatusFilter::Completed => {
        task.completed
      }
      | StatusFilter::Overdue => {
        task.is_overdue(now)
      }
    }
  }
}

impl FromStr for StatusFilter {
  type Err = anyhow::Error;

  fn from_str(
    s: &str
  ) -> Result<Self, Self::Err> {
    match s
      .trim()
      .to_ascii_lowercase()
      .as_str()
    {
      | "all" => Ok(StatusFilter::All),
      | "active" | "open" => {
        Ok(StatusFilter::Active)
      }
      | "completed" | "done" => {
        Ok(StatusFilter::Completed)
      }
      | "overdue" => {
        Ok(StatusFilter::Overdue)
      }
      | other => Err(anyhow!(
        "unknown status filter: {other}"
      ))
    }
  }
}

/// Either every value or exactly one.
/// Serialized as `"all"` or the value
/// itself.
#[derive(
  Debug,
  Clone,
  Copy,
  PartialEq,
  Eq,
  Default,
)]
pub enum Choice<T> {
  #[default]
  All,
  Only(T)
}

impl<T: PartialEq> Choice<T> {
  pub fn admits(
    &self,
    value: &T
  ) -> bool {
    match self {
      | Choice::All => true,
      | Choice::Only(wanted) => {
        wanted == value
      }
    }
  }
}

impl<T: fmt::Display> fmt::Display
  for Choice<T>
{
  fn fmt(
    &self,
    f: &mut fmt::Formatter<'_>
  ) -> fmt::Result {
    match self {
      | Choice::All => f.write_str("all"),
      | Choice::Only(value) => {
        value.fmt(f)
      }
    }
  }
}

impl<T> FromStr for Choice<T>
where
  T: FromStr<Err = anyhow::Error>
{
  type Err = anyhow::Error;

  fn from_str(
    s: &str
  ) -> Result<Self, Self::Err> {
    if s.trim().eq_ignore_ascii_case("all")
    {
      return Ok(Choice::All);
    }
    s.parse().map(Choice::Only)
  }
}

impl<T: fmt::Display> Serialize
  for Choice<T>
{
  fn serialize<S>(
    &self,
    serializer: S
  ) -> Result<S::Ok, S::Error>
  where
    S: Serializer
  {
    serializer
      .collect_str(&self.to_string())
  }
}

impl<'de, T> Deserialize<'de>
  for Choice<T>
where
  T: FromStr<Err = anyhow::Error>
{
  fn deserialize<D>(
    deserializer: D
  ) -> Result<Self, D::Error>
  where
    D: Deserializer<'de>
  {
    let raw = String::deserialize(
      deserializer
    )?;
    raw
      .parse()
      .map_err(serde::de::Error::custom)
  }
}

/// Active predicates narrowing the
/// visible task list.
#[derive(
  Debug,
  Clone,
  PartialEq,
  Eq,
  Default,
  Serialize,
  Deserialize,
)]
#[serde(rename_all = "camelCase")]
pub struct Filter {
  #[serde(default)]
  pub status:       StatusFilter,
  #[serde(default)]
  pub priority:     Choice<Priority>,
  #[serde(default)]
  pub category:     Choice<Category>,
  #[serde(default)]
  pub search_query: String
}

/// Partial filter; `None` fields keep
/// the current value when merged.
#[derive(
  Debug,
  Clone,
  PartialEq,
  Eq,
  Default,
  Serialize,
  Deserialize,
)]
#[serde(rename_all = "camelCase")]
pub struct FilterPatch {
  #[serde(default)]
  pub status:       Option<StatusFilter>,
  #[serde(default)]
  pub priority:     Option<Choice<Priority>>,
  #[serde(default)]
  pub category:     Option<Choice<Category>>,
  #[serde(default)]
  pub search_query: Option<String>
}

impl FilterPatch {
  pub fn is_empty(&self) -> bool {
    self == &FilterPatch::default()
  }
}

impl Filter {
  /// Shallow merge: only fields set on
  /// `patch` change.
  #[must_use]
  pub fn merged(
    &self,
    patch: FilterPatch
  ) -> Filter {
    Filter {
      status:       patch
        .status
        .unwrap_or(self.status),
      priority:     patch
        .priority
        .unwrap_or(self.priority),
      category:     patch
        .category
        .unwrap_or(self.category),
      search_query: patch
        .search_query
        .unwrap_or_else(|| {
          self.search_query.clone()
        })
    }
  }

  pub fn is_default(&self) -> bool {
    self == &Filter::default()
  }

  /// Status, priority, category and
  /// search predicates, in that order.
  pub fn matches(
    &self,
    task: &Task,
    now: DateTime<Utc>
  ) -> bool {
    let query =
      self.search_query.to_lowercase();
    self.matches_with_query(
      task, &query, now
    )
  }

  fn matches_with_query(
    &self,
    task: &Task,
    lowered_query: &str,
    now: DateTime<Utc>
  ) -> bool {
    self.status.keeps(task, now)
      && self
        .priority
        .admits(&task.priority)
      && self
        .category
        .admits(&task.category)
      && task
        .matches_query(lowered_query)
  }
}

/// Filtered and display-ordered copy
/// of `tasks`. The source slice is
/// never touched.
#[tracing::instrument(skip(
  tasks, filter, now
))]
pub fn visible_tasks(
  tasks: &[Task],
  filter: &Filter,
  now: DateTime<Utc>
) -> Vec<Task> {
  let query =
    filter.search_query.to_lowercase();
  let mut out: Vec<Task> = tasks
    .iter()
    .filter(|task| {
      filter.matches_with_query(
        task, &query, now
      )
    })
    .cloned()
    .collect();

  sort_for_display(&mut out, now);
  trace!(
    total = tasks.len(),
    visible = out.len(),
    "applied task filter"
  );
  out
}

/// Stable sort: overdue first, then
/// dated tasks by deadline, then
/// priority.
pub fn sort_for_display(
  tasks: &mut [Task],
  now: DateTime<Utc>
) {
  tasks.sort_by(|a, b| {
    compare_for_display(a, b, now)
  });
}

pub fn compare_for_display(
  a: &Task,
  b: &Task,
  now: DateTime<Utc>
) -> Ordering {
  b.is_overdue(now)
    .cmp(&a.is_overdue(now))
    .then_with(|| {
      match (a.deadline, b.deadline) {
        | (Some(left), Some(right)) => {
          left.cmp(&right)
        }
        | (Some(_), None) => {
          Ordering::Less
        }
        | (None, Some(_)) => {
          Ordering::Greater
        }
        | (None, None) => Ordering::Equal
      }
    })
    .then_with(|| {
      a.priority
        .rank()
        .cmp(&b.priority.rank())
    })
}

/// Drives the "you have overdue
/// tasks" banner; ignores the filter.
pub fn has_overdue(
  tasks: &[Task],
  now: DateTime<Utc>
) -> bool {
  tasks
    .iter()
    .any(|task| task.is_overdue(now))
}
