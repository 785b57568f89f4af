use std::fmt;
use std::str::FromStr;

use anyhow::anyhow;
use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Deserializer, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::datetime::{iso_date_serde, local_date};

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    #[default]
    Medium,
    High,
}

impl Priority {
    pub const ALL: [Priority; 3] = [Priority::High, Priority::Medium, Priority::Low];

    /// Display rank; high sorts first.
    pub fn rank(self) -> u8 {
        match self {
            Priority::High => 0,
            Priority::Medium => 1,
            Priority::Low => 2,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Priority::Low => "low",
            Priority::Medium => "medium",
            Priority::High => "high",
        }
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Priority {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "low" | "l" => Ok(Priority::Low),
            "medium" | "m" => Ok(Priority::Medium),
            "high" | "h" => Ok(Priority::High),
            other => Err(anyhow!("unknown priority: {other}")),
        }
    }
}

// An unreadable priority loads as the default rather than failing the whole file.
impl<'de> Deserialize<'de> for Priority {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        Ok(raw.parse().unwrap_or_default())
    }
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Work,
    #[default]
    Personal,
    Fitness,
    Shopping,
    Education,
    Other,
}

impl Category {
    pub const ALL: [Category; 6] = [
        Category::Work,
        Category::Personal,
        Category::Fitness,
        Category::Shopping,
        Category::Education,
        Category::Other,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Category::Work => "work",
            Category::Personal => "personal",
            Category::Fitness => "fitness",
            Category::Shopping => "shopping",
            Category::Education => "education",
            Category::Other => "other",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Category {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_lowercase();
        Category::ALL
            .into_iter()
            .find(|category| category.as_str() == wanted)
            .ok_or_else(|| anyhow!("unknown category: {wanted}"))
    }
}

// Categories outside the known set collapse into `Other` instead of failing the load.
impl<'de> Deserialize<'de> for Category {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        Ok(raw.parse().unwrap_or(Category::Other))
    }
}

/// Opaque task identity. New ids are UUIDv4 strings; older numeric ids load as-is.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(String);

impl TaskId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// First eight characters, enough to address a task from the terminal.
    pub fn short(&self) -> &str {
        self.0.get(..8).unwrap_or(&self.0)
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TaskId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for TaskId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    pub id: TaskId,

    pub title: String,

    #[serde(default)]
    pub description: Option<String>,

    pub priority: Priority,

    pub category: Category,

    #[serde(default, with = "iso_date_serde::option")]
    pub deadline: Option<DateTime<Utc>>,

    #[serde(default)]
    pub completed: bool,

    #[serde(default, with = "iso_date_serde::option")]
    pub completed_at: Option<DateTime<Utc>>,

    #[serde(
        default = "Utc::now",
        serialize_with = "iso_date_serde::serialize",
        deserialize_with = "iso_date_serde::deserialize_or_now"
    )]
    pub created_at: DateTime<Utc>,
}

impl Task {
    /// Incomplete with a deadline strictly before `now`.
    pub fn is_overdue(&self, now: DateTime<Utc>) -> bool {
        !self.completed && self.deadline.is_some_and(|deadline| deadline < now)
    }

    /// Incomplete with a deadline on the same local calendar day as `now`.
    pub fn is_due_today(&self, now: DateTime<Utc>, tz: Tz) -> bool {
        !self.completed
            && self
                .deadline
                .is_some_and(|deadline| local_date(deadline, tz) == local_date(now, tz))
    }

    /// `query` must already be lowercased.
    pub fn matches_query(&self, query: &str) -> bool {
        if query.is_empty() {
            return true;
        }
        self.title.to_lowercase().contains(query)
            || self
                .description
                .as_deref()
                .is_some_and(|description| description.to_lowercase().contains(query))
    }

    /// Copy with `completed` flipped. Completion is stamped with `now`, never
    /// earlier than creation.
    pub fn toggled(&self, now: DateTime<Utc>) -> Task {
        let mut next = self.clone();
        next.completed = !self.completed;
        next.completed_at = if next.completed {
            Some(now.max(self.created_at))
        } else {
            None
        };
        next
    }

    pub fn completion_is_consistent(&self) -> bool {
        match self.completed_at {
            Some(at) => self.completed && at >= self.created_at,
            None => !self.completed,
        }
    }

    /// Checks a task that arrived fully formed rather than through a draft.
    pub fn validate(&self) -> Result<(), DraftError> {
        if self.title.trim().is_empty() {
            return Err(DraftError::EmptyTitle);
        }
        if !self.completion_is_consistent() {
            return Err(DraftError::InconsistentCompletion);
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DraftError {
    #[error("task title cannot be empty")]
    EmptyTitle,
    #[error("completedAt must be set exactly when the task is completed, and not before createdAt")]
    InconsistentCompletion,
}

/// User-editable fields of a task, validated before any action is dispatched.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TaskDraft {
    pub title: String,
    pub description: String,
    pub priority: Priority,
    pub category: Category,
    pub deadline: Option<DateTime<Utc>>,
}

impl TaskDraft {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            ..Self::default()
        }
    }

    /// Populates the draft from a task selected for editing.
    pub fn from_task(task: &Task) -> Self {
        Self {
            title: task.title.clone(),
            description: task.description.clone().unwrap_or_default(),
            priority: task.priority,
            category: task.category,
            deadline: task.deadline,
        }
    }

    pub fn validate(&self) -> Result<(), DraftError> {
        if self.title.trim().is_empty() {
            return Err(DraftError::EmptyTitle);
        }
        Ok(())
    }

    /// Builds a brand-new incomplete task.
    pub fn into_task(self, now: DateTime<Utc>) -> Result<Task, DraftError> {
        self.validate()?;
        Ok(Task {
            id: TaskId::generate(),
            title: self.title.trim().to_string(),
            description: normalize_description(self.description),
            priority: self.priority,
            category: self.category,
            deadline: self.deadline,
            completed: false,
            completed_at: None,
            created_at: now,
        })
    }

    /// Updated copy of `task`; identity, completion and creation time are kept.
    pub fn apply_to(self, task: &Task) -> Result<Task, DraftError> {
        self.validate()?;
        Ok(Task {
            title: self.title.trim().to_string(),
            description: normalize_description(self.description),
            priority: self.priority,
            category: self.category,
            deadline: self.deadline,
            ..task.clone()
        })
    }
}

fn normalize_description(raw: String) -> Option<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, TimeZone, Utc};

    use super::{Category, DraftError, Priority, Task, TaskDraft};

    fn now() -> chrono::DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 10, 14, 12, 0, 0)
            .single()
            .expect("valid now")
    }

    #[test]
    fn draft_rejects_blank_title() {
        let draft = TaskDraft::new("   ");
        assert_eq!(draft.validate(), Err(DraftError::EmptyTitle));
        assert_eq!(
            TaskDraft::new("").into_task(now()).map(|t| t.id),
            Err(DraftError::EmptyTitle)
        );
    }

    #[test]
    fn stored_tasks_are_checked_for_title_and_completion() {
        let task = TaskDraft::new("Stretch").into_task(now()).expect("valid draft");
        assert_eq!(task.validate(), Ok(()));
        assert_eq!(task.toggled(now()).validate(), Ok(()));

        let blank = Task {
            title: " ".to_string(),
            ..task.clone()
        };
        assert_eq!(blank.validate(), Err(DraftError::EmptyTitle));

        let unstamped = Task {
            completed: true,
            ..task.clone()
        };
        assert_eq!(unstamped.validate(), Err(DraftError::InconsistentCompletion));

        let stamped_open = Task {
            completed_at: Some(now()),
            ..task
        };
        assert_eq!(stamped_open.validate(), Err(DraftError::InconsistentCompletion));
    }

    #[test]
    fn unknown_priority_and_category_load_leniently() {
        let priority: Priority = serde_json::from_str(r#""urgent""#).expect("lenient priority");
        assert_eq!(priority, Priority::Medium);
        let priority: Priority = serde_json::from_str(r#""high""#).expect("known priority");
        assert_eq!(priority, Priority::High);
        let category: Category = serde_json::from_str(r#""gardening""#).expect("lenient category");
        assert_eq!(category, Category::Other);
    }

    #[test]
    fn draft_builds_incomplete_task_with_defaults() {
        let task = TaskDraft::new("  Buy milk ").into_task(now()).expect("valid draft");
        assert_eq!(task.title, "Buy milk");
        assert_eq!(task.priority, Priority::Medium);
        assert_eq!(task.category, Category::Personal);
        assert_eq!(task.description, None);
        assert!(!task.completed);
        assert_eq!(task.completed_at, None);
        assert_eq!(task.created_at, now());
    }

    #[test]
    fn draft_update_keeps_identity_and_completion() {
        let original = TaskDraft::new("Draft report").into_task(now()).expect("valid draft");
        let done = original.toggled(now() + Duration::hours(1));

        let mut draft = TaskDraft::from_task(&done);
        draft.title = "Final report".to_string();
        draft.priority = Priority::High;
        let updated = draft.apply_to(&done).expect("valid update");

        assert_eq!(updated.id, done.id);
        assert_eq!(updated.created_at, done.created_at);
        assert!(updated.completed);
        assert_eq!(updated.completed_at, done.completed_at);
        assert_eq!(updated.title, "Final report");
        assert_eq!(updated.priority, Priority::High);
    }

    #[test]
    fn toggle_never_stamps_before_creation() {
        let task = TaskDraft::new("Stretch").into_task(now()).expect("valid draft");
        let done = task.toggled(now() - Duration::days(1));
        assert_eq!(done.completed_at, Some(task.created_at));
        assert!(done.completion_is_consistent());
    }

    #[test]
    fn query_matches_title_or_description() {
        let mut task: Task = TaskDraft::new("Buy Milk").into_task(now()).expect("valid draft");
        task.description = Some("From the Corner shop".to_string());

        assert!(task.matches_query("milk"));
        assert!(task.matches_query("corner"));
        assert!(task.matches_query(""));
        assert!(!task.matches_query("bread"));
    }

    #[test]
    fn unknown_category_deserializes_as_other() {
        let category: Category = serde_json::from_str("\"gardening\"").expect("category");
        assert_eq!(category, Category::Other);
        assert_eq!("Shopping".parse::<Category>().expect("parse"), Category::Shopping);
        assert!("urgent".parse::<Priority>().is_err());
    }
}
