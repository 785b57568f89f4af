use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use anyhow::{Context, anyhow};
use chrono::NaiveDate;
use serde::Serialize;
use tempfile::NamedTempFile;
use tracing::{debug, info, warn};

use crate::task::{Task, TaskId};

/// Durable home of the task collection.
pub trait TaskRepository: Send + Sync {
    /// `Ok(None)` when nothing has been saved yet.
    fn load(&self) -> anyhow::Result<Option<Vec<Task>>>;

    fn save(&self, tasks: &[Task]) -> anyhow::Result<()>;
}

/// Per-task record of the last calendar day a reminder went out.
pub trait NotificationLedger: Send + Sync {
    fn last_notified(&self, id: &TaskId) -> Option<NaiveDate>;

    fn mark_notified(&self, id: &TaskId, day: NaiveDate) -> anyhow::Result<()>;
}

#[derive(Debug)]
pub struct DataStore {
    pub data_dir: PathBuf,
    pub tasks_path: PathBuf,
    pub notified_path: PathBuf,
    // serializes read-modify-write of the ledger file
    ledger_lock: Mutex<()>,
}

impl DataStore {
    #[tracing::instrument(skip(data_dir))]
    pub fn open(data_dir: &Path) -> anyhow::Result<Self> {
        let data_dir = data_dir.to_path_buf();
        fs::create_dir_all(&data_dir)
            .with_context(|| format!("failed to create {}", data_dir.display()))?;

        let tasks_path = data_dir.join("tasks.json");
        let notified_path = data_dir.join("notified.json");

        info!(
            data_dir = %data_dir.display(),
            tasks = %tasks_path.display(),
            notified = %notified_path.display(),
            "opened datastore"
        );

        Ok(Self {
            data_dir,
            tasks_path,
            notified_path,
            ledger_lock: Mutex::new(()),
        })
    }

    #[tracing::instrument(skip(self))]
    fn load_ledger(&self) -> BTreeMap<TaskId, NaiveDate> {
        let raw = match fs::read_to_string(&self.notified_path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return BTreeMap::new(),
            Err(err) => {
                warn!(
                    file = %self.notified_path.display(),
                    error = %err,
                    "failed reading notification ledger; treating as empty"
                );
                return BTreeMap::new();
            }
        };

        if raw.trim().is_empty() {
            return BTreeMap::new();
        }

        serde_json::from_str(&raw).unwrap_or_else(|err| {
            warn!(
                file = %self.notified_path.display(),
                error = %err,
                "malformed notification ledger; treating as empty"
            );
            BTreeMap::new()
        })
    }
}

impl TaskRepository for DataStore {
    #[tracing::instrument(skip(self))]
    fn load(&self) -> anyhow::Result<Option<Vec<Task>>> {
        let raw = match fs::read_to_string(&self.tasks_path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                debug!(file = %self.tasks_path.display(), "no saved tasks yet");
                return Ok(None);
            }
            Err(err) => {
                return Err(err)
                    .with_context(|| format!("failed reading {}", self.tasks_path.display()));
            }
        };

        let tasks = parse_tasks(&raw)
            .with_context(|| format!("failed parsing {}", self.tasks_path.display()))?;
        debug!(count = tasks.as_ref().map_or(0, Vec::len), "loaded tasks");
        Ok(tasks)
    }

    #[tracing::instrument(skip(self, tasks), fields(count = tasks.len()))]
    fn save(&self, tasks: &[Task]) -> anyhow::Result<()> {
        save_json_atomic(&self.tasks_path, tasks).context("failed to save tasks.json")
    }
}

impl NotificationLedger for DataStore {
    fn last_notified(&self, id: &TaskId) -> Option<NaiveDate> {
        let _guard = self.ledger_lock.lock().unwrap_or_else(PoisonError::into_inner);
        self.load_ledger().get(id).copied()
    }

    #[tracing::instrument(skip(self), fields(id = %id, day = %day))]
    fn mark_notified(&self, id: &TaskId, day: NaiveDate) -> anyhow::Result<()> {
        let _guard = self.ledger_lock.lock().unwrap_or_else(PoisonError::into_inner);
        let mut ledger = self.load_ledger();
        // only same-day flags suppress a reminder
        ledger.retain(|_, seen| *seen >= day);
        ledger.insert(id.clone(), day);
        save_json_atomic(&self.notified_path, &ledger).context("failed to save notified.json")
    }
}

/// Decodes a persisted JSON array. Blank input means nothing was saved.
pub fn parse_tasks(raw: &str) -> anyhow::Result<Option<Vec<Task>>> {
    let trimmed = raw.trim();
    if trimmed.is_empty() || trimmed == "null" {
        return Ok(None);
    }
    let tasks: Vec<Task> = serde_json::from_str(trimmed)?;
    Ok(Some(tasks))
}

fn save_json_atomic<T: Serialize + ?Sized>(path: &Path, value: &T) -> anyhow::Result<()> {
    debug!(file = %path.display(), "saving json atomically");

    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    let mut temp = NamedTempFile::new_in(dir)?;
    serde_json::to_writer_pretty(&mut temp, value)?;
    writeln!(temp)?;
    temp.flush()?;

    temp.persist(path)
        .map_err(|err| anyhow!("failed to persist {}: {}", path.display(), err))?;

    Ok(())
}

/// In-process repository; clones share the same slot.
#[derive(Debug, Clone, Default)]
pub struct MemoryRepository {
    tasks: Arc<Mutex<Option<Vec<Task>>>>,
    fail_writes: bool,
}

impl MemoryRepository {
    pub fn with_tasks(tasks: Vec<Task>) -> Self {
        Self {
            tasks: Arc::new(Mutex::new(Some(tasks))),
            fail_writes: false,
        }
    }

    /// Repository whose every save fails, for exercising write-failure paths.
    pub fn failing() -> Self {
        Self {
            fail_writes: true,
            ..Self::default()
        }
    }

    pub fn saved(&self) -> Option<Vec<Task>> {
        self.tasks.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }
}

impl TaskRepository for MemoryRepository {
    fn load(&self) -> anyhow::Result<Option<Vec<Task>>> {
        Ok(self.saved())
    }

    fn save(&self, tasks: &[Task]) -> anyhow::Result<()> {
        if self.fail_writes {
            return Err(anyhow!("memory repository is read-only"));
        }
        *self.tasks.lock().unwrap_or_else(PoisonError::into_inner) = Some(tasks.to_vec());
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct MemoryLedger {
    days: Mutex<BTreeMap<TaskId, NaiveDate>>,
}

impl NotificationLedger for MemoryLedger {
    fn last_notified(&self, id: &TaskId) -> Option<NaiveDate> {
        self.days
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id)
            .copied()
    }

    fn mark_notified(&self, id: &TaskId, day: NaiveDate) -> anyhow::Result<()> {
        let mut days = self.days.lock().unwrap_or_else(PoisonError::into_inner);
        days.retain(|_, seen| *seen >= day);
        days.insert(id.clone(), day);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use chrono::{NaiveDate, TimeZone, Utc};
    use tempfile::tempdir;

    use super::{DataStore, NotificationLedger, TaskRepository, parse_tasks};
    use crate::task::{Category, Priority, TaskDraft, TaskId};

    #[test]
    fn missing_file_loads_as_nothing_saved() {
        let temp = tempdir().expect("tempdir");
        let store = DataStore::open(temp.path()).expect("open datastore");
        assert_eq!(store.load().expect("load"), None);
    }

    #[test]
    fn saved_json_keeps_null_dates() {
        let temp = tempdir().expect("tempdir");
        let store = DataStore::open(temp.path()).expect("open datastore");
        let now = Utc
            .with_ymd_and_hms(2026, 10, 14, 12, 0, 0)
            .single()
            .expect("valid now");
        let task = TaskDraft::new("Buy milk").into_task(now).expect("valid draft");

        store.save(std::slice::from_ref(&task)).expect("save");

        let raw = std::fs::read_to_string(&store.tasks_path).expect("read tasks.json");
        let value: serde_json::Value = serde_json::from_str(&raw).expect("json");
        assert!(value[0]["deadline"].is_null());
        assert!(value[0]["completedAt"].is_null());
        assert_eq!(value[0]["createdAt"], "2026-10-14T12:00:00.000Z");

        let loaded = store.load().expect("load").expect("tasks present");
        assert_eq!(loaded, vec![task]);
    }

    #[test]
    fn parses_browser_shaped_records() {
        let raw = r#"[
            {
                "id": "1712345678901",
                "title": "Read chapter 3",
                "description": "",
                "priority": "high",
                "category": "education",
                "deadline": null,
                "completed": true,
                "completedAt": "2024-04-05T18:30:00.000Z",
                "createdAt": "2024-04-05T09:00:00.000Z"
            },
            {
                "id": "1712345678902",
                "title": "Legacy",
                "priority": "low",
                "category": "gardening",
                "completed": false,
                "completedAt": null
            }
        ]"#;

        let tasks = parse_tasks(raw).expect("parse").expect("tasks present");
        assert_eq!(tasks.len(), 2);
        assert_eq!(tasks[0].id, TaskId::from("1712345678901"));
        assert_eq!(tasks[0].priority, Priority::High);
        assert_eq!(tasks[0].deadline, None);
        assert!(tasks[0].completed_at.is_some());
        assert_eq!(tasks[1].category, Category::Other);
        assert_eq!(tasks[1].description, None);
    }

    #[test]
    fn malformed_json_is_an_error() {
        assert!(parse_tasks("{not json").is_err());
        assert!(parse_tasks(r#"[{"id": "1"}]"#).is_err());
        assert_eq!(parse_tasks("   ").expect("blank"), None);
    }

    #[test]
    fn ledger_persists_per_task_day() {
        let temp = tempdir().expect("tempdir");
        let id = TaskId::from("abc");
        let day = NaiveDate::from_ymd_opt(2026, 10, 14).expect("valid date");

        {
            let store = DataStore::open(temp.path()).expect("open datastore");
            assert_eq!(store.last_notified(&id), None);
            store.mark_notified(&id, day).expect("mark");
        }

        let reopened = DataStore::open(temp.path()).expect("reopen datastore");
        assert_eq!(reopened.last_notified(&id), Some(day));
        assert_eq!(reopened.last_notified(&TaskId::from("other")), None);
    }

    #[test]
    fn ledger_drops_flags_from_earlier_days() {
        let temp = tempdir().expect("tempdir");
        let store = DataStore::open(temp.path()).expect("open datastore");
        let monday = NaiveDate::from_ymd_opt(2026, 10, 12).expect("valid date");
        let tuesday = NaiveDate::from_ymd_opt(2026, 10, 13).expect("valid date");
        let deleted = TaskId::from("deleted-task");
        let live = TaskId::from("live-task");

        store.mark_notified(&deleted, monday).expect("mark");
        store.mark_notified(&live, tuesday).expect("mark");

        assert_eq!(store.last_notified(&deleted), None);
        assert_eq!(store.last_notified(&live), Some(tuesday));

        let raw = std::fs::read_to_string(&store.notified_path).expect("read notified.json");
        let value: serde_json::Value = serde_json::from_str(&raw).expect("json");
        assert_eq!(value.as_object().map(|entries| entries.len()), Some(1));
    }
}
