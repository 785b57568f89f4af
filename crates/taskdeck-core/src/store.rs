use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::de::{self, DeserializeOwned};
use serde::{Deserialize, Deserializer, Serialize};
use tracing::{debug, error, info, warn};

use crate::clock::Clock;
use crate::datastore::TaskRepository;
use crate::filter::{Filter, FilterPatch};
use crate::notify::TaskFeed;
use crate::task::{Task, TaskId};

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct State {
    pub tasks: Vec<Task>,
    pub filter: Filter,
    /// Copy of the task selected for editing, never an alias into `tasks`.
    pub editing: Option<Task>,
}

impl State {
    pub fn find(&self, id: &TaskId) -> Option<&Task> {
        self.tasks.iter().find(|task| &task.id == id)
    }
}

/// Every way the state can change. Encoded as `{"type": ..., "payload": ...}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", content = "payload", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Action {
    LoadTasks(Vec<Task>),
    AddTask(Task),
    UpdateTask(Task),
    DeleteTask(TaskId),
    ToggleComplete(TaskId),
    SetFilter(FilterPatch),
    SetEditing(Task),
    ClearEditing,
    /// Any action type this build does not know; leaves the state untouched.
    Unrecognized,
}

#[derive(Deserialize)]
struct Envelope {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    payload: serde_json::Value,
}

impl<'de> Deserialize<'de> for Action {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        fn payload<T, E>(raw: serde_json::Value) -> Result<T, E>
        where
            T: DeserializeOwned,
            E: de::Error,
        {
            serde_json::from_value(raw).map_err(E::custom)
        }

        let Envelope { kind, payload: raw } = Envelope::deserialize(deserializer)?;
        match kind.as_str() {
            "LOAD_TASKS" => payload(raw).map(Action::LoadTasks),
            "ADD_TASK" => payload(raw).map(Action::AddTask),
            "UPDATE_TASK" => payload(raw).map(Action::UpdateTask),
            "DELETE_TASK" => payload(raw).map(Action::DeleteTask),
            "TOGGLE_COMPLETE" => payload(raw).map(Action::ToggleComplete),
            "SET_FILTER" => payload(raw).map(Action::SetFilter),
            "SET_EDITING" => payload(raw).map(Action::SetEditing),
            "CLEAR_EDITING" => Ok(Action::ClearEditing),
            _ => Ok(Action::Unrecognized),
        }
    }
}

impl Action {
    pub fn name(&self) -> &'static str {
        match self {
            Action::LoadTasks(_) => "LOAD_TASKS",
            Action::AddTask(_) => "ADD_TASK",
            Action::UpdateTask(_) => "UPDATE_TASK",
            Action::DeleteTask(_) => "DELETE_TASK",
            Action::ToggleComplete(_) => "TOGGLE_COMPLETE",
            Action::SetFilter(_) => "SET_FILTER",
            Action::SetEditing(_) => "SET_EDITING",
            Action::ClearEditing => "CLEAR_EDITING",
            Action::Unrecognized => "UNRECOGNIZED",
        }
    }
}

/// Next state for `action`. Pure and total: unknown ids and unknown actions
/// leave the relevant part of the state as it was.
pub fn reduce(state: &State, action: Action, now: DateTime<Utc>) -> State {
    match action {
        Action::LoadTasks(tasks) => State {
            tasks,
            ..state.clone()
        },
        Action::AddTask(task) => {
            let mut tasks = state.tasks.clone();
            tasks.push(task);
            State {
                tasks,
                ..state.clone()
            }
        }
        Action::UpdateTask(updated) => State {
            tasks: state
                .tasks
                .iter()
                .map(|task| {
                    if task.id == updated.id {
                        updated.clone()
                    } else {
                        task.clone()
                    }
                })
                .collect(),
            editing: None,
            ..state.clone()
        },
        Action::DeleteTask(id) => State {
            tasks: state
                .tasks
                .iter()
                .filter(|task| task.id != id)
                .cloned()
                .collect(),
            ..state.clone()
        },
        Action::ToggleComplete(id) => State {
            tasks: state
                .tasks
                .iter()
                .map(|task| {
                    if task.id == id {
                        task.toggled(now)
                    } else {
                        task.clone()
                    }
                })
                .collect(),
            ..state.clone()
        },
        Action::SetFilter(patch) => State {
            filter: state.filter.merged(patch),
            ..state.clone()
        },
        Action::SetEditing(task) => State {
            editing: Some(task),
            ..state.clone()
        },
        Action::ClearEditing => State {
            editing: None,
            ..state.clone()
        },
        Action::Unrecognized => state.clone(),
    }
}

/// State container owned by the composition root.
///
/// Every accepted transition that changes the task collection is mirrored to
/// the repository and published to the feed. Neither side effect can alter or
/// roll back the in-memory state.
pub struct Store {
    state: State,
    clock: Arc<dyn Clock>,
    repository: Option<Arc<dyn TaskRepository>>,
    feed: Option<TaskFeed>,
}

impl Store {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            state: State::default(),
            clock,
            repository: None,
            feed: None,
        }
    }

    /// Starts from whatever `repository` holds. Unreadable data is logged and
    /// treated as an empty collection.
    #[tracing::instrument(skip_all)]
    pub fn open(repository: Arc<dyn TaskRepository>, clock: Arc<dyn Clock>) -> Self {
        let mut store = Self::new(clock);
        match repository.load() {
            Ok(Some(tasks)) => {
                info!(count = tasks.len(), "restoring saved tasks");
                store.dispatch(Action::LoadTasks(tasks));
            }
            Ok(None) => debug!("no saved tasks; starting empty"),
            Err(err) => warn!(error = %format!("{err:#}"), "error loading saved tasks; starting empty"),
        }
        store.repository = Some(repository);
        store
    }

    #[must_use]
    pub fn with_feed(mut self, feed: TaskFeed) -> Self {
        feed.publish(&self.state.tasks);
        self.feed = Some(feed);
        self
    }

    pub fn state(&self) -> &State {
        &self.state
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    #[tracing::instrument(skip(self, action), fields(action = action.name()))]
    pub fn dispatch(&mut self, action: Action) -> &State {
        if action == Action::Unrecognized {
            debug!("ignoring unrecognized action");
            return &self.state;
        }

        let next = reduce(&self.state, action, self.clock.now());
        let tasks_changed = next.tasks != self.state.tasks;
        self.state = next;

        if tasks_changed {
            debug!(count = self.state.tasks.len(), "task collection changed");
            self.mirror_tasks();
        }
        &self.state
    }

    fn mirror_tasks(&self) {
        if let Some(repository) = &self.repository
            && let Err(err) = repository.save(&self.state.tasks)
        {
            error!(error = %format!("{err:#}"), "failed to persist tasks; keeping in-memory state");
        }
        if let Some(feed) = &self.feed {
            feed.publish(&self.state.tasks);
        }
    }
}
