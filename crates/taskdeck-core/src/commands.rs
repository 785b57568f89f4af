use std::io::{self, BufRead};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, anyhow};
use chrono_tz::Tz;
use tracing::{debug, info, instrument};

use crate::cli::{AddArgs, Command, EditArgs, ListArgs};
use crate::clock::Clock;
use crate::config::Config;
use crate::datastore::DataStore;
use crate::datetime::parse_deadline_expr;
use crate::filter::FilterPatch;
use crate::notify::{DeadlineScheduler, LogNotifier, Notification, Notifier, TaskFeed, scan};
use crate::render::Renderer;
use crate::stats::Timeframe;
use crate::store::{Action, State, Store};
use crate::task::{Task, TaskDraft, TaskId};
use crate::view::DerivedViews;

/// Composition root: owns the store and wires it to the datastore, the
/// scheduler feed and the configured zone.
pub struct Session {
    store: Store,
    datastore: Arc<DataStore>,
    feed: TaskFeed,
    clock: Arc<dyn Clock>,
    tz: Tz,
    timeframe: Timeframe,
    notify_interval: Duration,
}

impl Session {
    #[instrument(skip_all)]
    pub fn open(
        datastore: Arc<DataStore>,
        cfg: &Config,
        tz: Tz,
        clock: Arc<dyn Clock>,
    ) -> anyhow::Result<Self> {
        let timeframe = cfg.default_timeframe()?;
        let notify_interval = cfg.notify_interval()?;
        let feed = TaskFeed::default();
        let store = Store::open(datastore.clone(), clock.clone()).with_feed(feed.clone());

        debug!(tz = %tz, timeframe = %timeframe, "session opened");
        Ok(Self {
            store,
            datastore,
            feed,
            clock,
            tz,
            timeframe,
            notify_interval,
        })
    }

    pub fn state(&self) -> &State {
        self.store.state()
    }

    #[instrument(skip(self, args))]
    pub fn add(&mut self, args: AddArgs) -> anyhow::Result<Task> {
        let now = self.store.now();
        let mut draft = TaskDraft::new(args.title.join(" "));
        draft.description = args.description.unwrap_or_default();
        draft.priority = args.priority.unwrap_or_default();
        draft.category = args.category.unwrap_or_default();
        draft.deadline = args
            .deadline
            .as_deref()
            .map(|raw| parse_deadline_expr(raw, now, self.tz))
            .transpose()?;

        let task = draft.into_task(now)?;
        info!(id = %task.id, "adding task");
        self.store.dispatch(Action::AddTask(task.clone()));
        Ok(task)
    }

    /// Select, rebuild through a draft, then commit. A rejected draft leaves
    /// nothing selected.
    #[instrument(skip(self, args), fields(id = %args.id))]
    pub fn edit(&mut self, args: EditArgs) -> anyhow::Result<Task> {
        let id = self.resolve(&args.id)?;
        let current = self
            .state()
            .find(&id)
            .cloned()
            .ok_or_else(|| anyhow!("no task with id {id}"))?;
        self.store.dispatch(Action::SetEditing(current));

        let updated = match self.rebuild_editing(args) {
            Ok(updated) => updated,
            Err(err) => {
                self.store.dispatch(Action::ClearEditing);
                return Err(err);
            }
        };

        info!(id = %updated.id, "updating task");
        self.store.dispatch(Action::UpdateTask(updated.clone()));
        Ok(updated)
    }

    fn rebuild_editing(&self, args: EditArgs) -> anyhow::Result<Task> {
        let editing = self
            .state()
            .editing
            .as_ref()
            .ok_or_else(|| anyhow!("no task selected for editing"))?;

        let mut draft = TaskDraft::from_task(editing);
        if let Some(title) = args.title {
            draft.title = title;
        }
        if let Some(description) = args.description {
            draft.description = description;
        }
        if let Some(priority) = args.priority {
            draft.priority = priority;
        }
        if let Some(category) = args.category {
            draft.category = category;
        }
        if args.clear_deadline {
            draft.deadline = None;
        } else if let Some(raw) = args.deadline.as_deref() {
            draft.deadline = Some(parse_deadline_expr(raw, self.store.now(), self.tz)?);
        }

        Ok(draft.apply_to(editing)?)
    }

    #[instrument(skip(self))]
    pub fn delete(&mut self, id: &str) -> anyhow::Result<Task> {
        let id = self.resolve(id)?;
        let removed = self
            .state()
            .find(&id)
            .cloned()
            .ok_or_else(|| anyhow!("no task with id {id}"))?;
        self.store.dispatch(Action::DeleteTask(id));
        Ok(removed)
    }

    #[instrument(skip(self))]
    pub fn toggle(&mut self, id: &str) -> anyhow::Result<Task> {
        let id = self.resolve(id)?;
        self.store
            .dispatch(Action::ToggleComplete(id.clone()))
            .find(&id)
            .cloned()
            .ok_or_else(|| anyhow!("no task with id {id}"))
    }

    pub fn list(&mut self, args: &ListArgs) -> DerivedViews {
        let patch = FilterPatch {
            status: args.status,
            priority: args.priority,
            category: args.category,
            search_query: args.search.clone(),
        };
        if !patch.is_empty() {
            self.store.dispatch(Action::SetFilter(patch));
        }
        self.views(self.timeframe)
    }

    pub fn views(&self, timeframe: Timeframe) -> DerivedViews {
        DerivedViews::compute(self.state(), timeframe, self.store.now(), self.tz)
    }

    /// Feeds a JSON-encoded action straight to the store.
    pub fn dispatch_json(&mut self, raw: &str) -> anyhow::Result<&State> {
        let action: Action = serde_json::from_str(raw).context("invalid action JSON")?;
        self.check_raw_action(&action)?;
        debug!(action = action.name(), "dispatching raw action");
        Ok(self.store.dispatch(action))
    }

    /// Raw task payloads skip the draft, so they get the same checks here.
    fn check_raw_action(&self, action: &Action) -> anyhow::Result<()> {
        let (task, adding) = match action {
            Action::AddTask(task) => (task, true),
            Action::UpdateTask(task) => (task, false),
            _ => return Ok(()),
        };
        task.validate()
            .with_context(|| format!("rejected {} for task {}", action.name(), task.id))?;
        if adding && self.state().find(&task.id).is_some() {
            return Err(anyhow!("a task with id {} already exists", task.id));
        }
        Ok(())
    }

    pub fn notify_once(&self, notifier: &dyn Notifier) -> Vec<Notification> {
        scan(
            &self.state().tasks,
            self.store.now(),
            self.tz,
            self.datastore.as_ref(),
            notifier,
        )
    }

    pub fn scheduler(&self, notifier: Arc<dyn Notifier>) -> DeadlineScheduler {
        DeadlineScheduler::new(
            self.notify_interval,
            self.tz,
            self.feed.clone(),
            self.clock.clone(),
            self.datastore.clone(),
            notifier,
        )
    }

    /// Exact id, or a prefix matching exactly one task.
    fn resolve(&self, query: &str) -> anyhow::Result<TaskId> {
        let query = query.trim();
        if query.is_empty() {
            return Err(anyhow!("task id cannot be empty"));
        }

        let tasks = &self.state().tasks;
        if let Some(task) = tasks.iter().find(|task| task.id.as_str() == query) {
            return Ok(task.id.clone());
        }

        let mut matches = tasks.iter().filter(|task| task.id.as_str().starts_with(query));
        match (matches.next(), matches.next()) {
            (Some(task), None) => Ok(task.id.clone()),
            (Some(_), Some(_)) => Err(anyhow!("task id {query} is ambiguous")),
            (None, _) => Err(anyhow!("no task matches id {query}")),
        }
    }
}

/// Prints reminders as they fire, in addition to logging them.
struct ConsoleNotifier;

impl Notifier for ConsoleNotifier {
    fn notify(&self, notification: &Notification) -> anyhow::Result<()> {
        LogNotifier.notify(notification)?;
        println!("{notification}");
        Ok(())
    }
}

#[instrument(skip(session, renderer, command))]
pub fn dispatch(
    session: &mut Session,
    renderer: &Renderer,
    command: Command,
) -> anyhow::Result<()> {
    match command {
        Command::Add(args) => {
            let task = session.add(args)?;
            renderer.print_task_line("Created", &task)
        }
        Command::Edit(args) => {
            let task = session.edit(args)?;
            renderer.print_task_line("Updated", &task)
        }
        Command::Delete { id } => {
            let task = session.delete(&id)?;
            renderer.print_task_line("Deleted", &task)
        }
        Command::Done { id } => {
            let task = session.toggle(&id)?;
            let verb = if task.completed { "Completed" } else { "Reopened" };
            renderer.print_task_line(verb, &task)
        }
        Command::List(args) => {
            let views = session.list(&args);
            if args.json {
                println!("{}", serde_json::to_string_pretty(&views)?);
                return Ok(());
            }
            renderer.print_views(&views, session.store.now())
        }
        Command::Stats { timeframe, json } => {
            let views = session.views(timeframe.unwrap_or(session.timeframe));
            if json {
                println!("{}", serde_json::to_string_pretty(&views.progress)?);
                return Ok(());
            }
            renderer.print_stats(views.timeframe, &views.progress)
        }
        Command::Summary { json } => {
            let views = session.views(session.timeframe);
            if json {
                println!("{}", serde_json::to_string_pretty(&views.summary)?);
                return Ok(());
            }
            renderer.print_summary(&views.summary)
        }
        Command::Notify => {
            let emitted = session.notify_once(&LogNotifier);
            renderer.print_notifications(&emitted)
        }
        Command::Watch => watch(session),
        Command::Dispatch { action } => {
            session.dispatch_json(&action)?;
            let views = session.views(session.timeframe);
            renderer.print_views(&views, session.store.now())
        }
    }
}

fn watch(session: &Session) -> anyhow::Result<()> {
    let handle = session.scheduler(Arc::new(ConsoleNotifier)).spawn()?;
    println!(
        "Watching deadlines every {}s; press Enter to stop.",
        session.notify_interval.as_secs()
    );

    let mut line = String::new();
    let read = io::stdin().lock().read_line(&mut line);
    handle.stop()?;
    read.context("failed reading stdin")?;
    Ok(())
}
