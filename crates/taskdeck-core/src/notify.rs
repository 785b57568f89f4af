use std::fmt;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::{Arc, PoisonError, RwLock};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use anyhow::{Context, anyhow};
use chrono::{DateTime, NaiveDate, Utc};
use chrono_tz::Tz;
use serde::Serialize;
use tracing::{debug, error, info, instrument};

use crate::clock::Clock;
use crate::datastore::NotificationLedger;
use crate::datetime::local_date;
use crate::task::{Task, TaskId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    Overdue,
    DueToday,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Notification {
    pub task_id: TaskId,
    pub title: String,
    pub kind: NotificationKind,
    pub day: NaiveDate,
}

impl fmt::Display for Notification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            NotificationKind::Overdue => write!(f, "\"{}\" is overdue!", self.title),
            NotificationKind::DueToday => write!(f, "\"{}\" is due today!", self.title),
        }
    }
}

/// Delivery channel for reminders.
pub trait Notifier: Send + Sync {
    fn notify(&self, notification: &Notification) -> anyhow::Result<()>;
}

/// Emits reminders as structured log events.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn notify(&self, notification: &Notification) -> anyhow::Result<()> {
        info!(
            task = %notification.task_id,
            kind = ?notification.kind,
            "task reminder: {notification}"
        );
        Ok(())
    }
}

/// Latest task collection, shared between the store and the scheduler thread.
#[derive(Debug, Clone, Default)]
pub struct TaskFeed(Arc<RwLock<Vec<Task>>>);

impl TaskFeed {
    pub fn publish(&self, tasks: &[Task]) {
        *self.0.write().unwrap_or_else(PoisonError::into_inner) = tasks.to_vec();
    }

    pub fn snapshot(&self) -> Vec<Task> {
        self.0.read().unwrap_or_else(PoisonError::into_inner).clone()
    }
}

/// One pass over `tasks`: every incomplete task whose deadline has arrived and
/// that has not been flagged today is announced once, then flagged.
///
/// A deadline strictly before `now` is reported as overdue, one exactly at
/// `now` as due today. Delivery and flag failures are logged and do not stop
/// the pass.
#[instrument(skip(tasks, now, tz, ledger, notifier), fields(tasks = tasks.len()))]
pub fn scan(
    tasks: &[Task],
    now: DateTime<Utc>,
    tz: Tz,
    ledger: &dyn NotificationLedger,
    notifier: &dyn Notifier,
) -> Vec<Notification> {
    let today = local_date(now, tz);
    let mut emitted = Vec::new();

    for task in tasks {
        if task.completed {
            continue;
        }
        let Some(deadline) = task.deadline else {
            continue;
        };
        if deadline > now {
            continue;
        }
        if ledger.last_notified(&task.id) == Some(today) {
            debug!(task = %task.id, "already notified today");
            continue;
        }

        let kind = if deadline < now {
            NotificationKind::Overdue
        } else {
            NotificationKind::DueToday
        };
        let notification = Notification {
            task_id: task.id.clone(),
            title: task.title.clone(),
            kind,
            day: today,
        };

        if let Err(err) = notifier.notify(&notification) {
            error!(task = %task.id, error = %format!("{err:#}"), "failed to deliver reminder");
        }
        if let Err(err) = ledger.mark_notified(&task.id, today) {
            error!(task = %task.id, error = %format!("{err:#}"), "failed to record reminder");
        }
        emitted.push(notification);
    }

    debug!(emitted = emitted.len(), "deadline scan finished");
    emitted
}

/// Recurring deadline scan over a [`TaskFeed`], independent of store dispatch.
pub struct DeadlineScheduler {
    interval: Duration,
    tz: Tz,
    feed: TaskFeed,
    clock: Arc<dyn Clock>,
    ledger: Arc<dyn NotificationLedger>,
    notifier: Arc<dyn Notifier>,
}

impl DeadlineScheduler {
    pub fn new(
        interval: Duration,
        tz: Tz,
        feed: TaskFeed,
        clock: Arc<dyn Clock>,
        ledger: Arc<dyn NotificationLedger>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            interval,
            tz,
            feed,
            clock,
            ledger,
            notifier,
        }
    }

    pub fn run_once(&self) -> Vec<Notification> {
        let tasks = self.feed.snapshot();
        scan(
            &tasks,
            self.clock.now(),
            self.tz,
            self.ledger.as_ref(),
            self.notifier.as_ref(),
        )
    }

    /// Scans immediately, then once per interval until the handle is stopped
    /// or dropped.
    pub fn spawn(self) -> anyhow::Result<SchedulerHandle> {
        let (stop_tx, stop_rx) = mpsc::channel::<()>();
        let interval = self.interval;

        let join = thread::Builder::new()
            .name("deadline-scheduler".to_string())
            .spawn(move || {
                info!(interval_secs = interval.as_secs(), "deadline scheduler started");
                loop {
                    self.run_once();
                    match stop_rx.recv_timeout(interval) {
                        Err(RecvTimeoutError::Timeout) => continue,
                        Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                    }
                }
                info!("deadline scheduler stopped");
            })
            .context("failed to spawn deadline scheduler thread")?;

        Ok(SchedulerHandle { stop_tx, join })
    }
}

pub struct SchedulerHandle {
    stop_tx: mpsc::Sender<()>,
    join: JoinHandle<()>,
}

impl SchedulerHandle {
    pub fn stop(self) -> anyhow::Result<()> {
        // a closed channel means the thread is already on its way out
        let _ = self.stop_tx.send(());
        self.join
            .join()
            .map_err(|_| anyhow!("deadline scheduler thread panicked"))
    }
}
