use std::sync::Arc;

use chrono::{DateTime, Duration, TimeZone, Utc};
use taskdeck_core::clock::FixedClock;
use taskdeck_core::datastore::{DataStore, NotificationLedger, TaskRepository};
use taskdeck_core::filter::{Choice, FilterPatch};
use taskdeck_core::notify::{LogNotifier, NotificationKind, scan};
use taskdeck_core::stats::Timeframe;
use taskdeck_core::store::{Action, Store};
use taskdeck_core::task::{Category, Priority, TaskDraft};
use taskdeck_core::view::DerivedViews;
use tempfile::tempdir;

fn utc(d: u32, h: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 10, d, h, 0, 0)
        .single()
        .expect("valid instant")
}

#[test]
fn store_changes_survive_a_reopen() {
    let temp = tempdir().expect("tempdir");
    let clock = Arc::new(FixedClock::new(utc(14, 12)));

    let (milk, report) = {
        let datastore = Arc::new(DataStore::open(temp.path()).expect("open datastore"));
        let mut store = Store::open(datastore, clock.clone());

        let mut milk = TaskDraft::new("Buy milk");
        milk.priority = Priority::Low;
        milk.category = Category::Shopping;
        let milk = milk.into_task(utc(14, 9)).expect("valid draft");

        let mut report = TaskDraft::new("Quarterly report");
        report.priority = Priority::High;
        report.category = Category::Work;
        report.deadline = Some(utc(13, 17));
        let report = report.into_task(utc(10, 9)).expect("valid draft");

        store.dispatch(Action::AddTask(milk.clone()));
        store.dispatch(Action::AddTask(report.clone()));
        store.dispatch(Action::ToggleComplete(milk.id.clone()));
        (milk, report)
    };

    let datastore = Arc::new(DataStore::open(temp.path()).expect("reopen datastore"));
    let mut store = Store::open(datastore, clock);
    let tasks = &store.state().tasks;
    assert_eq!(tasks.len(), 2);
    assert_eq!(tasks[0].id, milk.id);
    assert!(tasks[0].completed);
    assert_eq!(tasks[0].completed_at, Some(utc(14, 12)));
    assert_eq!(tasks[1].id, report.id);

    store.dispatch(Action::SetFilter(FilterPatch {
        category: Some(Choice::Only(Category::Work)),
        ..FilterPatch::default()
    }));
    let views = DerivedViews::compute(
        store.state(),
        Timeframe::Weekly,
        utc(14, 12),
        chrono_tz::UTC,
    );
    assert!(views.has_overdue);
    assert_eq!(views.visible.len(), 1);
    assert_eq!(views.visible[0].id, report.id);
    assert!(views.visible.iter().all(|task| task.id != milk.id));
}

#[test]
fn hand_written_json_with_null_deadline_loads() {
    let temp = tempdir().expect("tempdir");
    let datastore = DataStore::open(temp.path()).expect("open datastore");
    std::fs::write(
        &datastore.tasks_path,
        r#"[{"id":"1","title":"Water plants","priority":"medium","category":"personal",
            "deadline":null,"completed":false,"completedAt":null,
            "createdAt":"2026-10-12T08:00:00.000Z"}]"#,
    )
    .expect("write tasks.json");

    let tasks = datastore.load().expect("load").expect("tasks present");
    assert_eq!(tasks.len(), 1);
    assert_eq!(tasks[0].deadline, None);
    assert_eq!(tasks[0].created_at, utc(12, 8));
}

#[test]
fn corrupt_file_starts_empty_and_is_replaced_on_next_change() {
    let temp = tempdir().expect("tempdir");
    let datastore = Arc::new(DataStore::open(temp.path()).expect("open datastore"));
    std::fs::write(&datastore.tasks_path, "{ broken").expect("write tasks.json");

    let mut store = Store::open(datastore.clone(), Arc::new(FixedClock::new(utc(14, 12))));
    assert!(store.state().tasks.is_empty());

    let task = TaskDraft::new("Start over").into_task(utc(14, 12)).expect("valid draft");
    store.dispatch(Action::AddTask(task.clone()));
    assert_eq!(datastore.load().expect("load"), Some(vec![task]));
}

#[test]
fn weekly_window_starts_on_preceding_sunday() {
    // 2026-10-14 is a Wednesday; the week began 2026-10-11 00:00 UTC.
    let now = utc(14, 12);
    let inside = TaskDraft::new("This week").into_task(utc(11, 0)).expect("valid draft");
    let before = TaskDraft::new("Last week").into_task(utc(10, 23)).expect("valid draft");

    let mut store = Store::new(Arc::new(FixedClock::new(now)));
    store.dispatch(Action::LoadTasks(vec![inside.clone(), before]));
    store.dispatch(Action::ToggleComplete(inside.id));

    let views = DerivedViews::compute(store.state(), Timeframe::Weekly, now, chrono_tz::UTC);
    assert_eq!(views.progress.total, 1);
    assert_eq!(views.progress.completed, 1);
    assert_eq!(views.progress.completion_rate, 100);
}

#[test]
fn reminder_flags_persist_across_reopen() {
    let temp = tempdir().expect("tempdir");
    let mut draft = TaskDraft::new("Renew passport");
    draft.deadline = Some(utc(14, 12));
    let task = draft.into_task(utc(1, 0)).expect("valid draft");
    let tasks = vec![task.clone()];

    {
        let datastore = DataStore::open(temp.path()).expect("open datastore");
        let emitted = scan(&tasks, utc(14, 12), chrono_tz::UTC, &datastore, &LogNotifier);
        assert_eq!(emitted.len(), 1);
        assert_eq!(emitted[0].kind, NotificationKind::DueToday);
    }

    let datastore = DataStore::open(temp.path()).expect("reopen datastore");
    assert!(scan(&tasks, utc(14, 20), chrono_tz::UTC, &datastore, &LogNotifier).is_empty());
    assert_eq!(datastore.last_notified(&task.id), Some(utc(14, 0).date_naive()));

    let next_morning = utc(15, 9) + Duration::minutes(1);
    let next_day = scan(&tasks, next_morning, chrono_tz::UTC, &datastore, &LogNotifier);
    assert_eq!(next_day.len(), 1);
    assert_eq!(next_day[0].kind, NotificationKind::Overdue);
}
