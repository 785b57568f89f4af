use std::fmt;
use std::str::FromStr;

use anyhow::anyhow;
use chrono::{DateTime, Duration, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

use crate::datetime::{add_days, local_date, start_of_day, start_of_month, start_of_week};
use crate::task::Task;

/// Look-ahead used by the timeframe panel's "upcoming" count.
const TIMEFRAME_UPCOMING_DAYS: i64 = 3;
/// Look-ahead used by the summary's "upcoming" count, in calendar days.
const SUMMARY_UPCOMING_DAYS: u64 = 7;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum Timeframe {
    #[default]
    Daily,
    Weekly,
    Monthly,
}

impl Timeframe {
    pub fn as_str(self) -> &'static str {
        match self {
            Timeframe::Daily => "daily",
            Timeframe::Weekly => "weekly",
            Timeframe::Monthly => "monthly",
        }
    }

    /// `[start, now]` window for this timeframe in `tz`.
    pub fn window(self, now: DateTime<Utc>, tz: Tz) -> (DateTime<Utc>, DateTime<Utc>) {
        let today = local_date(now, tz);
        let start_date = match self {
            Timeframe::Daily => today,
            Timeframe::Weekly => start_of_week(today),
            Timeframe::Monthly => start_of_month(today),
        };
        (start_of_day(start_date, tz), now)
    }
}

impl fmt::Display for Timeframe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Timeframe {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "daily" | "day" | "today" => Ok(Timeframe::Daily),
            "weekly" | "week" => Ok(Timeframe::Weekly),
            "monthly" | "month" => Ok(Timeframe::Monthly),
            other => Err(anyhow!("unknown timeframe: {other}")),
        }
    }
}

/// Progress within a timeframe window.
///
/// `total`, `completed` and `completion_rate` only see tasks created inside the
/// window; `overdue` and `upcoming` always scan the whole collection.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct TimeframeStats {
    pub total: usize,
    pub completed: usize,
    pub overdue: usize,
    pub upcoming: usize,
    pub completion_rate: u8,
}

impl TimeframeStats {
    pub fn remaining(&self) -> usize {
        self.total.saturating_sub(self.completed)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct SummaryStats {
    pub overdue: usize,
    pub due_today: usize,
    pub upcoming: usize,
    pub completed: usize,
}

/// Rounded percentage, halves rounding up. An empty window is 0.
pub fn completion_rate(completed: usize, total: usize) -> u8 {
    if total == 0 {
        return 0;
    }
    let rounded = (completed.min(total) * 200 + total) / (2 * total);
    u8::try_from(rounded).unwrap_or(100)
}

#[tracing::instrument(skip(tasks, now, tz), fields(timeframe = %timeframe))]
pub fn timeframe_stats(
    tasks: &[Task],
    timeframe: Timeframe,
    now: DateTime<Utc>,
    tz: Tz,
) -> TimeframeStats {
    let (start, end) = timeframe.window(now, tz);
    let in_window = tasks
        .iter()
        .filter(|task| task.created_at >= start && task.created_at <= end);

    let (total, completed) = in_window.fold((0, 0), |(total, completed), task| {
        (total + 1, completed + usize::from(task.completed))
    });

    let horizon = now + Duration::days(TIMEFRAME_UPCOMING_DAYS);
    let overdue = tasks.iter().filter(|task| task.is_overdue(now)).count();
    let upcoming = tasks
        .iter()
        .filter(|task| {
            !task.completed
                && task
                    .deadline
                    .is_some_and(|deadline| deadline > now && deadline <= horizon)
        })
        .count();

    TimeframeStats {
        total,
        completed,
        overdue,
        upcoming,
        completion_rate: completion_rate(completed, total),
    }
}

#[tracing::instrument(skip(tasks, now, tz))]
pub fn summary_stats(tasks: &[Task], now: DateTime<Utc>, tz: Tz) -> SummaryStats {
    let today = local_date(now, tz);
    let horizon = start_of_day(add_days(today, SUMMARY_UPCOMING_DAYS), tz);

    let mut summary = SummaryStats::default();
    for task in tasks {
        if task.completed {
            summary.completed += 1;
            continue;
        }
        let Some(deadline) = task.deadline else {
            continue;
        };
        if deadline < now {
            summary.overdue += 1;
        }
        if local_date(deadline, tz) == today {
            summary.due_today += 1;
        } else if deadline > now && deadline <= horizon {
            summary.upcoming += 1;
        }
    }
    summary
}

#[cfg(test)]
mod tests {
    use chrono::{DateTime, Duration, TimeZone, Utc};

    use super::{Timeframe, completion_rate, summary_stats, timeframe_stats};
    use crate::task::{Task, TaskDraft};

    fn at(y: i32, m: u32, d: u32, h: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, h, 0, 0)
            .single()
            .expect("valid instant")
    }

    fn created(title: &str, created_at: DateTime<Utc>) -> Task {
        TaskDraft::new(title).into_task(created_at).expect("valid draft")
    }

    fn due(title: &str, deadline: DateTime<Utc>) -> Task {
        let mut draft = TaskDraft::new(title);
        draft.deadline = Some(deadline);
        draft.into_task(at(2026, 10, 1, 0)).expect("valid draft")
    }

    #[test]
    fn empty_window_has_zero_rate() {
        let stats = timeframe_stats(&[], Timeframe::Daily, at(2026, 10, 14, 12), chrono_tz::UTC);
        assert_eq!(stats.total, 0);
        assert_eq!(stats.completion_rate, 0);
        assert_eq!(completion_rate(0, 0), 0);
    }

    #[test]
    fn rate_rounds_half_up() {
        assert_eq!(completion_rate(1, 3), 33);
        assert_eq!(completion_rate(2, 3), 67);
        assert_eq!(completion_rate(1, 8), 13);
        assert_eq!(completion_rate(5, 5), 100);
    }

    #[test]
    fn weekly_window_starts_on_sunday_midnight() {
        // Wednesday 2026-10-14; the week began Sunday 2026-10-11
        let now = at(2026, 10, 14, 15);
        let tasks = vec![
            created("saturday", at(2026, 10, 10, 23)),
            created("sunday", at(2026, 10, 11, 0)),
            created("tuesday", at(2026, 10, 13, 9)).toggled(at(2026, 10, 13, 10)),
            created("future", at(2026, 10, 14, 16)),
        ];

        let weekly = timeframe_stats(&tasks, Timeframe::Weekly, now, chrono_tz::UTC);
        assert_eq!(weekly.total, 2);
        assert_eq!(weekly.completed, 1);
        assert_eq!(weekly.completion_rate, 50);
        assert_eq!(weekly.remaining(), 1);

        let daily = timeframe_stats(&tasks, Timeframe::Daily, now, chrono_tz::UTC);
        assert_eq!(daily.total, 0);

        let monthly = timeframe_stats(&tasks, Timeframe::Monthly, now, chrono_tz::UTC);
        assert_eq!(monthly.total, 3);
    }

    #[test]
    fn weekly_window_follows_local_calendar() {
        let tz = chrono_tz::America::New_York;
        // 2026-10-11 02:00 UTC is still Saturday evening in New York
        let tasks = vec![created("late saturday", at(2026, 10, 11, 2))];
        let stats = timeframe_stats(&tasks, Timeframe::Weekly, at(2026, 10, 14, 15), tz);
        assert_eq!(stats.total, 0);
    }

    #[test]
    fn timeframe_counts_overdue_and_three_day_upcoming() {
        let now = at(2026, 10, 14, 12);
        let tasks = vec![
            due("late", now - Duration::hours(1)),
            due("soon", now + Duration::days(2)),
            due("later", now + Duration::days(4)),
            due("finished", now - Duration::days(1)).toggled(now),
        ];
        let stats = timeframe_stats(&tasks, Timeframe::Daily, now, chrono_tz::UTC);
        assert_eq!(stats.overdue, 1);
        assert_eq!(stats.upcoming, 1);
    }

    #[test]
    fn summary_splits_overdue_today_and_upcoming() {
        let now = at(2026, 10, 14, 12);
        let tasks = vec![
            due("yesterday", at(2026, 10, 13, 9)),
            due("this morning", at(2026, 10, 14, 8)),
            due("tonight", at(2026, 10, 14, 20)),
            due("tomorrow", at(2026, 10, 15, 9)),
            due("next tuesday", at(2026, 10, 20, 23)),
            due("eight days", at(2026, 10, 22, 9)),
            due("done", at(2026, 10, 13, 9)).toggled(now),
            created("undated", at(2026, 10, 14, 9)),
        ];

        let summary = summary_stats(&tasks, now, chrono_tz::UTC);
        assert_eq!(summary.overdue, 2);
        assert_eq!(summary.due_today, 2);
        assert_eq!(summary.upcoming, 2);
        assert_eq!(summary.completed, 1);
    }
}
