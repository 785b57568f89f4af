use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use serde::Serialize;

use crate::filter::{has_overdue, visible_tasks};
use crate::stats::{SummaryStats, Timeframe, TimeframeStats, summary_stats, timeframe_stats};
use crate::store::State;
use crate::task::Task;

/// Everything the front end shows, derived from one state snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DerivedViews {
    pub visible: Vec<Task>,
    pub timeframe: Timeframe,
    pub progress: TimeframeStats,
    pub summary: SummaryStats,
    pub has_overdue: bool,
    pub filtered: bool,
    pub total_tasks: usize,
}

impl DerivedViews {
    /// Recomputed from scratch on every call; nothing is cached.
    #[tracing::instrument(skip(state, now, tz), fields(timeframe = %timeframe))]
    pub fn compute(state: &State, timeframe: Timeframe, now: DateTime<Utc>, tz: Tz) -> Self {
        Self {
            visible: visible_tasks(&state.tasks, &state.filter, now),
            timeframe,
            progress: timeframe_stats(&state.tasks, timeframe, now, tz),
            summary: summary_stats(&state.tasks, now, tz),
            has_overdue: has_overdue(&state.tasks, now),
            filtered: !state.filter.is_default(),
            total_tasks: state.tasks.len(),
        }
    }

    /// Message for an empty list, or `None` when there is something to show.
    pub fn empty_message(&self) -> Option<&'static str> {
        if !self.visible.is_empty() {
            return None;
        }
        Some(if self.filtered {
            "No tasks match your current filters."
        } else {
            "No tasks yet. Add a new task to get started!"
        })
    }
}
