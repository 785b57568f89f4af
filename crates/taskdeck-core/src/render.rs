use std::io::{self, IsTerminal, Write};

use anyhow::anyhow;
use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use unicode_width::UnicodeWidthStr;

use crate::config::Config;
use crate::notify::Notification;
use crate::stats::{SummaryStats, Timeframe, TimeframeStats};
use crate::task::Task;
use crate::view::DerivedViews;

const RED: &str = "31";
const YELLOW: &str = "33";
const GREEN: &str = "32";
const DIM: &str = "2";

#[derive(Debug, Clone)]
pub struct Renderer {
    color: bool,
    tz: Tz,
}

impl Renderer {
    pub fn new(cfg: &Config, tz: Tz) -> anyhow::Result<Self> {
        let color_cfg = cfg.get("color").unwrap_or_else(|| "on".to_string());
        let color = match color_cfg.to_ascii_lowercase().as_str() {
            "on" | "yes" | "true" | "1" => io::stdout().is_terminal(),
            "off" | "no" | "false" | "0" => false,
            other => return Err(anyhow!("invalid color setting: {other}")),
        };

        Ok(Self { color, tz })
    }

    #[tracing::instrument(skip(self, views, now), fields(visible = views.visible.len()))]
    pub fn print_views(&self, views: &DerivedViews, now: DateTime<Utc>) -> anyhow::Result<()> {
        let mut out = io::stdout().lock();

        if views.has_overdue {
            writeln!(out, "{}", self.paint("You have overdue tasks!", RED))?;
            writeln!(out)?;
        }

        match views.empty_message() {
            Some(message) => writeln!(out, "{message}")?,
            None => self.write_task_table(&mut out, &views.visible, now)?,
        }

        writeln!(out)?;
        self.write_progress(&mut out, views.timeframe, &views.progress)?;
        Ok(())
    }

    pub fn print_stats(&self, timeframe: Timeframe, stats: &TimeframeStats) -> anyhow::Result<()> {
        let mut out = io::stdout().lock();
        self.write_progress(&mut out, timeframe, stats)?;
        writeln!(out, "  overdue   {}", stats.overdue)?;
        writeln!(out, "  upcoming  {}", stats.upcoming)?;
        Ok(())
    }

    pub fn print_summary(&self, summary: &SummaryStats) -> anyhow::Result<()> {
        let mut out = io::stdout().lock();
        self.write_summary(&mut out, summary)
    }

    pub fn print_notifications(&self, notifications: &[Notification]) -> anyhow::Result<()> {
        let mut out = io::stdout().lock();
        if notifications.is_empty() {
            writeln!(out, "No reminders due.")?;
            return Ok(());
        }
        for notification in notifications {
            writeln!(
                out,
                "{} {}",
                self.paint(notification.task_id.short(), DIM),
                notification
            )?;
        }
        Ok(())
    }

    pub fn print_task_line(&self, verb: &str, task: &Task) -> anyhow::Result<()> {
        let mut out = io::stdout().lock();
        writeln!(
            out,
            "{verb} task {} \"{}\"",
            self.paint(task.id.short(), YELLOW),
            task.title
        )?;
        Ok(())
    }

    fn write_task_table<W: Write>(
        &self,
        out: W,
        tasks: &[Task],
        now: DateTime<Utc>,
    ) -> anyhow::Result<()> {
        let headers = vec![
            "ID".to_string(),
            "Done".to_string(),
            "Priority".to_string(),
            "Category".to_string(),
            "Deadline".to_string(),
            "Title".to_string(),
        ];

        let rows = tasks
            .iter()
            .map(|task| {
                let deadline = task
                    .deadline
                    .map(|d| d.with_timezone(&self.tz).format("%Y-%m-%d %H:%M").to_string())
                    .unwrap_or_default();
                let deadline = if task.is_overdue(now) {
                    self.paint(&deadline, RED)
                } else if !task.completed && task.is_due_today(now, self.tz) {
                    self.paint(&deadline, YELLOW)
                } else {
                    deadline
                };

                let done = if task.completed {
                    self.paint("x", GREEN)
                } else {
                    String::new()
                };

                vec![
                    self.paint(task.id.short(), YELLOW),
                    done,
                    task.priority.to_string(),
                    task.category.to_string(),
                    deadline,
                    task.title.clone(),
                ]
            })
            .collect();

        write_table(out, headers, rows)
    }

    fn write_progress<W: Write>(
        &self,
        mut out: W,
        timeframe: Timeframe,
        stats: &TimeframeStats,
    ) -> anyhow::Result<()> {
        writeln!(
            out,
            "{} progress: {}/{} completed ({}%), {} remaining",
            capitalize(timeframe.as_str()),
            stats.completed,
            stats.total,
            stats.completion_rate,
            stats.remaining()
        )?;
        Ok(())
    }

    fn write_summary<W: Write>(&self, mut out: W, summary: &SummaryStats) -> anyhow::Result<()> {
        let overdue = summary.overdue.to_string();
        let overdue = if summary.overdue > 0 {
            self.paint(&overdue, RED)
        } else {
            overdue
        };
        writeln!(out, "Overdue    {overdue}")?;
        writeln!(out, "Due today  {}", summary.due_today)?;
        writeln!(out, "Upcoming   {}", summary.upcoming)?;
        writeln!(out, "Completed  {}", summary.completed)?;
        Ok(())
    }

    fn paint(&self, text: &str, code: &str) -> String {
        if !self.color {
            return text.to_string();
        }
        format!("\x1b[{code}m{text}\x1b[0m")
    }
}

fn capitalize(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

fn write_table<W: Write>(
    mut writer: W,
    headers: Vec<String>,
    rows: Vec<Vec<String>>,
) -> anyhow::Result<()> {
    let mut widths: Vec<usize> = headers
        .iter()
        .map(|header| UnicodeWidthStr::width(header.as_str()))
        .collect();

    for row in &rows {
        for (width, cell) in widths.iter_mut().zip(row) {
            *width = (*width).max(UnicodeWidthStr::width(strip_ansi(cell).as_str()));
        }
    }

    let line = headers
        .iter()
        .zip(&widths)
        .map(|(header, width)| format!("{header:width$}"))
        .collect::<Vec<_>>()
        .join(" ");
    writeln!(writer, "{}", line.trim_end())?;

    let rule = widths
        .iter()
        .map(|width| "-".repeat(*width))
        .collect::<Vec<_>>()
        .join(" ");
    writeln!(writer, "{rule}")?;

    for row in rows {
        let line = row
            .iter()
            .zip(&widths)
            .map(|(cell, width)| {
                let visible = UnicodeWidthStr::width(strip_ansi(cell).as_str());
                format!("{cell}{}", " ".repeat(width.saturating_sub(visible)))
            })
            .collect::<Vec<_>>()
            .join(" ");
        writeln!(writer, "{}", line.trim_end())?;
    }

    Ok(())
}

fn strip_ansi(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut escaped = false;

    for ch in s.chars() {
        if escaped {
            if ch == 'm' {
                escaped = false;
            }
            continue;
        }

        if ch == '\x1b' {
            escaped = true;
            continue;
        }

        out.push(ch);
    }

    out
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, TimeZone, Utc};

    use super::{Renderer, strip_ansi, write_table};
    use crate::stats::SummaryStats;
    use crate::task::{Category, Priority, TaskDraft};

    fn plain() -> Renderer {
        Renderer {
            color: false,
            tz: chrono_tz::UTC,
        }
    }

    #[test]
    fn table_aligns_wide_characters() {
        let mut buf = Vec::new();
        write_table(
            &mut buf,
            vec!["ID".to_string(), "Title".to_string()],
            vec![
                vec!["\x1b[33mab\x1b[0m".to_string(), "寿司を買う".to_string()],
                vec!["cdef".to_string(), "tea".to_string()],
            ],
        )
        .expect("write table");

        let text = String::from_utf8(buf).expect("utf8");
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "ID   Title");
        assert_eq!(lines[1], "---- ----------");
        assert_eq!(strip_ansi(lines[2]), "ab   寿司を買う");
        assert_eq!(lines[3], "cdef tea");
    }

    #[test]
    fn task_rows_show_local_deadline_and_short_id() {
        let now = Utc
            .with_ymd_and_hms(2026, 10, 14, 12, 0, 0)
            .single()
            .expect("valid now");
        let mut draft = TaskDraft::new("Buy milk");
        draft.priority = Priority::Low;
        draft.category = Category::Shopping;
        draft.deadline = Some(now + Duration::days(1));
        let task = draft.into_task(now).expect("valid draft");

        let mut buf = Vec::new();
        plain()
            .write_task_table(&mut buf, std::slice::from_ref(&task), now)
            .expect("write table");
        let text = String::from_utf8(buf).expect("utf8");
        let row = text.lines().nth(2).expect("task row");

        assert!(row.starts_with(task.id.short()));
        assert!(row.contains("low"));
        assert!(row.contains("shopping"));
        assert!(row.contains("2026-10-15 12:00"));
        assert!(row.ends_with("Buy milk"));
    }

    #[test]
    fn summary_lists_each_bucket() {
        let mut buf = Vec::new();
        plain()
            .write_summary(
                &mut buf,
                &SummaryStats {
                    overdue: 1,
                    due_today: 2,
                    upcoming: 3,
                    completed: 4,
                },
            )
            .expect("write summary");
        let text = String::from_utf8(buf).expect("utf8");
        assert_eq!(
            text,
            "Overdue    1\nDue today  2\nUpcoming   3\nCompleted  4\n"
        );
    }
}
