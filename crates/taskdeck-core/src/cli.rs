use std::ffi::OsString;
use std::io::IsTerminal;
use std::path::PathBuf;

use anyhow::anyhow;
use clap::{ArgAction, Args, Parser, Subcommand};
use tracing::debug;
use tracing_subscriber::EnvFilter;

use crate::filter::{Choice, StatusFilter};
use crate::stats::Timeframe;
use crate::task::{Category, Priority};

#[derive(Debug, Clone)]
pub struct PreprocessedArgs {
    pub cleaned_args: Vec<OsString>,
    pub rc_overrides: Vec<(String, String)>,
}

#[derive(Debug, Clone)]
pub struct KeyVal {
    pub key: String,
    pub value: String,
}

impl std::str::FromStr for KeyVal {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (k, v) = s
            .split_once('=')
            .ok_or_else(|| anyhow!("expected KEY=VALUE, got: {s}"))?;
        Ok(Self {
            key: k.trim().to_string(),
            value: v.trim().to_string(),
        })
    }
}

#[derive(Parser, Debug, Clone)]
#[command(
    name = "taskdeck",
    version,
    about = "taskdeck: personal task tracker with deadlines, stats and reminders",
    disable_help_subcommand = true
)]
pub struct GlobalCli {
    #[arg(short = 'v', long = "verbose", action = ArgAction::Count, global = true)]
    pub verbose: u8,

    #[arg(short = 'q', long = "quiet", action = ArgAction::Count, global = true)]
    pub quiet: u8,

    #[arg(
        long = "rc",
        value_parser = clap::builder::ValueParser::new(|s: &str| s.parse::<KeyVal>()),
        action = ArgAction::Append
    )]
    pub rc_overrides: Vec<KeyVal>,

    #[arg(long = "taskrc")]
    pub taskrc: Option<PathBuf>,

    #[arg(long = "data")]
    pub data: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Create a new task.
    Add(AddArgs),
    /// Change fields of an existing task.
    Edit(EditArgs),
    /// Remove a task.
    Delete {
        /// Task id or unique id prefix.
        id: String,
    },
    /// Toggle a task between active and completed.
    Done {
        /// Task id or unique id prefix.
        id: String,
    },
    /// Show tasks through the filter and sort pipeline.
    List(ListArgs),
    /// Progress for a daily, weekly or monthly window.
    Stats {
        #[arg(long)]
        timeframe: Option<Timeframe>,

        #[arg(long)]
        json: bool,
    },
    /// Overdue, due today, upcoming and completed counts.
    Summary {
        #[arg(long)]
        json: bool,
    },
    /// Run one deadline scan and report what was announced.
    Notify,
    /// Run the deadline scheduler until Enter or end of input.
    Watch,
    /// Feed a raw JSON action, e.g. {"type":"TOGGLE_COMPLETE","payload":"<id>"}.
    Dispatch {
        action: String,
    },
}

#[derive(Args, Debug, Clone)]
pub struct AddArgs {
    /// Task title; multiple words are joined with spaces.
    #[arg(required = true, num_args = 1..)]
    pub title: Vec<String>,

    #[arg(short = 'd', long)]
    pub description: Option<String>,

    #[arg(short = 'p', long)]
    pub priority: Option<Priority>,

    #[arg(short = 'c', long)]
    pub category: Option<Category>,

    /// Date, date and time, or an expression like `tomorrow`, `friday`, `+3d`.
    #[arg(long)]
    pub deadline: Option<String>,
}

#[derive(Args, Debug, Clone)]
pub struct EditArgs {
    pub id: String,

    #[arg(long)]
    pub title: Option<String>,

    #[arg(short = 'd', long)]
    pub description: Option<String>,

    #[arg(short = 'p', long)]
    pub priority: Option<Priority>,

    #[arg(short = 'c', long)]
    pub category: Option<Category>,

    #[arg(long, conflicts_with = "clear_deadline")]
    pub deadline: Option<String>,

    #[arg(long)]
    pub clear_deadline: bool,
}

#[derive(Args, Debug, Clone, Default)]
pub struct ListArgs {
    #[arg(long)]
    pub status: Option<StatusFilter>,

    #[arg(long)]
    pub priority: Option<Choice<Priority>>,

    #[arg(long)]
    pub category: Option<Choice<Category>>,

    #[arg(long)]
    pub search: Option<String>,

    /// Print the derived views as JSON instead of a table.
    #[arg(long)]
    pub json: bool,
}

pub fn init_tracing(verbose: u8, quiet: u8) -> anyhow::Result<()> {
    let default_level = if quiet >= 2 {
        "error"
    } else if quiet == 1 {
        "warn"
    } else if verbose >= 3 {
        "trace"
    } else if verbose == 2 {
        "debug"
    } else if verbose == 1 {
        "info"
    } else {
        "warn"
    };

    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_level))
        .map_err(|e| anyhow!("invalid RUST_LOG / log filter: {e}"))?;

    let init_result = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_level(true)
        .with_thread_names(true)
        .with_ansi(std::io::stderr().is_terminal())
        .try_init();

    if let Err(err) = init_result {
        debug!(error = %err, "tracing subscriber already set, continuing");
    }

    Ok(())
}

/// Pulls positional `rc.key=value` (or `rc.key:value`) overrides out of the
/// raw argument list before clap sees it.
#[tracing::instrument(skip_all)]
pub fn preprocess_args(raw: &[OsString]) -> anyhow::Result<PreprocessedArgs> {
    let mut cleaned = Vec::with_capacity(raw.len());
    let mut overrides: Vec<(String, String)> = Vec::new();

    let mut iter = raw.iter().cloned();
    if let Some(bin) = iter.next() {
        cleaned.push(bin);
    }

    for arg in iter {
        let s = arg.to_string_lossy();
        if let Some(rest) = s.strip_prefix("rc.") {
            let parsed = rest
                .split_once('=')
                .or_else(|| rest.split_once(':'))
                .map(|(k, v)| (format!("rc.{k}"), v.to_string()));

            if let Some((k, v)) = parsed {
                debug!(key = %k, value = %v, "captured positional rc override");
                overrides.push((k, v));
                continue;
            }
        }

        cleaned.push(arg);
    }

    Ok(PreprocessedArgs {
        cleaned_args: cleaned,
        rc_overrides: overrides,
    })
}

#[cfg(test)]
mod tests {
    use std::ffi::OsString;

    use clap::Parser;

    use super::{Command, GlobalCli, preprocess_args};
    use crate::filter::{Choice, StatusFilter};
    use crate::task::Priority;

    fn args(list: &[&str]) -> Vec<OsString> {
        list.iter().map(OsString::from).collect()
    }

    #[test]
    fn positional_rc_overrides_are_extracted() {
        let pre = preprocess_args(&args(&["taskdeck", "rc.color=off", "list", "rc.timezone:UTC"]))
            .expect("preprocess");
        assert_eq!(pre.cleaned_args, args(&["taskdeck", "list"]));
        assert_eq!(
            pre.rc_overrides,
            vec![
                ("rc.color".to_string(), "off".to_string()),
                ("rc.timezone".to_string(), "UTC".to_string()),
            ]
        );
    }

    #[test]
    fn list_flags_parse_into_filter_values() {
        let cli = GlobalCli::try_parse_from(args(&[
            "taskdeck",
            "list",
            "--status",
            "overdue",
            "--priority",
            "high",
            "--category",
            "all",
        ]))
        .expect("parse");

        let Some(Command::List(list)) = cli.command else {
            panic!("expected list command");
        };
        assert_eq!(list.status, Some(StatusFilter::Overdue));
        assert_eq!(list.priority, Some(Choice::Only(Priority::High)));
        assert_eq!(list.category, Some(Choice::All));
    }

    #[test]
    fn add_joins_title_words() {
        let cli = GlobalCli::try_parse_from(args(&[
            "taskdeck", "-v", "add", "Buy", "milk", "-c", "shopping", "-p", "low",
        ]))
        .expect("parse");
        assert_eq!(cli.verbose, 1);
        let Some(Command::Add(add)) = cli.command else {
            panic!("expected add command");
        };
        assert_eq!(add.title.join(" "), "Buy milk");
    }
}
