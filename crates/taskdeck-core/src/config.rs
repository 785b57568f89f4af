use std::collections::HashMap;
use std::fs;
use std::path::{
  Path,
  PathBuf
};
use std::str::FromStr;
use std::time::Duration;

use anyhow::{
  Context,
  anyhow
};
use tracing::{
  debug,
  info,
  trace,
  warn
};

use crate::stats::Timeframe;

const RC_ENV_VAR: &str = "TASKDECKRC";
const RC_FILE_NAME: &str = ".taskdeckrc";
const DEFAULT_NOTIFY_INTERVAL_SECS: u64 =
  3600;

#[derive(Debug, Clone)]
pub struct Config {
  map:              HashMap<String, String>,
  pub loaded_files: Vec<PathBuf>
}

impl Default for Config {
  fn default() -> Self {
    let mut map = HashMap::new();
    map.insert(
      "data.location".to_string(),
      "~/.taskdeck".to_string()
    );
    map.insert(
      "color".to_string(),
      "on".to_string()
    );
    map.insert(
      "notify.interval".to_string(),
      DEFAULT_NOTIFY_INTERVAL_SECS
        .to_string()
    );
    map.insert(
      "stats.timeframe".to_string(),
      "daily".to_string()
    );

    Self {
      map,
      loaded_files: vec![]
    }
  }
}

impl Config {
  #[tracing::instrument(skip(
    rc_override
  ))]
  pub fn load(
    rc_override: Option<&Path>
  ) -> anyhow::Result<Self> {
    let mut cfg = Config::default();

    let rc = resolve_rc_path(rc_override)?;
    if let Some(path) = rc {
      info!(rc = %path.display(), "loading taskdeckrc");
      cfg.load_file(&path)?;
    } else {
      debug!(
        "no taskdeckrc found; using \
         defaults"
      );
    }

    Ok(cfg)
  }

  #[tracing::instrument(skip(
    self, overrides
  ))]
  pub fn apply_overrides<I>(
    &mut self,
    overrides: I
  ) where
    I: IntoIterator<
      Item = (String, String)
    >
  {
    for (k, v) in overrides {
      let key = k
        .strip_prefix("rc.")
        .unwrap_or(&k)
        .to_string();
      debug!(key = %key, value = %v, "applying override");
      self.map.insert(key, v);
    }
  }

  pub fn get(
    &self,
    key: &str
  ) -> Option<String> {
    self.map.get(key).cloned()
  }

  /// Typed lookup; a present but
  /// unparsable value is an error.
  pub fn get_parsed<T>(
    &self,
    key: &str
  ) -> anyhow::Result<Option<T>>
  where
    T: FromStr,
    T::Err: std::fmt::Display
  {
    self
      .map
      .get(key)
      .map(|raw| {
        raw.trim().parse::<T>().map_err(
          |err| {
            anyhow!(
              "invalid value for \
               {key}: {raw} ({err})"
            )
          }
        )
      })
      .transpose()
  }

  pub fn notify_interval(
    &self
  ) -> anyhow::Result<Duration> {
    let secs = self
      .get_parsed::<u64>(
        "notify.interval"
      )?
      .unwrap_or(
        DEFAULT_NOTIFY_INTERVAL_SECS
      );
    if secs == 0 {
      return Err(anyhow!(
        "notify.interval must be \
         greater than zero"
      ));
    }
    Ok(Duration::from_secs(secs))
  }

  pub fn default_timeframe(
    &self
  ) -> anyhow::Result<Timeframe> {
    Ok(
      self
        .get_parsed::<Timeframe>(
          "stats.timeframe"
        )?
        .unwrap_or_default()
    )
  }

  #[tracing::instrument(skip(self))]
  fn load_file(
    &mut self,
    path: &Path
  ) -> anyhow::Result<()> {
    let path = expand_tilde(path);
    let text =
      fs::read_to_string(&path)
        .with_context(|| {
          format!(
            "failed to read {}",
            path.display()
          )
        })?;
    self
      .loaded_files
      .push(path.clone());

    let base_dir = path
      .parent()
      .unwrap_or_else(|| Path::new("."))
      .to_path_buf();

    for (idx, raw_line) in
      text.lines().enumerate()
    {
      let line_no = idx + 1;
      match RcLine::parse(raw_line)
        .with_context(|| {
          format!(
            "{}:{line_no}",
            path.display()
          )
        })? {
        | RcLine::Blank => {}
        | RcLine::Include(target) => {
          let target = resolve_include_path(
            &base_dir, target
          )?;
          self.include(&target, line_no)?;
        }
        | RcLine::Setting(key, value) => {
          trace!(key, value, "rc setting");
          self.map.insert(
            key.to_string(),
            value.to_string()
          );
        }
      }
    }

    Ok(())
  }

  fn include(
    &mut self,
    target: &Path,
    line_no: usize
  ) -> anyhow::Result<()> {
    if self
      .loaded_files
      .iter()
      .any(|seen| seen == target)
    {
      warn!(file = %target.display(), line_no, "include cycle; skipping");
      return Ok(());
    }
    if !target.exists() {
      warn!(file = %target.display(), line_no, "missing include; skipping");
      return Ok(());
    }
    debug!(file = %target.display(), "following include");
    self.load_file(target)
  }
}

/// One meaningful piece of an rc file.
#[derive(Debug, PartialEq, Eq)]
enum RcLine<'a> {
  Blank,
  Include(&'a str),
  Setting(&'a str, &'a str)
}

impl<'a> RcLine<'a> {
  fn parse(
    raw: &'a str
  ) -> anyhow::Result<Self> {
    let line = raw
      .split_once('#')
      .map_or(raw, |(code, _)| code)
      .trim();

    if line.is_empty() {
      return Ok(RcLine::Blank);
    }
    if let Some(target) =
      line.strip_prefix("include ")
    {
      return Ok(RcLine::Include(
        target.trim()
      ));
    }

    line
      .split_once('=')
      .map(|(k, v)| {
        RcLine::Setting(k.trim(), v.trim())
      })
      .ok_or_else(|| {
        anyhow!(
          "expected key = value, got: \
           {raw}"
        )
      })
  }
}

#[tracing::instrument(skip(
  cfg,
  override_dir
))]
pub fn resolve_data_dir(
  cfg: &Config,
  override_dir: Option<&Path>
) -> anyhow::Result<PathBuf> {
  let dir = if let Some(path) =
    override_dir
  {
    path.to_path_buf()
  } else if let Some(cfg_value) =
    cfg.get("data.location")
  {
    expand_tilde(Path::new(&cfg_value))
  } else {
    default_data_dir()?
  };

  if !dir.exists() {
    info!(dir = %dir.display(), "creating data directory");
    fs::create_dir_all(&dir)
      .with_context(|| {
        format!(
          "failed to create {}",
          dir.display()
        )
      })?;
  }

  Ok(dir)
}

#[tracing::instrument(skip(
  override_path
))]
fn resolve_rc_path(
  override_path: Option<&Path>
) -> anyhow::Result<Option<PathBuf>> {
  if let Some(path) = override_path {
    return Ok(Some(path.to_path_buf()));
  }

  if let Ok(rc_env) =
    std::env::var(RC_ENV_VAR)
  {
    if rc_env == "/dev/null" {
      return Ok(None);
    }
    return Ok(Some(PathBuf::from(
      rc_env
    )));
  }

  let Some(home) = dirs::home_dir()
  else {
    warn!(
      "cannot determine home \
       directory; skipping \
       taskdeckrc lookup"
    );
    return Ok(None);
  };
  let candidate = home.join(RC_FILE_NAME);
  if candidate.exists() {
    return Ok(Some(candidate));
  }

  Ok(None)
}

fn default_data_dir()
-> anyhow::Result<PathBuf> {
  let home = dirs::home_dir()
    .ok_or_else(|| {
      anyhow!(
        "cannot determine home \
         directory"
      )
    })?;
  Ok(home.join(".taskdeck"))
}

fn resolve_include_path(
  base_dir: &Path,
  include: &str
) -> anyhow::Result<PathBuf> {
  if include.is_empty() {
    return Err(anyhow!(
      "include without a path"
    ));
  }
  let target =
    expand_tilde(Path::new(include));
  Ok(if target.is_absolute() {
    target
  } else {
    base_dir.join(target)
  })
}

fn expand_tilde(
  path: &Path
) -> PathBuf {
  match (
    path.strip_prefix("~"),
    dirs::home_dir()
  ) {
    | (Ok(rest), Some(home)) => {
      home.join(rest)
    }
    | _ => path.to_path_buf()
  }
}
