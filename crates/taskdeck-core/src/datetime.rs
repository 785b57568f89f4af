use std::fs;
use std::path::{
  Path,
  PathBuf
};
use std::sync::OnceLock;

use anyhow::{
  Context,
  anyhow
};
use chrono::{
  DateTime,
  Datelike,
  Days,
  Duration,
  LocalResult,
  NaiveDate,
  NaiveDateTime,
  NaiveTime,
  TimeZone,
  Utc,
  Weekday
};
use chrono_tz::Tz;
use regex::Regex;
use serde::Deserialize;

const TIMEZONE_ENV_VAR: &str =
  "TASKDECK_TIMEZONE";
const ZONE_FILE_ENV_VAR: &str =
  "TASKDECK_TIME_CONFIG";
const ZONE_FILE_NAME: &str =
  "taskdeck-time.toml";

/// `timezone = "..."` at top level or
/// under `[time]`.
#[derive(Debug, Default, Deserialize)]
struct ZoneFile {
  timezone: Option<String>,
  #[serde(default)]
  time:     ZoneFileSection
}

#[derive(Debug, Default, Deserialize)]
struct ZoneFileSection {
  timezone: Option<String>
}

/// Picks the zone used for every
/// calendar-day decision.
///
/// Order: `$TASKDECK_TIMEZONE`, the
/// `timezone` config key, then a
/// `taskdeck-time.toml` file. Falls
/// back to UTC.
pub fn resolve_timezone(
  configured: Option<&str>
) -> Tz {
  let from_env =
    std::env::var(TIMEZONE_ENV_VAR)
      .ok();
  let candidates = [
    (TIMEZONE_ENV_VAR, from_env),
    (
      "config:timezone",
      configured.map(str::to_string)
    )
  ];

  for (source, raw) in candidates {
    if let Some(raw) = raw
      && let Some(tz) =
        parse_timezone(&raw, source)
    {
      return tz;
    }
  }

  let path = zone_file_path();
  match read_zone_file(&path) {
    | Ok(Some(raw)) => {
      if let Some(tz) =
        parse_timezone(&raw, "zone-file")
      {
        return tz;
      }
    }
    | Ok(None) => {}
    | Err(err) => {
      tracing::warn!(
        file = %path.display(),
        error = %format!("{err:#}"),
        "ignoring zone file"
      );
    }
  }

  tracing::debug!(
    "no timezone configured; using UTC"
  );
  chrono_tz::UTC
}

fn zone_file_path() -> PathBuf {
  std::env::var(ZONE_FILE_ENV_VAR)
    .ok()
    .map(|raw| raw.trim().to_string())
    .filter(|raw| !raw.is_empty())
    .map(PathBuf::from)
    .unwrap_or_else(|| {
      PathBuf::from(ZONE_FILE_NAME)
    })
}

fn read_zone_file(
  path: &Path
) -> anyhow::Result<Option<String>> {
  if !path.is_file() {
    return Ok(None);
  }
  let text = fs::read_to_string(path)
    .context("unreadable")?;
  let parsed: ZoneFile =
    toml::from_str(&text)
      .context("invalid toml")?;
  Ok(
    parsed
      .timezone
      .or(parsed.time.timezone)
  )
}

fn parse_timezone(
  raw: &str,
  source: &str
) -> Option<Tz> {
  let trimmed = raw.trim();
  if trimmed.is_empty() {
    return None;
  }

  trimmed
    .parse::<Tz>()
    .inspect(|_| {
      tracing::debug!(
        source,
        timezone = trimmed,
        "using timezone"
      );
    })
    .map_err(|err| {
      tracing::warn!(
        source,
        timezone = trimmed,
        error = %err,
        "unknown timezone id"
      );
    })
    .ok()
}

#[must_use]
pub fn local_date(
  dt: DateTime<Utc>,
  tz: Tz
) -> NaiveDate {
  dt.with_timezone(&tz).date_naive()
}

/// First instant of `date` in `tz`.
///
/// A DST gap can swallow local
/// midnight, in which case the first
/// hour that exists is used.
#[must_use]
pub fn start_of_day(
  date: NaiveDate,
  tz: Tz
) -> DateTime<Utc> {
  for hour in 0..24 {
    let Some(naive) =
      date.and_hms_opt(hour, 0, 0)
    else {
      continue;
    };
    if let Some(instant) =
      to_utc_from_local(naive, tz)
    {
      return instant;
    }
  }

  date.and_time(NaiveTime::MIN).and_utc()
}

/// Most recent Sunday on or before
/// `date`.
#[must_use]
pub fn start_of_week(
  date: NaiveDate
) -> NaiveDate {
  let back = u64::from(
    date
      .weekday()
      .num_days_from_sunday()
  );
  date
    .checked_sub_days(Days::new(back))
    .unwrap_or(date)
}

#[must_use]
pub fn start_of_month(
  date: NaiveDate
) -> NaiveDate {
  date.with_day(1).unwrap_or(date)
}

#[must_use]
pub fn add_days(
  date: NaiveDate,
  days: u64
) -> NaiveDate {
  date
    .checked_add_days(Days::new(days))
    .unwrap_or(date)
}

fn to_utc_from_local(
  local_naive: NaiveDateTime,
  tz: Tz
) -> Option<DateTime<Utc>> {
  match tz.from_local_datetime(
    &local_naive
  ) {
    | LocalResult::Single(local_dt) => {
      Some(local_dt.with_timezone(&Utc))
    }
    | LocalResult::Ambiguous(
      first,
      second
    ) => {
      tracing::debug!(
        first = %first,
        second = %second,
        "ambiguous local datetime; using earliest"
      );
      let chosen = if first <= second {
        first
      } else {
        second
      };
      Some(chosen.with_timezone(&Utc))
    }
    | LocalResult::None => None
  }
}

fn local_to_utc(
  local_naive: NaiveDateTime,
  tz: Tz,
  context: &str
) -> anyhow::Result<DateTime<Utc>> {
  to_utc_from_local(local_naive, tz)
    .ok_or_else(|| {
      anyhow!(
        "local datetime does not \
         exist in configured \
         timezone: {context}"
      )
    })
}

/// Parses a deadline typed by the
/// user.
///
/// Accepts `now`, `today`,
/// `tomorrow`, `yesterday`, weekday
/// names, relative offsets such as
/// `+3d`/`-2h`/`+1w`, `YYYY-MM-DD`
/// (local midnight), `YYYY-MM-DD
/// HH:MM` (local) and RFC 3339.
#[tracing::instrument(skip(now, tz), fields(input = input))]
pub fn parse_deadline_expr(
  input: &str,
  now: DateTime<Utc>,
  tz: Tz
) -> anyhow::Result<DateTime<Utc>> {
  let token = input.trim();
  let lower =
    token.to_ascii_lowercase();
  let today = local_date(now, tz);

  match lower.as_str() {
    | "" => {
      return Err(anyhow!(
        "deadline cannot be empty"
      ));
    }
    | "now" => return Ok(now),
    | "today" => {
      return Ok(start_of_day(today, tz));
    }
    | "tomorrow" => {
      return Ok(start_of_day(
        add_days(today, 1),
        tz
      ));
    }
    | "yesterday" => {
      let date = today
        .pred_opt()
        .ok_or_else(|| {
          anyhow!(
            "date out of range"
          )
        })?;
      return Ok(start_of_day(date, tz));
    }
    | _ => {}
  }

  if let Some(target_weekday) =
    parse_weekday_name(&lower)
  {
    let target_date = next_weekday_date(
      today,
      target_weekday
    );
    return Ok(start_of_day(
      target_date,
      tz
    ));
  }

  if let Some(offset) =
    parse_relative_offset(&lower)?
  {
    return now
      .checked_add_signed(offset)
      .ok_or_else(|| {
        anyhow!(
          "relative offset out of \
           range: {token}"
        )
      });
  }

  if let Ok(date) =
    NaiveDate::parse_from_str(
      token, "%Y-%m-%d"
    )
  {
    return Ok(start_of_day(date, tz));
  }

  for fmt in [
    "%Y-%m-%d %H:%M",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%dT%H:%M:%S"
  ] {
    if let Ok(naive) =
      NaiveDateTime::parse_from_str(
        token, fmt
      )
    {
      return local_to_utc(
        naive, tz, token
      );
    }
  }

  if let Ok(parsed) =
    DateTime::parse_from_rfc3339(token)
  {
    return Ok(
      parsed.with_timezone(&Utc)
    );
  }

  Err(anyhow!(
    "unrecognized deadline: {token}"
  ))
}

fn parse_relative_offset(
  token: &str
) -> anyhow::Result<Option<Duration>> {
  static RELATIVE_OFFSET: OnceLock<
    Result<Regex, regex::Error>
  > = OnceLock::new();
  let rel_re = RELATIVE_OFFSET
    .get_or_init(|| {
      Regex::new(
        r"^(?P<sign>[+-])(?P<num>\d+)(?P<unit>[wdhm])$"
      )
    })
    .as_ref()
    .map_err(|e| {
      anyhow!(
        "internal regex compile \
         failure: {e}"
      )
    })?;

  let Some(caps) =
    rel_re.captures(token)
  else {
    return Ok(None);
  };

  let num: i64 = caps
    .name("num")
    .map(|m| m.as_str())
    .ok_or_else(|| {
      anyhow!(
        "missing relative amount"
      )
    })?
    .parse()
    .context(
      "invalid relative number"
    )?;
  let unit = caps
    .name("unit")
    .map(|m| m.as_str())
    .unwrap_or("d");
  let magnitude = match unit {
    | "w" => Duration::try_weeks(num),
    | "h" => Duration::try_hours(num),
    | "m" => Duration::try_minutes(num),
    | _ => Duration::try_days(num)
  }
  .ok_or_else(|| {
    anyhow!(
      "relative offset out of range: \
       {token}"
    )
  })?;

  let negative = caps
    .name("sign")
    .is_some_and(|m| m.as_str() == "-");
  Ok(Some(if negative {
    -magnitude
  } else {
    magnitude
  }))
}

fn parse_weekday_name(
  token: &str
) -> Option<Weekday> {
  match token {
    | "monday" | "mon" => {
      Some(Weekday::Mon)
    }
    | "tuesday" | "tue" | "tues" => {
      Some(Weekday::Tue)
    }
    | "wednesday" | "wed" => {
      Some(Weekday::Wed)
    }
    | "thursday" | "thu" | "thur"
    | "thurs" => Some(Weekday::Thu),
    | "friday" | "fri" => {
      Some(Weekday::Fri)
    }
    | "saturday" | "sat" => {
      Some(Weekday::Sat)
    }
    | "sunday" | "sun" => {
      Some(Weekday::Sun)
    }
    | _ => None
  }
}

fn next_weekday_date(
  today: NaiveDate,
  target: Weekday
) -> NaiveDate {
  let current = i64::from(
    today
      .weekday()
      .num_days_from_monday()
  );
  let wanted = i64::from(
    target.num_days_from_monday()
  );
  let mut ahead =
    (wanted - current).rem_euclid(7);
  if ahead == 0 {
    ahead = 7;
  }
  add_days(today, ahead.unsigned_abs())
}

/// Lenient ISO-8601 reader for
/// persisted dates.
///
/// Accepts RFC 3339, naive
/// `YYYY-MM-DDTHH:MM:SS[.f]` (read as
/// UTC) and bare `YYYY-MM-DD`.
#[must_use]
pub fn parse_iso_instant(
  raw: &str
) -> Option<DateTime<Utc>> {
  let trimmed = raw.trim();
  if let Ok(parsed) =
    DateTime::parse_from_rfc3339(
      trimmed
    )
  {
    return Some(
      parsed.with_timezone(&Utc)
    );
  }

  for fmt in [
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M"
  ] {
    if let Ok(naive) =
      NaiveDateTime::parse_from_str(
        trimmed, fmt
      )
    {
      return Some(naive.and_utc());
    }
  }

  NaiveDate::parse_from_str(
    trimmed, "%Y-%m-%d"
  )
  .ok()
  .map(|date| {
    date
      .and_time(NaiveTime::MIN)
      .and_utc()
  })
}


pub mod iso_date_serde {
  use chrono::{
    DateTime,
    SecondsFormat,
    Utc
  };
  use serde::{
    Deserialize,
    Deserializer,
    Serializer
  };

  pub fn serialize<S>(
    dt: &DateTime<Utc>,
    serializer: S
  ) -> Result<S::Ok, S::Error>
  where
    S: Serializer
  {
    serializer.serialize_str(
      &dt.to_rfc3339_opts(
        SecondsFormat::Millis,
        true
      )
    )
  }

  pub fn deserialize<'de, D>(
    deserializer: D
  ) -> Result<DateTime<Utc>, D::Error>
  where
    D: Deserializer<'de>
  {
    let raw = String::deserialize(
      deserializer
    )?;
    super::parse_iso_instant(&raw)
      .ok_or_else(|| {
        serde::de::Error::custom(
          format!(
            "invalid ISO-8601 date: \
             {raw}"
          )
        )
      })
  }

  /// Like [`deserialize`] but a
  /// `null` falls back to the current
  /// time.
  pub fn deserialize_or_now<'de, D>(
    deserializer: D
  ) -> Result<DateTime<Utc>, D::Error>
  where
    D: Deserializer<'de>
  {
    let opt =
      Option::<String>::deserialize(
        deserializer
      )?;
    match opt {
      | Some(raw) => {
        super::parse_iso_instant(&raw)
          .ok_or_else(|| {
            serde::de::Error::custom(
              format!(
                "invalid ISO-8601 date: \
                 {raw}"
              )
            )
          })
      }
      | None => Ok(Utc::now())
    }
  }

  pub mod option {
    use chrono::{
      DateTime,
      Utc
    };
    use serde::{
      Deserialize,
      Deserializer,
      Serializer
    };

    pub fn serialize<S>(
      dt: &Option<DateTime<Utc>>,
      serializer: S
    ) -> Result<S::Ok, S::Error>
    where
      S: Serializer
    {
      match dt {
        | Some(value) => {
          super::serialize(
            value, serializer
          )
        }
        | None => {
          serializer.serialize_none()
        }
      }
    }

    pub fn deserialize<'de, D>(
      deserializer: D
    ) -> Result<
      Option<DateTime<Utc>>,
      D::Error
    >
    where
      D: Deserializer<'de>
    {
      let opt =
        Option::<String>::deserialize(
          deserializer
        )?;
      match opt {
        | Some(raw) => {
          super::super::parse_iso_instant(
            &raw
          )
          .map(Some)
          .ok_or_else(|| {
            serde::de::Error::custom(
              format!(
                "invalid ISO-8601 date: \
                 {raw}"
              )
            )
          })
        }
        | None => Ok(None)
      }
    }
  }
}
