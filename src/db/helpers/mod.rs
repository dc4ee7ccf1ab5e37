//! Column conversions shared by the repositories.
//!
//! Timestamps are stored as RFC 3339 text in UTC so that text ordering matches
//! time ordering. Durations are whole seconds.

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::Row;

pub fn timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Millis, true)
}

pub fn now_timestamp() -> String {
    timestamp(Utc::now())
}

pub fn read_timestamp(row: &Row, column: &str) -> Result<DateTime<Utc>> {
    let raw: String = row.get(column)?;
    parse_timestamp(&raw).with_context(|| format!("bad {column} value {raw:?}"))
}

pub fn read_optional_timestamp(row: &Row, column: &str) -> Result<Option<DateTime<Utc>>> {
    let raw: Option<String> = row.get(column)?;
    raw.map(|value| {
        parse_timestamp(&value).with_context(|| format!("bad {column} value {value:?}"))
    })
    .transpose()
}

fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>> {
    Ok(DateTime::parse_from_rfc3339(raw)?.with_timezone(&Utc))
}

pub fn seconds_param(seconds: u64) -> Result<i64> {
    i64::try_from(seconds).map_err(|_| anyhow!("{seconds}s does not fit an SQLite INTEGER"))
}

pub fn read_seconds(row: &Row, column: &str) -> Result<u64> {
    let raw: i64 = row.get(column)?;
    u64::try_from(raw).map_err(|_| anyhow!("{column} is negative ({raw})"))
}
