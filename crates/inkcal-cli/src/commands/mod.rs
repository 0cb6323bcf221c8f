pub mod config;
pub mod task;
pub mod view;

use std::sync::Arc;

use chrono::{DateTime, Local, NaiveDate, NaiveDateTime, TimeZone, Utc};
use inkcal_core::{Config, TaskDb, TaskStore};

pub type CliResult = Result<(), Box<dyn std::error::Error>>;

/// Open the task database behind a store tuned by the user's config.
pub fn open_store() -> Result<TaskStore, Box<dyn std::error::Error>> {
    let config = Config::load_or_default();
    let db = TaskDb::open()?;
    Ok(TaskStore::new(Arc::new(db), config.store_config())?)
}

/// Parse RFC 3339 or local `YYYY-MM-DD HH:MM`.
pub fn parse_time(input: &str) -> Result<DateTime<Utc>, String> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(input) {
        return Ok(dt.with_timezone(&Utc));
    }
    let naive = NaiveDateTime::parse_from_str(input, "%Y-%m-%d %H:%M")
        .map_err(|_| format!("invalid time '{input}' (expected YYYY-MM-DD HH:MM or RFC 3339)"))?;
    Local
        .from_local_datetime(&naive)
        .earliest()
        .map(|dt| dt.with_timezone(&Utc))
        .ok_or_else(|| format!("time '{input}' does not exist in the local time zone"))
}

/// Parse `YYYY-MM-DD`, defaulting to today.
pub fn parse_date(input: Option<&str>) -> Result<NaiveDate, String> {
    match input {
        Some(s) => NaiveDate::parse_from_str(s, "%Y-%m-%d")
            .map_err(|_| format!("invalid date '{s}' (expected YYYY-MM-DD)")),
        None => Ok(Local::now().date_naive()),
    }
}

/// Local `HH:MM` of a timestamp.
pub fn local_hm(time: DateTime<Utc>) -> String {
    time.with_timezone(&Local).format("%H:%M").to_string()
}
