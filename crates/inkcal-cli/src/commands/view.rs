//! Calendar view commands: fetch a view range and print its binned grid.

use chrono::{Local, NaiveDate};
use clap::{Args, Subcommand};
use inkcal_core::calendar::{bin_by_day_and_hour, bin_by_hour, count_by_date, HourBins};
use inkcal_core::{Config, Task, ViewMode};
use serde_json::json;

use super::{local_hm, open_store, parse_date, CliResult};

const WEEKDAYS: [&str; 7] = ["Sun", "Mon", "Tue", "Wed", "Thu", "Fri", "Sat"];

/// Without a subcommand the configured `display.default_view` is shown.
#[derive(Subcommand, Clone, Copy)]
pub enum ViewAction {
    /// Three days starting at the date, by hour
    Day,
    /// Week containing the date, by weekday and hour
    Week,
    /// Month containing the date, task counts per day
    Month,
}

impl From<ViewAction> for ViewMode {
    fn from(action: ViewAction) -> Self {
        match action {
            ViewAction::Day => ViewMode::ThreeDay,
            ViewAction::Week => ViewMode::Week,
            ViewAction::Month => ViewMode::Month,
        }
    }
}

#[derive(Args)]
pub struct ViewArgs {
    /// Anchor date (YYYY-MM-DD, default: today)
    #[arg(long, global = true)]
    date: Option<String>,
    /// Print JSON instead of text
    #[arg(long, global = true)]
    json: bool,
}

pub async fn run(action: Option<ViewAction>, args: ViewArgs) -> CliResult {
    let mode = match action {
        Some(action) => action.into(),
        None => Config::load_or_default().display.default_view,
    };
    let anchor = parse_date(args.date.as_deref())?;
    let (start, end) = mode.range(anchor, &Local);

    let store = open_store()?;
    let tasks = store.get_range_or_empty(start, end).await;
    store.shutdown().await;

    match mode {
        ViewMode::ThreeDay => print_days(&tasks, anchor, args.json)?,
        ViewMode::Week => print_week(&tasks, mode.first_day(anchor), args.json)?,
        ViewMode::Month => print_month(&tasks, mode.days(anchor), args.json)?,
    }
    Ok(())
}

fn hours_json(bins: &HourBins) -> serde_json::Value {
    bins.iter()
        .map(|(hour, tasks)| json!({ "hour": hour, "tasks": tasks }))
        .collect()
}

fn print_hours(bins: &HourBins) {
    if bins.is_empty() {
        println!("  (no tasks)");
    }
    for (hour, tasks) in bins.iter() {
        for task in tasks {
            println!(
                "  {:02}:00  {}-{}  {} (#{})",
                hour,
                local_hm(task.start_time),
                local_hm(task.end_time),
                task.title,
                task.id
            );
        }
    }
}

fn print_days(tasks: &[Task], anchor: NaiveDate, as_json: bool) -> CliResult {
    let days = ViewMode::ThreeDay.days(anchor);
    let binned: Vec<(NaiveDate, HourBins)> = (0u32..)
        .zip(&days)
        .map(|(index, date)| (*date, bin_by_hour(tasks, anchor, index, &Local)))
        .collect();

    if as_json {
        let out: Vec<_> = binned
            .iter()
            .map(|(date, bins)| json!({ "date": date, "hours": hours_json(bins) }))
            .collect();
        println!("{}", serde_json::to_string_pretty(&out)?);
        return Ok(());
    }
    for (date, bins) in &binned {
        println!("{}", date.format("%a %Y-%m-%d"));
        print_hours(bins);
    }
    Ok(())
}

fn print_week(tasks: &[Task], first: NaiveDate, as_json: bool) -> CliResult {
    let grid = bin_by_day_and_hour(tasks, &Local);
    let dates: Vec<NaiveDate> = first.iter_days().take(WEEKDAYS.len()).collect();

    if as_json {
        let out: Vec<_> = dates
            .iter()
            .enumerate()
            .map(|(day, date)| {
                let hours = grid.day(day).map(hours_json).unwrap_or_default();
                json!({ "date": date, "weekday": WEEKDAYS[day], "hours": hours })
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&out)?);
        return Ok(());
    }
    for (day, date) in dates.iter().enumerate() {
        println!("{} {}", WEEKDAYS[day], date);
        if let Some(bins) = grid.day(day) {
            print_hours(bins);
        }
    }
    Ok(())
}

fn print_month(tasks: &[Task], days: Vec<NaiveDate>, as_json: bool) -> CliResult {
    let counts = count_by_date(tasks, &Local);

    if as_json {
        let out: Vec<_> = days
            .iter()
            .map(|d| json!({ "date": d, "count": counts.get(d).copied().unwrap_or(0) }))
            .collect();
        println!("{}", serde_json::to_string_pretty(&out)?);
        return Ok(());
    }
    for date in &days {
        match counts.get(date) {
            Some(n) => println!("{}  {}", date.format("%a %Y-%m-%d"), n),
            None => println!("{}  -", date.format("%a %Y-%m-%d")),
        }
    }
    Ok(())
}
