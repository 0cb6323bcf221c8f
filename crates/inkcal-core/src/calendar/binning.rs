//! Grouping tasks into the cells of calendar views.
//!
//! All functions bin by the task's local start time; the end time is never
//! consulted. Input order is kept within a cell.

use std::collections::BTreeMap;

use chrono::{Datelike, Days, NaiveDate, TimeZone, Timelike};
use serde::Serialize;

use crate::task::Task;

/// Hour slots per day. Slot 24 exists for grid layout and is always empty:
/// a task at midnight belongs to hour 0 of its own day.
pub const HOUR_SLOTS: usize = 25;
pub const DAYS_PER_WEEK: usize = 7;

/// Tasks of one day grouped by start hour.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HourBins {
    slots: Vec<Vec<Task>>,
}

impl Default for HourBins {
    fn default() -> Self {
        Self {
            slots: vec![Vec::new(); HOUR_SLOTS],
        }
    }
}

impl HourBins {
    fn push(&mut self, hour: usize, task: Task) {
        if let Some(slot) = self.slots.get_mut(hour) {
            slot.push(task);
        }
    }

    /// Tasks in `hour`; empty for hours outside 0..=24.
    pub fn hour(&self, hour: usize) -> &[Task] {
        self.slots.get(hour).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Non-empty hours in ascending order.
    pub fn iter(&self) -> impl Iterator<Item = (usize, &[Task])> {
        self.slots
            .iter()
            .enumerate()
            .filter(|(_, slot)| !slot.is_empty())
            .map(|(hour, slot)| (hour, slot.as_slice()))
    }

    /// Total number of binned tasks.
    pub fn len(&self) -> usize {
        self.slots.iter().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.iter().all(Vec::is_empty)
    }
}

/// Tasks grouped by weekday (0 = Sunday) and start hour.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WeekGrid {
    days: Vec<HourBins>,
}

impl Default for WeekGrid {
    fn default() -> Self {
        Self {
            days: vec![HourBins::default(); DAYS_PER_WEEK],
        }
    }
}

impl WeekGrid {
    /// Tasks at `(day, hour)`; empty when either index is out of range.
    pub fn cell(&self, day: usize, hour: usize) -> &[Task] {
        self.days.get(day).map(|d| d.hour(hour)).unwrap_or(&[])
    }

    pub fn day(&self, day: usize) -> Option<&HourBins> {
        self.days.get(day)
    }

    /// Non-empty cells as `(day, hour, tasks)`, day-major.
    pub fn cells(&self) -> impl Iterator<Item = (usize, usize, &[Task])> {
        self.days
            .iter()
            .enumerate()
            .flat_map(|(day, bins)| bins.iter().map(move |(hour, tasks)| (day, hour, tasks)))
    }

    pub fn len(&self) -> usize {
        self.days.iter().map(HourBins::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.days.iter().all(HourBins::is_empty)
    }
}

fn local_date<Tz: TimeZone>(task: &Task, tz: &Tz) -> NaiveDate {
    task.start_time.with_timezone(tz).date_naive()
}

fn local_hour<Tz: TimeZone>(task: &Task, tz: &Tz) -> usize {
    task.start_time.with_timezone(tz).hour() as usize
}

/// Hour bins for day `view_start + day_index`, keeping only tasks that
/// start on that local date.
pub fn bin_by_hour<Tz: TimeZone>(
    tasks: &[Task],
    view_start: NaiveDate,
    day_index: u32,
    tz: &Tz,
) -> HourBins {
    let mut bins = HourBins::default();
    let Some(day) = view_start.checked_add_days(Days::new(u64::from(day_index))) else {
        return bins;
    };
    for task in tasks.iter().filter(|t| local_date(t, tz) == day) {
        bins.push(local_hour(task, tz), task.clone());
    }
    bins
}

/// Weekday x hour grid. Callers pass the tasks of a single week.
pub fn bin_by_day_and_hour<Tz: TimeZone>(tasks: &[Task], tz: &Tz) -> WeekGrid {
    let mut grid = WeekGrid::default();
    for task in tasks {
        let local = task.start_time.with_timezone(tz);
        let day = local.weekday().num_days_from_sunday() as usize;
        if let Some(bins) = grid.days.get_mut(day) {
            bins.push(local.hour() as usize, task.clone());
        }
    }
    grid
}

/// Number of tasks starting on each local date.
pub fn count_by_date<Tz: TimeZone>(tasks: &[Task], tz: &Tz) -> BTreeMap<NaiveDate, usize> {
    let mut counts = BTreeMap::new();
    for task in tasks {
        *counts.entry(local_date(task, tz)).or_insert(0) += 1;
    }
    counts
}

/// Tasks starting on the local date `date`, ordered by start time.
pub fn select_by_exact_date<Tz: TimeZone>(tasks: &[Task], date: NaiveDate, tz: &Tz) -> Vec<Task> {
    let mut selected: Vec<Task> = tasks
        .iter()
        .filter(|t| local_date(t, tz) == date)
        .cloned()
        .collect();
    selected.sort_by_key(|t| t.start_time);
    selected
}

/// Split tasks into `days` consecutive local days starting at `view_start`.
/// Tasks outside the window are dropped.
pub fn split_by_day<Tz: TimeZone>(
    tasks: &[Task],
    view_start: NaiveDate,
    days: usize,
    tz: &Tz,
) -> Vec<Vec<Task>> {
    let mut columns = vec![Vec::new(); days];
    for task in tasks {
        let offset = (local_date(task, tz) - view_start).num_days();
        if let Ok(index) = usize::try_from(offset) {
            if let Some(column) = columns.get_mut(index) {
                column.push(task.clone());
            }
        }
    }
    columns
}
