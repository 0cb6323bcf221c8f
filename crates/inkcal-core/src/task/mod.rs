//! Calendar task model.
//!
//! A [`Task`] is a titled, time-bounded entry with an importance quadrant
//! and a completion flag. Identifiers are assigned by the backing store;
//! a freshly built task carries [`TaskId::UNASSIGNED`] until it is written.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::ValidationError;

/// Row identifier assigned by the backing store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default)]
#[serde(transparent)]
pub struct TaskId(pub i64);

impl TaskId {
    /// Sentinel carried by tasks that have not been persisted.
    pub const UNASSIGNED: TaskId = TaskId(0);

    pub fn is_assigned(self) -> bool {
        self.0 > 0
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i64> for TaskId {
    fn from(value: i64) -> Self {
        TaskId(value)
    }
}

/// Eisenhower quadrant driving color coding.
///
/// Levels 1-4 map to the four quadrants; anything else degrades to
/// [`Quadrant::Unclassified`] instead of failing.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Quadrant {
    /// Level 1
    UrgentImportant,
    /// Level 2
    ImportantNotUrgent,
    /// Level 3
    UrgentNotImportant,
    /// Level 4
    Neither,
    /// Any other stored level
    Unclassified,
}

impl Quadrant {
    pub const ALL: [Quadrant; 4] = [
        Quadrant::UrgentImportant,
        Quadrant::ImportantNotUrgent,
        Quadrant::UrgentNotImportant,
        Quadrant::Neither,
    ];

    /// Map a stored importance level to its quadrant.
    pub fn from_level(level: i64) -> Self {
        match level {
            1 => Quadrant::UrgentImportant,
            2 => Quadrant::ImportantNotUrgent,
            3 => Quadrant::UrgentNotImportant,
            4 => Quadrant::Neither,
            _ => Quadrant::Unclassified,
        }
    }

    /// Importance level as persisted. `Unclassified` is stored as 0.
    pub fn level(self) -> i64 {
        match self {
            Quadrant::UrgentImportant => 1,
            Quadrant::ImportantNotUrgent => 2,
            Quadrant::UrgentNotImportant => 3,
            Quadrant::Neither => 4,
            Quadrant::Unclassified => 0,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Quadrant::UrgentImportant => "urgent & important",
            Quadrant::ImportantNotUrgent => "important, not urgent",
            Quadrant::UrgentNotImportant => "urgent, not important",
            Quadrant::Neither => "neither urgent nor important",
            Quadrant::Unclassified => "unclassified",
        }
    }

    pub fn is_urgent(self) -> bool {
        matches!(self, Quadrant::UrgentImportant | Quadrant::UrgentNotImportant)
    }

    pub fn is_important(self) -> bool {
        matches!(self, Quadrant::UrgentImportant | Quadrant::ImportantNotUrgent)
    }
}

impl Default for Quadrant {
    fn default() -> Self {
        Quadrant::Neither
    }
}

impl fmt::Display for Quadrant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Calendar task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    /// Store-assigned identifier, `TaskId::UNASSIGNED` until persisted
    #[serde(default)]
    pub id: TaskId,
    pub title: String,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub note: Option<String>,
    #[serde(default)]
    pub importance: Quadrant,
    #[serde(default)]
    pub completed: bool,
}

impl Task {
    /// Create an unpersisted, incomplete task in the `Neither` quadrant.
    pub fn new(title: impl Into<String>, start_time: DateTime<Utc>, end_time: DateTime<Utc>) -> Self {
        Task {
            id: TaskId::UNASSIGNED,
            title: title.into(),
            start_time,
            end_time,
            location: None,
            note: None,
            importance: Quadrant::default(),
            completed: false,
        }
    }

    pub fn with_location(mut self, location: impl Into<String>) -> Self {
        self.location = Some(location.into());
        self
    }

    pub fn with_note(mut self, note: impl Into<String>) -> Self {
        self.note = Some(note.into());
        self
    }

    pub fn with_importance(mut self, importance: Quadrant) -> Self {
        self.importance = importance;
        self
    }

    /// Check the invariants enforced at the store boundary.
    ///
    /// # Errors
    /// Returns [`ValidationError::EmptyTitle`] for a blank title and
    /// [`ValidationError::InvalidTimeRange`] when the end precedes the start.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.title.trim().is_empty() {
            return Err(ValidationError::EmptyTitle);
        }
        if self.end_time < self.start_time {
            return Err(ValidationError::InvalidTimeRange {
                start: self.start_time,
                end: self.end_time,
            });
        }
        Ok(())
    }

    /// Whether a list row rendering `self` would look identical for `other`.
    ///
    /// Only the fields shown in a row are compared; on e-ink panels an
    /// unchanged row should not be redrawn.
    pub fn same_display(&self, other: &Task) -> bool {
        self.id == other.id
            && self.title == other.title
            && self.start_time == other.start_time
            && self.importance == other.importance
            && self.completed == other.completed
    }

    pub fn duration(&self) -> chrono::Duration {
        self.end_time - self.start_time
    }
}
