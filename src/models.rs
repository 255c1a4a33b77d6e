use std::collections::{BTreeSet, HashMap};

use chrono::{DateTime, Datelike, FixedOffset, NaiveDate, Utc};
use serde::ser::SerializeMap;
use serde::{Deserialize, Serialize, Serializer};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::error::CalendarError;

// -----------------------------
// Work calendar
// -----------------------------

/// Business days and hours that elapsed time is clipped to.
///
/// Weekdays use 0 = Sunday .. 6 = Saturday. Hours are whole hours in the
/// calendar's UTC offset, and the window is `[start_hour:00, end_hour:00)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkCalendar {
    work_days: BTreeSet<u32>,
    start_hour: u32,
    end_hour: u32,
    offset: FixedOffset,
}

impl WorkCalendar {
    pub fn new(
        work_days: impl IntoIterator<Item = u32>,
        start_hour: u32,
        end_hour: u32,
        offset: FixedOffset,
    ) -> Result<Self, CalendarError> {
        let work_days: BTreeSet<u32> = work_days.into_iter().collect();
        if let Some(&day) = work_days.iter().find(|d| **d > 6) {
            return Err(CalendarError::InvalidWeekday(day));
        }
        for hour in [start_hour, end_hour] {
            if hour > 23 {
                return Err(CalendarError::InvalidHour(hour));
            }
        }
        if start_hour >= end_hour {
            return Err(CalendarError::EmptyWindow { start_hour, end_hour });
        }
        Ok(Self {
            work_days,
            start_hour,
            end_hour,
            offset,
        })
    }

    pub fn start_hour(&self) -> u32 {
        self.start_hour
    }

    pub fn end_hour(&self) -> u32 {
        self.end_hour
    }

    pub fn offset(&self) -> FixedOffset {
        self.offset
    }

    pub fn work_days(&self) -> impl Iterator<Item = u32> + '_ {
        self.work_days.iter().copied()
    }

    pub fn is_work_day(&self, date: NaiveDate) -> bool {
        self.work_days
            .contains(&date.weekday().num_days_from_sunday())
    }
}

// -----------------------------
// State changes and time in state
// -----------------------------

/// One transition of a work item's `System.State` field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateChangeEvent {
    pub revision: i64,
    pub state: String,
    pub timestamp: DateTime<Utc>,
}

/// States that are always reported, even when never observed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CanonicalState {
    ToDo,
    Doing,
    Testing,
    Done,
    DevDone,
}

impl CanonicalState {
    pub const ALL: [CanonicalState; 5] = [
        Self::ToDo,
        Self::Doing,
        Self::Testing,
        Self::Done,
        Self::DevDone,
    ];

    pub fn label(self) -> &'static str {
        match self {
            Self::ToDo => "To Do",
            Self::Doing => "Doing",
            Self::Testing => "TESTING",
            Self::Done => "Done",
            Self::DevDone => "Dev-Done",
        }
    }

    // "DevDone" is how older boards spell the same column
    pub fn from_label(label: &str) -> Option<Self> {
        match label {
            "DevDone" => Some(Self::DevDone),
            _ => Self::ALL.into_iter().find(|s| s.label() == label),
        }
    }
}

/// Working seconds per state label.
///
/// Canonical states come first, in their fixed order, then any other
/// observed label in the order it was first accumulated.
#[derive(Debug, Clone, PartialEq)]
pub struct TimeInState {
    entries: Vec<(String, f64)>,
}

impl TimeInState {
    pub fn canonical() -> Self {
        Self {
            entries: CanonicalState::ALL
                .iter()
                .map(|s| (s.label().to_string(), 0.0))
                .collect(),
        }
    }

    pub fn add(&mut self, state: &str, seconds: f64) {
        let label = CanonicalState::from_label(state).map_or(state, |s| s.label());
        match self.entries.iter_mut().find(|(l, _)| l == label) {
            Some((_, total)) => *total += seconds,
            None => self.entries.push((label.to_string(), seconds)),
        }
    }

    #[cfg(test)]
    pub fn get(&self, state: &str) -> Option<f64> {
        let label = CanonicalState::from_label(state).map_or(state, |s| s.label());
        self.entries
            .iter()
            .find(|(l, _)| l == label)
            .map(|(_, secs)| *secs)
    }

    #[cfg(test)]
    pub fn iter(&self) -> impl Iterator<Item = (&str, f64)> {
        self.entries.iter().map(|(l, s)| (l.as_str(), *s))
    }

    #[cfg(test)]
    pub fn total(&self) -> f64 {
        self.entries.iter().map(|(_, s)| s).sum()
    }
}

impl Default for TimeInState {
    fn default() -> Self {
        Self::canonical()
    }
}

impl Serialize for TimeInState {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for (label, secs) in &self.entries {
            map.serialize_entry(label, secs)?;
        }
        map.end()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkItemTimeInState {
    pub work_item_id: u64,
    pub time_in_state: TimeInState,
}

// -----------------------------
// Upstream (Azure DevOps) records
// -----------------------------

/// The `{ count, value }` envelope every list endpoint returns.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Collection<T> {
    #[serde(default)]
    pub count: usize,
    pub value: Vec<T>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Project {
    pub id: Uuid,
    pub name: String,
    #[serde(default)]
    pub state: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkItemRef {
    pub id: u64,
    #[serde(default)]
    pub url: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WiqlResult {
    #[serde(default)]
    pub work_items: Vec<WorkItemRef>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkItem {
    pub id: u64,
    #[serde(default)]
    pub fields: Map<String, Value>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// One entry of `workItems/{id}/updates`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct WorkItemUpdate {
    #[serde(default)]
    pub rev: i64,
    #[serde(default)]
    pub fields: HashMap<String, FieldChange>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldChange {
    #[serde(default)]
    pub new_value: Option<Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GraphUser {
    pub display_name: String,
    #[serde(default)]
    pub mail_address: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Team {
    pub id: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TeamMember {
    pub identity: Identity,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Identity {
    pub display_name: String,
}
