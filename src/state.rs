use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::models::WorkCalendar;
use crate::upstream::WorkTracker;

/// Source of "now" for the still-open last state.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Application state shared between handlers.
#[derive(Clone)]
pub struct AppState {
    pub tracker: Arc<dyn WorkTracker>,
    pub calendar: Arc<WorkCalendar>,
    pub clock: Arc<dyn Clock>,
}

#[cfg(test)]
pub struct FixedClock(pub DateTime<Utc>);

#[cfg(test)]
impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        self.0
    }
}
