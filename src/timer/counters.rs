use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// Per-day totals, reset when the local calendar day changes.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct DailyCounters {
    pub day: Option<NaiveDate>,
    pub completed_today: u32,
    pub focused_seconds_today: u64,
    pub distracted_seconds_today: u64,
}

impl DailyCounters {
    /// Zero all counters if `today` differs from the recorded day.
    /// Returns whether a reset happened.
    pub fn roll_over(&mut self, today: NaiveDate) -> bool {
        if self.day == Some(today) {
            return false;
        }
        let had_day = self.day.is_some();
        *self = Self {
            day: Some(today),
            ..Self::default()
        };
        had_day
    }

    pub fn add_focused_second(&mut self) {
        self.focused_seconds_today = self.focused_seconds_today.saturating_add(1);
    }

    pub fn add_distracted_second(&mut self) {
        self.distracted_seconds_today = self.distracted_seconds_today.saturating_add(1);
    }

    pub fn add_completed(&mut self) {
        self.completed_today = self.completed_today.saturating_add(1);
    }
}
