use serde::Serialize;

use super::counters::DailyCounters;
use super::state::{AppUsage, PomodoroState};

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct TimerSnapshot {
    pub state: PomodoroState,
    pub session_id: Option<String>,
    pub remaining_secs: u64,
    pub planned_minutes: Option<u32>,
    pub counters: DailyCounters,
}

/// Handed to the presentation layer when a session completes.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SessionReflection {
    pub session_id: String,
    pub total_seconds: u64,
    pub top_apps: Vec<AppUsage>,
}

impl SessionReflection {
    /// `usage` must already be sorted by seconds, descending.
    pub fn new(session_id: &str, usage: &[AppUsage], limit: usize) -> Self {
        Self {
            session_id: session_id.to_string(),
            total_seconds: usage.iter().map(|entry| entry.seconds).sum(),
            top_apps: usage.iter().take(limit).cloned().collect(),
        }
    }
}

/// Everything the controller publishes. Subscribers that lag simply miss
/// intermediate snapshots.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(tag = "event", content = "payload", rename_all = "kebab-case")]
pub enum TimerEvent {
    TimerStateChanged(TimerSnapshot),
    SessionCompleted(SessionReflection),
    #[serde(rename_all = "camelCase")]
    SummaryReady { session_id: String, summary: String },
    #[serde(rename_all = "camelCase")]
    SummaryUnavailable { session_id: String },
}
