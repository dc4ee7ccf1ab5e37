use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::timer::{AppUsage, FinalizedSession, SessionEvent};

pub const MAX_PAYLOAD_EVENTS: usize = 200;
pub const MAX_PAYLOAD_APPS: usize = 20;

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SummaryRequest {
    pub session_id: String,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    pub duration_min: u32,
    pub events: Vec<SessionEvent>,
    pub apps: Vec<AppUsage>,
}

impl SummaryRequest {
    /// Keeps the most recent events and the most used apps.
    pub fn from_finalized(session: &FinalizedSession) -> Self {
        let elapsed_secs = (session.ended_at - session.started_at).num_seconds().max(0);
        let duration_min = u32::try_from((elapsed_secs + 30) / 60).unwrap_or(u32::MAX);

        let skip = session.events.len().saturating_sub(MAX_PAYLOAD_EVENTS);
        Self {
            session_id: session.id.clone(),
            started_at: session.started_at,
            ended_at: session.ended_at,
            duration_min,
            events: session.events.iter().skip(skip).cloned().collect(),
            apps: session.usage.iter().take(MAX_PAYLOAD_APPS).cloned().collect(),
        }
    }
}
