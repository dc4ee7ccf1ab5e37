//! Session state machine.
//!
//! Pure and deterministic: the caller supplies the clock reading and the
//! already-evaluated foreground observation for each tick. Persistence,
//! summaries and scheduling of the break live in the controller.
//!
//! ```text
//! Idle -> Running <-> Distracted
//!           |
//!           v
//!        Success -> BreakTime -> Idle
//! ```
//! Pause and Finish return to Idle from any non-idle state.

use std::collections::HashMap;

use chrono::{DateTime, Local, Utc};
use log::debug;
use serde::{Deserialize, Serialize};

use crate::error::TimerError;
use crate::sensing::Observation;

use super::counters::DailyCounters;
use super::events::TimerSnapshot;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub enum PomodoroState {
    #[default]
    Idle,
    Running,
    Distracted,
    Success,
    BreakTime,
}

impl PomodoroState {
    /// Running or Distracted: the foreground is being judged.
    pub fn is_focusing(self) -> bool {
        matches!(self, PomodoroState::Running | PomodoroState::Distracted)
    }
}

/// Foreground input for one tick.
#[derive(Debug, Clone)]
pub enum Foreground {
    /// Nothing could be sampled; the tick is neutral.
    Unavailable,
    Observed(Observation),
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct AppUsage {
    pub bundle_id: String,
    pub seconds: u64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SessionEventKind {
    Start,
    Distracted,
    Refocused,
    Completed,
    Finished,
}

/// Timeline entry; `t` is seconds since the session started.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SessionEvent {
    pub t: u64,
    pub kind: SessionEventKind,
    pub title: String,
    pub detail: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActiveSession {
    pub id: String,
    pub started_at: DateTime<Utc>,
    pub planned_minutes: u32,
    finalized: bool,
}

/// A session handed over for persistence. `usage` is sorted by seconds, descending.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct FinalizedSession {
    pub id: String,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    pub planned_minutes: u32,
    pub completed: bool,
    pub usage: Vec<AppUsage>,
    pub events: Vec<SessionEvent>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TickOutcome {
    /// No session; only the daily rollover was checked.
    Skipped,
    Advanced,
    /// The countdown reached zero. The machine is now in Success.
    Completed(FinalizedSession),
    /// The break ran out. The machine is back in Idle.
    BreakFinished,
}

#[derive(Debug, Clone, Default)]
pub struct SessionMachine {
    state: PomodoroState,
    session: Option<ActiveSession>,
    remaining_secs: u64,
    usage: HashMap<String, u64>,
    events: Vec<SessionEvent>,
    counters: DailyCounters,
    /// Bumped on every user-driven or scheduled transition so the controller
    /// can discard observations that began before it.
    generation: u64,
}

impl SessionMachine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> PomodoroState {
        self.state
    }

    pub fn remaining_secs(&self) -> u64 {
        self.remaining_secs
    }

    pub fn session(&self) -> Option<&ActiveSession> {
        self.session.as_ref()
    }

    pub fn session_id(&self) -> Option<&str> {
        self.session.as_ref().map(|s| s.id.as_str())
    }

    pub fn counters(&self) -> &DailyCounters {
        &self.counters
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Accumulated usage of the live session, most-used first.
    pub fn usage(&self) -> Vec<AppUsage> {
        sorted_usage(&self.usage)
    }

    pub fn snapshot(&self) -> TimerSnapshot {
        TimerSnapshot {
            state: self.state,
            session_id: self.session_id().map(str::to_string),
            remaining_secs: self.remaining_secs,
            planned_minutes: self.session.as_ref().map(|s| s.planned_minutes),
            counters: self.counters.clone(),
        }
    }

    pub fn start(
        &mut self,
        session_id: String,
        started_at: DateTime<Utc>,
        planned_minutes: u32,
        foreground: Option<&str>,
    ) -> Result<(), TimerError> {
        if self.state != PomodoroState::Idle {
            return Err(TimerError::AlreadyActive);
        }
        if planned_minutes == 0 {
            return Err(TimerError::InvalidDuration);
        }

        self.state = PomodoroState::Running;
        self.remaining_secs = u64::from(planned_minutes) * 60;
        self.usage.clear();
        self.events = vec![SessionEvent {
            t: 0,
            kind: SessionEventKind::Start,
            title: foreground.unwrap_or_default().to_string(),
            detail: None,
        }];
        self.session = Some(ActiveSession {
            id: session_id,
            started_at,
            planned_minutes,
            finalized: false,
        });
        self.generation += 1;
        Ok(())
    }

    /// Advance one logical second.
    ///
    /// Rollover is checked before anything is accumulated so that seconds
    /// earned in this tick land on the new day.
    pub fn tick(&mut self, now: DateTime<Local>, foreground: Foreground) -> TickOutcome {
        self.roll_over(now);

        match self.state {
            PomodoroState::Idle => TickOutcome::Skipped,
            PomodoroState::Success => TickOutcome::Advanced,
            PomodoroState::BreakTime => {
                self.remaining_secs = self.remaining_secs.saturating_sub(1);
                if self.remaining_secs == 0 {
                    self.reset_to_idle();
                    TickOutcome::BreakFinished
                } else {
                    TickOutcome::Advanced
                }
            }
            PomodoroState::Running | PomodoroState::Distracted => {
                let Foreground::Observed(observation) = foreground else {
                    return TickOutcome::Advanced;
                };
                self.focus_tick(now.with_timezone(&Utc), observation)
            }
        }
    }

    fn focus_tick(&mut self, now: DateTime<Utc>, observation: Observation) -> TickOutcome {
        *self.usage.entry(observation.app_id.clone()).or_insert(0) += 1;

        match (self.state, observation.allowed) {
            (PomodoroState::Running, false) => {
                self.state = PomodoroState::Distracted;
                self.push_event(now, SessionEventKind::Distracted, observation.app_id, observation.host);
                TickOutcome::Advanced
            }
            (PomodoroState::Distracted, false) => {
                self.counters.add_distracted_second();
                TickOutcome::Advanced
            }
            (state, true) => {
                if state == PomodoroState::Distracted {
                    self.state = PomodoroState::Running;
                    self.push_event(now, SessionEventKind::Refocused, observation.app_id, observation.host);
                }
                self.remaining_secs = self.remaining_secs.saturating_sub(1);
                self.counters.add_focused_second();

                if self.remaining_secs > 0 {
                    return TickOutcome::Advanced;
                }

                self.state = PomodoroState::Success;
                self.counters.add_completed();
                self.push_event(now, SessionEventKind::Completed, String::new(), None);
                match self.finalize(now) {
                    Some(finalized) => TickOutcome::Completed(finalized),
                    None => TickOutcome::Advanced,
                }
            }
            _ => TickOutcome::Advanced,
        }
    }

    /// Reset the daily counters if `now` is on a different local day.
    pub fn roll_over(&mut self, now: DateTime<Local>) -> bool {
        let rolled = self.counters.roll_over(now.date_naive());
        if rolled {
            debug!("Daily counters reset for {}", now.date_naive());
        }
        rolled
    }

    /// Leave Success for the break, unless a user command got there first.
    pub fn begin_break(&mut self, generation: u64, break_secs: u64) -> bool {
        if self.state != PomodoroState::Success || self.generation != generation {
            return false;
        }
        if break_secs == 0 {
            self.reset_to_idle();
            return true;
        }
        self.state = PomodoroState::BreakTime;
        self.remaining_secs = break_secs;
        self.generation += 1;
        true
    }

    /// End the session now. A session still focusing is finalized and marked
    /// completed; one already in Success or BreakTime was finalized earlier.
    pub fn finish(&mut self, now: DateTime<Utc>) -> Result<Option<FinalizedSession>, TimerError> {
        if self.state == PomodoroState::Idle {
            return Err(TimerError::NotActive);
        }

        let finalized = if self.state.is_focusing() {
            self.push_event(now, SessionEventKind::Finished, String::new(), None);
            self.finalize(now)
        } else {
            None
        };
        self.reset_to_idle();
        Ok(finalized)
    }

    /// Abandon the session without finalizing it. Returns the dropped id.
    pub fn pause(&mut self) -> Result<Option<String>, TimerError> {
        if self.state == PomodoroState::Idle {
            return Err(TimerError::NotActive);
        }
        let session_id = self.session.as_ref().map(|s| s.id.clone());
        self.reset_to_idle();
        Ok(session_id)
    }

    fn finalize(&mut self, ended_at: DateTime<Utc>) -> Option<FinalizedSession> {
        let session = self.session.as_mut().filter(|s| !s.finalized)?;
        session.finalized = true;

        let usage = sorted_usage(&self.usage);
        self.usage.clear();

        Some(FinalizedSession {
            id: session.id.clone(),
            started_at: session.started_at,
            ended_at,
            planned_minutes: session.planned_minutes,
            completed: true,
            usage,
            events: std::mem::take(&mut self.events),
        })
    }

    fn push_event(
        &mut self,
        now: DateTime<Utc>,
        kind: SessionEventKind,
        title: String,
        detail: Option<String>,
    ) {
        let Some(session) = self.session.as_ref() else {
            return;
        };
        let t = (now - session.started_at).num_seconds().max(0) as u64;
        self.events.push(SessionEvent {
            t,
            kind,
            title,
            detail,
        });
    }

    fn reset_to_idle(&mut self) {
        self.state = PomodoroState::Idle;
        self.session = None;
        self.remaining_secs = 0;
        self.usage.clear();
        self.events.clear();
        self.generation += 1;
    }
}

fn sorted_usage(usage: &HashMap<String, u64>) -> Vec<AppUsage> {
    let mut entries: Vec<AppUsage> = usage
        .iter()
        .map(|(bundle_id, seconds)| AppUsage {
            bundle_id: bundle_id.clone(),
            seconds: *seconds,
        })
        .collect();
    entries.sort_by(|a, b| {
        b.seconds
            .cmp(&a.seconds)
            .then_with(|| a.bundle_id.cmp(&b.bundle_id))
    });
    entries
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn at(h: u32, m: u32, s: u32) -> DateTime<Local> {
        Local.with_ymd_and_hms(2024, 3, 1, h, m, s).unwrap()
    }

    fn observed(app: &str, allowed: bool) -> Foreground {
        Foreground::Observed(Observation {
            app_id: app.into(),
            host: None,
            allowed,
        })
    }

    fn started(minutes: u32) -> SessionMachine {
        let mut machine = SessionMachine::new();
        machine
            .start("s1".into(), at(9, 0, 0).with_timezone(&Utc), minutes, Some("com.apple.Terminal"))
            .unwrap();
        machine
    }

    #[test]
    fn start_requires_idle_and_a_duration() {
        let mut machine = SessionMachine::new();
        assert_eq!(
            machine.start("s".into(), Utc::now(), 0, None),
            Err(TimerError::InvalidDuration)
        );
        let mut machine = started(25);
        assert_eq!(machine.remaining_secs(), 1500);
        assert_eq!(
            machine.start("s2".into(), Utc::now(), 25, None),
            Err(TimerError::AlreadyActive)
        );
    }

    #[test]
    fn distraction_freezes_the_countdown() {
        let mut machine = started(25);
        machine.tick(at(9, 0, 1), observed("a", true));
        assert_eq!(machine.remaining_secs(), 1499);

        machine.tick(at(9, 0, 2), observed("b", false));
        assert_eq!(machine.state(), PomodoroState::Distracted);
        assert_eq!(machine.remaining_secs(), 1499);
        assert_eq!(machine.counters().distracted_seconds_today, 0);

        machine.tick(at(9, 0, 3), observed("b", false));
        assert_eq!(machine.counters().distracted_seconds_today, 1);

        machine.tick(at(9, 0, 4), observed("a", true));
        assert_eq!(machine.state(), PomodoroState::Running);
        assert_eq!(machine.remaining_secs(), 1498);
    }

    #[test]
    fn usage_credits_every_focusing_tick() {
        let mut machine = started(25);
        machine.tick(at(9, 0, 1), observed("editor", true));
        machine.tick(at(9, 0, 2), observed("game", false));
        machine.tick(at(9, 0, 3), observed("game", false));
        machine.tick(at(9, 0, 4), Foreground::Unavailable);

        assert_eq!(
            machine.usage(),
            vec![
                AppUsage { bundle_id: "game".into(), seconds: 2 },
                AppUsage { bundle_id: "editor".into(), seconds: 1 },
            ]
        );
    }

    #[test]
    fn unavailable_foreground_is_neutral() {
        let mut machine = started(1);
        machine.tick(at(9, 0, 1), observed("b", false));
        machine.tick(at(9, 0, 2), Foreground::Unavailable);
        assert_eq!(machine.state(), PomodoroState::Distracted);
        assert_eq!(machine.counters().distracted_seconds_today, 0);
    }

    #[test]
    fn break_counts_down_to_idle() {
        let mut machine = started(1);
        let mut now = at(9, 0, 0);
        let mut finalized = None;
        for _ in 0..60 {
            now += Duration::seconds(1);
            if let TickOutcome::Completed(f) = machine.tick(now, observed("a", true)) {
                finalized = Some(f);
            }
        }
        let finalized = finalized.unwrap();
        assert_eq!(machine.state(), PomodoroState::Success);
        assert_eq!(finalized.usage, vec![AppUsage { bundle_id: "a".into(), seconds: 60 }]);

        assert!(machine.begin_break(machine.generation(), 2));
        assert_eq!(machine.state(), PomodoroState::BreakTime);
        assert_eq!(machine.tick(now, Foreground::Unavailable), TickOutcome::Advanced);
        assert_eq!(machine.tick(now, Foreground::Unavailable), TickOutcome::BreakFinished);
        assert_eq!(machine.state(), PomodoroState::Idle);
        assert_eq!(machine.session_id(), None);
    }

    #[test]
    fn stale_break_request_is_ignored() {
        let mut machine = started(1);
        let generation = machine.generation();
        let mut now = at(9, 0, 0);
        for _ in 0..60 {
            now += Duration::seconds(1);
            machine.tick(now, observed("a", true));
        }
        // Completion itself does not bump the generation; a pause does.
        machine.pause().unwrap();
        assert!(!machine.begin_break(generation, 300));
        assert_eq!(machine.state(), PomodoroState::Idle);
    }

    #[test]
    fn events_record_the_timeline() {
        let mut machine = started(25);
        machine.tick(
            at(9, 0, 5),
            Foreground::Observed(Observation {
                app_id: "com.apple.Safari".into(),
                host: Some("youtube.com".into()),
                allowed: false,
            }),
        );
        machine.tick(at(9, 0, 9), observed("com.apple.Terminal", true));
        let finalized = machine
            .finish(at(9, 1, 0).with_timezone(&Utc))
            .unwrap()
            .unwrap();

        let kinds: Vec<_> = finalized.events.iter().map(|e| e.kind).collect();
        assert_eq!(
            kinds,
            vec![
                SessionEventKind::Start,
                SessionEventKind::Distracted,
                SessionEventKind::Refocused,
                SessionEventKind::Finished,
            ]
        );
        assert_eq!(finalized.events[1].t, 5);
        assert_eq!(finalized.events[1].detail.as_deref(), Some("youtube.com"));
        assert_eq!(finalized.events[3].t, 60);
    }

    #[test]
    fn finish_after_success_does_not_finalize_twice() {
        let mut machine = started(1);
        let mut now = at(9, 0, 0);
        for _ in 0..60 {
            now += Duration::seconds(1);
            machine.tick(now, observed("a", true));
        }
        assert_eq!(machine.finish(now.with_timezone(&Utc)), Ok(None));
        assert_eq!(machine.state(), PomodoroState::Idle);
        assert_eq!(machine.finish(Utc::now()), Err(TimerError::NotActive));
    }
}
