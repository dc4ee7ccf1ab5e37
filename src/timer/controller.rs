use std::{future::Future, sync::Arc, time::Duration};

use anyhow::Result;
use chrono::{Local, Utc};
use log::{debug, info, warn};
use tokio::{
    sync::{broadcast, Mutex},
    task::JoinHandle,
    time::{self, Instant, MissedTickBehavior},
};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::{
    allowlist::AllowListStore,
    db::Database,
    error::TimerError,
    sensing::{self, ForegroundObserver, SamplingTimeouts},
    settings::TimerPreferences,
    summary::{SummaryClient, SummaryRequest},
};

use super::{
    events::{SessionReflection, TimerEvent, TimerSnapshot},
    state::{FinalizedSession, Foreground, PomodoroState, SessionMachine, TickOutcome},
};

// Set to true to trace ticker scheduling
const ENABLE_LOGS: bool = false;

use crate::log_debug;

const EVENT_CHANNEL_CAPACITY: usize = 64;

#[derive(Debug, Clone)]
pub struct ControllerConfig {
    pub tick_interval: Duration,
    /// How long Success is shown before the break starts.
    pub success_hold: Duration,
    pub break_duration: Duration,
    pub sampling: SamplingTimeouts,
    pub top_apps_limit: usize,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self::from_preferences(&TimerPreferences::default())
    }
}

impl ControllerConfig {
    pub fn from_preferences(prefs: &TimerPreferences) -> Self {
        Self {
            tick_interval: Duration::from_secs(1),
            success_hold: Duration::from_secs(prefs.success_hold_secs),
            break_duration: Duration::from_secs(u64::from(prefs.break_minutes) * 60),
            sampling: SamplingTimeouts::default(),
            top_apps_limit: prefs.top_apps_limit,
        }
    }
}

struct Ticker {
    handle: JoinHandle<()>,
    cancel_token: CancellationToken,
}

/// Drives the session machine once per tick and performs its side effects.
///
/// Ticks and user commands are serialised through the machine mutex. A tick
/// samples the foreground without holding it and is dropped if a command ran
/// in the meantime.
#[derive(Clone)]
pub struct TimerController {
    machine: Arc<Mutex<SessionMachine>>,
    allow_list: Arc<Mutex<AllowListStore>>,
    observer: Arc<dyn ForegroundObserver>,
    db: Database,
    summary: Option<SummaryClient>,
    events: broadcast::Sender<TimerEvent>,
    ticker: Arc<Mutex<Option<Ticker>>>,
    config: ControllerConfig,
}

impl TimerController {
    pub fn new(
        db: Database,
        allow_list: AllowListStore,
        observer: Arc<dyn ForegroundObserver>,
        summary: Option<SummaryClient>,
        config: ControllerConfig,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            machine: Arc::new(Mutex::new(SessionMachine::new())),
            allow_list: Arc::new(Mutex::new(allow_list)),
            observer,
            db,
            summary,
            events,
            ticker: Arc::new(Mutex::new(None)),
            config,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<TimerEvent> {
        self.events.subscribe()
    }

    pub async fn snapshot(&self) -> TimerSnapshot {
        let mut machine = self.machine.lock().await;
        machine.roll_over(Local::now());
        machine.snapshot()
    }

    /// Run `f` against the allow-list. Changes apply from the next tick.
    pub async fn with_allow_list<T>(&self, f: impl FnOnce(&mut AllowListStore) -> T) -> T {
        let mut guard = self.allow_list.lock().await;
        f(&mut *guard)
    }

    /// Allow `app_id` for the rest of the running session only.
    pub async fn allow_for_session(&self, app_id: &str) -> Result<()> {
        let machine = self.machine.lock().await;
        if !machine.state().is_focusing() {
            return Err(TimerError::NotActive.into());
        }
        self.allow_list.lock().await.allow_for_session(app_id);
        info!("Allowed {app_id} for session {}", machine.session_id().unwrap_or("-"));
        Ok(())
    }

    pub async fn start(&self, planned_minutes: u32) -> Result<TimerSnapshot> {
        let mut machine = self.machine.lock().await;
        if machine.state() != PomodoroState::Idle {
            return Err(TimerError::AlreadyActive.into());
        }
        if planned_minutes == 0 {
            return Err(TimerError::InvalidDuration.into());
        }

        let foreground =
            match sensing::current_application(&self.observer, self.config.sampling.foreground)
                .await
            {
                Ok(app_id) => Some(app_id),
                Err(err) => {
                    debug!("No foreground app at session start: {err}");
                    None
                }
            };

        let started_at = Utc::now();
        let session_id = match self.db.create_session(started_at, planned_minutes).await {
            Ok(id) => id,
            Err(err) => {
                warn!("Failed to record session start, continuing unrecorded: {err:?}");
                Uuid::new_v4().to_string()
            }
        };

        machine.start(
            session_id.clone(),
            started_at,
            planned_minutes,
            foreground.as_deref(),
        )?;
        self.allow_list
            .lock()
            .await
            .begin_session(foreground.as_deref());
        let snapshot = machine.snapshot();
        drop(machine);

        info!(
            "Session {session_id} started for {planned_minutes} min (foreground: {})",
            foreground.as_deref().unwrap_or("unknown")
        );

        self.spawn_ticker().await;
        self.emit(TimerEvent::TimerStateChanged(snapshot.clone()));
        Ok(snapshot)
    }

    /// Abandon the session. Nothing is finalized or flushed.
    pub async fn pause(&self) -> Result<()> {
        let (session_id, snapshot) = {
            let mut machine = self.machine.lock().await;
            let session_id = machine.pause()?;
            self.allow_list.lock().await.end_session();
            (session_id, machine.snapshot())
        };

        self.cancel_ticker().await;

        info!(
            "Session {} paused and abandoned",
            session_id.as_deref().unwrap_or("-")
        );
        self.emit(TimerEvent::TimerStateChanged(snapshot));
        Ok(())
    }

    /// End the session now, finalizing it if it was still focusing.
    pub async fn finish(&self) -> Result<Option<FinalizedSession>> {
        let (finalized, snapshot) = {
            let mut machine = self.machine.lock().await;
            let finalized = machine.finish(Utc::now())?;
            self.allow_list.lock().await.end_session();
            (finalized, machine.snapshot())
        };

        self.cancel_ticker().await;

        if let Some(finalized) = &finalized {
            info!("Session {} finished early", finalized.id);
            self.persist(finalized).await;
        }

        self.emit(TimerEvent::TimerStateChanged(snapshot));
        Ok(finalized)
    }

    /// Store a human-entered reflection, replacing any earlier summary.
    pub async fn save_reflection_note(&self, session_id: &str, note: &str) -> Result<bool> {
        self.db.update_session_summary(session_id, note, true).await
    }

    /// One logical second. Never fails: sensing problems become a neutral or
    /// not-allowed tick, persistence problems are logged.
    pub async fn tick(&self) {
        let (state, generation) = {
            let mut machine = self.machine.lock().await;
            if machine.state() == PomodoroState::Idle {
                machine.roll_over(Local::now());
                return;
            }
            (machine.state(), machine.generation())
        };

        let foreground = if state.is_focusing() {
            match sensing::sample_foreground(&self.observer, &self.allow_list, self.config.sampling)
                .await
            {
                Ok(observation) => Foreground::Observed(observation),
                Err(err) => {
                    debug!("Neutral tick: {err}");
                    Foreground::Unavailable
                }
            }
        } else {
            Foreground::Unavailable
        };

        let (outcome, snapshot, generation) = {
            let mut machine = self.machine.lock().await;
            if machine.generation() != generation {
                log_debug!("Dropping tick sampled before a state change");
                return;
            }
            let outcome = machine.tick(Local::now(), foreground);
            if matches!(outcome, TickOutcome::Completed(_)) {
                self.allow_list.lock().await.end_session();
            }
            (outcome, machine.snapshot(), machine.generation())
        };

        self.emit(TimerEvent::TimerStateChanged(snapshot));

        match outcome {
            TickOutcome::Completed(finalized) => self.complete(finalized, generation).await,
            TickOutcome::BreakFinished => info!("Break finished"),
            TickOutcome::Skipped | TickOutcome::Advanced => {}
        }
    }

    async fn complete(&self, finalized: FinalizedSession, generation: u64) {
        info!(
            "Session {} completed ({} apps used)",
            finalized.id,
            finalized.usage.len()
        );
        self.persist(&finalized).await;

        let reflection =
            SessionReflection::new(&finalized.id, &finalized.usage, self.config.top_apps_limit);
        self.emit(TimerEvent::SessionCompleted(reflection));

        self.spawn_summary(&finalized);
        self.schedule_break(generation);
    }

    async fn persist(&self, finalized: &FinalizedSession) {
        if let Err(err) = self.db.persist_finalized_session(finalized).await {
            warn!("Failed to persist session {}: {err:?}", finalized.id);
        }
    }

    fn schedule_break(&self, generation: u64) {
        let machine = self.machine.clone();
        let events = self.events.clone();
        let hold = self.config.success_hold;
        let break_secs = self.config.break_duration.as_secs();

        tokio::spawn(async move {
            time::sleep(hold).await;
            let mut guard = machine.lock().await;
            if guard.begin_break(generation, break_secs) {
                info!("Break started ({break_secs}s)");
                let _ = events.send(TimerEvent::TimerStateChanged(guard.snapshot()));
            }
        });
    }

    fn spawn_summary(&self, finalized: &FinalizedSession) {
        let Some(client) = self.summary.clone() else {
            return;
        };
        let request = SummaryRequest::from_finalized(finalized);
        let db = self.db.clone();
        let events = self.events.clone();

        tokio::spawn(async move {
            let session_id = request.session_id.clone();
            match client.summarize(&request).await {
                Ok(summary) => {
                    if let Err(err) = db.update_session_summary(&session_id, &summary, false).await
                    {
                        warn!("Failed to store summary for {session_id}: {err:?}");
                    }
                    let _ = events.send(TimerEvent::SummaryReady {
                        session_id,
                        summary,
                    });
                }
                Err(err) => {
                    warn!("Summary unavailable for {session_id}: {err}");
                    let _ = events.send(TimerEvent::SummaryUnavailable { session_id });
                }
            }
        });
    }

    async fn spawn_ticker(&self) {
        let mut ticker_guard = self.ticker.lock().await;
        if let Some(previous) = ticker_guard.take() {
            previous.cancel_token.cancel();
        }

        let cancel_token = CancellationToken::new();
        let token = cancel_token.clone();
        let controller = self.clone();
        let period = self.config.tick_interval;

        let handle = tokio::spawn(async move {
            drive_ticks(Instant::now() + period, period, token, || {
                let controller = controller.clone();
                async move {
                    controller.tick().await;
                    controller.machine.lock().await.state() != PomodoroState::Idle
                }
            })
            .await;
            log_debug!("Ticker stopped");
        });

        *ticker_guard = Some(Ticker {
            handle,
            cancel_token,
        });
    }

    /// Stop the ticker. A tick already in flight completes, but its result is
    /// discarded by the generation check.
    async fn cancel_ticker(&self) {
        if let Some(ticker) = self.ticker.lock().await.take() {
            ticker.cancel_token.cancel();
            drop(ticker.handle);
        }
    }

    fn emit(&self, event: TimerEvent) {
        let _ = self.events.send(event);
    }
}

/// Call `on_tick` every `period` from `first` until it returns false or the
/// token is cancelled. A cancelled token wins over a tick that is also ready.
async fn drive_ticks<F, Fut>(
    first: Instant,
    period: Duration,
    token: CancellationToken,
    mut on_tick: F,
) where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let mut interval = time::interval_at(first, period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            biased;
            _ = token.cancelled() => break,
            _ = interval.tick() => {
                if !on_tick().await {
                    break;
                }
            }
        }
    }
}
