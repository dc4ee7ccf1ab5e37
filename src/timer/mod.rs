pub mod controller;
pub mod counters;
pub mod events;
pub mod state;

pub use controller::{ControllerConfig, TimerController};
pub use counters::DailyCounters;
pub use events::{SessionReflection, TimerEvent, TimerSnapshot};
pub use state::{
    AppUsage, FinalizedSession, Foreground, PomodoroState, SessionEvent, SessionEventKind,
    SessionMachine, TickOutcome,
};
