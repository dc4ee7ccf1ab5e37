//! Error taxonomy for the focus core.
//!
//! Nothing in the tick path propagates these to the caller. Sensing errors
//! collapse into a "not allowed" determination, persistence and summary errors
//! are logged and dropped. They exist so each boundary can say precisely what
//! went wrong before the failure is absorbed.

use thiserror::Error;

/// User-entered domain could not be turned into a host.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid domain input: {0:?}")]
pub struct InvalidDomain(pub String);

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SensingError {
    #[error("no frontmost application could be determined")]
    ForegroundUnavailable,

    #[error("active tab query failed for {app_id}: {message}")]
    TabQueryFailed { app_id: String, message: String },

    #[error("active tab query for {app_id} timed out after {timeout_ms}ms")]
    TabQueryTimeout { app_id: String, timeout_ms: u64 },
}

#[derive(Debug, Error)]
pub enum SummaryError {
    #[error("summary proxy endpoint is not configured")]
    Disabled,

    #[error("summary proxy request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("summary proxy reported an error: {0}")]
    Proxy(String),

    #[error("summary job {job_id} did not finish after {attempts} polls")]
    Timeout { job_id: String, attempts: u32 },

    #[error("summary proxy returned an unexpected response: {0}")]
    MalformedResponse(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TimerError {
    #[error("timer already active")]
    AlreadyActive,

    #[error("no active session")]
    NotActive,

    #[error("planned duration must be greater than zero minutes")]
    InvalidDuration,
}
