//! Optional AI summary of a finished session.
//!
//! The controller hands a compact payload to a remote proxy once a session is
//! finalized. The round trip runs on its own task; failure only means the
//! session never gets a summary.

mod client;
mod payload;

pub use client::{
    SummaryClient, SummaryConfig, SECRET_HEADER, SUMMARY_SECRET_ENV, SUMMARY_URL_ENV,
};
pub use payload::{SummaryRequest, MAX_PAYLOAD_APPS, MAX_PAYLOAD_EVENTS};
