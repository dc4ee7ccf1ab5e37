use std::time::Duration;

use chrono::Utc;
use pomoguard_lib::{
    error::SummaryError,
    summary::{SummaryClient, SECRET_HEADER, SummaryConfig, SummaryRequest},
    timer::{AppUsage, FinalizedSession, SessionEvent, SessionEventKind},
};

fn request() -> SummaryRequest {
    let started_at = Utc::now() - chrono::Duration::minutes(25);
    SummaryRequest::from_finalized(&FinalizedSession {
        id: "session-42".into(),
        started_at,
        ended_at: started_at + chrono::Duration::minutes(25),
        planned_minutes: 25,
        completed: true,
        usage: vec![AppUsage {
            bundle_id: "com.microsoft.VSCode".into(),
            seconds: 1500,
        }],
        events: vec![SessionEvent {
            t: 0,
            kind: SessionEventKind::Start,
            title: "com.microsoft.VSCode".into(),
            detail: None,
        }],
    })
}

fn client(server: &mockito::Server, secret: Option<&str>, max_polls: u32) -> SummaryClient {
    let mut config = SummaryConfig::new(
        format!("{}/summarize", server.url()),
        secret.map(str::to_string),
    );
    config.poll_interval = Duration::from_millis(5);
    config.max_polls = max_polls;
    SummaryClient::new(config).unwrap()
}

#[tokio::test]
async fn immediate_summary_is_returned_and_secret_sent() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("POST", "/summarize")
        .match_header(SECRET_HEADER, "hunter2")
        .match_body(mockito::Matcher::PartialJsonString(
            r#"{"sessionId":"session-42","durationMin":25}"#.into(),
        ))
        .with_status(200)
        .with_body(r#"{"summary":"Twenty-five calm minutes."}"#)
        .create_async()
        .await;

    let summary = client(&server, Some("hunter2"), 3)
        .summarize(&request())
        .await
        .unwrap();
    assert_eq!(summary, "Twenty-five calm minutes.");
    mock.assert_async().await;
}

#[tokio::test]
async fn plain_text_body_is_taken_as_the_summary() {
    let mut server = mockito::Server::new_async().await;
    let _submit = server
        .mock("POST", "/summarize")
        .with_status(200)
        .with_body("Mostly editor time.\n")
        .create_async()
        .await;

    let summary = client(&server, None, 3).summarize(&request()).await.unwrap();
    assert_eq!(summary, "Mostly editor time.");
}

#[tokio::test]
async fn job_id_is_polled_until_done() {
    let mut server = mockito::Server::new_async().await;
    let _submit = server
        .mock("POST", "/summarize")
        .with_status(202)
        .with_body(r#"{"jobId":"job-7"}"#)
        .create_async()
        .await;
    let poll = server
        .mock("GET", "/summarize/job-7")
        .with_status(200)
        .with_body(r#"{"status":"done","summary":"Good session."}"#)
        .create_async()
        .await;

    let summary = client(&server, None, 3).summarize(&request()).await.unwrap();
    assert_eq!(summary, "Good session.");
    poll.assert_async().await;
}

#[tokio::test]
async fn pending_job_times_out_after_max_polls() {
    let mut server = mockito::Server::new_async().await;
    let _submit = server
        .mock("POST", "/summarize")
        .with_status(200)
        .with_body(r#"{"jobId":"slow"}"#)
        .create_async()
        .await;
    let poll = server
        .mock("GET", "/summarize/slow")
        .with_status(200)
        .with_body(r#"{"status":"pending"}"#)
        .expect(3)
        .create_async()
        .await;

    let err = client(&server, None, 3)
        .summarize(&request())
        .await
        .unwrap_err();
    assert!(matches!(err, SummaryError::Timeout { attempts: 3, .. }), "{err:?}");
    poll.assert_async().await;
}

#[tokio::test]
async fn failed_job_and_http_errors_surface() {
    let mut server = mockito::Server::new_async().await;
    let _submit = server
        .mock("POST", "/summarize")
        .with_status(200)
        .with_body(r#"{"jobId":"bad"}"#)
        .create_async()
        .await;
    let _poll = server
        .mock("GET", "/summarize/bad")
        .with_status(200)
        .with_body(r#"{"status":"error","error":"model overloaded"}"#)
        .create_async()
        .await;

    let err = client(&server, None, 3)
        .summarize(&request())
        .await
        .unwrap_err();
    assert!(matches!(err, SummaryError::Proxy(ref message) if message == "model overloaded"));

    let mut down = mockito::Server::new_async().await;
    let _down = down
        .mock("POST", "/summarize")
        .with_status(503)
        .with_body("unavailable")
        .create_async()
        .await;
    let err = client(&down, None, 3)
        .summarize(&request())
        .await
        .unwrap_err();
    assert!(matches!(err, SummaryError::Proxy(_)));
}
