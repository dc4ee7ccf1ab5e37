use std::time::Duration;

use log::{debug, info};
use serde::Deserialize;

use crate::error::SummaryError;

use super::payload::SummaryRequest;

pub const SUMMARY_URL_ENV: &str = "POMOGUARD_SUMMARY_URL";
pub const SUMMARY_SECRET_ENV: &str = "POMOGUARD_SUMMARY_SECRET";
pub const SECRET_HEADER: &str = "x-pomoguard-secret";

#[derive(Debug, Clone)]
pub struct SummaryConfig {
    pub endpoint: String,
    pub secret: Option<String>,
    pub request_timeout: Duration,
    pub poll_interval: Duration,
    pub max_polls: u32,
}

impl SummaryConfig {
    pub fn new(endpoint: impl Into<String>, secret: Option<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            secret,
            request_timeout: Duration::from_secs(20),
            poll_interval: Duration::from_secs(2),
            max_polls: 30,
        }
    }

    /// `None` when no endpoint is configured, which disables summaries.
    pub fn from_env() -> Option<Self> {
        let endpoint = std::env::var(SUMMARY_URL_ENV).ok()?;
        let endpoint = endpoint.trim();
        if endpoint.is_empty() {
            return None;
        }
        let secret = std::env::var(SUMMARY_SECRET_ENV)
            .ok()
            .filter(|value| !value.trim().is_empty());
        Some(Self::new(endpoint, secret))
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SubmitResponse {
    summary: Option<String>,
    job_id: Option<String>,
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct JobStatus {
    status: String,
    summary: Option<String>,
    error: Option<String>,
}

#[derive(Clone)]
pub struct SummaryClient {
    http: reqwest::Client,
    config: SummaryConfig,
}

impl SummaryClient {
    pub fn new(config: SummaryConfig) -> Result<Self, SummaryError> {
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()?;
        Ok(Self { http, config })
    }

    pub fn from_env() -> Result<Self, SummaryError> {
        let config = SummaryConfig::from_env().ok_or(SummaryError::Disabled)?;
        Self::new(config)
    }

    /// Submit a session and wait for its summary, polling if the proxy
    /// answers with a job id.
    pub async fn summarize(&self, request: &SummaryRequest) -> Result<String, SummaryError> {
        let mut builder = self.http.post(&self.config.endpoint).json(request);
        if let Some(secret) = &self.config.secret {
            builder = builder.header(SECRET_HEADER, secret);
        }

        let response = builder.send().await?;
        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(SummaryError::Proxy(format!("HTTP {status}: {}", body.trim())));
        }

        match serde_json::from_str::<SubmitResponse>(&body) {
            Ok(SubmitResponse {
                summary: Some(summary),
                ..
            }) if !summary.trim().is_empty() => Ok(summary),
            Ok(SubmitResponse {
                job_id: Some(job_id),
                ..
            }) => {
                info!("Summary for session {} queued as job {job_id}", request.session_id);
                self.poll(&job_id).await
            }
            Ok(SubmitResponse {
                error: Some(error), ..
            }) => Err(SummaryError::Proxy(error)),
            Ok(_) => Err(SummaryError::MalformedResponse(body)),
            Err(_) if !body.trim().is_empty() => Ok(body.trim().to_string()),
            Err(_) => Err(SummaryError::MalformedResponse(body)),
        }
    }

    async fn poll(&self, job_id: &str) -> Result<String, SummaryError> {
        let url = format!("{}/{}", self.config.endpoint.trim_end_matches('/'), job_id);

        for attempt in 1..=self.config.max_polls {
            tokio::time::sleep(self.config.poll_interval).await;

            let mut builder = self.http.get(&url);
            if let Some(secret) = &self.config.secret {
                builder = builder.header(SECRET_HEADER, secret);
            }
            let response = builder.send().await?;
            if !response.status().is_success() {
                return Err(SummaryError::Proxy(format!(
                    "HTTP {} while polling job {job_id}",
                    response.status()
                )));
            }

            let job: JobStatus = response.json().await?;
            debug!("Summary job {job_id} poll {attempt}: {}", job.status);
            match job.status.as_str() {
                "done" => {
                    return job
                        .summary
                        .filter(|summary| !summary.trim().is_empty())
                        .ok_or_else(|| {
                            SummaryError::MalformedResponse(format!(
                                "job {job_id} finished without a summary"
                            ))
                        });
                }
                "error" => {
                    return Err(SummaryError::Proxy(
                        job.error.unwrap_or_else(|| format!("job {job_id} failed")),
                    ));
                }
                _ => {}
            }
        }

        Err(SummaryError::Timeout {
            job_id: job_id.to_string(),
            attempts: self.config.max_polls,
        })
    }
}
