//! Foreground sensing: which application is in front and, for browsers,
//! which site the active tab shows.
//!
//! Platform queries may stall, so every call runs under a timeout. A query that
//! misses its deadline is dropped, which cancels whatever work it started. A
//! browser whose tab cannot be resolved counts as not allowed.

pub mod osascript;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::allowlist::{host_from_url, AllowListStore};
use crate::error::SensingError;

pub use osascript::OsascriptObserver;

// Set to true to enable verbose logging in this module
const ENABLE_LOGS: bool = true;

use crate::{log_debug, log_warn};

/// Bundle identifiers whose active tab is consulted against website rules.
pub const BROWSER_APP_IDS: &[&str] = &[
    "com.apple.Safari",
    "com.apple.SafariTechnologyPreview",
    "com.google.Chrome",
    "com.google.Chrome.canary",
    "org.chromium.Chromium",
    "com.brave.Browser",
    "com.microsoft.edgemac",
    "company.thebrowser.Browser",
    "com.vivaldi.Vivaldi",
    "com.operasoftware.Opera",
];

pub fn is_browser(app_id: &str) -> bool {
    BROWSER_APP_IDS.contains(&app_id)
}

/// Platform capability that reports the foreground context.
///
/// Callers bound every query with a timeout and drop the future when it
/// expires, so implementations must release their resources on drop.
#[async_trait]
pub trait ForegroundObserver: Send + Sync + 'static {
    async fn current_foreground_application(&self) -> Result<String, SensingError>;

    /// URL of the active tab of `app_id`, `None` when there is no window or tab.
    async fn current_browser_tab_url(&self, app_id: &str)
        -> Result<Option<String>, SensingError>;
}

#[derive(Debug, Clone, Copy)]
pub struct SamplingTimeouts {
    pub foreground: Duration,
    pub tab_query: Duration,
}

impl Default for SamplingTimeouts {
    fn default() -> Self {
        Self {
            foreground: Duration::from_secs(1),
            tab_query: Duration::from_secs(2),
        }
    }
}

/// One sampled foreground context and whether it is on the allow-list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Observation {
    pub app_id: String,
    pub host: Option<String>,
    pub allowed: bool,
}

pub async fn current_application(
    observer: &Arc<dyn ForegroundObserver>,
    timeout: Duration,
) -> Result<String, SensingError> {
    let result = tokio::time::timeout(timeout, observer.current_foreground_application())
        .await
        .unwrap_or(Err(SensingError::ForegroundUnavailable));

    match result {
        Ok(app_id) if !app_id.trim().is_empty() => Ok(app_id.trim().to_string()),
        Ok(_) => Err(SensingError::ForegroundUnavailable),
        Err(err) => Err(err),
    }
}

/// Sample the foreground and decide whether it is allowed.
///
/// Application rules win: a browser that is itself allowed never has its tab
/// inspected. Website rules only apply to browsers that are not.
pub async fn sample_foreground(
    observer: &Arc<dyn ForegroundObserver>,
    allow_list: &Mutex<AllowListStore>,
    timeouts: SamplingTimeouts,
) -> Result<Observation, SensingError> {
    let app_id = current_application(observer, timeouts.foreground).await?;

    let base_allowed = allow_list.lock().await.is_application_allowed(&app_id);
    if base_allowed || !is_browser(&app_id) {
        return Ok(Observation {
            app_id,
            host: None,
            allowed: base_allowed,
        });
    }

    let host = match browser_tab_host(observer, &app_id, timeouts.tab_query).await {
        Ok(host) => host,
        Err(err) => {
            log_warn!("{err}; treating foreground as not allowed");
            None
        }
    };

    let allowed = match host.as_deref() {
        Some(host) => allow_list.lock().await.is_website_allowed(host),
        None => false,
    };

    Ok(Observation {
        app_id,
        host,
        allowed,
    })
}

async fn browser_tab_host(
    observer: &Arc<dyn ForegroundObserver>,
    app_id: &str,
    timeout: Duration,
) -> Result<Option<String>, SensingError> {
    let url = tokio::time::timeout(timeout, observer.current_browser_tab_url(app_id))
        .await
        .map_err(|_| SensingError::TabQueryTimeout {
            app_id: app_id.to_string(),
            timeout_ms: timeout.as_millis() as u64,
        })??;

    let host = url.as_deref().and_then(host_from_url);
    if host.is_none() {
        log_debug!("No resolvable tab host for {app_id}");
    }
    Ok(host)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::allowlist::MemoryPersistence;
    use std::sync::Mutex as StdMutex;

    struct ScriptedObserver {
        app: Option<String>,
        url: StdMutex<Result<Option<String>, SensingError>>,
        tab_delay: Duration,
        tab_queries: StdMutex<u32>,
        finished_tab_queries: StdMutex<u32>,
    }

    impl ScriptedObserver {
        fn new(app: Option<&str>, url: Result<Option<&str>, SensingError>) -> Self {
            Self {
                app: app.map(str::to_string),
                url: StdMutex::new(url.map(|u| u.map(str::to_string))),
                tab_delay: Duration::ZERO,
                tab_queries: StdMutex::new(0),
                finished_tab_queries: StdMutex::new(0),
            }
        }
    }

    #[async_trait]
    impl ForegroundObserver for ScriptedObserver {
        async fn current_foreground_application(&self) -> Result<String, SensingError> {
            self.app.clone().ok_or(SensingError::ForegroundUnavailable)
        }

        async fn current_browser_tab_url(
            &self,
            _app_id: &str,
        ) -> Result<Option<String>, SensingError> {
            *self.tab_queries.lock().unwrap() += 1;
            tokio::time::sleep(self.tab_delay).await;
            *self.finished_tab_queries.lock().unwrap() += 1;
            self.url.lock().unwrap().clone()
        }
    }

    fn allow_list() -> Mutex<AllowListStore> {
        let store = AllowListStore::load(
            "com.pomoguard.app",
            Arc::new(MemoryPersistence::default()),
        )
        .unwrap();
        Mutex::new(store)
    }

    #[tokio::test]
    async fn non_browser_uses_application_rules() {
        let observer: Arc<dyn ForegroundObserver> =
            Arc::new(ScriptedObserver::new(Some("com.apple.Terminal"), Ok(None)));
        let list = allow_list();

        let obs = sample_foreground(&observer, &list, SamplingTimeouts::default())
            .await
            .unwrap();
        assert!(!obs.allowed);

        list.lock().await.allow_application("com.apple.Terminal");
        let obs = sample_foreground(&observer, &list, SamplingTimeouts::default())
            .await
            .unwrap();
        assert!(obs.allowed);
    }

    #[tokio::test]
    async fn browser_tab_is_checked_against_website_rules() {
        let observer: Arc<dyn ForegroundObserver> = Arc::new(ScriptedObserver::new(
            Some("com.google.Chrome"),
            Ok(Some("https://docs.rs/tokio/latest")),
        ));
        let list = allow_list();
        list.lock().await.add_domain_rule("docs.rs");

        let obs = sample_foreground(&observer, &list, SamplingTimeouts::default())
            .await
            .unwrap();
        assert!(obs.allowed);
        assert_eq!(obs.host.as_deref(), Some("docs.rs"));
    }

    #[tokio::test]
    async fn allowed_browser_skips_tab_query() {
        let scripted = Arc::new(ScriptedObserver::new(
            Some("com.apple.Safari"),
            Ok(Some("https://youtube.com")),
        ));
        let observer: Arc<dyn ForegroundObserver> = scripted.clone();
        let list = allow_list();
        list.lock().await.allow_application("com.apple.Safari");

        let obs = sample_foreground(&observer, &list, SamplingTimeouts::default())
            .await
            .unwrap();
        assert!(obs.allowed);
        assert_eq!(*scripted.tab_queries.lock().unwrap(), 0);
    }

    #[tokio::test]
    async fn unresolvable_tab_is_not_allowed() {
        let list = allow_list();
        list.lock().await.add_domain_rule("example.com");

        for url in [
            Ok(None),
            Ok(Some("chrome://newtab/")),
            Err(SensingError::TabQueryFailed {
                app_id: "com.google.Chrome".into(),
                message: "not scriptable".into(),
            }),
        ] {
            let observer: Arc<dyn ForegroundObserver> =
                Arc::new(ScriptedObserver::new(Some("com.google.Chrome"), url));
            let obs = sample_foreground(&observer, &list, SamplingTimeouts::default())
                .await
                .unwrap();
            assert!(!obs.allowed);
            assert_eq!(obs.host, None);
        }
    }

    #[tokio::test]
    async fn stalled_tab_query_is_abandoned_as_not_allowed() {
        let mut scripted = ScriptedObserver::new(
            Some("com.apple.Safari"),
            Ok(Some("https://example.com")),
        );
        scripted.tab_delay = Duration::from_millis(300);
        let scripted = Arc::new(scripted);
        let observer: Arc<dyn ForegroundObserver> = scripted.clone();
        let list = allow_list();
        list.lock().await.add_domain_rule("example.com");

        let timeouts = SamplingTimeouts {
            foreground: Duration::from_secs(1),
            tab_query: Duration::from_millis(20),
        };
        for _ in 0..5 {
            let obs = sample_foreground(&observer, &list, timeouts).await.unwrap();
            assert!(!obs.allowed);
        }

        tokio::time::sleep(Duration::from_millis(700)).await;
        assert_eq!(*scripted.tab_queries.lock().unwrap(), 5);
        assert_eq!(
            *scripted.finished_tab_queries.lock().unwrap(),
            0,
            "timed-out queries must not keep running"
        );
    }

    #[tokio::test]
    async fn missing_foreground_is_reported() {
        let observer: Arc<dyn ForegroundObserver> =
            Arc::new(ScriptedObserver::new(None, Ok(None)));
        let err = sample_foreground(&observer, &allow_list(), SamplingTimeouts::default())
            .await
            .unwrap_err();
        assert_eq!(err, SensingError::ForegroundUnavailable);
    }
}
