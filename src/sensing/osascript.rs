//! Best-effort macOS observer built on `osascript`.
//!
//! System Events reports the frontmost process; Safari and the Chromium family
//! expose the active tab URL through their scripting dictionaries. Anything
//! else (Firefox, non-macOS hosts, denied Automation permission) reports an
//! error, which the sampler turns into "not allowed".
//!
//! The `osascript` child is killed when its query future is dropped, so a
//! script stuck on a permission prompt dies with the timed-out sample.

use std::process::Stdio;

use async_trait::async_trait;
use tokio::process::Command;

use crate::error::SensingError;

use super::ForegroundObserver;

const FRONTMOST_SCRIPT: &str = "tell application \"System Events\" to get bundle identifier \
of first application process whose frontmost is true";

#[derive(Debug, Clone, Copy, Default)]
pub struct OsascriptObserver;

impl OsascriptObserver {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl ForegroundObserver for OsascriptObserver {
    async fn current_foreground_application(&self) -> Result<String, SensingError> {
        match run_script(FRONTMOST_SCRIPT).await {
            Ok(Some(bundle_id)) => Ok(bundle_id),
            Ok(None) | Err(_) => Err(SensingError::ForegroundUnavailable),
        }
    }

    async fn current_browser_tab_url(
        &self,
        app_id: &str,
    ) -> Result<Option<String>, SensingError> {
        let Some(script) = tab_url_script(app_id) else {
            return Err(SensingError::TabQueryFailed {
                app_id: app_id.to_string(),
                message: "browser does not expose its tabs".into(),
            });
        };

        run_script(&script).await.map_err(|message| SensingError::TabQueryFailed {
            app_id: app_id.to_string(),
            message,
        })
    }
}

fn tab_url_script(app_id: &str) -> Option<String> {
    let tab = match app_id {
        "com.apple.Safari" | "com.apple.SafariTechnologyPreview" => "current tab",
        "com.google.Chrome"
        | "com.google.Chrome.canary"
        | "org.chromium.Chromium"
        | "com.brave.Browser"
        | "com.microsoft.edgemac"
        | "company.thebrowser.Browser"
        | "com.vivaldi.Vivaldi"
        | "com.operasoftware.Opera" => "active tab",
        _ => return None,
    };

    Some(format!(
        "tell application id \"{app_id}\" to if (count of windows) > 0 then get URL of {tab} of front window"
    ))
}

async fn run_script(script: &str) -> Result<Option<String>, String> {
    let mut command = Command::new("osascript");
    command.arg("-e").arg(script);
    capture(command).await
}

/// Trimmed stdout of the command; `None` for empty output or `missing value`.
async fn capture(mut command: Command) -> Result<Option<String>, String> {
    let output = command
        .stdin(Stdio::null())
        .kill_on_drop(true)
        .output()
        .await
        .map_err(|err| format!("failed to spawn script: {err}"))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(stderr.trim().to_string());
    }

    let stdout = String::from_utf8_lossy(&output.stdout);
    let value = stdout.trim();
    if value.is_empty() || value == "missing value" {
        Ok(None)
    } else {
        Ok(Some(value.to_string()))
    }
}
