use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use std::{fs, path::PathBuf, sync::RwLock};

use crate::allowlist::{AllowListPersistence, AllowListSnapshot};

pub const DEFAULT_OWN_APP_ID: &str = "com.pomoguard.app";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase", default)]
pub struct TimerPreferences {
    pub focus_minutes: u32,
    pub break_minutes: u32,
    pub success_hold_secs: u64,
    pub own_app_id: String,
    pub top_apps_limit: usize,
}

impl Default for TimerPreferences {
    fn default() -> Self {
        Self {
            focus_minutes: 25,
            break_minutes: 5,
            success_hold_secs: 3,
            own_app_id: DEFAULT_OWN_APP_ID.into(),
            top_apps_limit: 5,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct UserSettings {
    timer: TimerPreferences,
    allow_list: AllowListSnapshot,
}

/// JSON-file settings: timer preferences and the persisted allow-list.
pub struct SettingsStore {
    path: PathBuf,
    data: RwLock<UserSettings>,
}

impl SettingsStore {
    pub fn new(path: PathBuf) -> Result<Self> {
        let data = if path.exists() {
            let contents = fs::read_to_string(&path)
                .with_context(|| format!("Failed to read settings from {}", path.display()))?;
            serde_json::from_str(&contents).unwrap_or_else(|err| {
                log::warn!(
                    "Settings file {} is unreadable ({err}); using defaults",
                    path.display()
                );
                UserSettings::default()
            })
        } else {
            UserSettings::default()
        };

        Ok(Self {
            path,
            data: RwLock::new(data),
        })
    }

    pub fn path(&self) -> &std::path::Path {
        &self.path
    }

    pub fn timer(&self) -> Result<TimerPreferences> {
        let guard = self
            .data
            .read()
            .map_err(|_| anyhow!("settings lock poisoned"))?;
        Ok(guard.timer.clone())
    }

    pub fn update_timer(&self, prefs: TimerPreferences) -> Result<()> {
        let mut guard = self
            .data
            .write()
            .map_err(|_| anyhow!("settings lock poisoned"))?;
        guard.timer = prefs;
        self.persist(&guard)
    }

    fn persist(&self, data: &UserSettings) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create settings directory {}", parent.display())
            })?;
        }
        let serialized = serde_json::to_string_pretty(data)?;
        fs::write(&self.path, serialized)
            .with_context(|| format!("Failed to write settings to {}", self.path.display()))
    }
}

impl AllowListPersistence for SettingsStore {
    fn load(&self) -> Result<AllowListSnapshot> {
        let guard = self
            .data
            .read()
            .map_err(|_| anyhow!("settings lock poisoned"))?;
        Ok(guard.allow_list.clone())
    }

    fn save(&self, snapshot: &AllowListSnapshot) -> Result<()> {
        let mut guard = self
            .data
            .write()
            .map_err(|_| anyhow!("settings lock poisoned"))?;
        guard.allow_list = snapshot.clone();
        self.persist(&guard)
    }
}
