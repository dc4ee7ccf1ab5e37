use std::sync::Mutex;

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A website rule. `domain` is always stored normalised.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct DomainRule {
    pub id: Uuid,
    pub domain: String,
    pub enabled: bool,
}

/// The persisted half of the allow-list.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase", default)]
pub struct AllowListSnapshot {
    pub applications: Vec<String>,
    pub domain_rules: Vec<DomainRule>,
}

/// Storage backend for the allow-list. The format behind it is opaque.
pub trait AllowListPersistence: Send + Sync {
    fn load(&self) -> Result<AllowListSnapshot>;
    fn save(&self, snapshot: &AllowListSnapshot) -> Result<()>;
}

/// Keeps the snapshot in memory. Used by tests and by callers that do not
/// want allow-list changes to outlive the process.
#[derive(Default)]
pub struct MemoryPersistence {
    data: Mutex<AllowListSnapshot>,
}

impl MemoryPersistence {
    pub fn new(initial: AllowListSnapshot) -> Self {
        Self {
            data: Mutex::new(initial),
        }
    }

    pub fn current(&self) -> Result<AllowListSnapshot> {
        self.load()
    }
}

impl AllowListPersistence for MemoryPersistence {
    fn load(&self) -> Result<AllowListSnapshot> {
        let guard = self
            .data
            .lock()
            .map_err(|_| anyhow!("allow-list memory store poisoned"))?;
        Ok(guard.clone())
    }

    fn save(&self, snapshot: &AllowListSnapshot) -> Result<()> {
        let mut guard = self
            .data
            .lock()
            .map_err(|_| anyhow!("allow-list memory store poisoned"))?;
        *guard = snapshot.clone();
        Ok(())
    }
}
