use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;

use anyhow::Result;
use log::{debug, info, warn};
use uuid::Uuid;

use super::normalizer::normalize_domain;
use super::persistence::{AllowListPersistence, AllowListSnapshot, DomainRule};

/// Applications allowed for the current session only.
///
/// Seeded at session start with whatever was in the foreground, discarded when
/// the session ends.
#[derive(Debug, Clone, Default)]
pub struct SessionContext {
    applications: HashSet<String>,
}

impl SessionContext {
    pub fn seeded_with(app_id: Option<&str>) -> Self {
        let mut applications = HashSet::new();
        if let Some(app_id) = app_id.filter(|id| !id.is_empty()) {
            applications.insert(app_id.to_string());
        }
        Self { applications }
    }

    pub fn contains(&self, app_id: &str) -> bool {
        self.applications.contains(app_id)
    }

    pub fn allow(&mut self, app_id: &str) {
        self.applications.insert(app_id.to_string());
    }
}

/// Always-allowed applications plus website rules.
///
/// Every mutation is written through to the persistence backend. A failed
/// write is logged and the in-memory list stays authoritative.
pub struct AllowListStore {
    own_app_id: String,
    applications: BTreeSet<String>,
    rules: Vec<DomainRule>,
    session: SessionContext,
    persistence: Arc<dyn AllowListPersistence>,
}

impl AllowListStore {
    pub fn load(own_app_id: impl Into<String>, persistence: Arc<dyn AllowListPersistence>) -> Result<Self> {
        let snapshot = persistence.load()?;
        info!(
            "Loaded allow-list: {} applications, {} website rules",
            snapshot.applications.len(),
            snapshot.domain_rules.len()
        );
        Ok(Self {
            own_app_id: own_app_id.into(),
            applications: snapshot.applications.into_iter().collect(),
            rules: snapshot.domain_rules,
            session: SessionContext::default(),
            persistence,
        })
    }

    pub fn own_app_id(&self) -> &str {
        &self.own_app_id
    }

    pub fn is_application_allowed(&self, app_id: &str) -> bool {
        app_id == self.own_app_id
            || self.session.contains(app_id)
            || self.applications.contains(app_id)
    }

    /// True when an enabled rule matches the host exactly or as a parent domain.
    pub fn is_website_allowed(&self, host: &str) -> bool {
        self.rules.iter().filter(|rule| rule.enabled).any(|rule| {
            host == rule.domain
                || host
                    .strip_suffix(rule.domain.as_str())
                    .is_some_and(|prefix| prefix.ends_with('.'))
        })
    }

    pub fn rules(&self) -> &[DomainRule] {
        &self.rules
    }

    pub fn allowed_applications(&self) -> impl Iterator<Item = &str> {
        self.applications.iter().map(String::as_str)
    }

    /// Add a website rule, or re-enable the existing one for the same domain.
    ///
    /// Input that does not normalise is dropped silently.
    pub fn add_domain_rule(&mut self, raw: &str) -> Option<Uuid> {
        let domain = match normalize_domain(raw) {
            Ok(domain) => domain,
            Err(err) => {
                debug!("Ignoring website rule: {err}");
                return None;
            }
        };

        let id = match self.rules.iter_mut().find(|rule| rule.domain == domain) {
            Some(existing) => {
                existing.enabled = true;
                existing.id
            }
            None => {
                let rule = DomainRule {
                    id: Uuid::new_v4(),
                    domain,
                    enabled: true,
                };
                let id = rule.id;
                self.rules.push(rule);
                id
            }
        };

        self.persist();
        Some(id)
    }

    pub fn toggle_rule(&mut self, rule_id: Uuid) -> bool {
        let Some(rule) = self.rules.iter_mut().find(|rule| rule.id == rule_id) else {
            return false;
        };
        rule.enabled = !rule.enabled;
        self.persist();
        true
    }

    pub fn remove_rule(&mut self, rule_id: Uuid) -> bool {
        let before = self.rules.len();
        self.rules.retain(|rule| rule.id != rule_id);
        if self.rules.len() == before {
            return false;
        }
        self.persist();
        true
    }

    pub fn allow_application(&mut self, app_id: &str) -> bool {
        let app_id = app_id.trim();
        if app_id.is_empty() || !self.applications.insert(app_id.to_string()) {
            return false;
        }
        self.persist();
        true
    }

    pub fn disallow_application(&mut self, app_id: &str) -> bool {
        if !self.applications.remove(app_id.trim()) {
            return false;
        }
        self.persist();
        true
    }

    pub fn begin_session(&mut self, foreground: Option<&str>) {
        self.session = SessionContext::seeded_with(foreground);
    }

    pub fn allow_for_session(&mut self, app_id: &str) {
        self.session.allow(app_id);
    }

    pub fn end_session(&mut self) {
        self.session = SessionContext::default();
    }

    pub fn snapshot(&self) -> AllowListSnapshot {
        AllowListSnapshot {
            applications: self.applications.iter().cloned().collect(),
            domain_rules: self.rules.clone(),
        }
    }

    fn persist(&self) {
        if let Err(err) = self.persistence.save(&self.snapshot()) {
            warn!("Failed to persist allow-list: {err:?}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::allowlist::persistence::MemoryPersistence;

    fn store() -> (AllowListStore, Arc<MemoryPersistence>) {
        let persistence = Arc::new(MemoryPersistence::default());
        let store = AllowListStore::load("com.pomoguard.app", persistence.clone()).unwrap();
        (store, persistence)
    }

    #[test]
    fn equivalent_inputs_yield_one_rule() {
        let (mut store, _) = store();
        let first = store.add_domain_rule("https://www.example.com/a?b=c");
        let second = store.add_domain_rule("EXAMPLE.com");
        assert_eq!(first, second);
        assert_eq!(store.rules().len(), 1);
        assert_eq!(store.rules()[0].domain, "example.com");
    }

    #[test]
    fn adding_twice_keeps_a_single_enabled_rule() {
        let (mut store, _) = store();
        let id = store.add_domain_rule("foo.com").unwrap();
        store.toggle_rule(id);
        assert!(!store.rules()[0].enabled);

        store.add_domain_rule("foo.com");
        assert_eq!(store.rules().len(), 1);
        assert!(store.rules()[0].enabled);
    }

    #[test]
    fn invalid_input_is_dropped() {
        let (mut store, persistence) = store();
        assert_eq!(store.add_domain_rule("   "), None);
        assert!(store.rules().is_empty());
        assert!(persistence.current().unwrap().domain_rules.is_empty());
    }

    #[test]
    fn subdomains_match_enabled_rules_only() {
        let (mut store, _) = store();
        let id = store.add_domain_rule("example.com").unwrap();
        assert!(store.is_website_allowed("docs.example.com"));
        assert!(store.is_website_allowed("example.com"));
        assert!(!store.is_website_allowed("notexample.com"));

        store.toggle_rule(id);
        assert!(!store.is_website_allowed("docs.example.com"));
    }

    #[test]
    fn unknown_rule_ids_are_ignored() {
        let (mut store, _) = store();
        store.add_domain_rule("foo.com");
        assert!(!store.toggle_rule(Uuid::new_v4()));
        assert!(!store.remove_rule(Uuid::new_v4()));
        assert_eq!(store.rules().len(), 1);
    }

    #[test]
    fn mutations_are_persisted() {
        let (mut store, persistence) = store();
        let id = store.add_domain_rule("foo.com").unwrap();
        store.allow_application("com.apple.Terminal");
        let saved = persistence.current().unwrap();
        assert_eq!(saved.domain_rules.len(), 1);
        assert_eq!(saved.applications, vec!["com.apple.Terminal".to_string()]);

        store.remove_rule(id);
        assert!(persistence.current().unwrap().domain_rules.is_empty());
    }

    #[test]
    fn application_checks_cover_own_session_and_global() {
        let (mut store, _) = store();
        assert!(store.is_application_allowed("com.pomoguard.app"));
        assert!(!store.is_application_allowed("com.apple.dt.Xcode"));

        store.begin_session(Some("com.apple.dt.Xcode"));
        assert!(store.is_application_allowed("com.apple.dt.Xcode"));
        store.end_session();
        assert!(!store.is_application_allowed("com.apple.dt.Xcode"));

        store.allow_application("com.apple.dt.Xcode");
        assert!(store.is_application_allowed("com.apple.dt.Xcode"));
    }

    #[test]
    fn session_allowances_are_not_persisted() {
        let (mut store, persistence) = store();
        store.begin_session(None);
        store.allow_for_session("com.spotify.client");
        assert!(store.is_application_allowed("com.spotify.client"));
        assert!(persistence.current().unwrap().applications.is_empty());

        store.end_session();
        assert!(!store.is_application_allowed("com.spotify.client"));
    }

    #[test]
    fn allowed_applications_are_listed_in_order() {
        let (mut store, _) = store();
        assert_eq!(store.own_app_id(), "com.pomoguard.app");
        store.allow_application("com.microsoft.VSCode");
        store.allow_application(" com.apple.Terminal ");
        assert!(!store.allow_application("com.apple.Terminal"));

        let listed: Vec<_> = store.allowed_applications().collect();
        assert_eq!(listed, vec!["com.apple.Terminal", "com.microsoft.VSCode"]);

        assert!(store.disallow_application("com.microsoft.VSCode"));
        assert!(!store.disallow_application("com.microsoft.VSCode"));
        assert_eq!(store.allowed_applications().count(), 1);
    }
}
