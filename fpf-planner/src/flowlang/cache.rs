//! Per-plan settings cache
//!
//! Owned by the application and worker contexts and passed down explicitly.
//! Plan files are deployment artifacts, so a plan is resolved once and reused
//! until an operator calls [`SettingsCache::invalidate`].

use super::settings::{active_plan_name, is_valid_plan_name, Settings, SettingsResolver};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{info, warn};

pub struct SettingsCache {
    resolver: SettingsResolver,
    active_plan: String,
    entries: RwLock<HashMap<String, Arc<Settings>>>,
}

impl SettingsCache {
    /// Active plan taken from `AUTOPLAN_FLOW_PLAN`
    pub fn new(resolver: SettingsResolver) -> Self {
        Self::with_active_plan(resolver, active_plan_name())
    }

    pub fn with_active_plan(resolver: SettingsResolver, active_plan: impl Into<String>) -> Self {
        Self {
            resolver,
            active_plan: active_plan.into(),
            entries: RwLock::new(HashMap::new()),
        }
    }

    pub fn active_plan(&self) -> &str {
        &self.active_plan
    }

    /// Settings for `plan`, resolving on first use.
    /// An invalid plan name is never cached and gets the active plan instead.
    pub async fn get(&self, plan: &str) -> Arc<Settings> {
        let plan = if is_valid_plan_name(plan) {
            plan
        } else {
            warn!(plan, active = %self.active_plan, "Invalid plan name, using the active plan");
            self.active_plan.as_str()
        };

        if let Some(settings) = self.entries.read().await.get(plan) {
            return Arc::clone(settings);
        }

        let mut entries = self.entries.write().await;
        // Another task may have resolved it while we waited for the write lock
        if let Some(settings) = entries.get(plan) {
            return Arc::clone(settings);
        }
        let settings = Arc::new(self.resolver.resolve(plan));
        entries.insert(plan.to_string(), Arc::clone(&settings));
        settings
    }

    /// Settings for the requested plan or the active one
    pub async fn get_or_active(&self, plan: Option<&str>) -> Arc<Settings> {
        match plan.map(str::trim).filter(|p| !p.is_empty()) {
            Some(p) => self.get(p).await,
            None => self.get(&self.active_plan).await,
        }
    }

    /// Drop one plan, or every plan when `None`
    pub async fn invalidate(&self, plan: Option<&str>) {
        let mut entries = self.entries.write().await;
        match plan {
            Some(p) => {
                entries.remove(p);
            }
            None => entries.clear(),
        }
        info!(plan = plan.unwrap_or("*"), "Settings cache invalidated");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_cached_until_invalidated() {
        let dir = tempfile::tempdir().unwrap();
        let cache = SettingsCache::with_active_plan(
            SettingsResolver::new(dir.path()).without_env(),
            "msk",
        );

        assert_eq!(cache.get("msk").await.window.limit, 50);

        std::fs::write(dir.path().join("msk.plan"), "limit = 7\n").unwrap();
        assert_eq!(cache.get("msk").await.window.limit, 50);

        cache.invalidate(Some("msk")).await;
        assert_eq!(cache.get("msk").await.window.limit, 7);
    }

    #[tokio::test]
    async fn test_invalid_plan_uses_active_and_is_not_cached() {
        let dir = tempfile::tempdir().unwrap();
        let cache = SettingsCache::with_active_plan(
            SettingsResolver::new(dir.path()).without_env(),
            "msk",
        );

        assert_eq!(cache.get("../etc/passwd").await.plan, "msk");
        assert_eq!(cache.get_or_active(Some("a/b")).await.plan, "msk");
        let entries = cache.entries.read().await;
        assert_eq!(entries.len(), 1);
        assert!(entries.contains_key("msk"));
    }

    #[tokio::test]
    async fn test_get_or_active() {
        let dir = tempfile::tempdir().unwrap();
        let cache = SettingsCache::with_active_plan(
            SettingsResolver::new(dir.path()).without_env(),
            "rolling_msk",
        );
        assert_eq!(cache.get_or_active(None).await.plan, "rolling_msk");
        assert_eq!(cache.get_or_active(Some("  ")).await.plan, "rolling_msk");
        assert_eq!(cache.get_or_active(Some("spb")).await.plan, "spb");
    }
}
