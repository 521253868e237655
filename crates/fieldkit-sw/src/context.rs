//! Immutable per-version worker context.

use fieldkit_core::{NotificationConfig, WorkerConfig};
use url::Url;

use crate::policy::WorkerPolicy;
use crate::router::RoutingRules;
use crate::ServiceWorkerError;

/// Everything a worker version's event handlers need, resolved once when
/// the script is installed. Handlers take it by reference and never mutate it.
#[derive(Debug, Clone)]
pub struct WorkerContext {
    /// Origin the worker serves.
    pub origin: Url,
    /// Registration scope.
    pub scope: Url,
    pub policy: WorkerPolicy,
    /// Current precache bucket name.
    pub generation: String,
    /// Runtime bucket name.
    pub runtime_cache: String,
    /// Precache manifest paths.
    pub manifest: Vec<String>,
    pub offline_url: Url,
    pub dashboard_url: Url,
    /// Skip waiting as soon as install succeeds.
    pub fast_activate: bool,
    pub rules: RoutingRules,
    pub notification: NotificationConfig,
}

impl WorkerContext {
    /// Resolve a worker script configuration against its origin.
    pub fn from_config(origin: &Url, config: &WorkerConfig) -> Result<Self, ServiceWorkerError> {
        let join = |path: &str| {
            origin
                .join(path)
                .map_err(|e| ServiceWorkerError::ScriptError(format!("{path}: {e}")))
        };

        Ok(Self {
            origin: origin.clone(),
            scope: join(&config.scope)?,
            policy: WorkerPolicy::from_kind(config.policy),
            generation: config.generation.clone(),
            runtime_cache: config.runtime_cache.clone(),
            manifest: config.precache.clone(),
            offline_url: join(&config.offline_path)?,
            dashboard_url: join(&config.dashboard_path)?,
            fast_activate: config.fast_activate,
            rules: RoutingRules::new(origin.clone(), &config.api_marker, &config.storage_host),
            notification: config.notification.clone(),
        })
    }

    /// Bucket lookup order for cache reads.
    pub fn lookup_order(&self) -> [&str; 2] {
        [self.runtime_cache.as_str(), self.generation.as_str()]
    }

    /// Whether `url` falls under this worker's scope.
    pub fn in_scope(&self, url: &Url) -> bool {
        url.origin() == self.scope.origin() && url.path().starts_with(self.scope.path())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_main_config() {
        let origin = Url::parse("https://app.example.com/").unwrap();
        let ctx = WorkerContext::from_config(&origin, &WorkerConfig::main()).unwrap();

        assert_eq!(ctx.policy, WorkerPolicy::FullCaching);
        assert_eq!(ctx.offline_url.as_str(), "https://app.example.com/offline");
        assert_eq!(ctx.lookup_order(), ["fieldkit-runtime", "fieldkit-v1"]);
        assert!(ctx.in_scope(&Url::parse("https://app.example.com/ticket/1").unwrap()));
        assert!(!ctx.in_scope(&Url::parse("https://cdn.example.com/ticket/1").unwrap()));
    }

    #[test]
    fn test_portal_scope() {
        let origin = Url::parse("https://app.example.com/").unwrap();
        let ctx = WorkerContext::from_config(&origin, &WorkerConfig::portal()).unwrap();

        assert_eq!(ctx.policy, WorkerPolicy::InstallOnly);
        assert!(ctx.in_scope(&Url::parse("https://app.example.com/portal/home").unwrap()));
        assert!(!ctx.in_scope(&Url::parse("https://app.example.com/dashboard").unwrap()));
    }
}
