//! Worker versions and their registration.
//!
//! ```text
//! ServiceWorkerRegistration (one per scope)
//!     ├── installing  Installing
//!     ├── waiting     Installed, until skip-waiting or no active worker
//!     └── active      Activating → Activated
//! ```
//!
//! Only the host container drives these transitions.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::context::WorkerContext;
use crate::ServiceWorkerError;

// ==================== Types ====================

/// Unique identifier for a service worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ServiceWorkerId(u64);

impl ServiceWorkerId {
    fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    pub fn raw(&self) -> u64 {
        self.0
    }

    #[cfg(test)]
    pub(crate) fn for_tests(raw: u64) -> Self {
        Self(raw)
    }
}

/// Service worker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ServiceWorkerState {
    /// Initial state, script being parsed.
    #[default]
    Parsed,
    /// Installing (install event).
    Installing,
    /// Installed but waiting for activation.
    Installed,
    /// Activating (activate event).
    Activating,
    /// Active and controlling pages.
    Activated,
    /// Redundant (replaced or install failed).
    Redundant,
}

// ==================== Service Worker ====================

/// One version of a worker script.
#[derive(Debug, Clone)]
pub struct ServiceWorker {
    /// Unique ID.
    pub id: ServiceWorkerId,

    /// Script URL.
    pub script_url: Url,

    /// Current state.
    pub state: ServiceWorkerState,

    /// Script bytes, compared on update checks.
    pub script: Vec<u8>,

    /// Resolved deploy configuration.
    pub context: Arc<WorkerContext>,

    /// Error message if install failed.
    pub error: Option<String>,
}

impl ServiceWorker {
    /// Create a new service worker.
    pub fn new(script_url: Url, script: Vec<u8>, context: WorkerContext) -> Self {
        Self {
            id: ServiceWorkerId::new(),
            script_url,
            state: ServiceWorkerState::Parsed,
            script,
            context: Arc::new(context),
            error: None,
        }
    }

    /// Set state.
    pub fn set_state(&mut self, state: ServiceWorkerState) {
        self.state = state;
    }

    /// Check if active.
    pub fn is_active(&self) -> bool {
        self.state == ServiceWorkerState::Activated
    }

    /// Check if redundant.
    pub fn is_redundant(&self) -> bool {
        self.state == ServiceWorkerState::Redundant
    }
}

/// Read-only view of a worker slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkerInfo {
    pub id: ServiceWorkerId,
    pub state: ServiceWorkerState,
}

impl From<&ServiceWorker> for WorkerInfo {
    fn from(worker: &ServiceWorker) -> Self {
        Self {
            id: worker.id,
            state: worker.state,
        }
    }
}

// ==================== Registration ====================

/// A service worker registration.
#[derive(Debug)]
pub struct ServiceWorkerRegistration {
    /// Scope URL.
    pub scope: Url,

    /// Script URL of the newest worker.
    pub script_url: Url,

    /// Installing worker.
    pub installing: Option<ServiceWorker>,

    /// Waiting worker (installed but not active).
    pub waiting: Option<ServiceWorker>,

    /// Active worker.
    pub active: Option<ServiceWorker>,
}

/// Snapshot of a registration for callers outside the container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistrationInfo {
    pub scope: Url,
    pub installing: Option<WorkerInfo>,
    pub waiting: Option<WorkerInfo>,
    pub active: Option<WorkerInfo>,
}

impl ServiceWorkerRegistration {
    /// Create a new registration.
    pub fn new(scope: Url, script_url: Url) -> Self {
        Self {
            scope,
            script_url,
            installing: None,
            waiting: None,
            active: None,
        }
    }

    /// Get the active worker.
    pub fn get_active(&self) -> Option<&ServiceWorker> {
        self.active.as_ref()
    }

    /// The most recent worker that has not failed.
    pub fn newest_worker(&self) -> Option<&ServiceWorker> {
        self.installing
            .as_ref()
            .or(self.waiting.as_ref())
            .or(self.active.as_ref())
    }

    /// Start installing a new worker.
    pub fn begin_install(&mut self, mut worker: ServiceWorker) -> Result<(), ServiceWorkerError> {
        if self.installing.is_some() {
            return Err(ServiceWorkerError::StateError(
                "An install is already in progress".to_string(),
            ));
        }
        worker.set_state(ServiceWorkerState::Installing);
        self.script_url = worker.script_url.clone();
        self.installing = Some(worker);
        Ok(())
    }

    /// Transition installing to waiting. A previously waiting worker is replaced.
    pub fn install_complete(&mut self) -> Option<ServiceWorkerId> {
        let mut worker = self.installing.take()?;
        worker.set_state(ServiceWorkerState::Installed);
        let id = worker.id;
        if let Some(mut replaced) = self.waiting.replace(worker) {
            replaced.set_state(ServiceWorkerState::Redundant);
        }
        Some(id)
    }

    /// Drop a failed installing worker. The active worker is untouched.
    pub fn install_failed(&mut self, error: String) -> Option<ServiceWorker> {
        let mut worker = self.installing.take()?;
        worker.error = Some(error);
        worker.set_state(ServiceWorkerState::Redundant);
        Some(worker)
    }

    /// Promote the waiting worker to `Activating`; the old active worker
    /// becomes redundant.
    pub fn begin_activation(&mut self) -> Option<ServiceWorkerId> {
        let mut worker = self.waiting.take()?;
        worker.set_state(ServiceWorkerState::Activating);

        if let Some(mut old) = self.active.take() {
            old.set_state(ServiceWorkerState::Redundant);
        }

        let id = worker.id;
        self.active = Some(worker);
        Some(id)
    }

    /// Finish activation of the active worker.
    pub fn activation_complete(&mut self) -> Option<ServiceWorkerId> {
        let worker = self.active.as_mut()?;
        if worker.state == ServiceWorkerState::Activating {
            worker.set_state(ServiceWorkerState::Activated);
        }
        Some(worker.id)
    }

    /// Unregister (mark everything redundant).
    pub fn unregister(&mut self) {
        for slot in [&mut self.active, &mut self.waiting, &mut self.installing] {
            if let Some(mut worker) = slot.take() {
                worker.set_state(ServiceWorkerState::Redundant);
            }
        }
    }

    pub fn info(&self) -> RegistrationInfo {
        RegistrationInfo {
            scope: self.scope.clone(),
            installing: self.installing.as_ref().map(WorkerInfo::from),
            waiting: self.waiting.as_ref().map(WorkerInfo::from),
            active: self.active.as_ref().map(WorkerInfo::from),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fieldkit_core::WorkerConfig;

    fn worker(generation: &str) -> ServiceWorker {
        let origin = Url::parse("https://example.com/").unwrap();
        let mut config = WorkerConfig::main();
        config.generation = generation.to_string();
        let context = WorkerContext::from_config(&origin, &config).unwrap();
        ServiceWorker::new(
            origin.join("/sw.js").unwrap(),
            config.to_script().unwrap(),
            context,
        )
    }

    fn registration() -> ServiceWorkerRegistration {
        ServiceWorkerRegistration::new(
            Url::parse("https://example.com/").unwrap(),
            Url::parse("https://example.com/sw.js").unwrap(),
        )
    }

    #[test]
    fn test_service_worker_state_transitions() {
        let mut worker = worker("v1");
        assert_eq!(worker.state, ServiceWorkerState::Parsed);

        worker.set_state(ServiceWorkerState::Installing);
        assert_eq!(worker.state, ServiceWorkerState::Installing);

        worker.set_state(ServiceWorkerState::Activated);
        assert!(worker.is_active());
    }

    #[test]
    fn test_registration_lifecycle() {
        let mut registration = registration();

        registration.begin_install(worker("v1")).unwrap();
        assert_eq!(
            registration.installing.as_ref().unwrap().state,
            ServiceWorkerState::Installing
        );

        // Installing -> Installed
        registration.install_complete();
        assert!(registration.waiting.is_some());
        assert!(registration.installing.is_none());

        // Installed -> Activating -> Activated
        registration.begin_activation();
        assert_eq!(
            registration.active.as_ref().unwrap().state,
            ServiceWorkerState::Activating
        );
        registration.activation_complete();
        assert!(registration.get_active().unwrap().is_active());
        assert!(registration.waiting.is_none());
    }

    #[test]
    fn test_second_install_waits_behind_active() {
        let mut registration = registration();
        registration.begin_install(worker("v1")).unwrap();
        registration.install_complete();
        registration.begin_activation();
        registration.activation_complete();
        let first = registration.get_active().unwrap().id;

        registration.begin_install(worker("v2")).unwrap();
        let second = registration.install_complete().unwrap();

        assert_eq!(registration.get_active().unwrap().id, first);
        assert_eq!(registration.waiting.as_ref().unwrap().id, second);
        assert_eq!(registration.newest_worker().unwrap().id, second);
    }

    #[test]
    fn test_failed_install_keeps_active() {
        let mut registration = registration();
        registration.begin_install(worker("v1")).unwrap();
        registration.install_complete();
        registration.begin_activation();
        registration.activation_complete();

        registration.begin_install(worker("v2")).unwrap();
        let failed = registration.install_failed("offline".to_string()).unwrap();

        assert!(failed.is_redundant());
        assert_eq!(failed.error.as_deref(), Some("offline"));
        assert!(registration.waiting.is_none());
        assert!(registration.get_active().unwrap().is_active());
    }

    #[test]
    fn test_concurrent_install_rejected() {
        let mut registration = registration();
        registration.begin_install(worker("v1")).unwrap();
        assert!(matches!(
            registration.begin_install(worker("v2")),
            Err(ServiceWorkerError::StateError(_))
        ));
    }

    #[test]
    fn test_unregister_clears_slots() {
        let mut registration = registration();
        registration.begin_install(worker("v1")).unwrap();
        registration.install_complete();
        registration.unregister();
        let info = registration.info();
        assert!(info.installing.is_none() && info.waiting.is_none() && info.active.is_none());
    }
}
