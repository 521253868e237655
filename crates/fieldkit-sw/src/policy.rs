//! Worker policies.
//!
//! The main application and the portal used to ship two separately evolved
//! scripts. Both are now one worker parameterised by a policy, selected by
//! registration scope.

use fieldkit_core::{FieldKitConfig, PolicyKind, Surface, WorkerConfig};

/// Behaviour of a worker version.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerPolicy {
    /// Precache, routed fetch strategies, cache maintenance, push and sync.
    FullCaching,
    /// Installability only: never intercepts, never touches caches.
    InstallOnly,
}

impl WorkerPolicy {
    pub fn from_kind(kind: PolicyKind) -> Self {
        match kind {
            PolicyKind::FullCaching => WorkerPolicy::FullCaching,
            PolicyKind::InstallOnly => WorkerPolicy::InstallOnly,
        }
    }

    /// Whether fetch events are answered by the router.
    pub fn intercepts_fetch(&self) -> bool {
        matches!(self, WorkerPolicy::FullCaching)
    }

    /// Whether install populates a precache bucket.
    pub fn precaches(&self) -> bool {
        matches!(self, WorkerPolicy::FullCaching)
    }

    /// Whether activation and control messages may delete buckets.
    pub fn manages_caches(&self) -> bool {
        matches!(self, WorkerPolicy::FullCaching)
    }

    /// Whether push, notification-click and sync events are handled.
    pub fn handles_push(&self) -> bool {
        matches!(self, WorkerPolicy::FullCaching)
    }
}

/// The worker script configuration for a surface.
pub fn worker_for_surface(config: &FieldKitConfig, surface: Surface) -> &WorkerConfig {
    match surface {
        Surface::Main => &config.main_worker,
        Surface::Portal => &config.portal_worker,
    }
}
