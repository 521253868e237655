//! # FieldKit Service Workers
//!
//! The offline layer of FieldKit: a dual-scope service worker runtime.
//!
//! ## Features
//!
//! - **Registration**: register, update checks, unregister
//! - **Lifecycle**: install, activate, skip-waiting handshake
//! - **Cache API**: generation and runtime buckets, precache, eviction
//! - **Fetch Routing**: network-first, cache-first, offline fallback
//! - **Push**: notifications and click routing
//!
//! ## Architecture
//!
//! ```text
//! ServiceWorkerContainer (one per origin)
//!     │
//!     ├── ServiceWorkerRegistration ("/")          FullCaching
//!     │       ├── installing / waiting / active (ServiceWorker)
//!     │       └── WorkerContext (generation, manifest, routing rules)
//!     │
//!     ├── ServiceWorkerRegistration ("/portal/")   InstallOnly
//!     │
//!     ├── Clients (controlled pages)
//!     │
//!     └── CacheStoreManager
//!             └── CacheStorage
//!                     └── Cache
//!                             └── Request → CacheEntry
//! ```

use thiserror::Error;

pub mod cache;
pub mod clients;
pub mod container;
pub mod context;
pub mod lifecycle;
pub mod message;
pub mod policy;
pub mod push;
pub mod router;
pub mod sync;
pub mod worker;

pub use cache::{Cache, CacheEntry, CacheStorage, CacheStoreManager};
pub use clients::{Client, ClientMatchOptions, ClientType, Clients};
pub use container::{RegistrationOptions, ServiceWorkerContainer, ServiceWorkerEvent, UpdateResult};
pub use context::WorkerContext;
pub use lifecycle::{
    RegistrationInfo, ServiceWorker, ServiceWorkerId, ServiceWorkerRegistration,
    ServiceWorkerState, WorkerInfo,
};
pub use message::{ControlMessage, MessageTarget};
pub use policy::{worker_for_surface, WorkerPolicy};
pub use push::{ClickOutcome, Notification, NotificationAction};
pub use router::{route_fetch, RequestClass, Route, RoutingRules, Strategy};
pub use sync::SyncOutcome;
pub use worker::{ActivateOutcome, InstallOutcome, MessageOutcome, ServiceWorkerGlobal};

// ==================== Errors ====================

/// Errors that can occur in service worker operations.
#[derive(Error, Debug, Clone)]
pub enum ServiceWorkerError {
    #[error("Registration failed: {0}")]
    RegistrationFailed(String),

    #[error("Script error: {0}")]
    ScriptError(String),

    #[error("Security error: {0}")]
    SecurityError(String),

    #[error("Network error: {0}")]
    NetworkError(String),

    #[error("State error: {0}")]
    StateError(String),

    #[error("Cache error: {0}")]
    CacheError(String),

    #[error("Precache of {url} failed: {reason}")]
    PrecacheFailed { url: String, reason: String },

    #[error("Not found: {0}")]
    NotFound(String),
}
