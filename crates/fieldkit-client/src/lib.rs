//! # FieldKit Client
//!
//! The page side of the offline layer: worker registration, the update
//! handshake, install affordances and connectivity.
//!
//! ## Architecture
//!
//! ```text
//! ServiceWorkerRegister (once per page)
//!     │
//!     └── PwaBridge
//!             ├── UpdateBridge      update flag, skip-waiting handshake
//!             ├── InstallPromptSlot deferred install prompt (single use)
//!             ├── InstallBanner     suppression window, iOS instructions
//!             ├── Connectivity      online/offline flag
//!             └── notices           broadcast of UserNotice
//! ```

use std::sync::Arc;
use std::time::Duration;

use fieldkit_common::SharedClock;
use fieldkit_core::{BannerSuppression, Surface};
use fieldkit_net::Network;
use fieldkit_sw::{ServiceWorkerContainer, ServiceWorkerError, UpdateResult};
use thiserror::Error;
use tokio::sync::{broadcast, watch};
use tracing::{info, warn};
use url::Url;

pub mod banner;
pub mod bootstrap;
pub mod connectivity;
pub mod install;
pub mod platform;
pub mod storage;
pub mod update;

pub use banner::{BannerKind, InstallBanner};
pub use bootstrap::ServiceWorkerRegister;
pub use connectivity::Connectivity;
pub use install::{DeferredPrompt, InstallCapability, InstallOutcome, InstallPromptSlot, PromptChoice};
pub use platform::{DisplayMode, Environment, Platform};
pub use storage::{DurableStore, InstallPreferences, MemoryStore, SqliteStore};
pub use update::{ApplyOutcome, UpdateBridge, UpdateTasks};

const NOTICE_CAPACITY: usize = 32;

/// Errors surfaced by the client bridge.
#[derive(Error, Debug)]
pub enum ClientError {
    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    ServiceWorker(#[from] ServiceWorkerError),
}

impl From<rusqlite::Error> for ClientError {
    fn from(e: rusqlite::Error) -> Self {
        ClientError::Storage(e.to_string())
    }
}

/// Non-blocking messages for the UI.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UserNotice {
    /// Install was requested but no prompt was captured.
    InstallUnavailable,
    Offline,
    BackOnline,
    UpdateAvailable,
}

/// The capability object handed to the rest of the application.
pub struct PwaBridge<N> {
    surface: Surface,
    environment: Environment,
    prefs: InstallPreferences,
    banner: InstallBanner,
    prompt: InstallPromptSlot,
    connectivity: Connectivity,
    updates: Arc<UpdateBridge<N>>,
    notices: broadcast::Sender<UserNotice>,
    clock: SharedClock,
    tasks: std::sync::Mutex<Option<UpdateTasks>>,
}

impl<N: Network + 'static> PwaBridge<N> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        container: Arc<ServiceWorkerContainer<N>>,
        scope: Url,
        surface: Surface,
        client_id: String,
        environment: Environment,
        store: Arc<dyn DurableStore>,
        suppression: BannerSuppression,
        clock: SharedClock,
    ) -> Self {
        let (notices, _) = broadcast::channel(NOTICE_CAPACITY);
        let prefs = InstallPreferences::new(store);
        Self {
            surface,
            banner: InstallBanner::new(suppression, prefs.clone(), Arc::clone(&clock)),
            prefs,
            prompt: InstallPromptSlot::new(),
            connectivity: Connectivity::new(true, notices.clone()),
            updates: Arc::new(UpdateBridge::new(container, scope, client_id, notices.clone())),
            notices,
            environment,
            clock,
            tasks: std::sync::Mutex::new(None),
        }
    }

    pub fn surface(&self) -> Surface {
        self.surface
    }

    pub fn platform(&self) -> Platform {
        self.environment.platform()
    }

    pub fn notices(&self) -> broadcast::Receiver<UserNotice> {
        self.notices.subscribe()
    }

    // ==================== Install ====================

    /// The host offered a deferred install prompt; hold it for later.
    pub fn capture_install_prompt(&self, capability: InstallCapability) {
        self.prompt.capture(capability);
    }

    pub fn can_install(&self) -> bool {
        self.prompt.is_available()
    }

    /// Show the captured install prompt. Without one, the user is told
    /// installation is unavailable and nothing else happens.
    pub async fn install_pwa(&self) -> Result<InstallOutcome, ClientError> {
        let Some(capability) = self.prompt.take() else {
            info!(surface = self.surface.as_str(), "Install requested without a captured prompt");
            let _ = self.notices.send(UserNotice::InstallUnavailable);
            return Ok(InstallOutcome::Unavailable);
        };

        match capability.prompt().await {
            PromptChoice::Accepted => {
                self.prefs.mark_installed()?;
                info!("Install prompt accepted");
                Ok(InstallOutcome::Accepted)
            }
            PromptChoice::Dismissed => {
                self.prefs.record_dismissal(self.clock.now_millis())?;
                info!("Install prompt dismissed");
                Ok(InstallOutcome::Dismissed)
            }
        }
    }

    /// The host reports the app was installed.
    pub fn app_installed(&self) -> Result<(), ClientError> {
        self.prefs.mark_installed()?;
        self.prompt.discard();
        Ok(())
    }

    /// Installed flag set, or already running standalone.
    pub fn is_installed(&self) -> Result<bool, ClientError> {
        Ok(self.environment.is_standalone() || self.prefs.is_installed()?)
    }

    pub fn should_show_install_banner(&self) -> Result<Option<BannerKind>, ClientError> {
        self.banner.banner(&self.environment, self.prompt.is_available())
    }

    pub fn dismiss_banner(&self) -> Result<(), ClientError> {
        self.banner.dismiss()
    }

    pub fn dismiss_ios_instructions(&self) -> Result<(), ClientError> {
        self.banner.dismiss_ios_instructions()
    }

    // ==================== Updates ====================

    pub fn update_available(&self) -> bool {
        self.updates.update_available()
    }

    pub fn watch_updates(&self) -> watch::Receiver<bool> {
        self.updates.watch()
    }

    pub async fn check_for_update(&self) -> Result<UpdateResult, ClientError> {
        let result = self.updates.check_for_update().await?;
        self.updates.drain_events().await?;
        Ok(result)
    }

    /// Accept a pending update: activate the waiting worker, then reload.
    pub async fn apply_update(&self) -> Result<ApplyOutcome, ClientError> {
        let outcome = self.updates.apply_update().await?;
        self.updates.drain_events().await?;
        Ok(outcome)
    }

    /// Start periodic update checks. Replaces any running poller.
    pub fn start_update_polling(&self, interval: Duration) {
        let tasks = self.updates.spawn(interval);
        match self.tasks.lock() {
            Ok(mut slot) => *slot = Some(tasks),
            Err(_) => warn!("Update task slot poisoned; polling not started"),
        }
    }

    pub fn stop_update_polling(&self) {
        if let Ok(mut slot) = self.tasks.lock() {
            slot.take();
        }
    }

    pub fn is_polling(&self) -> bool {
        self.tasks.lock().is_ok_and(|slot| slot.is_some())
    }

    // ==================== Connectivity ====================

    pub fn is_online(&self) -> bool {
        self.connectivity.is_online()
    }

    /// Feed a host connectivity event.
    pub fn set_online(&self, online: bool) {
        self.connectivity.set_online(online);
    }

    pub fn watch_online(&self) -> watch::Receiver<bool> {
        self.connectivity.subscribe()
    }
}
