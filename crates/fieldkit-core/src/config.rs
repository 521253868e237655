//! FieldKit configuration
//!
//! A `WorkerConfig` doubles as the worker script: the host fetches the
//! script URL and deserializes the body into this struct, so each deploy
//! ships its own generation tag and precache manifest.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::error::{FieldKitError, FieldKitResult};
use crate::types::{BannerSuppression, PolicyKind};

/// Environment variable naming an explicit configuration file.
pub const CONFIG_ENV_VAR: &str = "FIELDKIT_CONFIG";

/// Top-level configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FieldKitConfig {
    /// Application identity
    pub app: AppConfig,

    /// General-purpose worker for the main application
    pub main_worker: WorkerConfig,

    /// Install-only worker for the portal surface
    pub portal_worker: WorkerConfig,

    /// Client bridge settings
    pub client: ClientConfig,

    /// Log output settings
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Display name
    pub name: String,

    /// User agent reported by the smoke harness
    pub user_agent: String,
}

/// Deploy-time worker configuration, also used as the worker script body
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// Worker behaviour
    pub policy: PolicyKind,

    /// Script path relative to the origin
    pub script_url: String,

    /// Registration scope path
    pub scope: String,

    /// Current precache bucket name, one per deploy
    pub generation: String,

    /// Unversioned runtime bucket name
    pub runtime_cache: String,

    /// Shell paths cached at install
    pub precache: Vec<String>,

    /// Page served to navigations when offline
    pub offline_path: String,

    /// Path substring marking API requests
    pub api_marker: String,

    /// Host fragment identifying the backend storage origin
    pub storage_host: String,

    /// Page opened from notification clicks
    pub dashboard_path: String,

    /// Skip waiting as soon as install succeeds
    pub fast_activate: bool,

    /// Push notification presentation
    pub notification: NotificationConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NotificationConfig {
    pub title: String,
    pub default_body: String,
    pub icon: String,
    pub badge: String,
    pub vibrate: Vec<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Seconds between registration update checks
    pub update_check_interval_secs: u64,

    /// Install banner suppression for the main surface
    pub main_banner: BannerSuppression,

    /// Install banner suppression for the portal surface
    pub portal_banner: BannerSuppression,

    /// SQLite file backing durable client storage
    pub storage_path: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Level name ("info", "debug", ...)
    pub level: String,

    /// Output format ("pretty", "compact", "json")
    pub format: String,

    /// Optional `EnvFilter` directive string
    pub filter: Option<String>,
}

impl Default for FieldKitConfig {
    fn default() -> Self {
        Self {
            app: AppConfig::default(),
            main_worker: WorkerConfig::main(),
            portal_worker: WorkerConfig::portal(),
            client: ClientConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            name: "FieldKit".to_string(),
            user_agent: format!("FieldKit/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self::main()
    }
}

impl WorkerConfig {
    /// The general-purpose worker registered at the origin root.
    pub fn main() -> Self {
        Self {
            policy: PolicyKind::FullCaching,
            script_url: "/sw.js".to_string(),
            scope: "/".to_string(),
            generation: "fieldkit-v1".to_string(),
            runtime_cache: "fieldkit-runtime".to_string(),
            precache: vec![
                "/".to_string(),
                "/dashboard".to_string(),
                "/offline".to_string(),
            ],
            offline_path: "/offline".to_string(),
            api_marker: "/api/".to_string(),
            storage_host: "supabase.co".to_string(),
            dashboard_path: "/dashboard".to_string(),
            fast_activate: true,
            notification: NotificationConfig::default(),
        }
    }

    /// The install-only worker registered under the portal scope.
    pub fn portal() -> Self {
        Self {
            policy: PolicyKind::InstallOnly,
            script_url: "/sw-portal.js".to_string(),
            scope: "/portal/".to_string(),
            generation: "fieldkit-portal-v1".to_string(),
            runtime_cache: "fieldkit-portal-runtime".to_string(),
            precache: Vec::new(),
            offline_path: "/portal/offline".to_string(),
            dashboard_path: "/portal/".to_string(),
            ..Self::main()
        }
    }

    /// Parse a worker script body.
    pub fn from_script(bytes: &[u8]) -> FieldKitResult<Self> {
        let config: Self = serde_json::from_slice(bytes)?;
        config.validate()?;
        Ok(config)
    }

    /// Serialize as a worker script body.
    pub fn to_script(&self) -> FieldKitResult<Vec<u8>> {
        Ok(serde_json::to_vec_pretty(self)?)
    }

    /// Check structural constraints; degraded-but-legal setups only warn.
    pub fn validate(&self) -> FieldKitResult<()> {
        if !self.scope.starts_with('/') || !self.scope.ends_with('/') {
            return Err(FieldKitError::config(format!(
                "scope must start and end with '/': {}",
                self.scope
            )));
        }
        if self.generation.is_empty() || self.runtime_cache.is_empty() {
            return Err(FieldKitError::config("cache names must not be empty"));
        }
        if self.generation == self.runtime_cache {
            return Err(FieldKitError::config(format!(
                "generation and runtime cache share the name {}",
                self.generation
            )));
        }
        if self.policy == PolicyKind::FullCaching
            && !self.precache.iter().any(|p| p == &self.offline_path)
        {
            warn!(
                offline_path = %self.offline_path,
                "Offline page is not precached; navigations will fall back to a plain 503"
            );
        }
        Ok(())
    }
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            title: "FieldKit".to_string(),
            default_body: "You have a new update".to_string(),
            icon: "/icons/icon-192x192.png".to_string(),
            badge: "/icons/icon-72x72.png".to_string(),
            vibrate: vec![100, 50, 100],
        }
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            update_check_interval_secs: 60 * 60,
            main_banner: BannerSuppression::Days { days: 7 },
            portal_banner: BannerSuppression::Session,
            storage_path: dirs::data_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("fieldkit")
                .join("client.db"),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
            filter: None,
        }
    }
}

impl FieldKitConfig {
    /// Load configuration.
    ///
    /// Order: `path`, then `$FIELDKIT_CONFIG`, then
    /// `<config dir>/fieldkit/config.json`, then defaults.
    pub fn load(path: Option<&Path>) -> FieldKitResult<Self> {
        let candidate = match path {
            Some(p) => Some(p.to_path_buf()),
            None => std::env::var_os(CONFIG_ENV_VAR)
                .map(PathBuf::from)
                .or_else(|| Self::default_path().filter(|p| p.exists())),
        };

        let config = match candidate {
            Some(p) => Self::from_file(&p)?,
            None => {
                debug!("No configuration file found, using defaults");
                Self::default()
            }
        };

        config.validate()?;
        Ok(config)
    }

    /// Read a configuration file.
    pub fn from_file(path: &Path) -> FieldKitResult<Self> {
        debug!(path = %path.display(), "Loading configuration");
        let contents = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&contents)?)
    }

    /// Default configuration file location.
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|d| d.join("fieldkit").join("config.json"))
    }

    pub fn validate(&self) -> FieldKitResult<()> {
        self.main_worker.validate()?;
        self.portal_worker.validate()?;
        if self.main_worker.scope == self.portal_worker.scope {
            return Err(FieldKitError::config("main and portal workers share a scope"));
        }
        if self.client.update_check_interval_secs == 0 {
            return Err(FieldKitError::config("update check interval must be positive"));
        }
        Ok(())
    }
}
