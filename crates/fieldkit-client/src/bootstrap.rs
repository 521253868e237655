//! Once-per-page worker registration.

use std::sync::Arc;
use std::time::Duration;

use fieldkit_common::SharedClock;
use fieldkit_core::{FieldKitConfig, Surface};
use fieldkit_net::Network;
use fieldkit_sw::{worker_for_surface, RegistrationOptions, ServiceWorkerContainer};
use tokio::sync::OnceCell;
use tracing::info;

use crate::platform::Environment;
use crate::storage::{DurableStore, SqliteStore};
use crate::{ClientError, PwaBridge};

/// Registers the surface's worker the first time it is asked to and hands
/// out the same bridge afterwards.
pub struct ServiceWorkerRegister<N> {
    container: Arc<ServiceWorkerContainer<N>>,
    config: Arc<FieldKitConfig>,
    surface: Surface,
    client_id: String,
    environment: Environment,
    store: Arc<dyn DurableStore>,
    clock: SharedClock,
    bridge: OnceCell<Arc<PwaBridge<N>>>,
}

impl<N: Network + 'static> ServiceWorkerRegister<N> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        container: Arc<ServiceWorkerContainer<N>>,
        config: Arc<FieldKitConfig>,
        surface: Surface,
        client_id: impl Into<String>,
        environment: Environment,
        store: Arc<dyn DurableStore>,
        clock: SharedClock,
    ) -> Self {
        Self {
            container,
            config,
            surface,
            client_id: client_id.into(),
            environment,
            store,
            clock,
            bridge: OnceCell::new(),
        }
    }

    /// Like [`ServiceWorkerRegister::new`], with durable storage in the
    /// SQLite file named by `config.client.storage_path`.
    pub fn open(
        container: Arc<ServiceWorkerContainer<N>>,
        config: Arc<FieldKitConfig>,
        surface: Surface,
        client_id: impl Into<String>,
        environment: Environment,
        clock: SharedClock,
    ) -> Result<Self, ClientError> {
        let store = SqliteStore::open(&config.client.storage_path)?;
        Ok(Self::new(
            container,
            config,
            surface,
            client_id,
            environment,
            Arc::new(store),
            clock,
        ))
    }

    pub fn is_registered(&self) -> bool {
        self.bridge.initialized()
    }

    /// Register the worker, build the page's bridge and start update polling
    /// at the configured interval. Later calls return the same bridge
    /// without touching the container.
    pub async fn register(&self) -> Result<Arc<PwaBridge<N>>, ClientError> {
        self.bridge
            .get_or_try_init(|| async {
                let worker = worker_for_surface(&self.config, self.surface);
                let options = RegistrationOptions {
                    scope: Some(worker.scope.clone()),
                };
                let result = self.container.register(&worker.script_url, options).await?;
                info!(
                    surface = self.surface.as_str(),
                    script = %worker.script_url,
                    ?result,
                    "Service worker registered"
                );

                let scope = self
                    .container
                    .origin()
                    .join(&worker.scope)
                    .map_err(|e| ClientError::Config(e.to_string()))?;
                let suppression = match self.surface {
                    Surface::Main => self.config.client.main_banner,
                    Surface::Portal => self.config.client.portal_banner,
                };

                let bridge = Arc::new(PwaBridge::new(
                    Arc::clone(&self.container),
                    scope,
                    self.surface,
                    self.client_id.clone(),
                    self.environment.clone(),
                    Arc::clone(&self.store),
                    suppression,
                    Arc::clone(&self.clock),
                ));
                bridge.start_update_polling(Duration::from_secs(
                    self.config.client.update_check_interval_secs,
                ));
                Ok::<_, ClientError>(bridge)
            })
            .await
            .map(Arc::clone)
    }
}
