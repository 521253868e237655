//! The host runtime: registrations, lifecycle jobs, clients and event
//! dispatch for one origin.
//!
//! Install and activate run as jobs serialized per registration. Fetch,
//! push and message events are not serialized; they only share the cache
//! storage.

use std::sync::Arc;

use fieldkit_common::SharedClock;
use fieldkit_core::WorkerConfig;
use fieldkit_net::{Network, Request, Response};
use hashbrown::HashMap;
use tokio::sync::{broadcast, Mutex, RwLock};
use tracing::{debug, error, info, warn};
use url::Url;

use crate::cache::{CacheStorage, CacheStoreManager};
use crate::clients::{Client, Clients};
use crate::context::WorkerContext;
use crate::lifecycle::{
    RegistrationInfo, ServiceWorker, ServiceWorkerId, ServiceWorkerRegistration,
    ServiceWorkerState,
};
use crate::message::MessageTarget;
use crate::push::{ClickOutcome, Notification};
use crate::sync::SyncOutcome;
use crate::worker::{MessageOutcome, ServiceWorkerGlobal};
use crate::ServiceWorkerError;

const EVENT_CAPACITY: usize = 64;

/// Registration options.
#[derive(Debug, Clone, Default)]
pub struct RegistrationOptions {
    /// Scope path or URL; defaults to the script's directory.
    pub scope: Option<String>,
}

/// Result of a register or update job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateResult {
    /// The script bytes matched the newest worker.
    Unchanged,
    /// A new worker was installed; it may already be active.
    Installed(ServiceWorkerId),
}

/// Events observable by pages.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServiceWorkerEvent {
    /// A new worker started installing.
    UpdateFound { scope: Url },
    /// A worker changed state. `active` is the registration's active worker
    /// at the time of the change.
    StateChange {
        scope: Url,
        worker_id: ServiceWorkerId,
        state: ServiceWorkerState,
        active: Option<ServiceWorkerId>,
    },
    /// A client got a new controller.
    ControllerChange {
        client_id: String,
        worker_id: ServiceWorkerId,
    },
    /// A worker posted a message to its clients.
    Message { scope: Url, data: String },
}

/// Service worker container for one origin.
pub struct ServiceWorkerContainer<N> {
    origin: Url,

    network: Arc<N>,

    /// Registrations by scope.
    registrations: Arc<RwLock<HashMap<String, ServiceWorkerRegistration>>>,

    /// Job locks by scope.
    jobs: Mutex<HashMap<String, Arc<Mutex<()>>>>,

    caches: CacheStoreManager,

    clients: Arc<RwLock<Clients>>,

    /// Notifications currently shown, with the scope that raised them.
    notifications: Arc<RwLock<Vec<(Url, Notification)>>>,

    event_tx: broadcast::Sender<ServiceWorkerEvent>,
}

impl<N: Network> ServiceWorkerContainer<N> {
    /// Create a container with empty cache storage.
    pub fn new(origin: Url, network: Arc<N>, clock: SharedClock) -> Self {
        Self::with_storage(origin, network, clock, CacheStorage::new())
    }

    /// Create a container over previously persisted cache storage.
    pub fn with_storage(origin: Url, network: Arc<N>, clock: SharedClock, storage: CacheStorage) -> Self {
        let (event_tx, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            origin,
            network,
            registrations: Arc::new(RwLock::new(HashMap::new())),
            jobs: Mutex::new(HashMap::new()),
            caches: CacheStoreManager::new(Arc::new(RwLock::new(storage)), clock),
            clients: Arc::new(RwLock::new(Clients::new())),
            notifications: Arc::new(RwLock::new(Vec::new())),
            event_tx,
        }
    }

    pub fn origin(&self) -> &Url {
        &self.origin
    }

    /// Subscribe to lifecycle events.
    pub fn subscribe(&self) -> broadcast::Receiver<ServiceWorkerEvent> {
        self.event_tx.subscribe()
    }

    /// Cache storage shared by every worker of the origin.
    pub fn caches(&self) -> &CacheStoreManager {
        &self.caches
    }

    // ==================== Registration ====================

    /// Register a worker script and run the update job for its scope.
    pub async fn register(
        &self,
        script_url: &str,
        options: RegistrationOptions,
    ) -> Result<UpdateResult, ServiceWorkerError> {
        let script_url = self
            .origin
            .join(script_url)
            .map_err(|e| ServiceWorkerError::RegistrationFailed(e.to_string()))?;
        self.check_same_origin(&script_url)?;

        let scope = match options.scope {
            Some(s) => self
                .origin
                .join(&s)
                .map_err(|e| ServiceWorkerError::RegistrationFailed(e.to_string()))?,
            None => script_url
                .join("./")
                .map_err(|e| ServiceWorkerError::RegistrationFailed(e.to_string()))?,
        };
        self.check_same_origin(&scope)?;

        let key = scope.to_string();
        {
            let mut registrations = self.registrations.write().await;
            let registration = registrations
                .entry(key.clone())
                .or_insert_with(|| ServiceWorkerRegistration::new(scope, script_url.clone()));
            registration.script_url = script_url.clone();
        }

        info!(scope = %key, script = %script_url, "Registered service worker");
        self.run_update_job(&key, script_url).await
    }

    /// Re-fetch the script of a registration and install it if it changed.
    pub async fn update(&self, scope: &str) -> Result<UpdateResult, ServiceWorkerError> {
        let key = self.scope_key(scope)?;
        let script_url = self
            .registrations
            .read()
            .await
            .get(&key)
            .map(|r| r.script_url.clone())
            .ok_or_else(|| ServiceWorkerError::NotFound(key.clone()))?;
        self.run_update_job(&key, script_url).await
    }

    /// Remove a registration. Its clients lose their controller.
    pub async fn unregister(&self, scope: &str) -> Result<bool, ServiceWorkerError> {
        let key = self.scope_key(scope)?;
        let Some(mut registration) = self.registrations.write().await.remove(&key) else {
            return Ok(false);
        };

        let workers: Vec<ServiceWorkerId> = [&registration.installing, &registration.waiting, &registration.active]
            .into_iter()
            .flatten()
            .map(|w| w.id)
            .collect();
        registration.unregister();
        self.clients.write().await.release(&workers);

        info!(scope = %key, "Unregistered service worker");
        Ok(true)
    }

    /// Snapshot of the registration for an exact scope.
    pub async fn registration(&self, scope: &str) -> Option<RegistrationInfo> {
        let key = self.scope_key(scope).ok()?;
        self.registrations.read().await.get(&key).map(|r| r.info())
    }

    /// Registration whose scope is the longest prefix of `url`.
    pub async fn get_registration(&self, url: &str) -> Option<RegistrationInfo> {
        let url = self.origin.join(url).ok()?;
        let registrations = self.registrations.read().await;
        longest_scope_match(&registrations, &url).map(|r| r.info())
    }

    /// Scopes of every registration, sorted.
    pub async fn get_registrations(&self) -> Vec<Url> {
        let mut scopes: Vec<Url> = self
            .registrations
            .read()
            .await
            .values()
            .map(|r| r.scope.clone())
            .collect();
        scopes.sort();
        scopes
    }

    // ==================== Lifecycle jobs ====================

    async fn run_update_job(&self, key: &str, script_url: Url) -> Result<UpdateResult, ServiceWorkerError> {
        let _job = self.job_lock(key).await.lock_owned().await;

        let script = self.fetch_script(&script_url).await?;

        let (scope, unchanged) = {
            let registrations = self.registrations.read().await;
            let registration = registrations
                .get(key)
                .ok_or_else(|| ServiceWorkerError::NotFound(key.to_string()))?;
            let unchanged = registration
                .newest_worker()
                .is_some_and(|w| w.script == script);
            (registration.scope.clone(), unchanged)
        };

        if unchanged {
            debug!(scope = %scope, "Worker script unchanged");
            return Ok(UpdateResult::Unchanged);
        }

        let config = WorkerConfig::from_script(&script)
            .map_err(|e| ServiceWorkerError::ScriptError(e.to_string()))?;
        let mut context = WorkerContext::from_config(&self.origin, &config)?;
        if context.scope != scope {
            debug!(script_scope = %context.scope, scope = %scope, "Registration scope overrides script scope");
            context.scope = scope.clone();
        }

        let worker = ServiceWorker::new(script_url, script, context);
        let worker_id = worker.id;
        let ctx = Arc::clone(&worker.context);

        let active = {
            let mut registrations = self.registrations.write().await;
            let registration = registrations
                .get_mut(key)
                .ok_or_else(|| ServiceWorkerError::NotFound(key.to_string()))?;
            registration.begin_install(worker)?;
            registration.active.as_ref().map(|w| w.id)
        };

        self.emit(ServiceWorkerEvent::UpdateFound { scope: scope.clone() });
        self.emit_state(&scope, worker_id, ServiceWorkerState::Installing, active);

        let global = ServiceWorkerGlobal::new(ctx, self.caches.clone(), Arc::clone(&self.network));
        let outcome = match global.on_install().await {
            Ok(outcome) => outcome,
            Err(e) => {
                error!(scope = %scope, error = %e, "Install failed");
                if let Some(registration) = self.registrations.write().await.get_mut(key) {
                    registration.install_failed(e.to_string());
                }
                self.emit_state(&scope, worker_id, ServiceWorkerState::Redundant, active);
                return Err(e);
            }
        };

        {
            let mut registrations = self.registrations.write().await;
            if let Some(registration) = registrations.get_mut(key) {
                registration.install_complete();
            }
        }
        self.emit_state(&scope, worker_id, ServiceWorkerState::Installed, active);

        if outcome.skip_waiting || active.is_none() {
            self.activate_waiting(key).await?;
        } else {
            info!(scope = %scope, worker = worker_id.raw(), "New worker waiting");
        }

        Ok(UpdateResult::Installed(worker_id))
    }

    /// Activate the waiting worker. The caller holds the scope's job lock.
    async fn activate_waiting(&self, key: &str) -> Result<(), ServiceWorkerError> {
        let (scope, worker_id, ctx, other_scopes) = {
            let mut registrations = self.registrations.write().await;
            let other_scopes: Vec<Url> = registrations
                .iter()
                .filter(|(k, _)| k.as_str() != key)
                .map(|(_, r)| r.scope.clone())
                .collect();
            let registration = registrations
                .get_mut(key)
                .ok_or_else(|| ServiceWorkerError::NotFound(key.to_string()))?;
            let worker_id = registration
                .begin_activation()
                .ok_or_else(|| ServiceWorkerError::StateError("No waiting worker".to_string()))?;
            let ctx = registration
                .get_active()
                .map(|w| Arc::clone(&w.context))
                .ok_or_else(|| ServiceWorkerError::StateError("No active worker".to_string()))?;
            (registration.scope.clone(), worker_id, ctx, other_scopes)
        };
        self.emit_state(&scope, worker_id, ServiceWorkerState::Activating, Some(worker_id));

        let global = ServiceWorkerGlobal::new(ctx, self.caches.clone(), Arc::clone(&self.network));
        let outcome = {
            let mut clients = self.clients.write().await;
            global.on_activate(&mut clients, worker_id, &other_scopes).await
        };
        for client_id in outcome.claimed {
            self.emit(ServiceWorkerEvent::ControllerChange {
                client_id,
                worker_id,
            });
        }

        if let Some(registration) = self.registrations.write().await.get_mut(key) {
            registration.activation_complete();
        }
        self.emit_state(&scope, worker_id, ServiceWorkerState::Activated, Some(worker_id));
        Ok(())
    }

    // ==================== Functional events ====================

    /// Dispatch a fetch from a page.
    ///
    /// Navigations go to the registration whose scope matches the URL;
    /// subresources go to the requesting client's controller. Anything not
    /// intercepted goes straight to the network.
    pub async fn fetch(&self, client_id: Option<&str>, request: Request) -> Response {
        let ctx = if request.is_navigation() {
            self.active_context_for(&request.url).await
        } else {
            match client_id {
                Some(id) => self.controller_context(id).await,
                None => None,
            }
        };

        if let Some(ctx) = ctx {
            let global = ServiceWorkerGlobal::new(ctx, self.caches.clone(), Arc::clone(&self.network));
            if let Some(response) = global.on_fetch(request.clone()).await {
                return response;
            }
        }

        match self.network.fetch(request).await {
            Ok(response) => response,
            Err(e) => {
                warn!(error = %e, "Uncontrolled fetch failed");
                Response::network_error()
            }
        }
    }

    /// Post a message to the waiting or active worker of a registration.
    pub async fn post_message(
        &self,
        scope: &str,
        target: MessageTarget,
        data: &str,
    ) -> Result<MessageOutcome, ServiceWorkerError> {
        let key = self.scope_key(scope)?;
        let (scope, ctx) = {
            let registrations = self.registrations.read().await;
            let registration = registrations
                .get(&key)
                .ok_or_else(|| ServiceWorkerError::NotFound(key.clone()))?;
            let worker = match target {
                MessageTarget::Waiting => registration.waiting.as_ref(),
                MessageTarget::Active => registration.active.as_ref(),
            }
            .ok_or_else(|| ServiceWorkerError::StateError(format!("No {target:?} worker")))?;
            (registration.scope.clone(), Arc::clone(&worker.context))
        };

        let global = ServiceWorkerGlobal::new(ctx, self.caches.clone(), Arc::clone(&self.network));
        let outcome = global.on_message(data).await;

        match outcome {
            MessageOutcome::SkipWaiting if target == MessageTarget::Waiting => {
                let _job = self.job_lock(&key).await.lock_owned().await;
                let still_waiting = self
                    .registrations
                    .read()
                    .await
                    .get(&key)
                    .is_some_and(|r| r.waiting.is_some());
                if still_waiting {
                    self.activate_waiting(&key).await?;
                }
            }
            MessageOutcome::CachesCleared(buckets) => {
                self.emit(ServiceWorkerEvent::Message {
                    scope,
                    data: serde_json::json!({ "type": "CACHE_CLEARED", "buckets": buckets }).to_string(),
                });
            }
            _ => {}
        }

        Ok(outcome)
    }

    /// Deliver a push to the active worker of a registration.
    pub async fn push(&self, scope: &str, payload: Option<&[u8]>) -> Result<Option<Notification>, ServiceWorkerError> {
        let (scope, global) = self.active_global(scope).await?;
        let notification = global.on_push(payload);
        if let Some(notification) = &notification {
            self.notifications
                .write()
                .await
                .push((scope, notification.clone()));
        }
        Ok(notification)
    }

    /// Click a shown notification. It is closed whatever the action.
    pub async fn notification_click(&self, id: u64, action: Option<&str>) -> Result<ClickOutcome, ServiceWorkerError> {
        let (scope, notification) = {
            let mut notifications = self.notifications.write().await;
            let index = notifications
                .iter()
                .position(|(_, n)| n.id == id)
                .ok_or_else(|| ServiceWorkerError::NotFound(format!("notification {id}")))?;
            notifications.remove(index)
        };

        let (_, global) = self.active_global(scope.as_str()).await?;
        let controller = self.active_id_for(&notification.url).await;
        let mut clients = self.clients.write().await;
        Ok(global.on_notification_click(&notification, action, &mut clients, controller))
    }

    /// Fire a background sync event.
    pub async fn sync(&self, scope: &str, tag: &str) -> Result<SyncOutcome, ServiceWorkerError> {
        let (_, global) = self.active_global(scope).await?;
        Ok(global.on_sync(tag))
    }

    /// Notifications currently shown.
    pub async fn notifications(&self) -> Vec<Notification> {
        self.notifications
            .read()
            .await
            .iter()
            .map(|(_, n)| n.clone())
            .collect()
    }

    // ==================== Clients ====================

    /// Open a window on `url`. It is controlled by the matching active
    /// worker, if any.
    pub async fn open_client(&self, url: &str) -> Result<Client, ServiceWorkerError> {
        let url = self
            .origin
            .join(url)
            .map_err(|e| ServiceWorkerError::NetworkError(e.to_string()))?;
        let controller = self.active_id_for(&url).await;

        let mut clients = self.clients.write().await;
        let mut client = clients.open_window(url);
        if let Some(stored) = clients.get_mut(&client.id) {
            stored.controller = controller;
            client = stored.clone();
        }
        debug!(client = %client.id, controlled = client.is_controlled(), "Opened client");
        Ok(client)
    }

    /// Reload a client; it picks up the current active worker for its URL.
    pub async fn reload_client(&self, client_id: &str) -> Result<Option<ServiceWorkerId>, ServiceWorkerError> {
        let url = self
            .clients
            .read()
            .await
            .get(client_id)
            .map(|c| c.url.clone())
            .ok_or_else(|| ServiceWorkerError::NotFound(client_id.to_string()))?;
        let controller = self.active_id_for(&url).await;

        let mut clients = self.clients.write().await;
        let client = clients
            .get_mut(client_id)
            .ok_or_else(|| ServiceWorkerError::NotFound(client_id.to_string()))?;
        client.reloads += 1;
        client.controller = controller;
        info!(client = %client_id, reloads = client.reloads, "Reloaded client");
        Ok(controller)
    }

    pub async fn close_client(&self, client_id: &str) -> bool {
        self.clients.write().await.remove(client_id).is_some()
    }

    pub async fn client(&self, client_id: &str) -> Option<Client> {
        self.clients.read().await.get(client_id).cloned()
    }

    /// The worker controlling a client.
    pub async fn controller(&self, client_id: &str) -> Option<ServiceWorkerId> {
        self.clients.read().await.get(client_id)?.controller
    }

    // ==================== Helpers ====================

    async fn fetch_script(&self, script_url: &Url) -> Result<Vec<u8>, ServiceWorkerError> {
        let response = self
            .network
            .fetch(Request::get(script_url.clone()))
            .await
            .map_err(|e| ServiceWorkerError::NetworkError(e.to_string()))?;
        if !response.ok() {
            return Err(ServiceWorkerError::ScriptError(format!(
                "{script_url} returned status {}",
                response.status
            )));
        }
        Ok(response.bytes().to_vec())
    }

    async fn job_lock(&self, key: &str) -> Arc<Mutex<()>> {
        let mut jobs = self.jobs.lock().await;
        Arc::clone(jobs.entry(key.to_string()).or_default())
    }

    async fn active_context_for(&self, url: &Url) -> Option<Arc<WorkerContext>> {
        let registrations = self.registrations.read().await;
        longest_scope_match(&registrations, url)
            .and_then(|r| r.get_active())
            .map(|w| Arc::clone(&w.context))
    }

    async fn active_id_for(&self, url: &Url) -> Option<ServiceWorkerId> {
        let registrations = self.registrations.read().await;
        longest_scope_match(&registrations, url)
            .and_then(|r| r.get_active())
            .map(|w| w.id)
    }

    async fn controller_context(&self, client_id: &str) -> Option<Arc<WorkerContext>> {
        let controller = self.controller(client_id).await?;
        let registrations = self.registrations.read().await;
        registrations
            .values()
            .filter_map(|r| r.get_active())
            .find(|w| w.id == controller)
            .map(|w| Arc::clone(&w.context))
    }

    async fn active_global(&self, scope: &str) -> Result<(Url, ServiceWorkerGlobal<N>), ServiceWorkerError> {
        let key = self.scope_key(scope)?;
        let registrations = self.registrations.read().await;
        let registration = registrations
            .get(&key)
            .ok_or_else(|| ServiceWorkerError::NotFound(key.clone()))?;
        let worker = registration
            .get_active()
            .ok_or_else(|| ServiceWorkerError::StateError(format!("{key} has no active worker")))?;
        Ok((
            registration.scope.clone(),
            ServiceWorkerGlobal::new(
                Arc::clone(&worker.context),
                self.caches.clone(),
                Arc::clone(&self.network),
            ),
        ))
    }

    fn scope_key(&self, scope: &str) -> Result<String, ServiceWorkerError> {
        self.origin
            .join(scope)
            .map(|u| u.to_string())
            .map_err(|e| ServiceWorkerError::NotFound(format!("{scope}: {e}")))
    }

    fn check_same_origin(&self, url: &Url) -> Result<(), ServiceWorkerError> {
        if url.origin() != self.origin.origin() {
            return Err(ServiceWorkerError::SecurityError(format!(
                "{url} is not same-origin with {}",
                self.origin
            )));
        }
        Ok(())
    }

    fn emit_state(
        &self,
        scope: &Url,
        worker_id: ServiceWorkerId,
        state: ServiceWorkerState,
        active: Option<ServiceWorkerId>,
    ) {
        debug!(scope = %scope, worker = worker_id.raw(), ?state, "Worker state changed");
        self.emit(ServiceWorkerEvent::StateChange {
            scope: scope.clone(),
            worker_id,
            state,
            active,
        });
    }

    fn emit(&self, event: ServiceWorkerEvent) {
        // No subscribers is fine.
        let _ = self.event_tx.send(event);
    }
}

fn longest_scope_match<'a>(
    registrations: &'a HashMap<String, ServiceWorkerRegistration>,
    url: &Url,
) -> Option<&'a ServiceWorkerRegistration> {
    registrations
        .values()
        .filter(|r| r.scope.origin() == url.origin() && url.path().starts_with(r.scope.path()))
        .max_by_key(|r| r.scope.path().len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use fieldkit_common::system_clock;
    use fieldkit_core::FieldKitConfig;
    use fieldkit_net::NetError;
    use std::sync::Mutex as StdMutex;

    /// Serves worker scripts, 404s `/missing` and echoes every other path.
    struct ScriptedNetwork {
        scripts: StdMutex<HashMap<String, Vec<u8>>>,
    }

    impl ScriptedNetwork {
        fn new(config: &FieldKitConfig) -> Self {
            let mut scripts = HashMap::new();
            for worker in [&config.main_worker, &config.portal_worker] {
                scripts.insert(worker.script_url.clone(), worker.to_script().unwrap());
            }
            Self {
                scripts: StdMutex::new(scripts),
            }
        }

        fn deploy(&self, config: &WorkerConfig) {
            self.scripts
                .lock()
                .unwrap()
                .insert(config.script_url.clone(), config.to_script().unwrap());
        }
    }

    impl Network for ScriptedNetwork {
        async fn fetch(&self, request: Request) -> Result<Response, NetError> {
            if request.url.path() == "/missing" {
                return Ok(Response::plain_text(404, "not found"));
            }
            let script = self.scripts.lock().unwrap().get(request.url.path()).cloned();
            Ok(match script {
                Some(bytes) => Response::new(200, bytes),
                None => Response::plain_text(200, request.url.path()),
            }
            .with_url(request.url))
        }
    }

    fn container() -> (ServiceWorkerContainer<ScriptedNetwork>, Arc<ScriptedNetwork>) {
        let network = Arc::new(ScriptedNetwork::new(&FieldKitConfig::default()));
        let origin = Url::parse("https://app.example.com/").unwrap();
        (
            ServiceWorkerContainer::new(origin, Arc::clone(&network), system_clock()),
            network,
        )
    }

    #[tokio::test]
    async fn test_register_installs_and_activates() {
        let (container, _) = container();
        let mut events = container.subscribe();

        let result = container
            .register("/sw.js", RegistrationOptions::default())
            .await
            .unwrap();
        let UpdateResult::Installed(id) = result else {
            panic!("expected an install");
        };

        let info = container.registration("/").await.unwrap();
        assert_eq!(info.active.unwrap().id, id);
        assert_eq!(info.active.unwrap().state, ServiceWorkerState::Activated);
        assert!(info.waiting.is_none());

        assert_eq!(
            events.recv().await.unwrap(),
            ServiceWorkerEvent::UpdateFound {
                scope: Url::parse("https://app.example.com/").unwrap()
            }
        );
    }

    #[tokio::test]
    async fn test_register_rejects_cross_origin_script() {
        let (container, _) = container();
        let err = container
            .register("https://evil.example.net/sw.js", RegistrationOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceWorkerError::SecurityError(_)));
    }

    #[tokio::test]
    async fn test_update_unchanged_script() {
        let (container, _) = container();
        container
            .register("/sw.js", RegistrationOptions::default())
            .await
            .unwrap();
        assert_eq!(container.update("/").await.unwrap(), UpdateResult::Unchanged);
    }

    #[tokio::test]
    async fn test_open_client_is_controlled_by_matching_scope() {
        let (container, _) = container();
        container
            .register("/sw.js", RegistrationOptions::default())
            .await
            .unwrap();
        container
            .register(
                "/sw-portal.js",
                RegistrationOptions {
                    scope: Some("/portal/".to_string()),
                },
            )
            .await
            .unwrap();

        let main = container.open_client("/dashboard").await.unwrap();
        let portal = container.open_client("/portal/home").await.unwrap();

        let main_active = container.registration("/").await.unwrap().active.unwrap().id;
        let portal_active = container.registration("/portal/").await.unwrap().active.unwrap().id;
        assert_eq!(main.controller, Some(main_active));
        assert_eq!(portal.controller, Some(portal_active));
        assert_eq!(
            container.get_registration("/portal/tickets").await.unwrap().scope.path(),
            "/portal/"
        );
    }

    #[tokio::test]
    async fn test_waiting_worker_and_skip_waiting() {
        let (container, network) = container();
        let mut config = WorkerConfig::main();
        config.fast_activate = false;
        network.deploy(&config);

        container
            .register("/sw.js", RegistrationOptions::default())
            .await
            .unwrap();
        let page = container.open_client("/dashboard").await.unwrap();
        let first = container.controller(&page.id).await.unwrap();

        config.generation = "fieldkit-v2".to_string();
        network.deploy(&config);
        let UpdateResult::Installed(second) = container.update("/").await.unwrap() else {
            panic!("expected an install");
        };

        let info = container.registration("/").await.unwrap();
        assert_eq!(info.waiting.unwrap().id, second);
        assert_eq!(container.controller(&page.id).await, Some(first));

        let mut events = container.subscribe();
        let outcome = container
            .post_message("/", MessageTarget::Waiting, r#"{"type":"SKIP_WAITING"}"#)
            .await
            .unwrap();
        assert_eq!(outcome, MessageOutcome::SkipWaiting);
        assert_eq!(container.controller(&page.id).await, Some(second));

        let mut saw_controller_change = false;
        while let Ok(event) = events.try_recv() {
            if let ServiceWorkerEvent::ControllerChange { client_id, worker_id } = event {
                assert_eq!(client_id, page.id);
                assert_eq!(worker_id, second);
                saw_controller_change = true;
            }
        }
        assert!(saw_controller_change);
        assert_eq!(container.caches().bucket_names().await, vec!["fieldkit-v2".to_string()]);
    }

    #[tokio::test]
    async fn test_install_failure_keeps_active_worker() {
        let (container, network) = container();
        container
            .register("/sw.js", RegistrationOptions::default())
            .await
            .unwrap();
        let first = container.registration("/").await.unwrap().active.unwrap().id;

        let mut config = WorkerConfig::main();
        config.generation = "fieldkit-v2".to_string();
        config.precache.push("/missing".to_string());
        network.deploy(&config);

        let mut events = container.subscribe();
        let err = container.update("/").await.unwrap_err();
        assert!(matches!(err, ServiceWorkerError::PrecacheFailed { .. }));
        assert!(!container.caches().bucket_names().await.contains(&"fieldkit-v2".to_string()));

        let mut states = Vec::new();
        while let Ok(event) = events.try_recv() {
            if let ServiceWorkerEvent::StateChange { state, .. } = event {
                states.push(state);
            }
        }
        assert_eq!(
            states,
            vec![ServiceWorkerState::Installing, ServiceWorkerState::Redundant]
        );

        let info = container.registration("/").await.unwrap();
        assert_eq!(info.active.unwrap().id, first);
        assert!(info.installing.is_none() && info.waiting.is_none());
    }

    #[tokio::test]
    async fn test_push_and_click() {
        let (container, _) = container();
        container
            .register("/sw.js", RegistrationOptions::default())
            .await
            .unwrap();

        let notification = container.push("/", Some(b"New ticket")).await.unwrap().unwrap();
        assert_eq!(container.notifications().await.len(), 1);

        let outcome = container
            .notification_click(notification.id, Some("open"))
            .await
            .unwrap();
        let ClickOutcome::Opened { client_id } = outcome else {
            panic!("expected a new window");
        };
        let opened = container.client(&client_id).await.unwrap();
        assert_eq!(opened.url.path(), "/dashboard");
        assert_eq!(opened.controller, container.registration("/").await.unwrap().active.map(|w| w.id));
        assert!(container.notifications().await.is_empty());
    }

    #[tokio::test]
    async fn test_main_activation_does_not_claim_portal_pages() {
        let (container, _) = container();
        container
            .register(
                "/sw-portal.js",
                RegistrationOptions {
                    scope: Some("/portal/".to_string()),
                },
            )
            .await
            .unwrap();
        let portal_page = container.open_client("/portal/home").await.unwrap();
        let main_page = container.open_client("/dashboard").await.unwrap();
        assert!(main_page.controller.is_none());

        let mut events = container.subscribe();
        container
            .register("/sw.js", RegistrationOptions::default())
            .await
            .unwrap();
        let main = container.registration("/").await.unwrap().active.unwrap().id;

        assert_eq!(container.controller(&portal_page.id).await, portal_page.controller);
        assert_eq!(container.controller(&main_page.id).await, Some(main));
        while let Ok(event) = events.try_recv() {
            if let ServiceWorkerEvent::ControllerChange { client_id, .. } = event {
                assert_eq!(client_id, main_page.id);
            }
        }
    }

    #[tokio::test]
    async fn test_unregister_releases_clients() {
        let (container, _) = container();
        container
            .register("/sw.js", RegistrationOptions::default())
            .await
            .unwrap();
        let page = container.open_client("/").await.unwrap();
        assert!(page.controller.is_some());

        assert!(container.unregister("/").await.unwrap());
        assert!(container.controller(&page.id).await.is_none());
        assert!(container.registration("/").await.is_none());
        assert!(!container.unregister("/").await.unwrap());
    }
}
