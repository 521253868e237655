//! Update detection and the skip-waiting handshake, page side.
//!
//! ```text
//! poll (hourly) ──► container.update(scope)
//!                         │
//!   StateChange{Installed, active: Some} ──► update_available = true
//!                         │
//! apply_update() ──► SKIP_WAITING to waiting worker
//!                         │
//!   ControllerChange(this page) ──► reload, update_available = false
//! ```

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use fieldkit_net::Network;
use fieldkit_sw::{
    ControlMessage, MessageTarget, ServiceWorkerContainer, ServiceWorkerEvent, ServiceWorkerState,
    UpdateResult,
};
use tokio::sync::{broadcast, watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use url::Url;

use crate::{ClientError, UserNotice};

/// What `apply_update` did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    /// Skip-waiting was posted; the page reloads on the controller change.
    Activating,
    /// Nothing was waiting; the page reloaded immediately.
    Reloaded,
}

/// Tracks the update flag for one page.
pub struct UpdateBridge<N> {
    container: Arc<ServiceWorkerContainer<N>>,
    scope: Url,
    client_id: String,
    available: watch::Sender<bool>,
    reload_pending: AtomicBool,
    events: Mutex<broadcast::Receiver<ServiceWorkerEvent>>,
    notices: broadcast::Sender<UserNotice>,
}

impl<N: Network + 'static> UpdateBridge<N> {
    pub fn new(
        container: Arc<ServiceWorkerContainer<N>>,
        scope: Url,
        client_id: String,
        notices: broadcast::Sender<UserNotice>,
    ) -> Self {
        let events = Mutex::new(container.subscribe());
        let (available, _) = watch::channel(false);
        Self {
            container,
            scope,
            client_id,
            available,
            reload_pending: AtomicBool::new(false),
            events,
            notices,
        }
    }

    pub fn update_available(&self) -> bool {
        *self.available.borrow()
    }

    pub fn watch(&self) -> watch::Receiver<bool> {
        self.available.subscribe()
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    /// Ask the container to re-check the worker script.
    pub async fn check_for_update(&self) -> Result<UpdateResult, ClientError> {
        let result = self.container.update(self.scope.as_str()).await?;
        debug!(scope = %self.scope, ?result, "Update check finished");
        Ok(result)
    }

    /// React to one container event.
    pub async fn handle_event(&self, event: &ServiceWorkerEvent) -> Result<(), ClientError> {
        match event {
            ServiceWorkerEvent::StateChange {
                scope,
                state: ServiceWorkerState::Installed,
                active: Some(_),
                ..
            } if *scope == self.scope => {
                if self.container.controller(&self.client_id).await.is_some() {
                    self.raise();
                }
            }
            ServiceWorkerEvent::ControllerChange { client_id, .. } if *client_id == self.client_id => {
                if self.reload_pending.swap(false, Ordering::SeqCst) {
                    self.reload().await?;
                }
            }
            _ => {}
        }
        Ok(())
    }

    /// Process every event already queued. Returns how many were handled.
    pub async fn drain_events(&self) -> Result<usize, ClientError> {
        let mut events = self.events.lock().await;
        let mut handled = 0;
        loop {
            match events.try_recv() {
                Ok(event) => {
                    self.handle_event(&event).await?;
                    handled += 1;
                }
                Err(broadcast::error::TryRecvError::Lagged(skipped)) => {
                    warn!(skipped, "Update bridge fell behind on worker events");
                }
                Err(_) => return Ok(handled),
            }
        }
    }

    /// Accept the update.
    pub async fn apply_update(&self) -> Result<ApplyOutcome, ClientError> {
        let waiting = self
            .container
            .registration(self.scope.as_str())
            .await
            .and_then(|r| r.waiting)
            .is_some();

        if !waiting {
            self.reload().await?;
            return Ok(ApplyOutcome::Reloaded);
        }

        self.reload_pending.store(true, Ordering::SeqCst);
        let posted = self
            .container
            .post_message(
                self.scope.as_str(),
                MessageTarget::Waiting,
                &ControlMessage::SkipWaiting.to_json(),
            )
            .await;
        if let Err(e) = posted {
            self.reload_pending.store(false, Ordering::SeqCst);
            return Err(e.into());
        }
        info!(scope = %self.scope, "Asked waiting worker to take over");
        Ok(ApplyOutcome::Activating)
    }

    /// Start hourly polling and event handling. Both stop when the returned
    /// handle is dropped.
    pub fn spawn(self: &Arc<Self>, interval: Duration) -> UpdateTasks {
        let poller = {
            let bridge = Arc::clone(self);
            tokio::spawn(async move {
                let mut ticker = tokio::time::interval(interval);
                // The first tick completes immediately; registration just checked.
                ticker.tick().await;
                loop {
                    ticker.tick().await;
                    if let Err(e) = bridge.check_for_update().await {
                        warn!(error = %e, "Update check failed");
                    }
                }
            })
        };

        let listener = {
            let bridge = Arc::clone(self);
            let mut events = self.container.subscribe();
            tokio::spawn(async move {
                loop {
                    match events.recv().await {
                        Ok(event) => {
                            if let Err(e) = bridge.handle_event(&event).await {
                                warn!(error = %e, "Failed to handle worker event");
                            }
                        }
                        Err(broadcast::error::RecvError::Lagged(skipped)) => {
                            warn!(skipped, "Update listener fell behind on worker events");
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                    }
                }
            })
        };

        UpdateTasks {
            handles: vec![poller, listener],
        }
    }

    fn raise(&self) {
        let raised = self.available.send_if_modified(|flag| !std::mem::replace(flag, true));
        if raised {
            info!(scope = %self.scope, "Update available");
            let _ = self.notices.send(UserNotice::UpdateAvailable);
        }
    }

    async fn reload(&self) -> Result<(), ClientError> {
        self.container.reload_client(&self.client_id).await?;
        self.available.send_replace(false);
        Ok(())
    }
}

/// Background update tasks; aborted on drop.
pub struct UpdateTasks {
    handles: Vec<JoinHandle<()>>,
}

impl Drop for UpdateTasks {
    fn drop(&mut self) {
        for handle in &self.handles {
            handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tests::{deploy, page_on, ScriptedNetwork};
    use fieldkit_core::WorkerConfig;

    async fn bridge() -> (Arc<UpdateBridge<ScriptedNetwork>>, Arc<ScriptedNetwork>, broadcast::Receiver<UserNotice>) {
        let mut config = WorkerConfig::main();
        config.fast_activate = false;
        let (container, network, client_id) = page_on(&config, "/dashboard").await;
        let (tx, rx) = broadcast::channel(16);
        let scope = container.origin().join("/").unwrap();
        let bridge = Arc::new(UpdateBridge::new(container, scope, client_id, tx));
        (bridge, network, rx)
    }

    #[tokio::test]
    async fn test_new_waiting_worker_raises_flag() {
        let (bridge, network, mut notices) = bridge().await;
        assert!(!bridge.update_available());

        let mut next = WorkerConfig::main();
        next.fast_activate = false;
        next.generation = "fieldkit-v2".to_string();
        deploy(&network, &next);

        assert!(matches!(bridge.check_for_update().await.unwrap(), UpdateResult::Installed(_)));
        bridge.drain_events().await.unwrap();

        assert!(bridge.update_available());
        assert_eq!(notices.try_recv().unwrap(), UserNotice::UpdateAvailable);
    }

    #[tokio::test]
    async fn test_unchanged_script_keeps_flag_down() {
        let (bridge, _, _) = bridge().await;
        assert_eq!(bridge.check_for_update().await.unwrap(), UpdateResult::Unchanged);
        bridge.drain_events().await.unwrap();
        assert!(!bridge.update_available());
    }

    #[tokio::test]
    async fn test_apply_update_handshake() {
        let (bridge, network, _) = bridge().await;
        let mut next = WorkerConfig::main();
        next.fast_activate = false;
        next.generation = "fieldkit-v2".to_string();
        deploy(&network, &next);
        let UpdateResult::Installed(new_worker) = bridge.check_for_update().await.unwrap() else {
            panic!("expected an install");
        };
        bridge.drain_events().await.unwrap();

        assert_eq!(bridge.apply_update().await.unwrap(), ApplyOutcome::Activating);
        bridge.drain_events().await.unwrap();

        let page = bridge.container.client(bridge.client_id()).await.unwrap();
        assert_eq!(page.reloads, 1);
        assert_eq!(page.controller, Some(new_worker));
        assert!(!bridge.update_available());
    }

    #[tokio::test]
    async fn test_apply_update_without_waiting_worker_reloads() {
        let (bridge, _, _) = bridge().await;
        assert_eq!(bridge.apply_update().await.unwrap(), ApplyOutcome::Reloaded);
        let page = bridge.container.client(bridge.client_id()).await.unwrap();
        assert_eq!(page.reloads, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_polling_task_checks_on_interval() {
        let (bridge, network, _) = bridge().await;
        let _tasks = bridge.spawn(Duration::from_secs(3600));

        let mut next = WorkerConfig::main();
        next.fast_activate = false;
        next.generation = "fieldkit-v2".to_string();
        deploy(&network, &next);

        let mut flag = bridge.watch();
        tokio::time::sleep(Duration::from_secs(3601)).await;
        flag.wait_for(|available| *available).await.unwrap();
        assert!(bridge.update_available());
    }
}
