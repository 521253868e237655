//! Event handlers of one worker version.
//!
//! Each handler receives the immutable [`WorkerContext`] plus the shared
//! caches; there is no other state carried between events.

use std::sync::Arc;

use fieldkit_net::{Network, Request, Response};
use tracing::{debug, info, warn};
use url::Url;

use crate::cache::CacheStoreManager;
use crate::clients::Clients;
use crate::context::WorkerContext;
use crate::lifecycle::ServiceWorkerId;
use crate::message::ControlMessage;
use crate::push::{route_click, ClickOutcome, Notification};
use crate::router::route_fetch;
use crate::sync::{handle_sync, SyncOutcome};
use crate::ServiceWorkerError;

/// Result of a successful install event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InstallOutcome {
    /// Entries written to the precache bucket.
    pub precached: usize,
    /// The worker asked to skip the waiting phase.
    pub skip_waiting: bool,
}

/// Result of an activate event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActivateOutcome {
    /// Buckets deleted as stale.
    pub evicted: Vec<String>,
    /// Clients that changed controller.
    pub claimed: Vec<String>,
}

/// Reaction to a control message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageOutcome {
    SkipWaiting,
    CachesCleared(usize),
    Ignored,
}

/// The global scope a worker version's handlers run in.
pub struct ServiceWorkerGlobal<N> {
    ctx: Arc<WorkerContext>,
    caches: CacheStoreManager,
    network: Arc<N>,
}

impl<N: Network> ServiceWorkerGlobal<N> {
    pub fn new(ctx: Arc<WorkerContext>, caches: CacheStoreManager, network: Arc<N>) -> Self {
        Self {
            ctx,
            caches,
            network,
        }
    }

    pub fn context(&self) -> &WorkerContext {
        &self.ctx
    }

    /// Install: precache the shell for full-caching workers.
    pub async fn on_install(&self) -> Result<InstallOutcome, ServiceWorkerError> {
        let precached = if self.ctx.policy.precaches() {
            self.caches
                .precache(
                    self.network.as_ref(),
                    &self.ctx.generation,
                    &self.ctx.origin,
                    &self.ctx.manifest,
                )
                .await?
        } else {
            0
        };

        info!(
            scope = %self.ctx.scope,
            generation = %self.ctx.generation,
            precached,
            "Install complete"
        );

        Ok(InstallOutcome {
            precached,
            skip_waiting: self.ctx.fast_activate,
        })
    }

    /// Activate: drop stale buckets, then claim every client in scope that no
    /// registration in `other_scopes` matches more closely.
    pub async fn on_activate(
        &self,
        clients: &mut Clients,
        worker: ServiceWorkerId,
        other_scopes: &[Url],
    ) -> ActivateOutcome {
        let evicted = if self.ctx.policy.manages_caches() {
            self.caches
                .evict_stale(&self.ctx.generation, &self.ctx.runtime_cache)
                .await
        } else {
            Vec::new()
        };

        let claimed = clients.claim(worker, &self.ctx.scope, other_scopes);
        info!(
            scope = %self.ctx.scope,
            evicted = evicted.len(),
            claimed = claimed.len(),
            "Activated"
        );

        ActivateOutcome { evicted, claimed }
    }

    /// Fetch: `None` lets the request go to the network untouched.
    pub async fn on_fetch(&self, request: Request) -> Option<Response> {
        route_fetch(&self.ctx, &self.caches, self.network.as_ref(), request).await
    }

    pub async fn on_message(&self, data: &str) -> MessageOutcome {
        match ControlMessage::parse(data) {
            Some(ControlMessage::SkipWaiting) => MessageOutcome::SkipWaiting,
            Some(ControlMessage::ClearCache) if self.ctx.policy.manages_caches() => {
                let cleared = self.caches.clear_all().await;
                info!(cleared, "Caches cleared on request");
                MessageOutcome::CachesCleared(cleared)
            }
            Some(ControlMessage::ClearCache) => {
                debug!(scope = %self.ctx.scope, "Cache clear ignored by install-only worker");
                MessageOutcome::Ignored
            }
            None => MessageOutcome::Ignored,
        }
    }

    /// Push: exactly one notification per event.
    pub fn on_push(&self, payload: Option<&[u8]>) -> Option<Notification> {
        if !self.ctx.policy.handles_push() {
            warn!(scope = %self.ctx.scope, "Push delivered to a worker that does not handle it");
            return None;
        }
        let notification =
            Notification::from_push(&self.ctx.notification, &self.ctx.dashboard_url, payload);
        info!(id = notification.id, body = %notification.body, "Showing notification");
        Some(notification)
    }

    /// Notification click. `controller` is the active worker for the
    /// notification's target URL; the window shown ends up controlled by it.
    pub fn on_notification_click(
        &self,
        notification: &Notification,
        action: Option<&str>,
        clients: &mut Clients,
        controller: Option<ServiceWorkerId>,
    ) -> ClickOutcome {
        route_click(notification, action, clients, controller)
    }

    pub fn on_sync(&self, tag: &str) -> SyncOutcome {
        if !self.ctx.policy.handles_push() {
            return SyncOutcome::Unsupported;
        }
        handle_sync(tag)
    }
}
