//! Fetch strategy router.
//!
//! Classification (first match wins):
//!
//! 1. cross-origin, not the storage origin → not intercepted
//! 2. API marker in path, or storage origin → network-first
//! 3. image / style / script / font       → cache-first
//! 4. anything else (pages)               → network-first with offline page
//!
//! Every strategy makes exactly one network attempt and always ends in a
//! response; a failure the page must see is `Response::network_error()`.

use fieldkit_net::{Network, Request, Response, UrlPattern};
use tracing::{debug, trace};
use url::Url;

use crate::cache::CacheStoreManager;
use crate::context::WorkerContext;

/// Body `error` field of the synthesized offline API response.
pub const OFFLINE_ERROR: &str = "offline";

/// What kind of request the router decided it is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RequestClass {
    /// Same-origin path carrying the API marker.
    Api,
    /// The backend storage origin.
    Storage,
    StaticAsset,
    /// Pages and everything else in scope.
    Navigation,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Strategy {
    NetworkFirst,
    CacheFirst,
    NetworkFirstWithOfflineFallback,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Route {
    /// Not intercepted; the request goes to the network untouched.
    Bypass,
    Handle {
        class: RequestClass,
        strategy: Strategy,
    },
}

/// Inputs to classification.
#[derive(Debug, Clone)]
pub struct RoutingRules {
    origin: Url,
    api: UrlPattern,
    storage: UrlPattern,
}

impl RoutingRules {
    pub fn new(origin: Url, api_marker: &str, storage_host: &str) -> Self {
        Self {
            origin,
            api: UrlPattern::path_contains(api_marker),
            storage: UrlPattern::host_contains(storage_host),
        }
    }

    /// Classify a request. Pure: depends only on the request and the rules.
    pub fn classify(&self, request: &Request) -> Route {
        let same_origin = request.is_same_origin(&self.origin);
        let storage = !same_origin && self.storage.matches(&request.url);

        if !same_origin && !storage {
            return Route::Bypass;
        }

        if self.api.matches(&request.url) {
            return Route::Handle {
                class: RequestClass::Api,
                strategy: Strategy::NetworkFirst,
            };
        }

        if storage {
            return Route::Handle {
                class: RequestClass::Storage,
                strategy: Strategy::NetworkFirst,
            };
        }

        if request.effective_destination().is_static_asset() {
            return Route::Handle {
                class: RequestClass::StaticAsset,
                strategy: Strategy::CacheFirst,
            };
        }

        Route::Handle {
            class: RequestClass::Navigation,
            strategy: Strategy::NetworkFirstWithOfflineFallback,
        }
    }
}

/// Answer a fetch event. `None` means the worker did not intercept.
pub async fn route_fetch<N: Network>(
    ctx: &WorkerContext,
    caches: &CacheStoreManager,
    network: &N,
    request: Request,
) -> Option<Response> {
    if !ctx.policy.intercepts_fetch() {
        trace!(url = %request.url, "Policy does not intercept fetches");
        return None;
    }

    let Route::Handle { class, strategy } = ctx.rules.classify(&request) else {
        trace!(url = %request.url, "Cross-origin request passed through");
        return None;
    };

    debug!(url = %request.url, ?class, ?strategy, "Routing fetch");

    let response = match strategy {
        Strategy::NetworkFirst => network_first(ctx, caches, network, request, class).await,
        Strategy::CacheFirst => cache_first(ctx, caches, network, request).await,
        Strategy::NetworkFirstWithOfflineFallback => {
            network_first_with_offline_fallback(ctx, caches, network, request).await
        }
    };
    Some(response)
}

async fn network_first<N: Network>(
    ctx: &WorkerContext,
    caches: &CacheStoreManager,
    network: &N,
    request: Request,
    class: RequestClass,
) -> Response {
    match network.fetch(request.clone()).await {
        Ok(response) => {
            caches.put(&ctx.runtime_cache, &request, &response).await;
            response
        }
        Err(e) => {
            debug!(url = %request.url, error = %e, "Network failed, falling back to cache");
            if let Some(cached) = caches.match_any(&request, &ctx.lookup_order()).await {
                return cached;
            }
            match class {
                RequestClass::Api => offline_api_response(),
                _ => Response::network_error(),
            }
        }
    }
}

async fn cache_first<N: Network>(
    ctx: &WorkerContext,
    caches: &CacheStoreManager,
    network: &N,
    request: Request,
) -> Response {
    if let Some(cached) = caches.match_any(&request, &ctx.lookup_order()).await {
        trace!(url = %request.url, "Cache hit");
        return cached;
    }

    match network.fetch(request.clone()).await {
        Ok(response) => {
            caches.put(&ctx.runtime_cache, &request, &response).await;
            response
        }
        Err(e) => {
            debug!(url = %request.url, error = %e, "Asset unavailable");
            Response::network_error()
        }
    }
}

async fn network_first_with_offline_fallback<N: Network>(
    ctx: &WorkerContext,
    caches: &CacheStoreManager,
    network: &N,
    request: Request,
) -> Response {
    match network.fetch(request.clone()).await {
        Ok(response) => {
            caches.put(&ctx.runtime_cache, &request, &response).await;
            response
        }
        Err(e) => {
            debug!(url = %request.url, error = %e, "Navigation offline");
            if let Some(cached) = caches.match_any(&request, &ctx.lookup_order()).await {
                return cached;
            }
            offline_page(ctx, caches).await
        }
    }
}

async fn offline_page(ctx: &WorkerContext, caches: &CacheStoreManager) -> Response {
    let request = Request::get(ctx.offline_url.clone());
    let cached = match caches.match_in(&ctx.generation, &request).await {
        Some(page) => Some(page),
        None => caches.match_any(&request, &ctx.lookup_order()).await,
    };

    cached.unwrap_or_else(|| {
        debug!(offline = %ctx.offline_url, "Offline page not precached");
        offline_text_response()
    })
}

/// 503 JSON answer for API requests made while offline.
pub fn offline_api_response() -> Response {
    Response::json_body(
        503,
        &serde_json::json!({
            "error": OFFLINE_ERROR,
            "message": "You are offline. Changes will be available once the connection is restored.",
        }),
    )
}

/// 503 plain-text answer when not even the offline page is cached.
pub fn offline_text_response() -> Response {
    Response::plain_text(503, "Offline")
}
