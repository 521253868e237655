//! Cache buckets and the manager that owns them.
//!
//! ```text
//! CacheStorage (caches)
//!     ├── "fieldkit-v3"        precache bucket, one per deploy
//!     └── "fieldkit-runtime"   runtime bucket, grows while serving
//!             └── "GET https://…" → [CacheEntry, …]   (one per Vary variant)
//! ```

use std::path::Path;
use std::sync::Arc;

use bytes::Bytes;
use fieldkit_common::SharedClock;
use fieldkit_net::{Network, Request, Response, ResponseType};
use futures::future::try_join_all;
use hashbrown::HashMap;
use http::{HeaderMap, HeaderName, HeaderValue, Method};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{debug, info, trace, warn};
use url::Url;

use crate::ServiceWorkerError;

// ==================== Entries ====================

/// A cached request/response pair.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheEntry {
    /// Request URL, fragment stripped.
    pub url: String,

    /// Request method.
    pub method: String,

    /// Response status.
    pub status: u16,

    /// Response status text.
    pub status_text: String,

    /// Response headers, in order.
    pub headers: Vec<(String, String)>,

    /// Response body.
    pub body: Vec<u8>,

    /// Request header values named by the response `Vary` header.
    pub vary: HashMap<String, Option<String>>,

    /// Response type at the time of capture.
    pub response_type: ResponseType,

    /// Cached at timestamp (ms since epoch).
    pub cached_at: i64,
}

impl CacheEntry {
    /// Capture a response for `request`.
    pub fn capture(request: &Request, response: &Response, cached_at: i64) -> Self {
        let headers = response
            .headers
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.as_str().to_string(), v.to_string()))
            })
            .collect();

        let vary = vary_header_names(&response.headers)
            .into_iter()
            .map(|name| {
                let value = request
                    .headers
                    .get(name.as_str())
                    .and_then(|v| v.to_str().ok())
                    .map(str::to_string);
                (name, value)
            })
            .collect();

        Self {
            url: cache_url(&request.url),
            method: request.method.to_string(),
            status: response.status,
            status_text: response.status_text.clone(),
            headers,
            body: response.body.to_vec(),
            vary,
            response_type: response.response_type,
            cached_at,
        }
    }

    /// Rebuild the response this entry was captured from.
    pub fn to_response(&self) -> Response {
        let mut headers = HeaderMap::new();
        for (name, value) in &self.headers {
            if let (Ok(n), Ok(v)) = (
                HeaderName::try_from(name.as_str()),
                HeaderValue::try_from(value.as_str()),
            ) {
                headers.append(n, v);
            }
        }

        Response {
            url: Url::parse(&self.url).ok(),
            status: self.status,
            status_text: self.status_text.clone(),
            headers,
            body: Bytes::from(self.body.clone()),
            response_type: self.response_type,
            from_cache: true,
        }
    }

    /// Whether `request` selects this variant.
    fn matches_vary(&self, request: &Request) -> bool {
        self.vary.iter().all(|(name, stored)| {
            if name == "*" {
                return false;
            }
            let current = request
                .headers
                .get(name.as_str())
                .and_then(|v| v.to_str().ok());
            current == stored.as_deref()
        })
    }
}

fn vary_header_names(headers: &HeaderMap) -> Vec<String> {
    headers
        .get_all(http::header::VARY)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .map(|name| name.trim().to_ascii_lowercase())
        .filter(|name| !name.is_empty())
        .collect()
}

fn cache_url(url: &Url) -> String {
    let mut url = url.clone();
    url.set_fragment(None);
    url.to_string()
}

fn cache_key(method: &Method, url: &Url) -> String {
    format!("{} {}", method, cache_url(url))
}

// ==================== Cache ====================

/// A single named bucket.
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct Cache {
    /// Cache name.
    pub name: String,

    /// Entries keyed by method and URL.
    entries: HashMap<String, Vec<CacheEntry>>,
}

impl Cache {
    /// Create a new cache.
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            entries: HashMap::new(),
        }
    }

    /// Match a request.
    pub fn match_request(&self, request: &Request) -> Option<&CacheEntry> {
        self.entries
            .get(&cache_key(&request.method, &request.url))?
            .iter()
            .find(|entry| entry.matches_vary(request))
    }

    /// Store a response, replacing any variant the request selects.
    ///
    /// Only `GET` requests can be stored.
    pub fn put(&mut self, request: &Request, entry: CacheEntry) -> bool {
        if request.method != Method::GET {
            return false;
        }
        let variants = self
            .entries
            .entry(cache_key(&request.method, &request.url))
            .or_default();
        variants.retain(|existing| !existing.matches_vary(request));
        variants.push(entry);
        true
    }

    /// Get all stored URLs.
    pub fn keys(&self) -> Vec<&str> {
        self.entries
            .values()
            .flat_map(|variants| variants.iter().map(|e| e.url.as_str()))
            .collect()
    }

    /// Number of stored entries, counting every variant.
    pub fn len(&self) -> usize {
        self.entries.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

// ==================== Cache Storage ====================

/// Cache storage (caches global).
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct CacheStorage {
    caches: HashMap<String, Cache>,
}

impl CacheStorage {
    /// Create new cache storage.
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a cache (creates if doesn't exist).
    pub fn open(&mut self, name: &str) -> &mut Cache {
        self.caches
            .entry(name.to_string())
            .or_insert_with(|| Cache::new(name))
    }

    /// Get a cache without creating it.
    pub fn get(&self, name: &str) -> Option<&Cache> {
        self.caches.get(name)
    }

    /// Check if cache exists.
    pub fn has(&self, name: &str) -> bool {
        self.caches.contains_key(name)
    }

    /// Delete a cache.
    pub fn delete(&mut self, name: &str) -> bool {
        self.caches.remove(name).is_some()
    }

    /// Get all cache names, sorted.
    pub fn keys(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.caches.keys().map(|s| s.as_str()).collect();
        names.sort_unstable();
        names
    }

    /// Match across caches, trying `preferred` buckets first in order.
    pub fn match_request(&self, request: &Request, preferred: &[&str]) -> Option<&CacheEntry> {
        preferred
            .iter()
            .filter_map(|name| self.caches.get(*name))
            .chain(
                self.caches
                    .iter()
                    .filter(|(name, _)| !preferred.contains(&name.as_str()))
                    .map(|(_, cache)| cache),
            )
            .find_map(|cache| cache.match_request(request))
    }

    /// Write a JSON snapshot to `path`.
    pub fn save(&self, path: &Path) -> Result<(), ServiceWorkerError> {
        let json = serde_json::to_vec(self)
            .map_err(|e| ServiceWorkerError::CacheError(e.to_string()))?;
        std::fs::write(path, json).map_err(|e| ServiceWorkerError::CacheError(e.to_string()))
    }

    /// Read a JSON snapshot from `path`; a missing file yields empty storage.
    pub fn load(path: &Path) -> Result<Self, ServiceWorkerError> {
        match std::fs::read(path) {
            Ok(bytes) => serde_json::from_slice(&bytes)
                .map_err(|e| ServiceWorkerError::CacheError(e.to_string())),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(e) => Err(ServiceWorkerError::CacheError(e.to_string())),
        }
    }
}

// ==================== Manager ====================

/// Owns cache bucket contents on behalf of every worker of an origin.
///
/// Locks are never held across a network await.
#[derive(Clone)]
pub struct CacheStoreManager {
    storage: Arc<RwLock<CacheStorage>>,
    clock: SharedClock,
}

impl CacheStoreManager {
    pub fn new(storage: Arc<RwLock<CacheStorage>>, clock: SharedClock) -> Self {
        Self { storage, clock }
    }

    /// Shared handle to the underlying storage.
    pub fn storage(&self) -> Arc<RwLock<CacheStorage>> {
        Arc::clone(&self.storage)
    }

    /// Fetch every manifest path and store the results in `bucket`.
    ///
    /// All-or-nothing: nothing is written unless every fetch succeeded with
    /// an ok status.
    pub async fn precache<N: Network>(
        &self,
        network: &N,
        bucket: &str,
        origin: &Url,
        manifest: &[String],
    ) -> Result<usize, ServiceWorkerError> {
        let requests = manifest
            .iter()
            .map(|path| {
                origin
                    .join(path)
                    .map(Request::get)
                    .map_err(|e| ServiceWorkerError::PrecacheFailed {
                        url: path.clone(),
                        reason: e.to_string(),
                    })
            })
            .collect::<Result<Vec<_>, _>>()?;

        let fetched = try_join_all(requests.into_iter().map(|request| async move {
            let url = request.url.to_string();
            match network.fetch(request.clone()).await {
                Ok(response) if response.ok() => Ok((request, response)),
                Ok(response) => Err(ServiceWorkerError::PrecacheFailed {
                    url,
                    reason: format!("status {}", response.status),
                }),
                Err(e) => Err(ServiceWorkerError::PrecacheFailed {
                    url,
                    reason: e.to_string(),
                }),
            }
        }))
        .await?;

        let now = self.clock.now_millis();
        let mut storage = self.storage.write().await;
        let cache = storage.open(bucket);
        let mut stored = 0;
        for (request, response) in &fetched {
            if cache.put(request, CacheEntry::capture(request, response, now)) {
                stored += 1;
            }
        }

        info!(bucket, stored, "Precache complete");
        Ok(stored)
    }

    /// Store a successful response. Returns whether anything was written.
    pub async fn put(&self, bucket: &str, request: &Request, response: &Response) -> bool {
        if !response.ok() || response.response_type == ResponseType::Opaque {
            trace!(url = %request.url, status = response.status, "Not caching unsuccessful response");
            return false;
        }
        if request.method != Method::GET {
            debug!(url = %request.url, method = %request.method, "Not caching non-GET request");
            return false;
        }

        let entry = CacheEntry::capture(request, response, self.clock.now_millis());
        self.storage.write().await.open(bucket).put(request, entry)
    }

    /// Look up a request in one bucket.
    pub async fn match_in(&self, bucket: &str, request: &Request) -> Option<Response> {
        let storage = self.storage.read().await;
        storage
            .get(bucket)?
            .match_request(request)
            .map(CacheEntry::to_response)
    }

    /// Look up a request in any bucket, `preferred` buckets first.
    pub async fn match_any(&self, request: &Request, preferred: &[&str]) -> Option<Response> {
        let storage = self.storage.read().await;
        storage
            .match_request(request, preferred)
            .map(CacheEntry::to_response)
    }

    /// Delete every bucket other than the current generation and runtime buckets.
    ///
    /// Returns the deleted names.
    pub async fn evict_stale(&self, current_generation: &str, runtime_cache: &str) -> Vec<String> {
        let mut storage = self.storage.write().await;
        let stale: Vec<String> = storage
            .keys()
            .into_iter()
            .filter(|name| *name != current_generation && *name != runtime_cache)
            .map(str::to_string)
            .collect();

        for name in &stale {
            storage.delete(name);
            info!(cache = %name, "Deleted stale cache");
        }
        stale
    }

    /// Delete every bucket. Returns how many were deleted.
    pub async fn clear_all(&self) -> usize {
        let mut storage = self.storage.write().await;
        let names: Vec<String> = storage.keys().into_iter().map(str::to_string).collect();
        for name in &names {
            storage.delete(name);
        }
        warn!(count = names.len(), "Cleared all caches");
        names.len()
    }

    /// All bucket names, sorted.
    pub async fn bucket_names(&self) -> Vec<String> {
        self.storage
            .read()
            .await
            .keys()
            .into_iter()
            .map(str::to_string)
            .collect()
    }

    /// Number of entries in a bucket; zero when it does not exist.
    pub async fn bucket_len(&self, name: &str) -> usize {
        self.storage.read().await.get(name).map_or(0, Cache::len)
    }
}
