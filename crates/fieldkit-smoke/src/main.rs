//! FieldKit Smoke Harness
//!
//! Registers both workers against a live origin through the real HTTP
//! loader, runs a scripted set of routed fetches (online, then with the
//! network cut) and prints a JSON summary with per-operation timings.
//!
//! Worker scripts come from the deploy configuration rather than the origin,
//! so any site can be used as the origin.

use std::collections::HashMap;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use anyhow::{bail, Context, Result};
use fieldkit_client::{Environment, ServiceWorkerRegister};
use fieldkit_common::{init_logging, system_clock, LogConfig, LogFormat};
use fieldkit_core::{FieldKitConfig, Surface};
use fieldkit_net::{LoaderConfig, NetError, Network, Request, Response, ResourceLoader};
use fieldkit_sw::{CacheStorage, ServiceWorkerContainer};
use serde_json::json;
use tracing::{info, warn};
use url::Url;

/// Performance timing collector for tracking operation durations.
struct PerfTiming {
    timings: Mutex<HashMap<&'static str, Vec<Duration>>>,
}

impl PerfTiming {
    fn new() -> Self {
        Self {
            timings: Mutex::new(HashMap::new()),
        }
    }

    fn record(&self, operation: &'static str, duration: Duration) {
        if let Ok(mut timings) = self.timings.lock() {
            timings.entry(operation).or_default().push(duration);
        }
    }

    fn summary(&self) -> serde_json::Value {
        let Ok(timings) = self.timings.lock() else {
            return serde_json::Value::Null;
        };
        let mut summary = serde_json::Map::new();

        for (op, durations) in timings.iter() {
            if durations.is_empty() {
                continue;
            }

            let millis: Vec<f64> = durations.iter().map(|d| d.as_secs_f64() * 1000.0).collect();
            let count = millis.len();
            let total_ms: f64 = millis.iter().sum();
            let min_ms = millis.iter().copied().fold(f64::INFINITY, f64::min);
            let max_ms = millis.iter().copied().fold(f64::NEG_INFINITY, f64::max);

            summary.insert(
                op.to_string(),
                json!({
                    "count": count,
                    "total_ms": round2(total_ms),
                    "avg_ms": round2(total_ms / count as f64),
                    "min_ms": round2(min_ms),
                    "max_ms": round2(max_ms),
                }),
            );
        }

        serde_json::Value::Object(summary)
    }
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Parse command line arguments
struct Args {
    origin: Url,
    config: Option<PathBuf>,
    snapshot: Option<PathBuf>,
    perf_output: Option<PathBuf>,
}

impl Args {
    fn parse() -> Result<Self> {
        let mut args = std::env::args().skip(1);
        let mut positional = Vec::new();
        let mut snapshot = None;
        let mut perf_output = None;

        while let Some(arg) = args.next() {
            match arg.as_str() {
                "--cache-snapshot" => snapshot = args.next().map(PathBuf::from),
                "--perf-output" => perf_output = args.next().map(PathBuf::from),
                _ => positional.push(arg),
            }
        }

        let mut positional = positional.into_iter();
        let Some(origin) = positional.next() else {
            bail!("usage: fieldkit-smoke <origin-url> [config.json] [--cache-snapshot FILE] [--perf-output FILE]");
        };

        Ok(Self {
            origin: Url::parse(&origin).with_context(|| format!("invalid origin {origin}"))?,
            config: positional.next().map(PathBuf::from),
            snapshot,
            perf_output,
        })
    }
}

/// Serves the configured worker scripts and forwards everything else to the
/// real loader. Cutting the link makes every forwarded fetch fail.
struct SmokeNetwork {
    loader: ResourceLoader,
    scripts: HashMap<String, Vec<u8>>,
    link_up: AtomicBool,
}

impl Network for SmokeNetwork {
    async fn fetch(&self, request: Request) -> Result<Response, NetError> {
        if let Some(script) = self.scripts.get(request.url.path()) {
            return Ok(Response::new(200, script.clone()).with_url(request.url));
        }
        if !self.link_up.load(Ordering::SeqCst) {
            return Err(NetError::Offline(request.url.to_string()));
        }
        self.loader.fetch(request).await
    }
}

fn log_config(config: &FieldKitConfig) -> Result<LogConfig> {
    let mut log = LogConfig::default()
        .with_level_str(&config.logging.level)?
        .with_format(LogFormat::from_str(&config.logging.format)?);
    if let Some(filter) = &config.logging.filter {
        log = log.with_filter(filter.clone());
    }
    Ok(log)
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse()?;
    let config = FieldKitConfig::load(args.config.as_deref())?;
    config.validate()?;

    if let Err(e) = init_logging(log_config(&config)?) {
        eprintln!("Warning: logging not initialised: {e}");
    }

    info!(
        origin = %args.origin,
        config = ?args.config,
        snapshot = ?args.snapshot,
        "Starting FieldKit Smoke Harness"
    );

    let start = Instant::now();
    let perf = PerfTiming::new();

    let loader = ResourceLoader::new(LoaderConfig {
        user_agent: config.app.user_agent.clone(),
        ..LoaderConfig::default()
    })?;
    let mut scripts = HashMap::new();
    for worker in [&config.main_worker, &config.portal_worker] {
        scripts.insert(worker.script_url.clone(), worker.to_script()?);
    }
    let network = Arc::new(SmokeNetwork {
        loader,
        scripts,
        link_up: AtomicBool::new(true),
    });

    let storage = match &args.snapshot {
        Some(path) => CacheStorage::load(path)?,
        None => CacheStorage::new(),
    };
    let container = Arc::new(ServiceWorkerContainer::with_storage(
        args.origin.clone(),
        Arc::clone(&network),
        system_clock(),
        storage,
    ));
    let config = Arc::new(config);

    // Register both surfaces the way their pages would.
    let mut bridges = Vec::new();
    for (surface, path) in [(Surface::Main, "/"), (Surface::Portal, config.portal_worker.scope.as_str())] {
        let page = container.open_client(path).await?;
        let register = ServiceWorkerRegister::open(
            Arc::clone(&container),
            Arc::clone(&config),
            surface,
            page.id.clone(),
            Environment::new(config.app.user_agent.clone()),
            system_clock(),
        )
        .with_context(|| format!("opening {}", config.client.storage_path.display()))?;

        let t = Instant::now();
        match register.register().await {
            Ok(bridge) => {
                perf.record("register", t.elapsed());
                bridges.push((surface, page.id, bridge));
            }
            Err(e) => {
                let result = json!({
                    "status": "fail",
                    "reason": "registration_failed",
                    "surface": surface.as_str(),
                    "error": e.to_string(),
                    "elapsed_ms": start.elapsed().as_millis(),
                });
                println!("{}", result);
                return Ok(());
            }
        }
    }

    let Some((_, main_page, _)) = bridges.iter().find(|(s, _, _)| *s == Surface::Main) else {
        bail!("main surface did not register");
    };

    let mut checks = Vec::new();
    for link_up in [true, false] {
        network.link_up.store(link_up, Ordering::SeqCst);
        for (label, request) in [
            ("navigate", Request::navigate(args.origin.join("/dashboard")?)),
            ("navigate", Request::navigate(args.origin.join("/ticket/123")?)),
            ("api", Request::get(args.origin.join("/api/tickets")?)),
            ("asset", Request::get(args.origin.join("/favicon.ico")?)),
        ] {
            let url = request.url.clone();
            let t = Instant::now();
            let response = container.fetch(Some(main_page.as_str()), request).await;
            perf.record(label, t.elapsed());
            checks.push(json!({
                "link_up": link_up,
                "url": url.as_str(),
                "status": response.status,
                "from_cache": response.from_cache,
                "bytes": response.bytes().len(),
            }));
        }
    }
    network.link_up.store(true, Ordering::SeqCst);

    if let Some(path) = &args.snapshot {
        let storage = container.caches().storage();
        let snapshot = storage.read().await;
        if let Err(e) = snapshot.save(path) {
            warn!(path = %path.display(), error = %e, "Failed to write cache snapshot");
        }
    }

    let mut registrations = Vec::new();
    for scope in container.get_registrations().await {
        if let Some(info) = container.registration(scope.as_str()).await {
            registrations.push(json!({
                "scope": info.scope.as_str(),
                "active": info.active.map(|w| w.id.raw()),
                "waiting": info.waiting.map(|w| w.id.raw()),
            }));
        }
    }

    let result = json!({
        "status": "pass",
        "elapsed_ms": start.elapsed().as_millis(),
        "registrations": registrations,
        "buckets": container.caches().bucket_names().await,
        "checks": checks,
        "perf": perf.summary(),
    });

    if let Some(path) = &args.perf_output {
        std::fs::write(path, serde_json::to_vec_pretty(&result)?)
            .with_context(|| format!("writing {}", path.display()))?;
    }
    println!("{}", result);
    Ok(())
}
