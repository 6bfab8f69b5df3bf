//! Service registry: maps a service name to a handler and its method list.
//!
//! Generalizes a flat `match req.method.as_str() { ... }` dispatch table
//! into a runtime-populated map, so services are registered once at startup
//! (see `services::register_all`) instead of hardcoded into the dispatch
//! function. Routing splits the wire method on its first `.`: the left side
//! names the service, the right side the method within it. Each
//! registration also gets its own call/error/latency counters, exposed
//! through `health.status`.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use futures_util::future::BoxFuture;

use godagent_core::{Engine, GodagentError, GodagentResult};

use crate::protocol::error_codes;

/// A registered service's boxed async handler. Takes the method name (with
/// the service prefix already stripped), the shared engine handle, and the
/// request's `params` value (defaulted to `{}` when absent).
pub type ServiceHandler = dyn Fn(&str, Arc<Engine>, serde_json::Value) -> BoxFuture<'static, Result<serde_json::Value, (i32, String)>>
    + Send
    + Sync;

/// Per-service call counters.
#[derive(Default)]
pub struct ServiceMetrics {
    calls: AtomicU64,
    errors: AtomicU64,
    total_elapsed_micros: AtomicU64,
}

impl ServiceMetrics {
    fn record(&self, elapsed: std::time::Duration, ok: bool) {
        self.calls.fetch_add(1, Ordering::Relaxed);
        if !ok {
            self.errors.fetch_add(1, Ordering::Relaxed);
        }
        self.total_elapsed_micros.fetch_add(elapsed.as_micros() as u64, Ordering::Relaxed);
    }

    /// Total calls routed to this service.
    pub fn calls(&self) -> u64 {
        self.calls.load(Ordering::Relaxed)
    }

    /// Total calls that returned an error.
    pub fn errors(&self) -> u64 {
        self.errors.load(Ordering::Relaxed)
    }

    /// Total time spent in this service's handler, in milliseconds.
    pub fn total_duration_ms(&self) -> u64 {
        self.total_elapsed_micros.load(Ordering::Relaxed) / 1000
    }
}

struct Registration {
    handler: Arc<ServiceHandler>,
    methods: Vec<String>,
    metrics: Arc<ServiceMetrics>,
}

/// Name -> (handler, method list, metrics) table.
#[derive(Default)]
pub struct ServiceRegistry {
    services: DashMap<String, Registration>,
}

impl ServiceRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a service under `name` (lowercased) with the method names
    /// it answers for. Refuses an empty name or a name already registered.
    pub fn register<F>(&self, name: &str, handler: F, methods: Vec<&str>) -> GodagentResult<()>
    where
        F: Fn(&str, Arc<Engine>, serde_json::Value) -> BoxFuture<'static, Result<serde_json::Value, (i32, String)>>
            + Send
            + Sync
            + 'static,
    {
        let name = name.to_ascii_lowercase();
        if name.is_empty() {
            return Err(GodagentError::MalformedRequest("service name must not be empty".into()));
        }
        if self.services.contains_key(&name) {
            return Err(GodagentError::DuplicateService { name });
        }
        self.services.insert(
            name,
            Registration {
                handler: Arc::new(handler),
                methods: methods.into_iter().map(str::to_string).collect(),
                metrics: Arc::new(ServiceMetrics::default()),
            },
        );
        Ok(())
    }

    /// Remove a service and its metrics.
    pub fn unregister(&self, name: &str) -> bool {
        self.services.remove(&name.to_ascii_lowercase()).is_some()
    }

    /// Sorted list of registered service names.
    pub fn list(&self) -> Vec<String> {
        let mut names: Vec<String> = self.services.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }

    /// Wipe every registration and its metrics.
    pub fn clear(&self) {
        self.services.clear();
    }

    /// Route one call: `service.method(params)`, timing it against that
    /// service's counters.
    pub async fn call(
        &self,
        service: &str,
        method: &str,
        engine: Arc<Engine>,
        params: serde_json::Value,
    ) -> Result<serde_json::Value, (i32, String)> {
        let service_key = service.to_ascii_lowercase();
        let Some(registration) = self.services.get(&service_key).map(|r| (r.handler.clone(), r.methods.clone(), r.metrics.clone())) else {
            return Err((error_codes::METHOD_NOT_FOUND, format!("unknown service: {service}")));
        };
        let (handler, methods, metrics) = registration;
        if !methods.iter().any(|m| m == method) {
            return Err((error_codes::METHOD_NOT_FOUND, format!("unknown method: {service}.{method}")));
        }
        let start = std::time::Instant::now();
        let result = handler(method, engine, params).await;
        metrics.record(start.elapsed(), result.is_ok());
        result
    }

    /// Per-service metrics snapshot, sorted by name, for `health.status`.
    pub fn metrics_snapshot(&self) -> Vec<(String, u64, u64, u64)> {
        let mut rows: Vec<_> = self
            .services
            .iter()
            .map(|e| (e.key().clone(), e.value().metrics.calls(), e.value().metrics.errors(), e.value().metrics.total_duration_ms()))
            .collect();
        rows.sort_by(|a, b| a.0.cmp(&b.0));
        rows
    }

    /// Total registered service count.
    pub fn len(&self) -> usize {
        self.services.len()
    }

    /// Whether any services are registered.
    pub fn is_empty(&self) -> bool {
        self.services.is_empty()
    }
}
