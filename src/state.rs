//! # Application State Management
//!
//! State shared by every HTTP handler and every WebSocket actor.
//!
//! ## What lives here:
//! - **config**: The loaded `AppConfig`, immutable after startup
//! - **metrics**: Request counters updated by the metrics middleware
//! - **registry**: Live WebSocket sessions
//! - **weather**: The one pooled HTTP client for the forecast backend
//!
//! ## Arc<RwLock<T>> Pattern
//! - **Arc**: Many handlers hold a reference to the same data
//! - **RwLock**: Many concurrent readers or a single writer
//!
//! Only the metrics change at runtime; the config is a plain `Arc`.
//!
//! `AppState` itself is cheap to clone; every field is a shared handle.

use crate::config::AppConfig;
use crate::session::ConnectionRegistry;
use crate::weather::WeatherClient;
use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Instant;

#[derive(Debug, Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,

    /// Updated by the metrics middleware on every request
    pub metrics: Arc<RwLock<AppMetrics>>,

    /// Live WebSocket sessions (connect/disconnect book-keeping)
    pub registry: ConnectionRegistry,

    /// Shared across all sessions so connections to the backend are pooled
    pub weather: Arc<WeatherClient>,

    /// When the server started (never changes, so no lock needed)
    pub start_time: Instant,
}

/// HTTP request metrics collected across all requests.
#[derive(Debug, Default, Clone)]
pub struct AppMetrics {
    /// Total number of HTTP requests processed since server start
    pub request_count: u64,

    /// Total number of 4xx/5xx responses since server start
    pub error_count: u64,

    /// Key: endpoint name (e.g., "GET /health")
    pub endpoint_metrics: HashMap<String, EndpointMetric>,
}

/// Per-endpoint counters.
///
/// ## Derived values:
/// - **Average response time**: total_duration_ms / request_count
/// - **Error rate**: error_count / request_count
#[derive(Debug, Default, Clone)]
pub struct EndpointMetric {
    pub request_count: u64,
    pub total_duration_ms: u64,
    pub error_count: u64,
}

impl AppState {
    /// Build the shared state, including the weather HTTP client.
    ///
    /// Fails only if the HTTP client cannot be constructed (e.g. no TLS backend).
    pub fn new(config: AppConfig) -> anyhow::Result<Self> {
        let weather = WeatherClient::new(&config.weather)?;
        Ok(Self {
            config: Arc::new(config),
            metrics: Arc::new(RwLock::new(AppMetrics::default())),
            registry: ConnectionRegistry::new(),
            weather: Arc::new(weather),
            start_time: Instant::now(),
        })
    }

    pub fn get_config(&self) -> &AppConfig {
        &self.config
    }

    pub fn increment_request_count(&self) {
        self.metrics_mut().request_count += 1;
    }

    pub fn increment_error_count(&self) {
        self.metrics_mut().error_count += 1;
    }

    /// Record one finished request for `endpoint` (e.g. "GET /health").
    pub fn record_endpoint_request(&self, endpoint: &str, duration_ms: u64, is_error: bool) {
        let mut metrics = self.metrics_mut();
        let endpoint_metric = metrics.endpoint_metrics.entry(endpoint.to_string()).or_default();

        endpoint_metric.request_count += 1;
        endpoint_metric.total_duration_ms += duration_ms;
        if is_error {
            endpoint_metric.error_count += 1;
        }
    }

    /// Number of WebSocket sessions currently open.
    pub fn active_sessions(&self) -> usize {
        self.registry.count()
    }

    /// Snapshot of current metrics (used for the /metrics endpoint).
    ///
    /// Cloned so the lock isn't held while the response is serialized.
    pub fn get_metrics_snapshot(&self) -> AppMetrics {
        self.metrics_ref().clone()
    }

    pub fn get_uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }

    fn metrics_ref(&self) -> RwLockReadGuard<'_, AppMetrics> {
        self.metrics.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn metrics_mut(&self) -> RwLockWriteGuard<'_, AppMetrics> {
        self.metrics.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl EndpointMetric {
    pub fn average_duration_ms(&self) -> f64 {
        if self.request_count > 0 {
            self.total_duration_ms as f64 / self.request_count as f64
        } else {
            0.0
        }
    }

    /// Fraction of failed requests, 0.0 to 1.0.
    pub fn error_rate(&self) -> f64 {
        if self.request_count > 0 {
            self.error_count as f64 / self.request_count as f64
        } else {
            0.0
        }
    }
}
