//! # Application State Management
//!
//! Shared state read and updated by every HTTP handler and every interview connection.
//!
//! ## Key Rust Concepts:
//!
//! ### Arc (Atomically Reference Counted)
//! - **Purpose**: lets many handlers and WebSocket actors share ownership of one value
//! - **Thread safety**: actix runs one worker per core, so state crosses threads
//!
//! ### RwLock (Reader-Writer Lock)
//! - **Purpose**: many readers OR one writer at a time
//! - **Why needed**: every request and every turn updates the metrics
//!
//! The configuration itself is immutable after startup and only needs the `Arc`.
//!
//! ## Lock poisoning:
//! A panic while holding the metrics lock would poison it. Counters are plain numbers
//! that stay meaningful after such a panic, so the guard is recovered with
//! `PoisonError::into_inner` instead of propagating the panic to every later request.

use crate::config::AppConfig;
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Instant;

/// The application state shared across all handlers and connections.
#[derive(Debug, Clone)]
pub struct AppState {
    /// Effective configuration, fixed at startup
    config: Arc<AppConfig>,

    /// Counters updated by the metrics middleware and the interview actors
    pub metrics: Arc<RwLock<AppMetrics>>,

    /// When the server started
    pub start_time: Instant,
}

/// Counters collected since the server started.
///
/// ## Why these metrics matter:
/// - **active_interviews**: open WebSocket interviews, compared against the capacity limit
/// - **completed_turns / failed_turns**: how often the provider chain succeeds
/// - **endpoint_metrics**: per-endpoint HTTP statistics
#[derive(Debug, Default, Clone)]
pub struct AppMetrics {
    /// Total number of HTTP requests processed
    pub request_count: u64,

    /// Total number of HTTP requests that ended in a 4xx/5xx
    pub error_count: u64,

    /// Interviews currently connected
    pub active_interviews: u32,

    /// Interviews accepted since startup
    pub total_interviews: u64,

    /// Upgrades refused because the server was at capacity
    pub rejected_interviews: u64,

    /// Greetings streamed to completion
    pub greetings_sent: u64,

    /// Turns that reached `__end__`
    pub completed_turns: u64,

    /// Greetings or turns stopped by a provider failure
    pub failed_turns: u64,

    /// Key: endpoint name (e.g., "GET /health")
    pub endpoint_metrics: HashMap<String, EndpointMetric>,
}

/// Detailed performance metrics for a specific API endpoint.
#[derive(Debug, Default, Clone)]
pub struct EndpointMetric {
    pub request_count: u64,
    pub total_duration_ms: u64,
    pub error_count: u64,
}

impl AppState {
    pub fn new(config: AppConfig) -> Self {
        Self {
            config: Arc::new(config),
            metrics: Arc::new(RwLock::new(AppMetrics::default())),
            start_time: Instant::now(),
        }
    }

    /// Borrow the configuration without cloning it.
    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    fn write_metrics(&self) -> RwLockWriteGuard<'_, AppMetrics> {
        self.metrics.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn read_metrics(&self) -> RwLockReadGuard<'_, AppMetrics> {
        self.metrics.read().unwrap_or_else(PoisonError::into_inner)
    }

    /// Called by the metrics middleware for every request.
    pub fn increment_request_count(&self) {
        self.write_metrics().request_count += 1;
    }

    pub fn increment_error_count(&self) {
        self.write_metrics().error_count += 1;
    }

    /// Record one request to `endpoint` (e.g. "GET /health").
    pub fn record_endpoint_request(&self, endpoint: &str, duration_ms: u64, is_error: bool) {
        let mut metrics = self.write_metrics();
        let endpoint_metric = metrics.endpoint_metrics.entry(endpoint.to_string()).or_default();

        endpoint_metric.request_count += 1;
        endpoint_metric.total_duration_ms += duration_ms;
        if is_error {
            endpoint_metric.error_count += 1;
        }
    }

    /// Reserve a slot for a new interview.
    ///
    /// Check and increment happen under one write lock, so two simultaneous upgrades
    /// can never both take the last slot. Returns `false` when the server is full.
    pub fn try_open_interview(&self) -> bool {
        let limit = self.config.performance.max_concurrent_sessions;
        let mut metrics = self.write_metrics();

        if metrics.active_interviews as usize >= limit {
            metrics.rejected_interviews += 1;
            return false;
        }
        metrics.active_interviews += 1;
        metrics.total_interviews += 1;
        true
    }

    /// Release a slot taken by `try_open_interview`.
    pub fn close_interview(&self) {
        let mut metrics = self.write_metrics();
        // Underflow would mean a double release; saturate instead of panicking
        metrics.active_interviews = metrics.active_interviews.saturating_sub(1);
    }

    pub fn record_greeting_sent(&self) {
        self.write_metrics().greetings_sent += 1;
    }

    pub fn record_turn_completed(&self) {
        self.write_metrics().completed_turns += 1;
    }

    pub fn record_turn_failed(&self) {
        self.write_metrics().failed_turns += 1;
    }

    /// Copy of the current metrics, so no lock is held while serializing.
    pub fn get_metrics_snapshot(&self) -> AppMetrics {
        self.read_metrics().clone()
    }

    pub fn get_uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }
}

impl EndpointMetric {
    /// Average = Total Duration ÷ Number of Requests
    pub fn average_duration_ms(&self) -> f64 {
        if self.request_count > 0 {
            self.total_duration_ms as f64 / self.request_count as f64
        } else {
            0.0
        }
    }

    /// Fraction of requests that failed, from 0.0 to 1.0.
    pub fn error_rate(&self) -> f64 {
        if self.request_count > 0 {
            self.error_count as f64 / self.request_count as f64
        } else {
            0.0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state_with_capacity(max: usize) -> AppState {
        let mut config = AppConfig::default();
        config.performance.max_concurrent_sessions = max;
        AppState::new(config)
    }

    #[test]
    fn test_interview_capacity() {
        let state = state_with_capacity(2);
        assert!(state.try_open_interview());
        assert!(state.try_open_interview());
        assert!(!state.try_open_interview());

        state.close_interview();
        assert!(state.try_open_interview());

        let metrics = state.get_metrics_snapshot();
        assert_eq!(metrics.active_interviews, 2);
        assert_eq!(metrics.total_interviews, 3);
        assert_eq!(metrics.rejected_interviews, 1);
    }

    #[test]
    fn test_close_never_underflows() {
        let state = state_with_capacity(1);
        state.close_interview();
        assert_eq!(state.get_metrics_snapshot().active_interviews, 0);
    }

    #[test]
    fn test_turn_counters() {
        let state = state_with_capacity(1);
        state.record_greeting_sent();
        state.record_turn_completed();
        state.record_turn_completed();
        state.record_turn_failed();

        let metrics = state.get_metrics_snapshot();
        assert_eq!(metrics.greetings_sent, 1);
        assert_eq!(metrics.completed_turns, 2);
        assert_eq!(metrics.failed_turns, 1);
    }

    #[test]
    fn test_endpoint_metrics() {
        let state = state_with_capacity(1);
        state.record_endpoint_request("GET /health", 10, false);
        state.record_endpoint_request("GET /health", 30, true);

        let metrics = state.get_metrics_snapshot();
        let health = &metrics.endpoint_metrics["GET /health"];
        assert_eq!(health.request_count, 2);
        assert_eq!(health.average_duration_ms(), 20.0);
        assert_eq!(health.error_rate(), 0.5);
    }
}
