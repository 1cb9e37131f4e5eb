//! Named circuit breakers.
//!
//! A breaker opens after `failure_threshold` consecutive failures, moves to
//! half-open once `open_timeout` has elapsed, and closes again on the next
//! success. Any failure while half-open reopens it.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Configuration for circuit breakers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures before opening the circuit.
    pub failure_threshold: u32,
    /// Duration to keep circuit open before trying half-open.
    pub open_timeout: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            open_timeout: Duration::minutes(1),
        }
    }
}

impl CircuitBreakerConfig {
    pub fn new(failure_threshold: u32, open_timeout_ms: u64) -> Self {
        Self {
            failure_threshold: failure_threshold.max(1),
            open_timeout: Duration::milliseconds(i64::try_from(open_timeout_ms).unwrap_or(i64::MAX)),
        }
    }
}

/// State of a circuit breaker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    /// Circuit is closed, requests flow normally.
    Closed,
    /// Circuit is open, requests are blocked.
    Open,
    /// Circuit is testing if the system has recovered.
    HalfOpen,
}

impl CircuitState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Closed => "closed",
            Self::Open => "open",
            Self::HalfOpen => "half_open",
        }
    }
}

/// Individual circuit breaker state.
#[derive(Debug, Clone)]
pub struct CircuitBreaker {
    pub name: String,
    pub config: CircuitBreakerConfig,
    pub state: CircuitState,
    pub consecutive_failures: u32,
    pub last_error: Option<String>,
    /// When the circuit was opened.
    pub opened_at: Option<DateTime<Utc>>,
    /// When state last changed.
    pub state_changed_at: DateTime<Utc>,
    /// Total times circuit opened.
    pub open_count: u32,
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        Self {
            name: name.into(),
            config,
            state: CircuitState::Closed,
            consecutive_failures: 0,
            last_error: None,
            opened_at: None,
            state_changed_at: Utc::now(),
            open_count: 0,
        }
    }

    pub fn record_failure_at(&mut self, error: impl Into<String>, now: DateTime<Utc>) {
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
        self.last_error = Some(error.into());

        match self.state {
            CircuitState::Closed if self.consecutive_failures >= self.config.failure_threshold => {
                self.open(now);
            }
            // Any failure in half-open reopens the circuit
            CircuitState::HalfOpen => self.open(now),
            _ => {}
        }
    }

    pub fn record_success_at(&mut self, now: DateTime<Utc>) {
        self.consecutive_failures = 0;
        if self.state != CircuitState::Closed {
            self.close(now);
        }
    }

    fn open(&mut self, now: DateTime<Utc>) {
        self.state = CircuitState::Open;
        self.opened_at = Some(now);
        self.state_changed_at = now;
        self.open_count += 1;
    }

    fn close(&mut self, now: DateTime<Utc>) {
        self.state = CircuitState::Closed;
        self.opened_at = None;
        self.state_changed_at = now;
        self.consecutive_failures = 0;
    }

    fn half_open(&mut self, now: DateTime<Utc>) {
        self.state = CircuitState::HalfOpen;
        self.state_changed_at = now;
    }

    /// Swap in new settings, keeping the failure count. A closed circuit
    /// that already meets the new threshold opens immediately.
    pub fn apply_config_at(&mut self, config: CircuitBreakerConfig, now: DateTime<Utc>) {
        self.config = config;
        if self.state == CircuitState::Closed && self.consecutive_failures >= config.failure_threshold {
            self.open(now);
        }
    }

    /// When an open circuit will allow a probe.
    pub fn retry_after(&self) -> Option<DateTime<Utc>> {
        self.opened_at.map(|at| at + self.config.open_timeout)
    }

    /// Check if the circuit allows requests, moving open → half-open once
    /// the timeout has elapsed.
    pub fn allows_at(&mut self, now: DateTime<Utc>) -> bool {
        match self.state {
            CircuitState::Closed | CircuitState::HalfOpen => true,
            CircuitState::Open => match self.retry_after() {
                Some(retry_after) if now >= retry_after => {
                    self.half_open(now);
                    true
                }
                _ => false,
            },
        }
    }

    /// Manually reset the circuit.
    pub fn reset(&mut self) {
        self.close(Utc::now());
        self.open_count = 0;
        self.last_error = None;
    }
}

/// Result of a circuit breaker check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CircuitCheckResult {
    /// Request is allowed.
    Allowed,
    /// Request is blocked by open circuit.
    Blocked {
        name: String,
        opened_at: DateTime<Utc>,
        retry_after: DateTime<Utc>,
    },
    /// Circuit is in half-open state, testing recovery.
    Testing { name: String },
}

impl CircuitCheckResult {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Self::Allowed | Self::Testing { .. })
    }

    pub fn is_blocked(&self) -> bool {
        matches!(self, Self::Blocked { .. })
    }
}

/// Statistics for a circuit breaker.
#[derive(Debug, Clone, Serialize)]
pub struct CircuitStats {
    pub name: String,
    pub state: String,
    pub consecutive_failures: u32,
    pub open_count: u32,
    pub last_error: Option<String>,
    pub opened_at: Option<DateTime<Utc>>,
    pub state_changed_at: DateTime<Utc>,
}

/// Service owning every named breaker.
#[derive(Clone)]
pub struct CircuitBreakerService {
    config: CircuitBreakerConfig,
    circuits: Arc<RwLock<HashMap<String, CircuitBreaker>>>,
}

impl CircuitBreakerService {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config,
            circuits: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Breaker `name`, created with `config` (or the service default) on
    /// first use. An explicit `config` that differs from the breaker's
    /// current one replaces it.
    fn circuit_mut<'a>(
        &self,
        circuits: &'a mut HashMap<String, CircuitBreaker>,
        name: &str,
        config: Option<CircuitBreakerConfig>,
        now: DateTime<Utc>,
    ) -> &'a mut CircuitBreaker {
        let circuit = circuits
            .entry(name.to_string())
            .or_insert_with(|| CircuitBreaker::new(name, config.unwrap_or(self.config)));
        if let Some(config) = config {
            if circuit.config != config {
                tracing::debug!(
                    breaker = %name,
                    failure_threshold = config.failure_threshold,
                    "Circuit breaker reconfigured"
                );
                circuit.apply_config_at(config, now);
            }
        }
        circuit
    }

    /// Set the settings of breaker `name`, creating it if needed.
    pub async fn configure(&self, name: &str, config: CircuitBreakerConfig) {
        let mut circuits = self.circuits.write().await;
        self.circuit_mut(&mut circuits, name, Some(config), Utc::now());
    }

    /// Check a breaker, creating it with `config` (or the service default)
    /// on first use.
    pub async fn check(&self, name: &str, config: Option<CircuitBreakerConfig>) -> CircuitCheckResult {
        self.check_at(name, config, Utc::now()).await
    }

    pub async fn check_at(
        &self,
        name: &str,
        config: Option<CircuitBreakerConfig>,
        now: DateTime<Utc>,
    ) -> CircuitCheckResult {
        let mut circuits = self.circuits.write().await;
        let circuit = self.circuit_mut(&mut circuits, name, config, now);

        let was_open = circuit.state == CircuitState::Open;
        if circuit.allows_at(now) {
            if circuit.state == CircuitState::HalfOpen {
                if was_open {
                    tracing::info!(breaker = %name, "Circuit breaker half-open, allowing probe");
                }
                CircuitCheckResult::Testing {
                    name: name.to_string(),
                }
            } else {
                CircuitCheckResult::Allowed
            }
        } else {
            let opened_at = circuit.opened_at.unwrap_or(now);
            CircuitCheckResult::Blocked {
                name: name.to_string(),
                opened_at,
                retry_after: opened_at + circuit.config.open_timeout,
            }
        }
    }

    pub async fn record_failure(&self, name: &str, error: impl Into<String>) {
        self.record_failure_at(name, error, Utc::now()).await;
    }

    pub async fn record_failure_at(&self, name: &str, error: impl Into<String>, now: DateTime<Utc>) {
        let mut circuits = self.circuits.write().await;
        let circuit = self.circuit_mut(&mut circuits, name, None, now);

        let was_open = circuit.state == CircuitState::Open;
        circuit.record_failure_at(error, now);

        if !was_open && circuit.state == CircuitState::Open {
            tracing::warn!(
                breaker = %name,
                consecutive_failures = circuit.consecutive_failures,
                open_count = circuit.open_count,
                last_error = ?circuit.last_error,
                "Circuit breaker opened"
            );
        }
    }

    pub async fn record_success(&self, name: &str) {
        let mut circuits = self.circuits.write().await;
        if let Some(circuit) = circuits.get_mut(name) {
            let was_closed = circuit.state == CircuitState::Closed;
            circuit.record_success_at(Utc::now());
            if !was_closed {
                tracing::info!(breaker = %name, "Circuit breaker closed");
            }
        }
    }

    pub async fn get_state(&self, name: &str) -> Option<CircuitState> {
        self.circuits.read().await.get(name).map(|c| c.state)
    }

    /// Get statistics for all circuits, sorted by name.
    pub async fn stats(&self) -> Vec<CircuitStats> {
        let circuits = self.circuits.read().await;
        let mut stats: Vec<CircuitStats> = circuits
            .values()
            .map(|c| CircuitStats {
                name: c.name.clone(),
                state: c.state.as_str().to_string(),
                consecutive_failures: c.consecutive_failures,
                open_count: c.open_count,
                last_error: c.last_error.clone(),
                opened_at: c.opened_at,
                state_changed_at: c.state_changed_at,
            })
            .collect();
        stats.sort_by(|a, b| a.name.cmp(&b.name));
        stats
    }

    pub async fn reset(&self, name: &str) {
        if let Some(circuit) = self.circuits.write().await.get_mut(name) {
            circuit.reset();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(threshold: u32) -> CircuitBreakerConfig {
        CircuitBreakerConfig::new(threshold, 1_000)
    }

    #[test]
    fn test_opens_after_consecutive_failures() {
        let mut circuit = CircuitBreaker::new("db", config(3));
        let now = Utc::now();

        circuit.record_failure_at("error 1", now);
        circuit.record_failure_at("error 2", now);
        assert_eq!(circuit.state, CircuitState::Closed);

        circuit.record_failure_at("error 3", now);
        assert_eq!(circuit.state, CircuitState::Open);
        assert_eq!(circuit.open_count, 1);
        assert!(!circuit.allows_at(now));
    }

    #[test]
    fn test_success_resets_consecutive_count() {
        let mut circuit = CircuitBreaker::new("db", config(2));
        let now = Utc::now();

        circuit.record_failure_at("error 1", now);
        circuit.record_success_at(now);
        circuit.record_failure_at("error 2", now);
        assert_eq!(circuit.state, CircuitState::Closed);
    }

    #[test]
    fn test_half_open_after_timeout_then_close() {
        let mut circuit = CircuitBreaker::new("db", config(1));
        let opened = Utc::now();
        circuit.record_failure_at("boom", opened);

        assert!(!circuit.allows_at(opened + Duration::milliseconds(999)));
        assert!(circuit.allows_at(opened + Duration::milliseconds(1_000)));
        assert_eq!(circuit.state, CircuitState::HalfOpen);

        circuit.record_success_at(opened + Duration::milliseconds(1_001));
        assert_eq!(circuit.state, CircuitState::Closed);
    }

    #[test]
    fn test_half_open_failure_reopens() {
        let mut circuit = CircuitBreaker::new("db", config(1));
        let opened = Utc::now();
        circuit.record_failure_at("boom", opened);

        let probe = opened + Duration::seconds(2);
        assert!(circuit.allows_at(probe));
        circuit.record_failure_at("still down", probe);
        assert_eq!(circuit.state, CircuitState::Open);
        assert_eq!(circuit.open_count, 2);
    }

    #[test]
    fn test_reset() {
        let mut circuit = CircuitBreaker::new("db", config(1));
        circuit.record_failure_at("boom", Utc::now());
        circuit.reset();
        assert_eq!(circuit.state, CircuitState::Closed);
        assert_eq!(circuit.open_count, 0);
    }

    #[tokio::test]
    async fn test_service_blocks_named_breaker_only() {
        let service = CircuitBreakerService::new(config(2));
        let now = Utc::now();

        service.record_failure_at("payments", "e1", now).await;
        service.record_failure_at("payments", "e2", now).await;

        assert!(service.check_at("payments", None, now).await.is_blocked());
        assert!(service.check_at("search", None, now).await.is_allowed());
        assert_eq!(service.get_state("payments").await, Some(CircuitState::Open));

        let later = now + Duration::seconds(5);
        assert!(matches!(
            service.check_at("payments", None, later).await,
            CircuitCheckResult::Testing { .. }
        ));
        service.record_success("payments").await;
        assert_eq!(service.get_state("payments").await, Some(CircuitState::Closed));

        let stats = service.stats().await;
        assert_eq!(stats.len(), 2);
        assert_eq!(stats[0].name, "payments");
    }

    #[tokio::test]
    async fn test_configured_threshold_applies_to_external_failures() {
        let service = CircuitBreakerService::new(config(5));
        let now = Utc::now();
        service.configure("payments", config(2)).await;

        service.record_failure_at("payments", "e1", now).await;
        service.record_failure_at("payments", "e2", now).await;
        assert_eq!(service.get_state("payments").await, Some(CircuitState::Open));
    }

    #[tokio::test]
    async fn test_lowering_threshold_opens_when_already_exceeded() {
        let service = CircuitBreakerService::new(config(5));
        let now = Utc::now();

        service.record_failure_at("payments", "e1", now).await;
        service.record_failure_at("payments", "e2", now).await;
        assert!(service.check_at("payments", None, now).await.is_allowed());

        assert!(service.check_at("payments", Some(config(2)), now).await.is_blocked());
    }
}
