//! Endpoint health tracking and selection
//!
//! Health state is process-local and advisory: it steers the scheduler away
//! from misbehaving endpoints but is never a correctness mechanism (the store's
//! conditional writes are). Each endpoint's state sits behind its own light
//! mutex, held only for synchronous bookkeeping, never across I/O.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use pvlit_common::events::{EventBus, PvlitEvent};

use crate::config::PipelineConfig;

use super::ClassifyEndpoint;

#[derive(Debug, Clone)]
struct HealthState {
    healthy: bool,
    consecutive_failures: u32,
    inflight: u32,
    next_available_at: Option<Instant>,
    success_count: u64,
    failure_count: u64,
    avg_response_ms: f64,
}

impl Default for HealthState {
    fn default() -> Self {
        Self {
            healthy: true,
            consecutive_failures: 0,
            inflight: 0,
            next_available_at: None,
            success_count: 0,
            failure_count: 0,
            avg_response_ms: 0.0,
        }
    }
}

impl HealthState {
    fn success_rate(&self) -> f64 {
        let total = self.success_count + self.failure_count;
        if total == 0 {
            1.0
        } else {
            self.success_count as f64 / total as f64
        }
    }

    fn cooling_down(&self, now: Instant) -> bool {
        self.next_available_at.map_or(false, |at| at > now)
    }
}

/// Read-only view of one endpoint's health, for diagnostics and tests
#[derive(Debug, Clone)]
pub struct EndpointHealthSnapshot {
    pub name: String,
    pub healthy: bool,
    pub consecutive_failures: u32,
    pub inflight: u32,
    pub cooling_down: bool,
    pub success_count: u64,
    pub failure_count: u64,
    pub avg_response_ms: f64,
}

/// A checked-out endpoint; the holder must report the call's outcome back
/// through `record_success` or `record_failure`, which also returns the slot's
/// inflight unit.
pub struct EndpointLease {
    pub index: usize,
    pub client: Arc<dyn ClassifyEndpoint>,
}

struct Slot {
    client: Arc<dyn ClassifyEndpoint>,
    health: Mutex<HealthState>,
}

/// Fixed pool of classification endpoints with per-endpoint health state
pub struct EndpointPool {
    slots: Vec<Slot>,
    per_endpoint_concurrency: u32,
    breaker_threshold: u32,
    breaker_cooldown: Duration,
    base_cooldown: Duration,
    event_bus: EventBus,
}

impl EndpointPool {
    pub fn new(
        clients: Vec<Arc<dyn ClassifyEndpoint>>,
        config: &PipelineConfig,
        event_bus: EventBus,
    ) -> Self {
        Self {
            slots: clients
                .into_iter()
                .map(|client| Slot {
                    client,
                    health: Mutex::new(HealthState::default()),
                })
                .collect(),
            per_endpoint_concurrency: config.per_endpoint_concurrency,
            breaker_threshold: config.circuit_breaker_threshold,
            breaker_cooldown: config.circuit_breaker_cooldown(),
            base_cooldown: config.endpoint_cooldown(),
            event_bus,
        }
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Pick the best endpoint for the next call.
    ///
    /// Preference order: not cooling down, spare capacity, not already tried
    /// by this job, healthy; ranked by historical success rate, then lowest
    /// response time. Falls back to any endpoint with spare capacity whose
    /// cooldown has expired. Returns `None` when every endpoint is saturated
    /// or cooling down; the caller waits and retries.
    ///
    /// Per-endpoint concurrency is a hard cap: it holds even when the global
    /// worker budget is idle.
    pub fn checkout(&self, tried: &HashSet<usize>) -> Option<EndpointLease> {
        let now = Instant::now();

        let mut preferred: Option<(usize, bool, f64, f64)> = None;
        let mut fallback: Option<usize> = None;

        for (index, slot) in self.slots.iter().enumerate() {
            let health = slot.health.lock().expect("endpoint health mutex poisoned");
            if health.cooling_down(now) || health.inflight >= self.per_endpoint_concurrency {
                continue;
            }

            if fallback.is_none() {
                fallback = Some(index);
            }
            if tried.contains(&index) {
                continue;
            }

            let candidate = (index, health.healthy, health.success_rate(), health.avg_response_ms);
            let better = match &preferred {
                None => true,
                Some((_, best_healthy, best_rate, best_ms)) => {
                    (candidate.1, candidate.2, -candidate.3)
                        > (*best_healthy, *best_rate, -*best_ms)
                }
            };
            if better {
                preferred = Some(candidate);
            }
        }

        let index = preferred.map(|(index, ..)| index).or(fallback)?;
        let slot = &self.slots[index];
        {
            let mut health = slot.health.lock().expect("endpoint health mutex poisoned");
            health.inflight += 1;
        }

        Some(EndpointLease {
            index,
            client: Arc::clone(&slot.client),
        })
    }

    /// Record a successful call: reset the failure streak, fold the response
    /// time into the rolling average, and restore health if the breaker had
    /// tripped.
    pub fn record_success(&self, index: usize, elapsed: Duration) {
        let slot = &self.slots[index];
        let recovered;
        {
            let mut health = slot.health.lock().expect("endpoint health mutex poisoned");
            recovered = !health.healthy;
            health.inflight = health.inflight.saturating_sub(1);
            health.consecutive_failures = 0;
            health.healthy = true;
            health.success_count += 1;
            health.next_available_at = None;

            let elapsed_ms = elapsed.as_millis() as f64;
            health.avg_response_ms = if health.success_count == 1 {
                elapsed_ms
            } else {
                health.avg_response_ms * 0.8 + elapsed_ms * 0.2
            };
        }

        if recovered {
            tracing::info!(endpoint = slot.client.name(), "Endpoint recovered");
            self.event_bus.emit_lossy(PvlitEvent::EndpointHealthChanged {
                endpoint: slot.client.name().to_string(),
                healthy: true,
                consecutive_failures: 0,
                timestamp: chrono::Utc::now(),
            });
        }
    }

    /// Record a failed or timed-out call.
    ///
    /// Every failure sets a short cooldown so the pool never hammers a
    /// struggling endpoint; a streak at the breaker threshold marks it
    /// unhealthy and extends the cooldown to the full breaker window.
    pub fn record_failure(&self, index: usize, error: &str) {
        let slot = &self.slots[index];
        let now = Instant::now();
        let tripped;
        let streak;
        {
            let mut health = slot.health.lock().expect("endpoint health mutex poisoned");
            health.inflight = health.inflight.saturating_sub(1);
            health.consecutive_failures += 1;
            health.failure_count += 1;
            streak = health.consecutive_failures;

            if streak >= self.breaker_threshold {
                tripped = health.healthy;
                health.healthy = false;
                health.next_available_at = Some(now + self.breaker_cooldown);
            } else {
                tripped = false;
                health.next_available_at = Some(now + self.base_cooldown);
            }
        }

        if tripped {
            tracing::warn!(
                endpoint = slot.client.name(),
                consecutive_failures = streak,
                cooldown_secs = self.breaker_cooldown.as_secs(),
                error = error,
                "Circuit breaker tripped, endpoint excluded from selection"
            );
            self.event_bus.emit_lossy(PvlitEvent::EndpointHealthChanged {
                endpoint: slot.client.name().to_string(),
                healthy: false,
                consecutive_failures: streak,
                timestamp: chrono::Utc::now(),
            });
        } else {
            tracing::debug!(
                endpoint = slot.client.name(),
                consecutive_failures = streak,
                error = error,
                "Endpoint call failed"
            );
        }
    }

    /// Health snapshots for diagnostics
    pub fn snapshot(&self) -> Vec<EndpointHealthSnapshot> {
        let now = Instant::now();
        self.slots
            .iter()
            .map(|slot| {
                let health = slot.health.lock().expect("endpoint health mutex poisoned");
                EndpointHealthSnapshot {
                    name: slot.client.name().to_string(),
                    healthy: health.healthy,
                    consecutive_failures: health.consecutive_failures,
                    inflight: health.inflight,
                    cooling_down: health.cooling_down(now),
                    success_count: health.success_count,
                    failure_count: health.failure_count,
                    avg_response_ms: health.avg_response_ms,
                }
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::endpoints::{ClassificationOutcome, EndpointError};
    use async_trait::async_trait;

    struct StubEndpoint(String);

    #[async_trait]
    impl ClassifyEndpoint for StubEndpoint {
        fn name(&self) -> &str {
            &self.0
        }

        async fn classify(
            &self,
            _external_id: &str,
            _sponsor_hint: Option<&str>,
            _subject_name: Option<&str>,
        ) -> Result<ClassificationOutcome, EndpointError> {
            Err(EndpointError::Network("stub".to_string()))
        }
    }

    fn pool_with(n: usize, config: &PipelineConfig) -> EndpointPool {
        let clients: Vec<Arc<dyn ClassifyEndpoint>> = (0..n)
            .map(|i| Arc::new(StubEndpoint(format!("ep-{}", i))) as Arc<dyn ClassifyEndpoint>)
            .collect();
        EndpointPool::new(clients, config, EventBus::new(16))
    }

    fn test_config() -> PipelineConfig {
        PipelineConfig {
            per_endpoint_concurrency: 2,
            circuit_breaker_threshold: 3,
            circuit_breaker_cooldown_secs: 60,
            endpoint_cooldown_ms: 0,
            ..PipelineConfig::default()
        }
    }

    #[test]
    fn test_per_endpoint_concurrency_is_hard_cap() {
        let config = test_config();
        let pool = pool_with(1, &config);
        let tried = HashSet::new();

        assert!(pool.checkout(&tried).is_some());
        assert!(pool.checkout(&tried).is_some());
        // Third checkout exceeds per_endpoint_concurrency = 2
        assert!(pool.checkout(&tried).is_none());

        pool.record_success(0, Duration::from_millis(10));
        assert!(pool.checkout(&tried).is_some());
    }

    #[test]
    fn test_breaker_trips_after_threshold_and_excludes_endpoint() {
        let config = test_config();
        let pool = pool_with(1, &config);
        let tried = HashSet::new();

        for _ in 0..3 {
            let lease = pool.checkout(&tried).unwrap();
            pool.record_failure(lease.index, "timeout");
        }

        let snapshot = &pool.snapshot()[0];
        assert!(!snapshot.healthy);
        assert_eq!(snapshot.consecutive_failures, 3);
        assert!(snapshot.cooling_down);

        // Breaker cooldown is 60s, so the endpoint stays excluded
        assert!(pool.checkout(&tried).is_none());
    }

    #[test]
    fn test_breaker_recovers_after_cooldown() {
        let config = PipelineConfig {
            circuit_breaker_cooldown_secs: 0,
            ..test_config()
        };
        let pool = pool_with(1, &config);
        let tried = HashSet::new();

        for _ in 0..3 {
            let lease = pool.checkout(&tried).unwrap();
            pool.record_failure(lease.index, "timeout");
        }

        // Zero cooldown: immediately eligible again despite unhealthy flag
        let lease = pool.checkout(&tried).expect("eligible after cooldown");
        pool.record_success(lease.index, Duration::from_millis(5));
        assert!(pool.snapshot()[0].healthy);
    }

    #[test]
    fn test_tried_endpoints_deprioritized_but_usable_as_fallback() {
        let config = test_config();
        let pool = pool_with(2, &config);

        let mut tried = HashSet::new();
        tried.insert(0);
        let lease = pool.checkout(&tried).unwrap();
        assert_eq!(lease.index, 1, "untried endpoint preferred");
        pool.record_success(1, Duration::from_millis(5));

        tried.insert(1);
        // Both tried: fall back to any endpoint with spare capacity
        assert!(pool.checkout(&tried).is_some());
    }

    #[test]
    fn test_selection_prefers_higher_success_rate() {
        let config = test_config();
        let pool = pool_with(2, &config);
        let tried = HashSet::new();

        // Give endpoint 0 a failure history (single failure keeps it below
        // the breaker threshold, cooldown is zero in the test config)
        let lease = pool.checkout(&tried).unwrap();
        pool.record_failure(lease.index, "boom");
        let failed = lease.index;
        let other = 1 - failed;
        pool.record_success(other, Duration::from_millis(5));
        // Consume the success checkout balance
        let lease = pool.checkout(&tried).unwrap();
        assert_eq!(lease.index, other, "clean endpoint preferred");
        pool.record_success(lease.index, Duration::from_millis(5));
    }
}
