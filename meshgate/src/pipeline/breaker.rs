//! Per-tool circuit breakers. Consecutive failures trip the circuit; after
//! the cooldown a single probe is admitted, and its outcome decides between
//! reclosing and re-tripping.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::BreakerConfig;

#[derive(Debug, Clone)]
enum State {
    /// Normal operation, counting consecutive failures.
    Closed { failures: u32 },
    /// Tripped; calls are rejected until cooldown expires.
    Open { tripped_at: Instant },
    /// Cooldown expired; exactly one probe is in flight.
    HalfOpen,
}

impl Default for State {
    fn default() -> Self {
        State::Closed { failures: 0 }
    }
}

pub struct CircuitBreakerRegistry {
    states: Mutex<HashMap<Uuid, State>>,
    threshold: u32,
    cooldown: Duration,
}

impl CircuitBreakerRegistry {
    pub fn new(config: BreakerConfig) -> Self {
        Self {
            states: Mutex::new(HashMap::new()),
            threshold: config.failure_threshold.max(1),
            cooldown: Duration::from_secs(config.cooldown_secs),
        }
    }

    /// Whether a call to the tool may proceed. An Open circuit past its
    /// cooldown transitions to HalfOpen and admits the caller as the probe.
    pub fn is_available(&self, tool_id: Uuid) -> bool {
        let Ok(mut states) = self.states.lock() else {
            return true;
        };
        let state = states.entry(tool_id).or_default();
        match state {
            State::Closed { .. } => true,
            State::Open { tripped_at } => {
                if tripped_at.elapsed() >= self.cooldown {
                    info!(%tool_id, "circuit half-open, admitting probe");
                    *state = State::HalfOpen;
                    true
                } else {
                    false
                }
            }
            // A probe is already in flight; block further callers.
            State::HalfOpen => false,
        }
    }

    pub fn record_success(&self, tool_id: Uuid) {
        let Ok(mut states) = self.states.lock() else {
            return;
        };
        let state = states.entry(tool_id).or_default();
        let was_half_open = matches!(state, State::HalfOpen);
        *state = State::Closed { failures: 0 };
        if was_half_open {
            info!(%tool_id, "circuit closed after successful probe");
        }
    }

    pub fn record_failure(&self, tool_id: Uuid) {
        let Ok(mut states) = self.states.lock() else {
            return;
        };
        let state = states.entry(tool_id).or_default();
        match state {
            State::Closed { failures } => {
                *failures += 1;
                if *failures >= self.threshold {
                    warn!(
                        %tool_id,
                        failures = *failures,
                        "circuit open for {}s",
                        self.cooldown.as_secs()
                    );
                    *state = State::Open {
                        tripped_at: Instant::now(),
                    };
                }
            }
            State::HalfOpen => {
                warn!(%tool_id, "probe failed, circuit re-opened");
                *state = State::Open {
                    tripped_at: Instant::now(),
                };
            }
            State::Open { .. } => {}
        }
    }

    /// Drop breaker state for a tool (e.g. after deletion).
    pub fn remove(&self, tool_id: Uuid) {
        if let Ok(mut states) = self.states.lock() {
            states.remove(&tool_id);
        }
    }

    #[cfg(test)]
    fn force_open_in_past(&self, tool_id: Uuid, elapsed: Duration) {
        let mut states = self.states.lock().unwrap();
        states.insert(
            tool_id,
            State::Open {
                tripped_at: Instant::now() - elapsed,
            },
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry(threshold: u32, cooldown_secs: u64) -> CircuitBreakerRegistry {
        CircuitBreakerRegistry::new(BreakerConfig {
            failure_threshold: threshold,
            cooldown_secs,
        })
    }

    #[test]
    fn fresh_tool_is_available() {
        let breakers = registry(3, 60);
        assert!(breakers.is_available(Uuid::new_v4()));
    }

    #[test]
    fn trips_after_consecutive_failures() {
        let breakers = registry(3, 60);
        let id = Uuid::new_v4();
        breakers.record_failure(id);
        breakers.record_failure(id);
        assert!(breakers.is_available(id));
        breakers.record_failure(id);
        assert!(!breakers.is_available(id));
    }

    #[test]
    fn success_resets_consecutive_count() {
        let breakers = registry(3, 60);
        let id = Uuid::new_v4();
        breakers.record_failure(id);
        breakers.record_failure(id);
        breakers.record_success(id);
        breakers.record_failure(id);
        assert!(breakers.is_available(id));
    }

    #[test]
    fn half_open_admits_single_probe() {
        let breakers = registry(1, 60);
        let id = Uuid::new_v4();
        breakers.force_open_in_past(id, Duration::from_secs(61));
        assert!(breakers.is_available(id));
        // Second caller blocked while probe in flight
        assert!(!breakers.is_available(id));
    }

    #[test]
    fn probe_failure_retrips() {
        let breakers = registry(1, 60);
        let id = Uuid::new_v4();
        breakers.force_open_in_past(id, Duration::from_secs(61));
        assert!(breakers.is_available(id));
        breakers.record_failure(id);
        assert!(!breakers.is_available(id));
    }

    #[test]
    fn probe_success_closes() {
        let breakers = registry(1, 60);
        let id = Uuid::new_v4();
        breakers.force_open_in_past(id, Duration::from_secs(61));
        assert!(breakers.is_available(id));
        breakers.record_success(id);
        assert!(breakers.is_available(id));
    }

    #[test]
    fn breakers_are_per_tool() {
        let breakers = registry(1, 60);
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        breakers.record_failure(a);
        assert!(!breakers.is_available(a));
        assert!(breakers.is_available(b));
    }
}
