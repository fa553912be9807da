//! Per-method telemetry: metrics-facade counters and histograms plus a
//! bounded ring of recent latencies backing the metrics introspection
//! method.

use metrics::{counter, histogram};
use serde::Serialize;
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

const RING_CAPACITY: usize = 100;

#[derive(Debug, Clone, Serialize)]
pub struct MethodStats {
    pub count: u64,
    pub errors: u64,
    pub avg_ms: f64,
    pub max_ms: u64,
}

#[derive(Default)]
struct MethodRing {
    latencies: VecDeque<Duration>,
    count: u64,
    errors: u64,
}

#[derive(Default)]
pub struct MethodTelemetry {
    rings: Mutex<HashMap<String, MethodRing>>,
}

impl MethodTelemetry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, method: &str, elapsed: Duration, ok: bool) {
        counter!(format!("mcp.method.{method}")).increment(1);
        histogram!(format!("mcp.latency.{method}")).record(elapsed.as_secs_f64());
        if !ok {
            counter!(format!("mcp.errors.{method}")).increment(1);
        }

        let Ok(mut rings) = self.rings.lock() else {
            return;
        };
        let ring = rings.entry(method.to_string()).or_default();
        ring.count += 1;
        if !ok {
            ring.errors += 1;
        }
        if ring.latencies.len() == RING_CAPACITY {
            ring.latencies.pop_front();
        }
        ring.latencies.push_back(elapsed);
    }

    pub fn snapshot(&self) -> HashMap<String, MethodStats> {
        let Ok(rings) = self.rings.lock() else {
            return HashMap::new();
        };
        rings
            .iter()
            .map(|(method, ring)| {
                let total: Duration = ring.latencies.iter().sum();
                let avg_ms = if ring.latencies.is_empty() {
                    0.0
                } else {
                    total.as_secs_f64() * 1000.0 / ring.latencies.len() as f64
                };
                let max_ms = ring
                    .latencies
                    .iter()
                    .max()
                    .map(|d| d.as_millis() as u64)
                    .unwrap_or(0);
                (
                    method.clone(),
                    MethodStats {
                        count: ring.count,
                        errors: ring.errors,
                        avg_ms,
                        max_ms,
                    },
                )
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ring_is_bounded_at_capacity() {
        let telemetry = MethodTelemetry::new();
        for _ in 0..250 {
            telemetry.record("tools/list", Duration::from_millis(2), true);
        }
        let rings = telemetry.rings.lock().unwrap();
        let ring = rings.get("tools/list").unwrap();
        assert_eq!(ring.latencies.len(), RING_CAPACITY);
        assert_eq!(ring.count, 250);
    }

    #[test]
    fn snapshot_reports_errors_and_average() {
        let telemetry = MethodTelemetry::new();
        telemetry.record("tools/call", Duration::from_millis(10), true);
        telemetry.record("tools/call", Duration::from_millis(30), false);
        let stats = telemetry.snapshot();
        let stat = stats.get("tools/call").unwrap();
        assert_eq!(stat.count, 2);
        assert_eq!(stat.errors, 1);
        assert!(stat.avg_ms >= 19.0 && stat.avg_ms <= 21.0);
    }
}
