//! Usage accounting for model calls.

use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Approximate USD cost per token.
pub fn cost_per_token(model: &str) -> f64 {
    match model {
        "gpt-3.5-turbo" => 0.000_001_5,
        "gpt-4" => 0.000_03,
        _ => 0.000_001_5,
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct MonitoringStats {
    pub total_calls: u64,
    pub total_tokens: u64,
    pub total_cost: f64,
    /// Seconds, averaged over all calls.
    pub avg_response_time: f64,
}

impl MonitoringStats {
    pub fn record(&mut self, model: &str, tokens: u64, elapsed: Duration) {
        self.total_calls += 1;
        self.total_tokens += tokens;
        self.total_cost += tokens as f64 * cost_per_token(model);
        let n = self.total_calls as f64;
        self.avg_response_time =
            (self.avg_response_time * (n - 1.0) + elapsed.as_secs_f64()) / n;
    }
}

/// Shared handle to one backend's stats. Clones observe the same counters.
#[derive(Debug, Clone, Default)]
pub struct Monitor {
    stats: Arc<Mutex<MonitoringStats>>,
}

impl Monitor {
    pub fn record(&self, model: &str, tokens: u64, elapsed: Duration) {
        if let Ok(mut stats) = self.stats.lock() {
            stats.record(model, tokens, elapsed);
        }
    }

    pub fn snapshot(&self) -> MonitoringStats {
        self.stats.lock().map(|s| *s).unwrap_or_default()
    }

    pub fn reset(&self) {
        if let Ok(mut stats) = self.stats.lock() {
            *stats = MonitoringStats::default();
        }
    }
}
