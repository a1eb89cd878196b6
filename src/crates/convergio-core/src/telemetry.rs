//! Telemetry counters, provider statistics and audit helpers
//!
//! Counters are plain atomics so hot paths never take a lock; the per
//! provider statistics map is guarded by a mutex that is only held for the
//! duration of a field update. Snapshots are cheap value copies for the CLI
//! and report formatters.

use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use tracing::warn;

/// Workflow-level counters
#[derive(Debug, Default)]
pub struct Telemetry {
    workflows_started: AtomicU64,
    workflows_completed: AtomicU64,
    workflows_failed: AtomicU64,
    nodes_executed: AtomicU64,
    node_errors: AtomicU64,
    providers: Mutex<HashMap<String, ProviderCounters>>,
}

#[derive(Debug, Default, Clone)]
struct ProviderCounters {
    sent: u64,
    received: u64,
    total_latency_ms: u64,
    cache_hits: u64,
    errors: u64,
}

/// Point-in-time copy of one provider's statistics
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ProviderStats {
    pub sent: u64,
    pub received: u64,
    pub avg_latency_ms: u64,
    pub cache_hits: u64,
    pub errors: u64,
}

/// Point-in-time copy of all counters
#[derive(Debug, Clone, Serialize)]
pub struct TelemetrySnapshot {
    pub workflows_started: u64,
    pub workflows_completed: u64,
    pub workflows_failed: u64,
    pub nodes_executed: u64,
    pub node_errors: u64,
    pub providers: HashMap<String, ProviderStats>,
}

impl Telemetry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn workflow_started(&self) {
        self.workflows_started.fetch_add(1, Ordering::Relaxed);
    }

    pub fn workflow_completed(&self) {
        self.workflows_completed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn workflow_failed(&self) {
        self.workflows_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn node_executed(&self) {
        self.nodes_executed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn node_error(&self) {
        self.node_errors.fetch_add(1, Ordering::Relaxed);
    }

    /// Record one provider round trip
    pub fn provider_call(&self, provider: &str, latency_ms: u64, cache_hit: bool, error: bool) {
        let mut providers = self.providers.lock().expect("telemetry lock poisoned");
        let counters = providers.entry(provider.to_string()).or_default();
        counters.sent += 1;
        if error {
            counters.errors += 1;
        } else {
            counters.received += 1;
            counters.total_latency_ms += latency_ms;
        }
        if cache_hit {
            counters.cache_hits += 1;
        }
    }

    pub fn snapshot(&self) -> TelemetrySnapshot {
        let providers = self
            .providers
            .lock()
            .expect("telemetry lock poisoned")
            .iter()
            .map(|(name, c)| {
                let avg = if c.received > 0 {
                    c.total_latency_ms / c.received
                } else {
                    0
                };
                (
                    name.clone(),
                    ProviderStats {
                        sent: c.sent,
                        received: c.received,
                        avg_latency_ms: avg,
                        cache_hits: c.cache_hits,
                        errors: c.errors,
                    },
                )
            })
            .collect();

        TelemetrySnapshot {
            workflows_started: self.workflows_started.load(Ordering::Relaxed),
            workflows_completed: self.workflows_completed.load(Ordering::Relaxed),
            workflows_failed: self.workflows_failed.load(Ordering::Relaxed),
            nodes_executed: self.nodes_executed.load(Ordering::Relaxed),
            node_errors: self.node_errors.load(Ordering::Relaxed),
            providers,
        }
    }
}

/// Emit a security-audit event for a validation failure
pub fn audit_validation_failure(surface: &str, detail: &str) {
    warn!(
        category = "security",
        surface,
        detail = %sanitize_for_log(detail, 256),
        "input validation failed"
    );
}

/// Truncate and strip control characters so untrusted text is log-safe
pub fn sanitize_for_log(text: &str, max_chars: usize) -> String {
    let mut out: String = text
        .chars()
        .filter(|c| !c.is_control() || *c == ' ')
        .take(max_chars)
        .collect();
    if text.chars().count() > max_chars {
        out.push('…');
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_accumulate() {
        let t = Telemetry::new();
        t.workflow_started();
        t.workflow_started();
        t.workflow_completed();
        t.node_executed();
        t.node_error();

        let snap = t.snapshot();
        assert_eq!(snap.workflows_started, 2);
        assert_eq!(snap.workflows_completed, 1);
        assert_eq!(snap.workflows_failed, 0);
        assert_eq!(snap.nodes_executed, 1);
        assert_eq!(snap.node_errors, 1);
    }

    #[test]
    fn test_provider_stats_average_latency() {
        let t = Telemetry::new();
        t.provider_call("anthropic", 100, false, false);
        t.provider_call("anthropic", 300, true, false);
        t.provider_call("anthropic", 0, false, true);

        let snap = t.snapshot();
        let stats = &snap.providers["anthropic"];
        assert_eq!(stats.sent, 3);
        assert_eq!(stats.received, 2);
        assert_eq!(stats.avg_latency_ms, 200);
        assert_eq!(stats.cache_hits, 1);
        assert_eq!(stats.errors, 1);
    }

    #[test]
    fn test_sanitize_for_log() {
        assert_eq!(sanitize_for_log("plain", 10), "plain");
        assert_eq!(sanitize_for_log("a\x07b\nc", 10), "abc");
        let long = "x".repeat(20);
        let out = sanitize_for_log(&long, 10);
        assert!(out.starts_with("xxxxxxxxxx"));
        assert!(out.ends_with('…'));
    }
}
