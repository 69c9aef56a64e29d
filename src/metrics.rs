//! Run counters for cache and provider activity.
//!
//! One instance is created per run and shared by `Arc` with the client and
//! the worker pool.

use serde::Serialize;
use std::sync::atomic::{AtomicUsize, Ordering};

#[derive(Debug, Default)]
pub struct PipelineMetrics {
    /// Leaves whose translation was already cached
    cache_hits: AtomicUsize,

    /// Leaves that needed a provider round-trip
    cache_misses: AtomicUsize,

    /// Translations requested from the provider (retries count once)
    provider_calls: AtomicUsize,

    /// Translations that failed every attempt
    provider_failures: AtomicUsize,

    /// Leaves skipped as blank or not in the source script
    pass_throughs: AtomicUsize,
}

impl PipelineMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_cache_hit(&self) {
        self.cache_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_cache_miss(&self) {
        self.cache_misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_provider_call(&self) {
        self.provider_calls.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_provider_failure(&self) {
        self.provider_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_pass_through(&self) {
        self.pass_throughs.fetch_add(1, Ordering::Relaxed);
    }

    /// Snapshot the counters.
    pub fn report(&self) -> MetricsReport {
        let hits = self.cache_hits.load(Ordering::Relaxed);
        let misses = self.cache_misses.load(Ordering::Relaxed);
        let total_cache_queries = hits + misses;
        let cache_hit_rate = if total_cache_queries > 0 {
            (hits as f64 / total_cache_queries as f64) * 100.0
        } else {
            0.0
        };

        let calls = self.provider_calls.load(Ordering::Relaxed);
        let failures = self.provider_failures.load(Ordering::Relaxed);
        let provider_success_rate = if calls > 0 {
            (calls.saturating_sub(failures) as f64 / calls as f64) * 100.0
        } else {
            0.0
        };

        MetricsReport {
            cache_hits: hits,
            cache_misses: misses,
            cache_hit_rate,
            provider_calls: calls,
            provider_failures: failures,
            provider_success_rate,
            pass_throughs: self.pass_throughs.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time view of [`PipelineMetrics`].
#[derive(Debug, Clone, Serialize)]
pub struct MetricsReport {
    pub cache_hits: usize,
    pub cache_misses: usize,
    /// Percentage (0-100)
    pub cache_hit_rate: f64,
    pub provider_calls: usize,
    pub provider_failures: usize,
    /// Percentage (0-100)
    pub provider_success_rate: f64,
    pub pass_throughs: usize,
}
