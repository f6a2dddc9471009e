// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Metrics instrumentation for reflect-engine.
//!
//! Uses the `metrics` crate for backend-agnostic metrics collection.
//! The host server is responsible for choosing the exporter (Prometheus, OTEL, etc.)
//!
//! # Metric Naming Convention
//! - `reflect_engine_` prefix for all metrics
//! - `_total` suffix for counters
//! - `_seconds` suffix for duration histograms
//!
//! # Labels
//! - `operation`: set_node, remove_nodes, subscribe, ...
//! - `status`: success, or an error code (`not_found`, `access_denied`, ...)
//! - `reason`: why a batch was flushed

use metrics::{counter, gauge, histogram};
use std::time::{Duration, Instant};

use crate::matcher::TraversalMode;
use crate::notify::FlushReason;

/// Record a completed public operation
pub fn record_operation(operation: &str, status: &str) {
    counter!(
        "reflect_engine_operations_total",
        "operation" => operation.to_string(),
        "status" => status.to_string()
    )
    .increment(1);
}

/// Record operation latency
pub fn record_latency(operation: &str, duration: Duration) {
    histogram!(
        "reflect_engine_operation_seconds",
        "operation" => operation.to_string()
    )
    .record(duration.as_secs_f64());
}

/// Record the outcome of a fallible operation in one call
pub fn record_result<T>(operation: &str, result: &crate::Result<T>) {
    match result {
        Ok(_) => record_operation(operation, "success"),
        Err(e) => record_operation(operation, e.code()),
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// TRAVERSAL
// ═══════════════════════════════════════════════════════════════════════════

/// Record a finished traversal and how many nodes it visited
pub fn record_traversal(mode: TraversalMode, visited: usize) {
    let mode = match mode {
        TraversalMode::Auto => "auto",
        TraversalMode::ForceScan => "force_scan",
    };
    counter!("reflect_engine_traversals_total", "mode" => mode).increment(1);
    histogram!("reflect_engine_traversal_visits").record(visited as f64);
}

/// Record which strategy picked the children at one level
pub fn record_traversal_level(direct_lookup: bool) {
    let strategy = if direct_lookup { "lookup" } else { "scan" };
    counter!("reflect_engine_traversal_levels_total", "strategy" => strategy).increment(1);
}

// ═══════════════════════════════════════════════════════════════════════════
// SUBSCRIBER-SET POOL
// ═══════════════════════════════════════════════════════════════════════════

/// Record a pool lookup
pub fn record_pool_lookup(hit: bool) {
    let outcome = if hit { "hit" } else { "miss" };
    counter!("reflect_engine_pool_lookups_total", "outcome" => outcome).increment(1);
}

/// Record sets dropped from the pool cache
pub fn record_pool_evictions(count: usize) {
    counter!("reflect_engine_pool_evictions_total").increment(count as u64);
}

/// Set number of sets currently cached
pub fn set_pool_cached_sets(count: usize) {
    gauge!("reflect_engine_pool_cached_sets").set(count as f64);
}

// ═══════════════════════════════════════════════════════════════════════════
// NOTIFICATION PIPELINE
// ═══════════════════════════════════════════════════════════════════════════

/// Record a flushed update batch
pub fn record_flush(reason: FlushReason, items: usize) {
    histogram!(
        "reflect_engine_flush_items",
        "reason" => reason.as_str()
    )
    .record(items as f64);
}

/// Record queued payloads erased by a superseding update
pub fn record_superseded(count: usize) {
    counter!("reflect_engine_superseded_total").increment(count as u64);
}

/// Record undelivered results dropped at a client's request
pub fn record_jettisoned(count: usize) {
    counter!("reflect_engine_jettisoned_total").increment(count as u64);
}

/// Record a message that could not be handed to a session
pub fn record_delivery_failure() {
    counter!("reflect_engine_delivery_failures_total").increment(1);
}

// ═══════════════════════════════════════════════════════════════════════════
// SIZES
// ═══════════════════════════════════════════════════════════════════════════

/// Set live node count (root included)
pub fn set_node_count(count: usize) {
    gauge!("reflect_engine_nodes").set(count as f64);
}

/// Set attached session count
pub fn set_session_count(count: usize) {
    gauge!("reflect_engine_sessions").set(count as f64);
}

/// A timing guard that records latency on drop
pub struct LatencyTimer {
    operation: &'static str,
    start: Instant,
}

impl LatencyTimer {
    /// Start a new latency timer
    pub fn new(operation: &'static str) -> Self {
        Self {
            operation,
            start: Instant::now(),
        }
    }
}

impl Drop for LatencyTimer {
    fn drop(&mut self) {
        record_latency(self.operation, self.start.elapsed());
    }
}
