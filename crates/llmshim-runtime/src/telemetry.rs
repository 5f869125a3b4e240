//! Telemetry hooks for generation performance measurement.
//!
//! Provides:
//! - [`GenerationMetrics`]: priming latency, tokens/sec, and call summary
//! - [`TelemetryHook`] trait: callback interface for real-time metric reporting
//! - [`GenerationTimer`]: records timestamps and computes metrics
//! - [`NoopTelemetry`] / [`TracingTelemetry`] / [`CaptureTelemetry`]: built-in hooks

use std::sync::{Arc, Mutex};
use std::time::Instant;

use crate::backend::Backend;

/// Aggregate metrics from one inference call.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationMetrics {
    /// Backend used for this call.
    pub backend: Backend,
    /// Tokens processed by the priming pass.
    pub prompt_tokens: usize,
    /// Tokens emitted by the decode loop.
    pub generated_tokens: usize,
    /// Time spent in the priming decode, in milliseconds.
    pub prime_ms: f64,
    /// Decode-loop throughput (excludes priming).
    pub tokens_per_sec: f64,
    /// Wall-clock time from the first decode to the end of the loop, in milliseconds.
    pub total_ms: f64,
}

impl GenerationMetrics {
    /// Whole-millisecond latency reported to callers.
    pub fn latency_ms(&self) -> u64 {
        self.total_ms as u64
    }
}

/// Callback trait for real-time generation telemetry.
///
/// All methods have default no-op implementations so hooks can be selective.
pub trait TelemetryHook: Send + Sync {
    /// Called once the priming decode has completed.
    fn on_primed(&self, _prime_ms: f64) {}

    /// Called after each emitted token.
    fn on_token(&self, _token_idx: usize, _elapsed_ms: f64) {}

    /// Called when the decode loop finishes with the full metrics summary.
    fn on_complete(&self, _metrics: &GenerationMetrics) {}
}

/// No-op telemetry hook.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopTelemetry;

impl TelemetryHook for NoopTelemetry {}

/// Emits a `tracing` debug event per completed call.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingTelemetry;

impl TelemetryHook for TracingTelemetry {
    fn on_complete(&self, m: &GenerationMetrics) {
        tracing::debug!(
            backend = %m.backend,
            prompt_tokens = m.prompt_tokens,
            generated_tokens = m.generated_tokens,
            prime_ms = m.prime_ms,
            tokens_per_sec = m.tokens_per_sec,
            total_ms = m.total_ms,
            "generation complete"
        );
    }
}

/// Keeps the last completed call's metrics and a running token count.
#[derive(Debug, Clone, Default)]
pub struct CaptureTelemetry {
    last_report: Arc<Mutex<Option<GenerationMetrics>>>,
    tokens_seen: Arc<Mutex<usize>>,
}

impl CaptureTelemetry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Metrics from the most recent completed call.
    pub fn last_metrics(&self) -> Option<GenerationMetrics> {
        self.last_report
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Total `on_token` callbacks observed.
    pub fn tokens_seen(&self) -> usize {
        *self.tokens_seen.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl TelemetryHook for CaptureTelemetry {
    fn on_token(&self, _token_idx: usize, _elapsed_ms: f64) {
        *self.tokens_seen.lock().unwrap_or_else(|e| e.into_inner()) += 1;
    }

    fn on_complete(&self, metrics: &GenerationMetrics) {
        *self.last_report.lock().unwrap_or_else(|e| e.into_inner()) = Some(metrics.clone());
    }
}

/// Records timestamps during a call to compute [`GenerationMetrics`].
///
/// Usage:
/// 1. [`GenerationTimer::start`] immediately before the priming decode
/// 2. [`GenerationTimer::mark_primed`] after it succeeds
/// 3. [`GenerationTimer::mark_token`] after each emitted token
/// 4. [`GenerationTimer::finish`] once the loop ends
pub struct GenerationTimer<'a> {
    backend: Backend,
    prompt_tokens: usize,
    start: Instant,
    primed: Option<Instant>,
    token_count: usize,
    hook: &'a dyn TelemetryHook,
}

impl<'a> GenerationTimer<'a> {
    pub fn start(backend: Backend, prompt_tokens: usize, hook: &'a dyn TelemetryHook) -> Self {
        Self {
            backend,
            prompt_tokens,
            start: Instant::now(),
            primed: None,
            token_count: 0,
            hook,
        }
    }

    pub fn mark_primed(&mut self) {
        let now = Instant::now();
        self.primed = Some(now);
        self.hook
            .on_primed(now.duration_since(self.start).as_secs_f64() * 1000.0);
    }

    pub fn mark_token(&mut self) {
        self.token_count += 1;
        let elapsed_ms = self.start.elapsed().as_secs_f64() * 1000.0;
        self.hook.on_token(self.token_count, elapsed_ms);
    }

    pub fn finish(self) -> GenerationMetrics {
        let total_ms = self.start.elapsed().as_secs_f64() * 1000.0;
        let prime_ms = self
            .primed
            .map(|t| t.duration_since(self.start).as_secs_f64() * 1000.0)
            .unwrap_or(0.0);

        let decode_ms = total_ms - prime_ms;
        let tokens_per_sec = if decode_ms > 0.0 && self.token_count > 0 {
            self.token_count as f64 / (decode_ms / 1000.0)
        } else {
            0.0
        };

        let metrics = GenerationMetrics {
            backend: self.backend,
            prompt_tokens: self.prompt_tokens,
            generated_tokens: self.token_count,
            prime_ms,
            tokens_per_sec,
            total_ms,
        };
        self.hook.on_complete(&metrics);
        metrics
    }
}
