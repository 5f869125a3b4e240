//! # llmshim-runtime
//!
//! Runtime support for llmshim:
//! - [`backend`]: process-wide, exactly-once backend discovery
//! - [`telemetry`]: generation timing (priming latency, tok/s) and hooks
//! - [`kv`]: bounded key/value cache for the reference engine
//! - [`tiny`]: a small deterministic CPU engine implementing the
//!   `llmshim-engine` contract, loaded from a JSON model file

pub mod backend;
pub mod kv;
pub mod telemetry;
pub mod tiny;

pub use backend::{init, Backend, RuntimeInfo};
pub use telemetry::{
    CaptureTelemetry, GenerationMetrics, GenerationTimer, NoopTelemetry, TelemetryHook,
    TracingTelemetry,
};
pub use tiny::{Architecture, TinyContext, TinyModel, TinyModelFile};
