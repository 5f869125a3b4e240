//! # llmshim
//!
//! Session lifecycle and generation engine over a pluggable inference engine.
//!
//! - [`backend_init`]: exactly-once backend discovery
//! - [`Model`]: loaded weights plus a derived default context length
//! - [`Session`]: one execution context and its sampling defaults
//! - [`Session::infer`] / [`Session::infer_streaming`]: tokenize, prime, and
//!   run the sample → emit → decode loop
//! - [`Completion`]: generated text, per-token fragments, latency, finish reason
//!
//! ```no_run
//! use llmshim::{InferOptions, Model, ModelOptions, Session, SessionOptions, TinyModel};
//!
//! let model = Model::<TinyModel>::load("model.json", &ModelOptions::default())?;
//! let mut session = Session::new(model, &SessionOptions::default())?;
//! let out = session.infer(&InferOptions::new("Hello").with_max_tokens(16))?;
//! println!("{} ({:?})", out.text, out.finish_reason);
//! # Ok::<(), llmshim::Error>(())
//! ```

mod backend;
mod completion;
mod error;
mod generation;
mod model;
mod options;
mod session;
mod sink;

pub use backend::backend_init;
pub use completion::{Completion, FinishReason};
pub use error::{Error, ErrorCode, Result};
pub use model::{Model, FALLBACK_CONTEXT_LENGTH};
pub use options::{InferOptions, ModelOptions, SessionOptions};
pub use session::{Session, SessionDefaults};
pub use sink::TokenSink;

pub use llmshim_engine::{EngineContext, EngineModel, TokenId};
pub use llmshim_runtime::{
    CaptureTelemetry, GenerationMetrics, NoopTelemetry, RuntimeInfo, TelemetryHook, TinyModel,
    TracingTelemetry,
};
pub use llmshim_sampling::DEFAULT_SEED;
