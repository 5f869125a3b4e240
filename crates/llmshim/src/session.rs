use std::fmt;
use std::sync::Arc;

use llmshim_engine::{ContextParams, EngineModel};
use llmshim_runtime::{TelemetryHook, TinyModel, TracingTelemetry};
use llmshim_sampling::DEFAULT_SEED;
use uuid::Uuid;

use crate::completion::Completion;
use crate::error::{Error, Result};
use crate::model::Model;
use crate::options::{InferOptions, SessionOptions};
use crate::sink::{Discard, TokenSink};

/// Generation parameters used when a call leaves them unset.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SessionDefaults {
    pub max_tokens: i32,
    pub temperature: f32,
    pub top_p: f32,
    pub top_k: i32,
    pub seed: u32,
}

impl Default for SessionDefaults {
    fn default() -> Self {
        Self {
            max_tokens: 256,
            temperature: 0.7,
            top_p: 0.9,
            top_k: 40,
            seed: DEFAULT_SEED,
        }
    }
}

impl SessionDefaults {
    fn resolve(options: &SessionOptions) -> Self {
        let base = Self::default();
        Self {
            max_tokens: options
                .max_tokens
                .filter(|&n| n > 0)
                .unwrap_or(base.max_tokens),
            temperature: options.temperature.unwrap_or(base.temperature),
            top_p: options.top_p.unwrap_or(base.top_p),
            top_k: options.top_k.filter(|&k| k > 0).unwrap_or(base.top_k),
            seed: options.seed.filter(|&s| s != 0).unwrap_or(base.seed),
        }
    }
}

/// One execution context bound to a [`Model`].
///
/// Calls take `&mut self`: a session runs one inference at a time. Separate
/// sessions, even on the same model, can run on separate threads.
pub struct Session<M: EngineModel = TinyModel> {
    pub(crate) id: Uuid,
    pub(crate) model: Arc<Model<M>>,
    pub(crate) ctx: M::Context,
    pub(crate) context_length: u32,
    pub(crate) batch_size: u32,
    pub(crate) threads: u32,
    pub(crate) defaults: SessionDefaults,
    pub(crate) telemetry: Box<dyn TelemetryHook>,
}

impl<M: EngineModel> Session<M> {
    /// Allocate an execution context on `model`.
    pub fn new(model: Arc<Model<M>>, options: &SessionOptions) -> Result<Self> {
        let context_length = options
            .context_length
            .filter(|&n| n > 0)
            .unwrap_or_else(|| model.default_context_length());
        let batch_size = options
            .batch_size
            .filter(|&n| n > 0)
            .unwrap_or(context_length);
        let threads = options
            .threads
            .filter(|&n| n > 0)
            .or(model.default_threads())
            .unwrap_or(0);

        let params = ContextParams {
            n_ctx: context_length,
            n_batch: batch_size,
            n_ubatch: batch_size,
            n_threads: threads,
        };
        let ctx = model
            .engine()
            .new_context(&params)
            .map_err(Error::ContextInit)?;

        let id = Uuid::new_v4();
        tracing::debug!(
            session = %id,
            context_length,
            batch_size,
            threads,
            "new session"
        );

        Ok(Self {
            id,
            model,
            ctx,
            context_length,
            batch_size,
            threads,
            defaults: SessionDefaults::resolve(options),
            telemetry: Box::new(TracingTelemetry),
        })
    }

    /// Replace the telemetry hook (default: [`TracingTelemetry`]).
    pub fn with_telemetry(mut self, hook: impl TelemetryHook + 'static) -> Self {
        self.telemetry = Box::new(hook);
        self
    }

    /// Run a blocking inference call.
    pub fn infer(&mut self, options: &InferOptions) -> Result<Completion> {
        self.generate(options, &mut Discard)
    }

    /// Run an inference call, handing each fragment to `sink` as it is produced.
    pub fn infer_streaming(
        &mut self,
        options: &InferOptions,
        mut sink: impl TokenSink,
    ) -> Result<Completion> {
        self.generate(options, &mut sink)
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn model(&self) -> &Arc<Model<M>> {
        &self.model
    }

    pub fn context_length(&self) -> u32 {
        self.context_length
    }

    pub fn batch_size(&self) -> u32 {
        self.batch_size
    }

    /// Thread count given to the engine. 0 means the engine chooses.
    pub fn threads(&self) -> u32 {
        self.threads
    }

    pub fn defaults(&self) -> &SessionDefaults {
        &self.defaults
    }
}

impl<M: EngineModel> fmt::Debug for Session<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("context_length", &self.context_length)
            .field("batch_size", &self.batch_size)
            .field("threads", &self.threads)
            .field("defaults", &self.defaults)
            .finish_non_exhaustive()
    }
}
