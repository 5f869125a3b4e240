//! Model, session and per-call options.
//!
//! `None` always means "use the default one level up": engine defaults for
//! the model, model-derived values and fixed fallbacks for the session, and
//! session defaults for each call.

use llmshim_engine::ModelParams;
use serde::Deserialize;

/// Options for [`Model::load`](crate::Model::load).
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ModelOptions {
    /// Overrides the context length derived from model metadata.
    pub context_length: Option<u32>,
    /// Default thread count for sessions that don't choose one.
    pub threads: Option<u32>,
    pub gpu_layers: u32,
    pub use_mmap: bool,
    pub use_mlock: bool,
}

impl Default for ModelOptions {
    fn default() -> Self {
        let params = ModelParams::default();
        Self {
            context_length: None,
            threads: None,
            gpu_layers: params.gpu_layers,
            use_mmap: params.use_mmap,
            use_mlock: params.use_mlock,
        }
    }
}

impl ModelOptions {
    pub fn with_context_length(mut self, context_length: u32) -> Self {
        self.context_length = Some(context_length);
        self
    }

    pub fn with_threads(mut self, threads: u32) -> Self {
        self.threads = Some(threads);
        self
    }

    pub fn with_gpu_layers(mut self, gpu_layers: u32) -> Self {
        self.gpu_layers = gpu_layers;
        self
    }

    pub fn with_mmap(mut self, use_mmap: bool) -> Self {
        self.use_mmap = use_mmap;
        self
    }

    pub fn with_mlock(mut self, use_mlock: bool) -> Self {
        self.use_mlock = use_mlock;
        self
    }

    pub(crate) fn params(&self) -> ModelParams {
        ModelParams {
            gpu_layers: self.gpu_layers,
            use_mmap: self.use_mmap,
            use_mlock: self.use_mlock,
        }
    }
}

/// Options for [`Session::new`](crate::Session::new).
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct SessionOptions {
    /// Context window in positions. `None` or 0 uses the model default.
    pub context_length: Option<u32>,
    /// Largest decode batch. `None` or 0 uses the context length.
    pub batch_size: Option<u32>,
    /// Worker threads. `None` or 0 lets the engine choose.
    pub threads: Option<u32>,
    pub seed: Option<u32>,
    pub temperature: Option<f32>,
    pub top_p: Option<f32>,
    pub top_k: Option<i32>,
    pub max_tokens: Option<i32>,
}

impl SessionOptions {
    pub fn with_context_length(mut self, context_length: u32) -> Self {
        self.context_length = Some(context_length);
        self
    }

    pub fn with_batch_size(mut self, batch_size: u32) -> Self {
        self.batch_size = Some(batch_size);
        self
    }

    pub fn with_threads(mut self, threads: u32) -> Self {
        self.threads = Some(threads);
        self
    }

    pub fn with_seed(mut self, seed: u32) -> Self {
        self.seed = Some(seed);
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    pub fn with_top_p(mut self, top_p: f32) -> Self {
        self.top_p = Some(top_p);
        self
    }

    pub fn with_top_k(mut self, top_k: i32) -> Self {
        self.top_k = Some(top_k);
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: i32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }
}

/// Options for a single inference call.
///
/// Unset fields fall back to the session defaults. Set fields are used as
/// given: `Some(0.0)` temperature selects greedy decoding, and a
/// non-positive `max_tokens` returns an empty cancelled completion.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct InferOptions {
    pub prompt: String,
    pub max_tokens: Option<i32>,
    pub temperature: Option<f32>,
    pub top_p: Option<f32>,
    pub top_k: Option<i32>,
    pub seed: Option<u32>,
}

impl InferOptions {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            ..Self::default()
        }
    }

    pub fn with_max_tokens(mut self, max_tokens: i32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    /// Shorthand for temperature 0.
    pub fn greedy(self) -> Self {
        self.with_temperature(0.0)
    }

    pub fn with_top_p(mut self, top_p: f32) -> Self {
        self.top_p = Some(top_p);
        self
    }

    pub fn with_top_k(mut self, top_k: i32) -> Self {
        self.top_k = Some(top_k);
        self
    }

    pub fn with_seed(mut self, seed: u32) -> Self {
        self.seed = Some(seed);
        self
    }
}
