use std::path::Path;
use std::sync::Arc;

use llmshim_engine::EngineModel;
use llmshim_runtime::{Backend, TinyModel};

use crate::backend::backend_init;
use crate::error::{Error, Result};
use crate::options::ModelOptions;

/// Context length used when model metadata doesn't report a positive one.
pub const FALLBACK_CONTEXT_LENGTH: u32 = 4096;

/// Loaded weights and vocabulary, shared read-only by every session built on it.
///
/// Sessions hold an `Arc<Model>`, so dropping the caller's handle while
/// sessions are alive only releases the weights once the last session goes.
#[derive(Debug)]
pub struct Model<M: EngineModel = TinyModel> {
    engine: M,
    default_context_length: u32,
    default_threads: Option<u32>,
    backend: Backend,
}

impl<M: EngineModel> Model<M> {
    /// Load a model file through the engine.
    pub fn load(path: impl AsRef<Path>, options: &ModelOptions) -> Result<Arc<Self>> {
        let path = path.as_ref();
        if path.as_os_str().is_empty() {
            return Err(Error::InvalidArgument("model path is empty".to_string()));
        }
        backend_init();

        let engine = M::load(path, &options.params()).map_err(Error::ModelLoad)?;
        let model = Self::from_engine(engine, options);
        tracing::info!(
            path = %path.display(),
            context_length = model.default_context_length,
            "model ready"
        );
        Ok(model)
    }

    /// Wrap an already-loaded engine model.
    pub fn from_engine(engine: M, options: &ModelOptions) -> Arc<Self> {
        let backend = backend_init().active();
        let default_context_length = options
            .context_length
            .filter(|&n| n > 0)
            .unwrap_or_else(|| match engine.n_ctx_train() {
                n if n > 0 => n as u32,
                _ => FALLBACK_CONTEXT_LENGTH,
            });

        Arc::new(Self {
            engine,
            default_context_length,
            default_threads: options.threads.filter(|&n| n > 0),
            backend,
        })
    }

    pub fn engine(&self) -> &M {
        &self.engine
    }

    /// Context length sessions get when they don't ask for one.
    pub fn default_context_length(&self) -> u32 {
        self.default_context_length
    }

    pub fn default_threads(&self) -> Option<u32> {
        self.default_threads
    }

    pub fn backend(&self) -> Backend {
        self.backend
    }
}
