//! # llmshim-engine
//!
//! The "narrow waist" of the llmshim stack. Defines the primitive contract the
//! generation core consumes from a tensor-inference engine: tokenization,
//! context priming and decoding, logits access, token-to-text conversion and
//! end-of-generation detection. Swap the reference CPU engine for an FFI-backed
//! one without touching the session lifecycle code.
//!
//! ## Design Notes
//!
//! ### Shared model, exclusive context
//! [`EngineModel`] is `Send + Sync` and its methods take `&self`: weights and
//! vocabulary are read-only after load and may be referenced by any number of
//! sessions on any number of threads. [`EngineContext`] mutates in place on
//! every decode, so its methods take `&mut self` and a context is owned by
//! exactly one session.
//!
//! ### Token Type
//! `TokenId` is aliased as `i32` for FFI compatibility, though token IDs are
//! logically non-negative.

use std::path::Path;

use serde::Deserialize;

pub type Result<T> = std::result::Result<T, EngineError>;

/// Token ID type (i32 for FFI compat; logically non-negative).
pub type TokenId = i32;

/// Errors reported by engine primitives.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EngineError {
    #[error("model loading failed: {0}")]
    ModelLoad(String),
    #[error("context initialization failed: {0}")]
    ContextInit(String),
    #[error("tokenization failed: {0}")]
    Tokenization(String),
    #[error("tokenization overflow")]
    TokenOverflow,
    #[error("encode failed: {0}")]
    Encode(String),
    #[error("decode failed: {0}")]
    Decode(String),
    #[error("token {token} has no text form: {reason}")]
    TokenPiece { token: TokenId, reason: String },
}

/// Parameters for loading model weights.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ModelParams {
    /// Number of layers to offload to an accelerator. 0 keeps everything on CPU.
    pub gpu_layers: u32,
    /// Memory-map the weight file instead of reading it into owned buffers.
    pub use_mmap: bool,
    /// Ask the OS to keep the weights resident.
    pub use_mlock: bool,
}

impl Default for ModelParams {
    fn default() -> Self {
        Self {
            gpu_layers: 0,
            use_mmap: true,
            use_mlock: false,
        }
    }
}

/// Parameters fixed when an execution context is created.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContextParams {
    /// Maximum number of positions the context can hold.
    pub n_ctx: u32,
    /// Largest logical batch accepted by a single `decode`/`encode` call.
    pub n_batch: u32,
    /// Physical micro-batch size.
    pub n_ubatch: u32,
    /// Worker threads. 0 lets the engine choose.
    pub n_threads: u32,
}

impl ContextParams {
    /// Context of `n_ctx` positions whose batch covers the full window.
    pub fn with_full_batch(n_ctx: u32) -> Self {
        Self {
            n_ctx,
            n_batch: n_ctx,
            n_ubatch: n_ctx,
            n_threads: 0,
        }
    }
}

/// A loaded model: weights plus vocabulary.
///
/// Implementations must be safe to share across threads; nothing here mutates
/// after [`EngineModel::load`] returns.
pub trait EngineModel: Send + Sync + Sized + 'static {
    /// Execution context type bound to this model.
    type Context: EngineContext;

    /// Load weights and vocabulary from `path`.
    fn load(path: &Path, params: &ModelParams) -> Result<Self>;

    /// Context length the model was trained with. May be ≤ 0 when unknown.
    fn n_ctx_train(&self) -> i32;

    /// Vocabulary size.
    fn n_vocab(&self) -> usize;

    /// Whether the model has an encoder stack (encoder–decoder architecture).
    fn has_encoder(&self) -> bool;

    /// Model-specific decoder start token, if the model defines one.
    fn decoder_start_token(&self) -> Option<TokenId>;

    /// Beginning-of-sequence token.
    fn token_bos(&self) -> TokenId;

    /// Convert text into token IDs.
    ///
    /// `add_special` prepends BOS when the vocabulary asks for it;
    /// `parse_special` lets special pieces in the text map to their tokens.
    fn tokenize(&self, text: &str, add_special: bool, parse_special: bool)
        -> Result<Vec<TokenId>>;

    /// UTF-8 text fragment for a single token.
    fn token_to_piece(&self, token: TokenId) -> Result<String>;

    /// Whether `token` marks the end of generation.
    fn is_eog(&self, token: TokenId) -> bool;

    /// Allocate a fresh execution context.
    fn new_context(&self, params: &ContextParams) -> Result<Self::Context>;
}

/// Mutable decode state bound to one model.
pub trait EngineContext: Send {
    /// Drop every cached position (attention/KV memory and encoder output).
    fn clear_memory(&mut self);

    /// Run the encoder over `tokens`. Only valid for encoder–decoder models.
    fn encode(&mut self, tokens: &[TokenId]) -> Result<()>;

    /// Append `tokens` to the context and compute logits for the last one.
    fn decode(&mut self, tokens: &[TokenId]) -> Result<()>;

    /// Logits over the vocabulary for the most recently decoded position.
    fn logits(&self) -> Option<&[f32]>;

    /// Context window size in positions.
    fn n_ctx(&self) -> u32;

    /// Logical batch size.
    fn n_batch(&self) -> u32;
}
