//! `#[repr(C)]` types shared with `include/llmshim.h`.
//!
//! Option fields use 0 for "use the default". Counts, lengths, `top_k`,
//! `top_p` and per-call seeds only accept positive values. Session
//! `temperature` and `top_p` are the exception: a non-null options struct
//! sets them exactly as given, so `temperature = 0` makes a greedy session.

use std::ffi::c_void;
use std::os::raw::{c_char, c_float, c_int};

use llmshim::{FinishReason, InferOptions, ModelOptions, SessionOptions};

pub type LlmshimStatus = c_int;

pub const LLMSHIM_OK: LlmshimStatus = 0;
pub const LLMSHIM_ERR_GENERAL: LlmshimStatus = 1;

pub const LLMSHIM_FINISH_STOP: c_int = FinishReason::Stop as c_int;
pub const LLMSHIM_FINISH_LENGTH: c_int = FinishReason::Length as c_int;
pub const LLMSHIM_FINISH_CANCELLED: c_int = FinishReason::Cancelled as c_int;
pub const LLMSHIM_FINISH_ERROR: c_int = FinishReason::Error as c_int;

/// Capacity of [`LlmshimError::message`], including the terminating NUL.
pub const LLMSHIM_ERROR_MESSAGE_LEN: usize = 512;

/// Receives each fragment (NUL-terminated, `token_len` bytes before the NUL).
/// Return 0 to continue, nonzero to cancel.
pub type LlmshimTokenCallback = Option<
    unsafe extern "C" fn(token: *const c_char, token_len: c_int, user_data: *mut c_void) -> c_int,
>;

#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
pub struct LlmshimModelOptions {
    pub context_length: c_int,
    pub threads: c_int,
    pub gpu_layers: c_int,
    pub use_mmap: bool,
    pub use_mlock: bool,
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
pub struct LlmshimSessionOptions {
    pub context_length: c_int,
    pub batch_size: c_int,
    pub threads: c_int,
    pub seed: c_int,
    pub temperature: c_float,
    pub top_p: c_float,
    pub top_k: c_int,
    pub max_tokens: c_int,
}

#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct LlmshimInferOptions {
    pub prompt: *const c_char,
    pub max_tokens: c_int,
    pub temperature: c_float,
    pub top_p: c_float,
    pub top_k: c_int,
    pub seed: c_int,
}

#[repr(C)]
#[derive(Clone, Copy)]
pub struct LlmshimError {
    pub code: c_int,
    pub message: [c_char; LLMSHIM_ERROR_MESSAGE_LEN],
}

impl Default for LlmshimError {
    fn default() -> Self {
        Self {
            code: 0,
            message: [0; LLMSHIM_ERROR_MESSAGE_LEN],
        }
    }
}

/// Owned by the caller until passed to `llmshim_free_completion`.
#[repr(C)]
#[derive(Debug)]
pub struct LlmshimCompletion {
    pub text: *mut c_char,
    pub tokens: *mut *mut c_char,
    pub token_count: c_int,
    pub latency_ms: c_int,
    pub finish_reason: c_int,
}

impl Default for LlmshimCompletion {
    fn default() -> Self {
        Self {
            text: std::ptr::null_mut(),
            tokens: std::ptr::null_mut(),
            token_count: 0,
            latency_ms: 0,
            finish_reason: LLMSHIM_FINISH_STOP,
        }
    }
}

fn positive(v: c_int) -> Option<u32> {
    (v > 0).then_some(v as u32)
}

fn nonzero(v: c_int) -> Option<i32> {
    (v != 0).then_some(v)
}

fn nonzero_f32(v: c_float) -> Option<f32> {
    (v != 0.0).then_some(v)
}

fn positive_i32(v: c_int) -> Option<i32> {
    (v > 0).then_some(v)
}

fn positive_f32(v: c_float) -> Option<f32> {
    (v > 0.0).then_some(v)
}

/// Session seeds keep every nonzero bit pattern.
fn session_seed(v: c_int) -> Option<u32> {
    (v != 0).then_some(v as u32)
}

impl From<&LlmshimModelOptions> for ModelOptions {
    fn from(o: &LlmshimModelOptions) -> Self {
        Self {
            context_length: positive(o.context_length),
            threads: positive(o.threads),
            gpu_layers: o.gpu_layers.max(0) as u32,
            use_mmap: o.use_mmap,
            use_mlock: o.use_mlock,
        }
    }
}

impl From<&LlmshimSessionOptions> for SessionOptions {
    fn from(o: &LlmshimSessionOptions) -> Self {
        Self {
            context_length: positive(o.context_length),
            batch_size: positive(o.batch_size),
            threads: positive(o.threads),
            seed: session_seed(o.seed),
            temperature: Some(o.temperature),
            top_p: Some(o.top_p),
            top_k: positive_i32(o.top_k),
            max_tokens: positive_i32(o.max_tokens),
        }
    }
}

impl LlmshimInferOptions {
    /// Overrides with an owned prompt. 0 defers to the session. A negative
    /// temperature selects greedy decoding and a negative `max_tokens`
    /// yields an empty cancelled completion; negative `top_p`, `top_k` and
    /// `seed` defer like 0.
    pub(crate) fn to_options(&self, prompt: String) -> InferOptions {
        InferOptions {
            prompt,
            max_tokens: nonzero(self.max_tokens),
            temperature: nonzero_f32(self.temperature),
            top_p: positive_f32(self.top_p),
            top_k: positive_i32(self.top_k),
            seed: positive_i32(self.seed).map(|s| s as u32),
        }
    }
}
