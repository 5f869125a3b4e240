//! Flat C ABI over `llmshim`.
//!
//! Every entry point reports through an integer status plus an optional
//! caller-owned [`LlmshimError`] record, and never unwinds across the
//! boundary. Handles are opaque; the matching header is
//! `include/llmshim.h`.

use std::ffi::{c_void, CStr};
use std::ops::ControlFlow;
use std::os::raw::{c_char, c_int};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use llmshim::{ErrorCode, Model, ModelOptions, Session, SessionOptions, TinyModel, TokenSink};

pub mod logging;
mod record;
pub mod types;

pub use types::*;

use record::{fill_completion, fill_failed, release_completion, report, to_c_string, write_error};

/// Opaque model handle. Sessions keep the weights alive past
/// `llmshim_free_model`.
pub struct LlmshimModel {
    inner: Arc<Model<TinyModel>>,
}

/// Opaque session handle. Not safe for concurrent calls.
pub struct LlmshimSession {
    inner: Session<TinyModel>,
}

const INVALID_ARGUMENTS: &str = "invalid arguments";

/// Run `f`, turning a panic into a general error.
unsafe fn guarded<F>(err: *mut LlmshimError, f: F) -> c_int
where
    F: FnOnce() -> c_int,
{
    match catch_unwind(AssertUnwindSafe(f)) {
        Ok(status) => status,
        Err(_) => {
            tracing::error!("panic caught at the C boundary");
            write_error(err, ErrorCode::General, "internal panic");
            LLMSHIM_ERR_GENERAL
        }
    }
}

/// Run a void entry point, logging a panic instead of unwinding.
fn contained<F>(entry: &'static str, f: F)
where
    F: FnOnce(),
{
    if catch_unwind(AssertUnwindSafe(f)).is_err() {
        tracing::error!(entry, "panic caught at the C boundary");
    }
}

unsafe fn invalid(err: *mut LlmshimError) -> c_int {
    write_error(err, ErrorCode::InvalidArgument, INVALID_ARGUMENTS);
    LLMSHIM_ERR_GENERAL
}

/// Borrow a NUL-terminated UTF-8 string, or `None` if null or malformed.
unsafe fn borrow_str<'a>(p: *const c_char) -> Option<&'a str> {
    if p.is_null() {
        return None;
    }
    CStr::from_ptr(p).to_str().ok()
}

/// Initialize logging and the compute backend. Idempotent and thread-safe;
/// the other entry points call it implicitly where needed.
#[no_mangle]
pub extern "C" fn llmshim_backend_init() {
    contained("llmshim_backend_init", || {
        logging::init();
        llmshim::backend_init();
    });
}

/// Load a model file.
///
/// # Safety
/// `path` must be a NUL-terminated string. `options` may be null (all
/// defaults). `out_model` must be writable. `err` may be null.
#[no_mangle]
pub unsafe extern "C" fn llmshim_load_model(
    path: *const c_char,
    options: *const LlmshimModelOptions,
    out_model: *mut *mut LlmshimModel,
    err: *mut LlmshimError,
) -> c_int {
    guarded(err, || {
        if out_model.is_null() {
            return invalid(err);
        }
        *out_model = std::ptr::null_mut();
        let Some(path) = borrow_str(path) else {
            return invalid(err);
        };
        logging::init();

        let options = options
            .as_ref()
            .map(ModelOptions::from)
            .unwrap_or_default();
        match Model::<TinyModel>::load(path, &options) {
            Ok(inner) => {
                *out_model = Box::into_raw(Box::new(LlmshimModel { inner }));
                LLMSHIM_OK
            }
            Err(e) => {
                report(err, &e);
                LLMSHIM_ERR_GENERAL
            }
        }
    })
}

/// Release a model handle. Null is ignored.
///
/// # Safety
/// `model` must come from `llmshim_load_model` and not be freed twice.
#[no_mangle]
pub unsafe extern "C" fn llmshim_free_model(model: *mut LlmshimModel) {
    if model.is_null() {
        return;
    }
    contained("llmshim_free_model", || drop(Box::from_raw(model)));
}

/// Create a session bound to `model`.
///
/// # Safety
/// `model` must be a live handle. `options` may be null. `out_session`
/// must be writable. `err` may be null.
#[no_mangle]
pub unsafe extern "C" fn llmshim_new_session(
    model: *const LlmshimModel,
    options: *const LlmshimSessionOptions,
    out_session: *mut *mut LlmshimSession,
    err: *mut LlmshimError,
) -> c_int {
    guarded(err, || {
        if out_session.is_null() {
            return invalid(err);
        }
        *out_session = std::ptr::null_mut();
        let Some(model) = model.as_ref() else {
            return invalid(err);
        };

        let options = options
            .as_ref()
            .map(SessionOptions::from)
            .unwrap_or_default();
        match Session::new(Arc::clone(&model.inner), &options) {
            Ok(inner) => {
                *out_session = Box::into_raw(Box::new(LlmshimSession { inner }));
                LLMSHIM_OK
            }
            Err(e) => {
                report(err, &e);
                LLMSHIM_ERR_GENERAL
            }
        }
    })
}

/// Release a session handle. Null is ignored.
///
/// # Safety
/// `session` must come from `llmshim_new_session`, not be freed twice, and
/// not be in use by another thread.
#[no_mangle]
pub unsafe extern "C" fn llmshim_free_session(session: *mut LlmshimSession) {
    if session.is_null() {
        return;
    }
    contained("llmshim_free_session", || drop(Box::from_raw(session)));
}

/// Forwards fragments to a C callback as NUL-terminated copies.
struct CallbackSink {
    callback: LlmshimTokenCallback,
    user_data: *mut c_void,
}

impl TokenSink for CallbackSink {
    fn on_token(&mut self, fragment: &str) -> ControlFlow<()> {
        let Some(callback) = self.callback else {
            return ControlFlow::Continue(());
        };
        let token = to_c_string(fragment);
        let len = token.as_bytes().len() as c_int;
        // SAFETY: the pointer is valid for the duration of the call; the
        // caller vouched for `callback` and `user_data`.
        let rc = unsafe { callback(token.as_ptr(), len, self.user_data) };
        if rc == 0 {
            ControlFlow::Continue(())
        } else {
            ControlFlow::Break(())
        }
    }
}

unsafe fn run_inference(
    session: *mut LlmshimSession,
    options: *const LlmshimInferOptions,
    sink: Option<CallbackSink>,
    out_completion: *mut LlmshimCompletion,
    err: *mut LlmshimError,
) -> c_int {
    guarded(err, || {
        let Some(out) = out_completion.as_mut() else {
            return invalid(err);
        };
        fill_failed(out);
        let (Some(session), Some(options)) = (session.as_mut(), options.as_ref()) else {
            return invalid(err);
        };
        let Some(prompt) = borrow_str(options.prompt) else {
            return invalid(err);
        };

        let request = options.to_options(prompt.to_owned());
        let result = match sink {
            Some(sink) => session.inner.infer_streaming(&request, sink),
            None => session.inner.infer(&request),
        };
        match result {
            Ok(completion) => {
                fill_completion(out, completion);
                LLMSHIM_OK
            }
            Err(e) => {
                report(err, &e);
                LLMSHIM_ERR_GENERAL
            }
        }
    })
}

/// Generate a completion for `options->prompt`.
///
/// On success `out_completion` owns heap memory released by
/// `llmshim_free_completion`. On failure it is zeroed with
/// `finish_reason = LLMSHIM_FINISH_ERROR`.
///
/// # Safety
/// `session` must be a live handle used by one thread at a time.
/// `options->prompt` must be a NUL-terminated string. `out_completion` must
/// be writable. `err` may be null.
#[no_mangle]
pub unsafe extern "C" fn llmshim_infer(
    session: *mut LlmshimSession,
    options: *const LlmshimInferOptions,
    out_completion: *mut LlmshimCompletion,
    err: *mut LlmshimError,
) -> c_int {
    run_inference(session, options, None, out_completion, err)
}

/// Like [`llmshim_infer`], invoking `callback` for each fragment on the
/// calling thread. A nonzero return cancels; that fragment is not kept.
/// A null callback behaves like `llmshim_infer`.
///
/// # Safety
/// As for [`llmshim_infer`]. `callback` must be safe to call with
/// `user_data` until this function returns.
#[no_mangle]
pub unsafe extern "C" fn llmshim_infer_streaming(
    session: *mut LlmshimSession,
    options: *const LlmshimInferOptions,
    callback: LlmshimTokenCallback,
    user_data: *mut c_void,
    out_completion: *mut LlmshimCompletion,
    err: *mut LlmshimError,
) -> c_int {
    let sink = CallbackSink {
        callback,
        user_data,
    };
    run_inference(session, options, Some(sink), out_completion, err)
}

/// Release the strings owned by a completion and zero it. Calling it again,
/// or on a failed completion, is a no-op.
///
/// # Safety
/// `completion` must be null or a record filled by `llmshim_infer*`.
#[no_mangle]
pub unsafe extern "C" fn llmshim_free_completion(completion: *mut LlmshimCompletion) {
    if let Some(c) = completion.as_mut() {
        contained("llmshim_free_completion", || release_completion(c));
    }
}
