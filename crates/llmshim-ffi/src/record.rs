//! Conversion of results into the caller-owned error record and completion.

use std::ffi::CString;
use std::os::raw::{c_char, c_int};

use llmshim::{Completion, Error, ErrorCode};

use crate::types::{LlmshimCompletion, LlmshimError, LLMSHIM_ERROR_MESSAGE_LEN, LLMSHIM_FINISH_ERROR};

/// Fill `err` with `code` and `message`, truncated on a UTF-8 boundary so
/// the record always ends in NUL.
///
/// # Safety
/// `err` must be null or point to a writable `LlmshimError`.
pub(crate) unsafe fn write_error(err: *mut LlmshimError, code: ErrorCode, message: &str) {
    let Some(err) = err.as_mut() else {
        return;
    };
    err.code = code.as_i32();
    err.message = [0; LLMSHIM_ERROR_MESSAGE_LEN];

    let mut end = message.len().min(LLMSHIM_ERROR_MESSAGE_LEN - 1);
    while !message.is_char_boundary(end) {
        end -= 1;
    }
    for (dst, &b) in err.message.iter_mut().zip(&message.as_bytes()[..end]) {
        *dst = b as c_char;
    }
}

/// # Safety
/// Same as [`write_error`].
pub(crate) unsafe fn report(err: *mut LlmshimError, e: &Error) {
    tracing::warn!(code = e.code().as_i32(), error = %e, "call failed");
    write_error(err, e.code(), &e.to_string());
}

/// Interior NULs cannot cross the boundary; they are dropped.
pub(crate) fn to_c_string(s: &str) -> CString {
    let bytes: Vec<u8> = s.bytes().filter(|&b| b != 0).collect();
    CString::new(bytes).unwrap_or_default()
}

/// Transfer ownership of `completion` into `out`.
pub(crate) fn fill_completion(out: &mut LlmshimCompletion, completion: Completion) {
    let tokens: Box<[*mut c_char]> = completion
        .tokens
        .iter()
        .map(|t| to_c_string(t).into_raw())
        .collect();

    out.token_count = tokens.len() as c_int;
    out.tokens = if tokens.is_empty() {
        std::ptr::null_mut()
    } else {
        Box::into_raw(tokens) as *mut *mut c_char
    };
    out.text = to_c_string(&completion.text).into_raw();
    out.latency_ms = completion.latency_ms.min(c_int::MAX as u64) as c_int;
    out.finish_reason = completion.finish_reason as c_int;
}

pub(crate) fn fill_failed(out: &mut LlmshimCompletion) {
    *out = LlmshimCompletion {
        finish_reason: LLMSHIM_FINISH_ERROR,
        ..LlmshimCompletion::default()
    };
}

/// Free everything `fill_completion` allocated and reset the record.
///
/// # Safety
/// `c` must hold pointers produced by [`fill_completion`] or be zeroed.
pub(crate) unsafe fn release_completion(c: &mut LlmshimCompletion) {
    if !c.text.is_null() {
        drop(CString::from_raw(c.text));
    }
    if !c.tokens.is_null() && c.token_count > 0 {
        let len = c.token_count as usize;
        let slice = std::ptr::slice_from_raw_parts_mut(c.tokens, len);
        let tokens = Box::from_raw(slice);
        for &t in tokens.iter() {
            if !t.is_null() {
                drop(CString::from_raw(t));
            }
        }
    }
    c.text = std::ptr::null_mut();
    c.tokens = std::ptr::null_mut();
    c.token_count = 0;
    c.latency_ms = 0;
}
