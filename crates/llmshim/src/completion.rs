use serde::Serialize;

/// Why generation stopped.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
#[repr(i32)]
pub enum FinishReason {
    /// The model emitted an end-of-generation token.
    #[default]
    Stop = 0,
    /// `max_tokens` fragments were emitted.
    Length = 1,
    /// The token sink asked to stop, or the request had no token budget.
    Cancelled = 2,
    /// The call failed. Only produced at the C boundary.
    Error = 3,
}

/// Result of one inference call.
///
/// # Invariants
/// - `text` is the in-order concatenation of `tokens`
/// - `latency_ms` spans the priming decode through the end of the loop
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Completion {
    pub text: String,
    pub tokens: Vec<String>,
    pub latency_ms: u64,
    pub finish_reason: FinishReason,
}

impl Completion {
    /// Result for a request with no token budget.
    pub(crate) fn cancelled() -> Self {
        Self {
            finish_reason: FinishReason::Cancelled,
            ..Self::default()
        }
    }

    pub(crate) fn push(&mut self, fragment: String) {
        self.text.push_str(&fragment);
        self.tokens.push(fragment);
    }

    pub fn token_count(&self) -> usize {
        self.tokens.len()
    }

    /// Release the buffers and reset every field. Calling it again is a no-op.
    pub fn clear(&mut self) {
        *self = Self::default();
    }
}
