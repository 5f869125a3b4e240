//! Per-token consumers for streaming inference.

use std::ops::ControlFlow;

use crossbeam_channel::Sender;

/// Receives each fragment as it is produced, on the generating thread.
///
/// Returning `ControlFlow::Break(())` stops generation immediately. The
/// fragment that triggered the break is not added to the completion.
pub trait TokenSink {
    fn on_token(&mut self, fragment: &str) -> ControlFlow<()>;
}

impl<F> TokenSink for F
where
    F: FnMut(&str) -> ControlFlow<()>,
{
    fn on_token(&mut self, fragment: &str) -> ControlFlow<()> {
        self(fragment)
    }
}

/// Forwards fragments to a channel. A dropped receiver cancels generation.
impl TokenSink for Sender<String> {
    fn on_token(&mut self, fragment: &str) -> ControlFlow<()> {
        match self.send(fragment.to_owned()) {
            Ok(()) => ControlFlow::Continue(()),
            Err(_) => ControlFlow::Break(()),
        }
    }
}

/// Accepts everything; used by blocking inference.
pub(crate) struct Discard;

impl TokenSink for Discard {
    fn on_token(&mut self, _fragment: &str) -> ControlFlow<()> {
        ControlFlow::Continue(())
    }
}
