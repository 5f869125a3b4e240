//! Backend discovery for llmshim.
//!
//! Provides:
//! - [`Backend`]: compute backends this build can drive
//! - [`RuntimeInfo`]: the result of discovery (backends, thread budget)
//! - [`init`]: exactly-once, thread-safe discovery for the whole process

use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::OnceLock;
use std::thread;

/// Compute backend for inference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Backend {
    /// Portable scalar CPU path used by the reference engine.
    Cpu,
}

impl Backend {
    /// All backends compiled into this build, in preference order.
    pub fn compiled() -> &'static [Backend] {
        &[Backend::Cpu]
    }
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Backend::Cpu => write!(f, "cpu"),
        }
    }
}

/// What discovery found.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeInfo {
    /// Usable backends, best first. Never empty.
    pub backends: Vec<Backend>,
    /// Thread count used when a session asks the engine to choose.
    pub default_threads: u32,
}

impl RuntimeInfo {
    /// The backend sessions run on.
    pub fn active(&self) -> Backend {
        self.backends.first().copied().unwrap_or(Backend::Cpu)
    }

    fn discover() -> Self {
        let default_threads = thread::available_parallelism()
            .map(|n| n.get() as u32)
            .unwrap_or(1);
        Self {
            backends: Backend::compiled().to_vec(),
            default_threads,
        }
    }
}

static RUNTIME: OnceLock<RuntimeInfo> = OnceLock::new();
static DISCOVERY_RUNS: AtomicUsize = AtomicUsize::new(0);

/// Discover and register backends, once per process.
///
/// Safe to call from any number of threads concurrently; every caller gets
/// the same `RuntimeInfo`, and discovery itself runs exactly once.
pub fn init() -> &'static RuntimeInfo {
    RUNTIME.get_or_init(|| {
        DISCOVERY_RUNS.fetch_add(1, Ordering::SeqCst);
        let info = RuntimeInfo::discover();
        tracing::info!(
            backend = %info.active(),
            threads = info.default_threads,
            "inference backend initialized"
        );
        info
    })
}

/// How many times discovery has actually executed (0 or 1).
pub fn discovery_runs() -> usize {
    DISCOVERY_RUNS.load(Ordering::SeqCst)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compiled_includes_cpu() {
        assert!(Backend::compiled().contains(&Backend::Cpu));
    }

    #[test]
    fn backend_display() {
        assert_eq!(format!("{}", Backend::Cpu), "cpu");
    }

    #[test]
    fn init_is_idempotent() {
        let a = init();
        let b = init();
        assert!(std::ptr::eq(a, b));
        assert_eq!(discovery_runs(), 1);
        assert!(a.default_threads >= 1);
        assert_eq!(a.active(), Backend::Cpu);
    }
}
