use std::sync::Once;

use tracing_subscriber::EnvFilter;

/// Read by [`init`]; falls back to `warn` when unset or unparsable.
pub const LOG_ENV: &str = "LLMSHIM_LOG";

static INIT: Once = Once::new();

/// Install a stderr subscriber once per process. A host that already set a
/// global subscriber keeps it.
pub fn init() {
    INIT.call_once(|| {
        let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("warn"));
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .try_init();
    });
}
