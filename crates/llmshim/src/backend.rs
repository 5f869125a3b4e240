use llmshim_runtime::RuntimeInfo;

/// Discover and register inference backends.
///
/// Runs discovery exactly once per process no matter how many threads race
/// on the first call; later calls return the cached result.
pub fn backend_init() -> &'static RuntimeInfo {
    llmshim_runtime::init()
}
