use tracing_subscriber::{prelude::*, EnvFilter, Registry};

/// Initialize tracing
///
/// Scenarios share a process under the test runner, so a second call is a
/// no-op rather than a panic.
pub fn init() {
    let logger = tracing_subscriber::fmt::layer()
        .compact()
        .with_line_number(true)
        .with_target(true);
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("info"))
        .unwrap_or_default();

    let collector = Registry::default().with(logger).with(env_filter);

    let _ = tracing::subscriber::set_global_default(collector);
}
