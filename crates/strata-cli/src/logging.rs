use std::io::IsTerminal;

use tracing_subscriber::EnvFilter;

/// Route structured logs to stderr so summaries on stdout stay clean.
///
/// `RUST_LOG` wins when set; otherwise `log_level` applies to every crate.
pub fn init(log_level: &str) {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_ansi(std::io::stderr().is_terminal())
        .with_writer(std::io::stderr)
        .init();
}
