//! Utilities for tests.
use std::io::IsTerminal as _;

/// Installs a test log subscriber (filtered by `RUST_LOG`) and, when running
/// under nextest in process-per-test mode, turns panics into aborts, so that a
/// panicking background task fails the test.
pub fn abort_on_panic() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .with_ansi(std::env::var("NO_COLOR").is_err() && std::io::stdout().is_terminal())
        .with_line_number(true)
        .try_init();

    let Ok(nextest) = std::env::var("NEXTEST") else {
        return;
    };
    let Ok(mode) = std::env::var("NEXTEST_EXECUTION_MODE") else {
        return;
    };
    if nextest != "1" || mode != "process-per-test" {
        return;
    }
    tracing::info!("[panic=abort] enabled");
    let orig_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |panic_info| {
        orig_hook(panic_info);
        std::process::abort();
    }));
}
