pub mod config;
pub mod models;
pub mod pipeline;
pub mod pipeline_config;

use tracing_subscriber::EnvFilter;

/// Install the global tracing subscriber.
///
/// `RUST_LOG` wins when set; otherwise the library default applies, raised to
/// `debug` for this crate when `verbose` is on. Logs go to stderr so JSON on
/// stdout stays clean.
pub fn init_logging(verbose: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if verbose {
            EnvFilter::new("facturalens_lib=debug,facturalens=debug,warn")
        } else {
            EnvFilter::new(config::default_log_filter())
        }
    });
    // A second call (tests, embedding) keeps the first subscriber.
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}
