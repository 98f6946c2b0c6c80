//! Log output for the `batchd` binary.
//!
//! Logs go to stderr so the event stream on stdout stays machine-readable.

use tracing_subscriber::EnvFilter;

/// Filter for a verbosity count: 0 = warn, 1 = info, 2+ = debug.
///
/// `RUST_LOG` takes precedence when set.
pub fn filter_for(verbose: u8) -> EnvFilter {
    if let Ok(filter) = EnvFilter::try_from_default_env() {
        return filter;
    }
    match verbose {
        0 => EnvFilter::new("batchd=warn,batchd_worker=warn"),
        1 => EnvFilter::new("batchd=info,batchd_worker=info"),
        _ => EnvFilter::new("batchd=debug,batchd_worker=debug"),
    }
}

/// Install the global subscriber. Safe to call more than once.
pub fn init(verbose: u8, json: bool) {
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter_for(verbose))
        .with_writer(std::io::stderr)
        .with_target(false);

    let _ = if json {
        builder.json().try_init()
    } else {
        builder.without_time().try_init()
    };
}
