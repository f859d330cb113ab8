use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, EnvFilter};

/// Filter used when `RUST_LOG` is unset. Audit events stay visible either way.
fn default_directives(verbose: bool) -> &'static str {
    if verbose {
        "fieldcheck_client=debug,fieldcheck=debug,audit=info"
    } else {
        "warn,audit=info"
    }
}

/// Install the global subscriber. Logs go to stderr so command output on
/// stdout stays machine-readable. `RUST_LOG` wins over `verbose`.
pub fn init(verbose: bool) {
    let fmt_layer = fmt::layer().with_target(false).with_writer(std::io::stderr);
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directives(verbose)));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt_layer)
        .init();
}
