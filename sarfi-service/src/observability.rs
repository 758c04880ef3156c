use tracing_subscriber::{
    filter::{Directive, LevelFilter},
    EnvFilter,
};

const LIBRARY_DIRECTIVE: &str = "sarfi_service=info";

fn directive(s: &str) -> Directive {
    s.parse().unwrap_or_else(|_| LevelFilter::INFO.into())
}

/// Install the global fmt subscriber.
///
/// `RUST_LOG` is honoured; the library and the calling binary (`bin_target`)
/// log at `info` unless overridden there.
pub fn init_tracing(bin_target: &str) {
    let filter = EnvFilter::from_default_env()
        .add_directive(directive(LIBRARY_DIRECTIVE))
        .add_directive(directive(&format!("{bin_target}=info")));

    // A subscriber may already be installed when embedded in another process.
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init();
}
