//! Tracing subscriber setup.

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

fn filter_directive(level: Option<&str>) -> String {
    let level = match level {
        Some("debug") => "debug",
        Some("trace") => "trace",
        Some("warn") | Some("warning") => "warn",
        Some("error") => "error",
        _ => "info",
    };
    format!("batchio={level}")
}

fn env_filter() -> EnvFilter {
    match std::env::var("RUST_LOG") {
        Ok(_) => EnvFilter::from_default_env(),
        Err(_) => EnvFilter::new(filter_directive(std::env::var("BATCHIO_LOG").ok().as_deref())),
    }
}

/// Install a global subscriber writing to stderr.
///
/// `RUST_LOG` wins when set; otherwise `BATCHIO_LOG` picks the crate's level
/// (default info). `LOG_FORMAT=json` switches to JSON lines. Calling this
/// again after a subscriber is installed does nothing.
pub fn init_tracing() {
    let json = std::env::var("LOG_FORMAT").is_ok_and(|format| format == "json");

    // Exactly one of the two output layers is present.
    let _ = tracing_subscriber::registry()
        .with(env_filter())
        .with(json.then(|| fmt::layer().json().with_writer(std::io::stderr)))
        .with((!json).then(|| fmt::layer().with_writer(std::io::stderr)))
        .try_init();
}
