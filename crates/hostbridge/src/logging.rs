//! Tracing setup for binaries embedding the bridge.

use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

pub const ENV_LOG_LEVEL: &str = "HOSTBRIDGE_LOG";
pub const ENV_LOG_FORMAT: &str = "LOG_FORMAT";

fn default_directives(level: Option<&str>) -> String {
    let level = match level {
        Some("trace") => "trace",
        Some("debug") => "debug",
        Some("warn") | Some("warning") => "warn",
        Some("error") => "error",
        _ => "info",
    };
    format!("hostbridge={level},hostbridge_echo={level}")
}

/// Install a stderr subscriber. `RUST_LOG` wins over `HOSTBRIDGE_LOG`;
/// `LOG_FORMAT=json` switches to JSON lines. A no-op if one is already set.
pub fn init_tracing() {
    let filter = if std::env::var("RUST_LOG").is_ok() {
        EnvFilter::from_default_env()
    } else {
        let level = std::env::var(ENV_LOG_LEVEL).ok();
        EnvFilter::new(default_directives(level.as_deref()))
    };

    let use_json = std::env::var(ENV_LOG_FORMAT).as_deref() == Ok("json");

    if use_json {
        let subscriber = tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json().with_writer(std::io::stderr));
        let _ = subscriber.try_init();
    } else {
        let subscriber = tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_writer(std::io::stderr));
        let _ = subscriber.try_init();
    }
}
