//! Environment-tier log verbosity selection, applied before `tracing` is
//! initialized so `RUST_LOG` is already correct by the time [`crate::main`]
//! calls into `aura_telemetry::logging`.

use std::env;
use tracing::{info, warn};

/// Current deployment tier, taken from the first CLI argument or
/// `AURA_ENV`, defaulting to `development`.
pub fn get_environment() -> String {
    env::args()
        .nth(1)
        .or_else(|| env::var("AURA_ENV").ok())
        .unwrap_or_else(|| "development".to_string())
}

/// Sets `RUST_LOG` for `env`, unless the caller already exported one.
pub fn configure_app() {
    if env::var("RUST_LOG").is_ok() {
        return;
    }
    let env_name = get_environment();
    let level = match env_name.as_str() {
        "production" => "info,aura_daemon=info",
        "staging" => "info,aura_daemon=debug",
        "development" => "info,aura_daemon=debug,aura_core=debug",
        other => {
            warn!(environment = other, "unrecognized environment, using development defaults");
            "info,aura_daemon=debug"
        }
    };
    env::set_var("RUST_LOG", level);
    info!(environment = %env_name, rust_log = level, "environment configured");
}
