use std::backtrace::{Backtrace, BacktraceStatus};
use std::panic::PanicHookInfo;

use tracing::Level;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{Layer, filter::EnvFilter, fmt};

/// Enables debug logs in human-readable text format.
const ENV_BUNDLE_DEBUG: &str = "BUNDLE_DEBUG";

/// Routes panics to `tracing` so they end up in the same (JSON) log stream, on a single line
/// unless a backtrace was captured.
fn report_panic(panic_info: &PanicHookInfo<'_>) {
    // only captured if RUST_BACKTRACE or RUST_LIB_BACKTRACE is set
    let backtrace = Backtrace::capture();
    let payload = panic_info
        .payload()
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| {
            panic_info
                .payload()
                .downcast_ref::<String>()
                .map(String::as_str)
        });

    match (panic_info.location(), payload) {
        (Some(location), Some(payload)) if backtrace.status() != BacktraceStatus::Captured => {
            tracing::error!(
                "{}:{}:{}: {}",
                location.file(),
                location.line(),
                location.column(),
                payload,
            );
        }
        _ => tracing::error!("{}\n{}", panic_info, backtrace),
    }
}

/// Installs the global subscriber. `RUST_LOG` overrides the default level, which is `info`, or
/// `debug` when `BUNDLE_DEBUG=true`.
pub(crate) fn register() {
    let debug_mode =
        std::env::var(ENV_BUNDLE_DEBUG).is_ok_and(|v| v.eq_ignore_ascii_case("true"));
    let default_log_level = if debug_mode { "debug" } else { "info" };

    let filter = EnvFilter::builder()
        .with_default_directive(default_log_level.parse().unwrap_or(Level::INFO.into()))
        .from_env_lossy();

    let layer = if debug_mode {
        fmt::layer().boxed()
    } else {
        fmt::layer()
            .with_ansi(false)
            .json()
            .flatten_event(true)
            .boxed()
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(layer)
        .init();

    std::panic::set_hook(Box::new(report_panic));
}
