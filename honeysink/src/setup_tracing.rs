use tracing::Level;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{Layer, filter::EnvFilter, fmt};

use std::any::Any;
use std::backtrace::{Backtrace, BacktraceStatus};
use std::panic::{Location, PanicHookInfo};

/// Logs a panic as one structured `error!` event, so it reaches the same output as every other
/// event. The backtrace is attached only when `RUST_BACKTRACE` asked for one.
fn report_panic(panic_info: &PanicHookInfo<'_>) {
    let backtrace = Backtrace::capture();
    let payload = panic_payload(panic_info.payload());
    let location = panic_info.location().map(source_location);
    let current = std::thread::current();
    let thread = current.name().unwrap_or("<unnamed>");

    if backtrace.status() == BacktraceStatus::Captured {
        tracing::error!(
            panic = payload,
            location = location.as_deref(),
            thread,
            %backtrace,
            "Process panicked"
        );
    } else {
        tracing::error!(
            panic = payload,
            location = location.as_deref(),
            thread,
            "Process panicked"
        );
    }
}

fn panic_payload(payload: &(dyn Any + Send)) -> &str {
    payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("<non-string panic payload>")
}

fn source_location(location: &Location<'_>) -> String {
    format!(
        "{}:{}:{}",
        location.file(),
        location.line(),
        location.column()
    )
}

pub(crate) fn register() {
    // RUST_LOG overrides the default level. HONEYSINK_DEBUG=true switches to text output at debug.
    let debug_mode =
        std::env::var("HONEYSINK_DEBUG").is_ok_and(|v| v.eq_ignore_ascii_case("true"));
    let default_level = if debug_mode {
        Level::DEBUG
    } else {
        Level::INFO
    };

    let filter = EnvFilter::builder()
        .with_default_directive(default_level.into())
        .from_env_lossy();

    let layer = if debug_mode {
        fmt::layer().boxed()
    } else {
        // JSON format, flattened
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
