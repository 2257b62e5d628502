use std::backtrace::{Backtrace, BacktraceStatus};
use std::panic::PanicHookInfo;

use tracing::Level;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{Layer, filter::EnvFilter, fmt};

use crate::config::LogFormat;

/// Routes panics through `tracing` so they end up in the same stream, and format, as every other
/// log line. The location and payload go on a single line unless a backtrace was captured
/// (RUST_BACKTRACE).
fn report_panic(panic_info: &PanicHookInfo<'_>) {
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

    match (panic_info.location(), payload, backtrace.status()) {
        (Some(location), Some(payload), status) if status != BacktraceStatus::Captured => {
            tracing::error!(
                "{}:{}:{}: {}",
                location.file(),
                location.line(),
                location.column(),
                payload
            );
        }
        _ => tracing::error!("{}\n{}", panic_info, backtrace),
    }
}

/// Installs the global subscriber. Logs go to stderr so they never mix with results printed on
/// stdout. RUST_LOG overrides the default `warn` level, which keeps the progress bars readable.
pub fn register(format: LogFormat) {
    let filter = EnvFilter::builder()
        .with_default_directive(Level::WARN.into())
        .from_env_lossy();

    let layer = match format {
        LogFormat::Text => fmt::layer().with_writer(std::io::stderr).boxed(),
        LogFormat::Json => fmt::layer()
            .with_writer(std::io::stderr)
            .with_ansi(false)
            .json()
            .flatten_event(true)
            .boxed(),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(layer)
        .init();

    std::panic::set_hook(Box::new(report_panic));
}
