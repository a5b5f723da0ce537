use time::macros::format_description;
use tracing_subscriber::fmt;
use tracing_subscriber::prelude::*;
use tracing_subscriber::EnvFilter;

/// Installs the global subscriber. `RUST_LOG` wins over `default_level`.
///
/// `log` records emitted by the library crates are bridged into tracing by
/// the subscriber's `tracing-log` integration.
pub fn init_logger(default_level: &str, pretty: bool) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let time_format =
        format_description!("[year]-[month]-[day] [hour]:[minute]:[second].[subsecond digits:2]");

    let layer = fmt::layer()
        .with_timer(fmt::time::LocalTime::new(time_format))
        .with_target(false)
        .with_level(true)
        .with_line_number(false)
        .with_file(false);

    let registry = tracing_subscriber::registry().with(filter);
    let result = if pretty {
        registry.with(layer.pretty()).try_init()
    } else {
        registry.with(layer.compact()).try_init()
    };
    if result.is_err() {
        tracing::debug!("global subscriber already installed");
    }
}
