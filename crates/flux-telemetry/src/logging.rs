//! `tracing` subscriber setup.

use flux_settings::{LogFormat, LoggingSettings};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

/// Build the filter directive string from settings, e.g. `info,lapin=warn`.
///
/// Module overrides are sorted so the output is stable.
pub fn filter_directives(settings: &LoggingSettings) -> String {
    let mut modules: Vec<_> = settings.modules.iter().collect();
    modules.sort();
    let mut out = settings.level.to_lowercase();
    for (module, level) in modules {
        out.push_str(&format!(",{module}={}", level.to_lowercase()));
    }
    out
}

/// Install the global subscriber.
///
/// Returns `false` if a subscriber was already installed (tests, embedding),
/// in which case the existing one is kept.
pub fn init_logging(settings: &LoggingSettings) -> bool {
    let directives = filter_directives(settings);
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&directives));

    let fmt_layer = match settings.format {
        LogFormat::Json => tracing_subscriber::fmt::layer()
            .json()
            .with_target(true)
            .with_current_span(true)
            .with_span_list(false)
            .with_filter(env_filter)
            .boxed(),
        LogFormat::Pretty => tracing_subscriber::fmt::layer()
            .with_target(true)
            .with_filter(env_filter)
            .boxed(),
    };

    tracing_subscriber::registry().with(fmt_layer).try_init().is_ok()
}
