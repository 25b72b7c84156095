//! Tracing setup for the weft binary and its crates.
//!
//! Logs go to stderr so they never interleave with conversation output on
//! stdout. The filter is resolved from config, then the `WEFT_LOG`
//! environment variable, then a built-in default.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

/// Environment variable consulted when no explicit filter is configured.
pub const FILTER_ENV: &str = "WEFT_LOG";

const DEFAULT_FILTER: &str =
    "info,weft=debug,weft_core=debug,weft_store=debug,weft_llm=debug,weft_engine=debug";

/// Configuration for telemetry initialization.
#[derive(Debug, Clone, Default)]
pub struct TelemetryConfig {
    /// Explicit filter directive, e.g. `info,weft_engine=trace`. Overrides
    /// both `WEFT_LOG` and the default.
    pub filter: Option<String>,
    /// Emit newline-delimited JSON instead of the compact human format.
    pub json: bool,
}

/// Handle returned from [`init_telemetry`]. Keep it alive for the life of
/// the process.
pub struct TelemetryGuard {
    filter: String,
}

impl TelemetryGuard {
    /// The filter directive the subscriber was built with.
    pub fn filter(&self) -> &str {
        &self.filter
    }
}

/// Initialize the global tracing subscriber. Call once at startup.
pub fn init_telemetry(config: TelemetryConfig) -> TelemetryGuard {
    let filter = resolve_filter(&config);
    let env_filter = EnvFilter::new(&filter);

    let fmt_layer = if config.json {
        tracing_subscriber::fmt::layer()
            .json()
            .with_target(true)
            .with_writer(std::io::stderr)
            .with_filter(env_filter)
            .boxed()
    } else {
        tracing_subscriber::fmt::layer()
            .compact()
            .with_target(true)
            .with_writer(std::io::stderr)
            .with_filter(env_filter)
            .boxed()
    };

    tracing_subscriber::registry().with(fmt_layer).init();

    let guard = TelemetryGuard { filter };
    announce_startup(&guard, config.json);
    guard
}

/// First event through the freshly installed subscriber, recording the
/// directive in effect.
fn announce_startup(guard: &TelemetryGuard, json: bool) {
    tracing::info!(filter = guard.filter(), json, "telemetry initialized");
}

/// Resolve the active filter directive: explicit config wins, then
/// `WEFT_LOG`, then the default.
pub fn resolve_filter(config: &TelemetryConfig) -> String {
    resolve_filter_from(config, std::env::var(FILTER_ENV).ok().as_deref())
}

fn resolve_filter_from(config: &TelemetryConfig, env: Option<&str>) -> String {
    if let Some(filter) = &config.filter {
        return filter.clone();
    }
    match env {
        Some(value) if !value.trim().is_empty() => value.to_string(),
        _ => DEFAULT_FILTER.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::{Arc, Mutex};

    use tracing::field::{Field, Visit};
    use tracing_subscriber::layer::Context;

    #[test]
    fn explicit_filter_wins_over_env() {
        let config = TelemetryConfig {
            filter: Some("warn".to_string()),
            json: false,
        };
        assert_eq!(resolve_filter_from(&config, Some("trace")), "warn");
    }

    #[test]
    fn env_filter_wins_over_default() {
        let config = TelemetryConfig::default();
        assert_eq!(
            resolve_filter_from(&config, Some("info,weft_store=trace")),
            "info,weft_store=trace"
        );
    }

    #[test]
    fn blank_env_falls_back_to_default() {
        let config = TelemetryConfig::default();
        assert_eq!(resolve_filter_from(&config, Some("  ")), DEFAULT_FILTER);
        assert_eq!(resolve_filter_from(&config, None), DEFAULT_FILTER);
    }

    #[test]
    fn default_config_is_compact_with_no_filter() {
        let config = TelemetryConfig::default();
        assert!(config.filter.is_none());
        assert!(!config.json);
    }

    /// Collects each event's fields as `name=value` text.
    #[derive(Default)]
    struct CaptureLayer {
        lines: Arc<Mutex<Vec<String>>>,
    }

    struct FieldText(String);

    impl Visit for FieldText {
        fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
            use std::fmt::Write;
            let _ = write!(self.0, "{}={:?} ", field.name(), value);
        }
    }

    impl<S: tracing::Subscriber> Layer<S> for CaptureLayer {
        fn on_event(&self, event: &tracing::Event<'_>, _ctx: Context<'_, S>) {
            let mut visitor = FieldText(String::new());
            event.record(&mut visitor);
            self.lines.lock().unwrap().push(visitor.0);
        }
    }

    #[test]
    fn startup_announcement_reports_resolved_filter() {
        let layer = CaptureLayer::default();
        let lines = Arc::clone(&layer.lines);
        let guard = TelemetryGuard {
            filter: "info,weft_engine=trace".to_string(),
        };

        tracing::subscriber::with_default(tracing_subscriber::registry().with(layer), || {
            announce_startup(&guard, true);
        });

        let lines = lines.lock().unwrap();
        assert_eq!(lines.len(), 1);
        assert!(lines[0].contains("info,weft_engine=trace"));
        assert!(lines[0].contains("json=true"));
    }
}
