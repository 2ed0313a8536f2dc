//! Tracing subscriber installation.
//!
//! Every log line is one JSON object carrying the span fields in scope, so the
//! `tenant_id`, `transfer_id` and stock key fields recorded by the engine's spans end
//! up on each event.

use std::sync::Once;

use tracing_subscriber::EnvFilter;

/// Filter used when `RUST_LOG` is unset or unparsable.
pub const DEFAULT_FILTER: &str = "info";

static INIT: Once = Once::new();

/// Install the global JSON subscriber.
///
/// `RUST_LOG` wins over `default_filter`. Later calls are no-ops, as are calls made
/// after some other subscriber was installed.
pub fn init(default_filter: &str) {
    INIT.call_once(|| {
        let filter = build_filter(std::env::var("RUST_LOG").ok().as_deref(), default_filter);

        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .with_current_span(true)
            .with_span_list(false)
            .with_timer(tracing_subscriber::fmt::time::SystemTime)
            .with_target(false)
            .with_thread_names(true)
            .try_init();
    });
}

fn build_filter(directives: Option<&str>, default_filter: &str) -> EnvFilter {
    directives
        .and_then(|d| EnvFilter::try_new(d).ok())
        .unwrap_or_else(|| EnvFilter::new(default_filter))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn falls_back_to_default_filter() {
        assert_eq!(build_filter(None, "warn").to_string(), "warn");
        assert_eq!(build_filter(Some("stockledger_infra=debug"), "warn").to_string(), "stockledger_infra=debug");
    }

    #[test]
    fn repeated_init_is_harmless() {
        init(DEFAULT_FILTER);
        init("debug");
        ::tracing::info!("still logging");
    }
}
