use tracing::Span;
use tracing_subscriber::EnvFilter;
use crate::config::LoggingConfig;
use crate::types::{RunId, RunTrigger, SourceId};

/// Installs the global subscriber. `RUST_LOG` wins over the configured level.
/// Calling it twice is harmless; the second install is ignored.
pub fn init_tracing(config: &LoggingConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.level));

    let builder = tracing_subscriber::fmt().with_env_filter(filter).with_target(true);
    let result = if config.json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };

    if let Err(e) = result {
        tracing::debug!("Tracing subscriber already installed: {}", e);
    }
}

pub fn trace_cycle(run_id: &RunId, trigger: RunTrigger) -> Span {
    tracing::info_span!(
        "refresh_cycle",
        run_id = %run_id,
        trigger = ?trigger,
    )
}

pub fn trace_source_request(source_id: &SourceId, entity_count: usize) -> Span {
    tracing::debug_span!(
        "source_request",
        source_id = %source_id,
        entities = entity_count,
    )
}
