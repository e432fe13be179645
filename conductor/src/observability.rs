//! Tracing subscriber setup.
//!
//! Log level resolution: `RUST_LOG` when set, otherwise the `default_level`
//! argument. Embedding applications that install their own subscriber can
//! skip this entirely; the engine only emits `tracing` events.

use crate::errors::ConductorError;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Output format for emitted log events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    /// Human-readable single-line output.
    #[default]
    Text,
    /// One JSON object per event, for log aggregation.
    Json,
}

/// Installs the global tracing subscriber.
///
/// Call once at startup. Fails if a global subscriber is already set.
pub fn init_tracing(format: LogFormat, default_level: &str) -> Result<(), ConductorError> {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let registry = tracing_subscriber::registry().with(env_filter);

    let result = match format {
        LogFormat::Json => registry
            .with(tracing_subscriber::fmt::layer().json())
            .try_init(),
        LogFormat::Text => registry.with(tracing_subscriber::fmt::layer()).try_init(),
    };

    result.map_err(|e| ConductorError::Configuration(format!("failed to install subscriber: {e}")))
}
