//! Tracing subscriber setup.

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::config::LogFormat;

/// Filter applied when `RUST_LOG` is unset.
pub const DEFAULT_FILTER: &str = "courierd=info,courier_exec=info";

/// Install the global subscriber.
///
/// `RUST_LOG` overrides [`DEFAULT_FILTER`]. Fails if a subscriber is
/// already installed.
pub fn init(format: LogFormat) -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new(DEFAULT_FILTER))?;
    let registry = tracing_subscriber::registry().with(filter);

    match format {
        LogFormat::Pretty => registry.with(fmt::layer()).try_init()?,
        LogFormat::Json => registry.with(fmt::layer().json()).try_init()?,
    }

    Ok(())
}
