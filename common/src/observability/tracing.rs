//! Tracing initialization.

use crate::ColorWhen;
use anyhow::{Context, Result};
use tracing_subscriber::{fmt, EnvFilter};

/// Installs the global fmt subscriber.
///
/// `RUST_LOG` takes precedence when set; otherwise `default_level` (the
/// agent's `LOG_LEVEL` setting, e.g. `info` or `debug`) is used as the filter.
pub fn init_tracing(color: ColorWhen, default_level: &str) -> Result<()> {
    // ---
    let env_filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(default_level.to_ascii_lowercase())
            .with_context(|| format!("invalid log level: {default_level}"))?,
    };

    fmt()
        .with_env_filter(env_filter)
        .with_ansi(color.should_color_stderr())
        .with_thread_names(true)
        .try_init()
        .map_err(|e| anyhow::anyhow!("failed to install tracing subscriber: {e}"))?;

    Ok(())
}
