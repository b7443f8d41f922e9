// SPDX-License-Identifier: GPL-3.0-only

use anyhow::{Context, Result};
use tracing::{debug, info, warn};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

pub fn init_logger() -> Result<()> {
    let level = if cfg!(debug_assertions) {
        "debug"
    } else {
        "info"
    };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("warn,kms_flip={level},smithay=info")));

    let fmt_layer = fmt::layer()
        .compact()
        .with_writer(std::io::stderr)
        .with_filter(filter);

    // journald is optional, we might be running on a plain vt without systemd
    let (journald_layer, journald_err) = match tracing_journald::layer() {
        Ok(layer) => (Some(layer), None),
        Err(err) => (None, Some(err)),
    };

    tracing_subscriber::registry()
        .with(fmt_layer)
        .with(journald_layer)
        .try_init()
        .context("Failed to install global logger")?;
    log_panics::init();

    if let Some(err) = journald_err {
        debug!(?err, "Not logging to journald");
    }

    info!("Version: {}", std::env!("CARGO_PKG_VERSION"));
    if cfg!(debug_assertions) {
        warn!(
            "Debug build ({})",
            std::option_env!("GIT_HASH").unwrap_or("Unknown")
        );
    }

    Ok(())
}
