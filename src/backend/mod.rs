// SPDX-License-Identifier: GPL-3.0-only

use crate::config::Config;
use anyhow::Result;
use tracing::info;

pub mod render;

pub mod kms;

/// Drives every output until a stop is requested, then restores the previous configuration.
pub fn run(config: &Config) -> Result<()> {
    let (mut state, mut events) = kms::init_backend(config)?;

    let res = state.start().and_then(|()| {
        info!("Presenting, waiting for stop request");
        state.run(&mut events)
    });

    // crtcs are restored even when presenting failed
    let restored = state.shutdown(&mut events);
    res.and(restored)
}
