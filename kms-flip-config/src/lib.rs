// SPDX-License-Identifier: GPL-3.0-only

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Default speed of the colour animation: a full channel cross-fade takes
/// this many milliseconds.
pub const DEFAULT_CYCLE_MS: u32 = 2000;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct FlipConfig {
    /// Primary drm node to drive.
    pub device: PathBuf,
    /// Shut down once stdin becomes readable.
    pub stop_on_stdin: bool,
    pub cycle_ms: u32,
}

impl Default for FlipConfig {
    fn default() -> FlipConfig {
        FlipConfig {
            device: PathBuf::from("/dev/dri/card0"),
            stop_on_stdin: true,
            cycle_ms: DEFAULT_CYCLE_MS,
        }
    }
}
