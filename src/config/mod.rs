// SPDX-License-Identifier: GPL-3.0-only

use crate::utils::env::{bool_var, path_var};
pub use kms_flip_config::FlipConfig;
use std::{
    fs::OpenOptions,
    path::{Path, PathBuf},
};
use tracing::{debug, info, warn};

#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub static_conf: FlipConfig,
}

impl Config {
    pub fn load() -> Config {
        let xdg = xdg::BaseDirectories::new().ok();
        let mut config = Config {
            static_conf: Self::load_static(xdg.as_ref()),
        };
        config.apply_env();
        config
    }

    fn load_static(xdg: Option<&xdg::BaseDirectories>) -> FlipConfig {
        let mut locations = if let Some(base) = xdg {
            vec![
                base.get_config_file("kms-flip.ron"),
                base.get_config_file("kms-flip/config.ron"),
            ]
        } else {
            Vec::with_capacity(2)
        };
        if cfg!(debug_assertions) {
            if let Ok(mut cwd) = std::env::current_dir() {
                cwd.push("config.ron");
                locations.push(cwd);
            }
        }
        locations.push(PathBuf::from("/etc/kms-flip/config.ron"));

        for path in locations {
            debug!("Trying config location: {}", path.display());
            if path.exists() {
                info!("Using config at {}", path.display());
                match read_config(&path) {
                    Ok(config) => return config,
                    Err(err) => {
                        warn!(?err, "Malformed config file {}, using defaults", path.display());
                        return FlipConfig::default();
                    }
                }
            }
        }

        FlipConfig::default()
    }

    fn apply_env(&mut self) {
        if let Some(device) = path_var("KMS_FLIP_DEVICE") {
            debug!("Device overridden by environment: {}", device.display());
            self.static_conf.device = device;
        }
        if let Some(stop_on_stdin) = bool_var("KMS_FLIP_STDIN_STOP") {
            self.static_conf.stop_on_stdin = stop_on_stdin;
        }
    }

    pub fn device(&self) -> &Path {
        &self.static_conf.device
    }
}

fn read_config(path: &Path) -> anyhow::Result<FlipConfig> {
    let file = OpenOptions::new().read(true).open(path)?;
    Ok(ron::de::from_reader(file)?)
}
