// SPDX-License-Identifier: GPL-3.0-only

use anyhow::{Context, Result};
use smithay::reexports::drm::control::{connector, crtc, Mode, ModeFlags};
use tracing::{debug, info, warn};

use super::device::{DisplayMode, KmsDevice, SavedCrtc};

/// A connector we are going to drive and the crtc claimed for it.
#[derive(Debug, Clone, PartialEq)]
pub struct OutputBinding<M> {
    pub connector: connector::Handle,
    pub name: String,
    pub crtc: crtc::Handle,
    pub mode: M,
    pub size: (u32, u32),
    /// State of the crtc previously driving this connector, restored on shutdown.
    pub saved: Option<SavedCrtc<M>>,
}

/// Crtc indices already handed out, as a bitmask.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
struct ClaimedCrtcs(u32);

impl ClaimedCrtcs {
    fn is_claimed(&self, idx: usize) -> bool {
        self.0 & (1 << idx) != 0
    }

    fn claim(&mut self, idx: usize) {
        self.0 |= 1 << idx;
    }
}

/// Pairs every connected connector with a free crtc.
///
/// Connectors are handled in kernel order and take the first crtc that one of their
/// encoders can drive and that no earlier connector already claimed. Connectors that
/// are disconnected, lack modes or find no free crtc are skipped.
pub fn display_configuration<D: KmsDevice>(device: &D) -> Result<Vec<OutputBinding<D::Mode>>> {
    let res = device
        .resources()
        .context("Failed to query drm resources")?;

    let mut claimed = ClaimedCrtcs::default();
    let mut bindings = Vec::new();

    for &conn in &res.connectors {
        let info = match device.connector(conn) {
            Ok(info) => info,
            Err(err) => {
                warn!(?err, ?conn, "Failed to query connector, skipping");
                continue;
            }
        };

        if !info.connected {
            debug!(name = %info.name, "Connector is not connected");
            continue;
        }
        let Some(&mode) = info.modes.first() else {
            warn!(name = %info.name, "No valid modes");
            continue;
        };
        let (w, h) = mode.dimensions();

        let saved = info
            .current_encoder
            .and_then(|enc| device.encoder(enc).ok())
            .and_then(|enc| enc.crtc)
            .and_then(|crtc| match device.crtc(crtc) {
                Ok(saved) => Some(saved),
                Err(err) => {
                    warn!(?err, name = %info.name, "Failed to save previous crtc state");
                    None
                }
            });

        let mut found = None;
        'outer: for encoder_info in info
            .encoders
            .iter()
            .flat_map(|enc| device.encoder(*enc).ok())
        {
            for (idx, crtc) in res.crtcs.iter().enumerate().take(u32::BITS as usize) {
                if encoder_info.possible_crtcs & (1 << idx) == 0 || claimed.is_claimed(idx) {
                    continue;
                }
                claimed.claim(idx);
                found = Some(*crtc);
                break 'outer;
            }
        }

        let Some(crtc) = found else {
            warn!(name = %info.name, "Could not find crtc");
            continue;
        };

        info!(
            name = %info.name,
            ?crtc,
            "Using {}x{}@{:.3}Hz",
            w,
            h,
            mode.refresh_mhz() as f64 / 1000.0
        );
        bindings.push(OutputBinding {
            connector: conn,
            name: info.name,
            crtc,
            mode,
            size: (w as u32, h as u32),
            saved,
        });
    }

    Ok(bindings)
}

pub fn interface_name(conn_info: &connector::Info) -> String {
    let other_short_name;
    let interface_short_name = match conn_info.interface() {
        connector::Interface::DVII => "DVI-I",
        connector::Interface::DVID => "DVI-D",
        connector::Interface::DVIA => "DVI-A",
        connector::Interface::SVideo => "S-VIDEO",
        connector::Interface::DisplayPort => "DP",
        connector::Interface::HDMIA => "HDMI-A",
        connector::Interface::HDMIB => "HDMI-B",
        connector::Interface::EmbeddedDisplayPort => "eDP",
        other => {
            other_short_name = format!("{:?}", other);
            &other_short_name
        }
    };

    format!("{}-{}", interface_short_name, conn_info.interface_id())
}

// Returns refresh rate in milliherz
pub fn calculate_refresh_rate(mode: Mode) -> u32 {
    let htotal = mode.hsync().2 as u32;
    let vtotal = mode.vsync().2 as u32;
    if htotal == 0 || vtotal == 0 {
        return 0;
    }
    let mut refresh =
        (mode.clock() as u64 * 1000000_u64 / htotal as u64 + vtotal as u64 / 2) / vtotal as u64;

    if mode.flags().contains(ModeFlags::INTERLACE) {
        refresh *= 2;
    }
    if mode.flags().contains(ModeFlags::DBLSCAN) {
        refresh /= 2;
    }
    if mode.vscan() > 1 {
        refresh /= mode.vscan() as u64;
    }

    refresh as u32
}
