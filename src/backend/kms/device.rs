// SPDX-License-Identifier: GPL-3.0-only

use anyhow::{Context, Result};
use smithay::{
    backend::{
        allocator::gbm::GbmDevice,
        drm::DrmDeviceFd,
        egl::{context::ContextPriority, EGLContext, EGLDevice, EGLDisplay},
    },
    reexports::{
        drm::{
            buffer::Buffer as DrmBuffer,
            control::{
                connector, crtc, encoder, framebuffer, Device as ControlDevice, Mode,
                PageFlipFlags,
            },
        },
        rustix::fs::{self as rfs, Mode as FileMode, OFlags},
    },
    utils::{DevPath, DeviceFd},
};
use std::{fmt, io, path::Path};
use tracing::info;

use super::drm_helpers;

/// Resources of a drm device, in kernel enumeration order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResourceList {
    pub connectors: Vec<connector::Handle>,
    pub crtcs: Vec<crtc::Handle>,
}

#[derive(Debug, Clone)]
pub struct ConnectorInfo<M> {
    pub name: String,
    pub connected: bool,
    /// Advertised modes, the first one is the preferred one.
    pub modes: Vec<M>,
    pub current_encoder: Option<encoder::Handle>,
    pub encoders: Vec<encoder::Handle>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EncoderInfo {
    pub crtc: Option<crtc::Handle>,
    /// Bitmask of crtc indices (into [`ResourceList::crtcs`]) this encoder can be driven by.
    pub possible_crtcs: u32,
}

/// Configuration of a crtc as found before we touched it.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SavedCrtc<M> {
    pub crtc: crtc::Handle,
    pub framebuffer: Option<framebuffer::Handle>,
    pub position: (u32, u32),
    pub mode: Option<M>,
}

pub trait DisplayMode: Copy + fmt::Debug {
    /// Active area in pixels.
    fn dimensions(&self) -> (u16, u16);
    /// Refresh rate in millihertz.
    fn refresh_mhz(&self) -> u32;
}

impl DisplayMode for Mode {
    fn dimensions(&self) -> (u16, u16) {
        self.size()
    }

    fn refresh_mhz(&self) -> u32 {
        drm_helpers::calculate_refresh_rate(*self)
    }
}

/// The parts of a kms device the output handling needs.
///
/// Handles are cheap to clone and all clones refer to the same device.
pub trait KmsDevice: Clone {
    type Mode: DisplayMode;

    fn resources(&self) -> io::Result<ResourceList>;
    fn connector(&self, conn: connector::Handle) -> io::Result<ConnectorInfo<Self::Mode>>;
    fn encoder(&self, enc: encoder::Handle) -> io::Result<EncoderInfo>;
    fn crtc(&self, crtc: crtc::Handle) -> io::Result<SavedCrtc<Self::Mode>>;

    fn remove_framebuffer(&self, fb: framebuffer::Handle) -> io::Result<()>;

    /// Synchronous legacy modeset. `None` for framebuffer and mode disables the crtc.
    fn modeset(
        &self,
        crtc: crtc::Handle,
        fb: Option<framebuffer::Handle>,
        position: (u32, u32),
        connectors: &[connector::Handle],
        mode: Option<Self::Mode>,
    ) -> io::Result<()>;

    /// Queues a flip to `fb` at the next vblank. Completion is reported by the
    /// device's event stream.
    fn page_flip(&self, crtc: crtc::Handle, fb: framebuffer::Handle) -> io::Result<()>;
}

/// Registers buffers of type `B` as scan-out framebuffers.
pub trait ExportFramebuffer<B> {
    fn add_framebuffer(&self, buffer: &B) -> io::Result<framebuffer::Handle>;
}

impl KmsDevice for DrmDeviceFd {
    type Mode = Mode;

    fn resources(&self) -> io::Result<ResourceList> {
        let handles = self.resource_handles()?;
        Ok(ResourceList {
            connectors: handles.connectors().to_vec(),
            crtcs: handles.crtcs().to_vec(),
        })
    }

    fn connector(&self, conn: connector::Handle) -> io::Result<ConnectorInfo<Mode>> {
        let info = self.get_connector(conn, false)?;
        Ok(ConnectorInfo {
            name: drm_helpers::interface_name(&info),
            connected: info.state() == connector::State::Connected,
            modes: info.modes().to_vec(),
            current_encoder: info.current_encoder(),
            encoders: info.encoders().to_vec(),
        })
    }

    fn encoder(&self, enc: encoder::Handle) -> io::Result<EncoderInfo> {
        let info = self.get_encoder(enc)?;
        let handles = self.resource_handles()?;
        let possible = handles.filter_crtcs(info.possible_crtcs());
        let possible_crtcs = handles
            .crtcs()
            .iter()
            .enumerate()
            .take(u32::BITS as usize)
            .filter(|(_, crtc)| possible.contains(crtc))
            .fold(0u32, |mask, (idx, _)| mask | (1 << idx));

        Ok(EncoderInfo {
            crtc: info.crtc(),
            possible_crtcs,
        })
    }

    fn crtc(&self, crtc: crtc::Handle) -> io::Result<SavedCrtc<Mode>> {
        let info = self.get_crtc(crtc)?;
        Ok(SavedCrtc {
            crtc: info.handle(),
            framebuffer: info.framebuffer(),
            position: info.position(),
            mode: info.mode(),
        })
    }

    fn remove_framebuffer(&self, fb: framebuffer::Handle) -> io::Result<()> {
        ControlDevice::destroy_framebuffer(self, fb)
    }

    fn modeset(
        &self,
        crtc: crtc::Handle,
        fb: Option<framebuffer::Handle>,
        position: (u32, u32),
        connectors: &[connector::Handle],
        mode: Option<Mode>,
    ) -> io::Result<()> {
        ControlDevice::set_crtc(self, crtc, fb, position, connectors, mode)
    }

    fn page_flip(&self, crtc: crtc::Handle, fb: framebuffer::Handle) -> io::Result<()> {
        ControlDevice::page_flip(self, crtc, fb, PageFlipFlags::EVENT, None)
    }
}

impl<B: DrmBuffer> ExportFramebuffer<B> for DrmDeviceFd {
    fn add_framebuffer(&self, buffer: &B) -> io::Result<framebuffer::Handle> {
        // XRGB8888: 24 bits of colour depth in 32 bits per pixel
        ControlDevice::add_framebuffer(self, buffer, 24, 32)
    }
}

pub fn open_device(path: &Path) -> Result<DrmDeviceFd> {
    let fd = rfs::open(
        path,
        OFlags::RDWR | OFlags::CLOEXEC | OFlags::NOCTTY,
        FileMode::empty(),
    )
    .with_context(|| format!("Failed to open drm device: {}", path.display()))?;
    let device = DrmDeviceFd::new(DeviceFd::from(fd));
    info!("Opened drm device {}", path.display());
    Ok(device)
}

#[derive(Debug)]
pub struct EGLInternals {
    pub device: EGLDevice,
    pub context: EGLContext,
}

pub fn init_egl(gbm: &GbmDevice<DrmDeviceFd>) -> Result<EGLInternals> {
    let path = gbm.dev_path();

    let display = unsafe { EGLDisplay::new(gbm.clone()) }.with_context(|| {
        format!(
            "Failed to create EGLDisplay for device: {:?}",
            path.as_deref().map(Path::display)
        )
    })?;
    let device = EGLDevice::device_for_display(&display).with_context(|| {
        format!(
            "Unable to find matching egl device for {:?}",
            path.as_deref().map(Path::display)
        )
    })?;

    let context =
        EGLContext::new_with_priority(&display, ContextPriority::High).with_context(|| {
            format!(
                "Failed to create EGLContext for device {:?}:{:?}",
                device,
                path.as_deref().map(Path::display),
            )
        })?;

    // the context keeps its display alive
    Ok(EGLInternals { device, context })
}
