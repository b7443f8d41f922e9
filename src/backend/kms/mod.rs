// SPDX-License-Identifier: GPL-3.0-only

use crate::{
    backend::render::{ColorCycle, FrameContent},
    config::Config,
};

use anyhow::{Context, Result};
use render::{gles::GbmGlowBackend, RenderBackend};
use smithay::{
    backend::{allocator::gbm::GbmDevice, drm::DrmDeviceFd},
    reexports::drm::control::crtc,
};
use std::time::Duration;
use tracing::{debug, info, trace, warn};

mod device;
mod drm_helpers;
mod events;
mod framebuffer;
pub mod render;
mod surface;
#[cfg(test)]
mod testing;

pub use device::{ExportFramebuffer, KmsDevice};
pub use events::{EventSource, LoopEvent, LoopEvents};
pub use surface::{OutputState, Surface};

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("No connected output can be driven")]
    NoOutputs,
}

/// Everything needed to drive the outputs of one device.
///
/// Every surface keeps its own handle to the device, so it stays open until the
/// last buffer has been released.
#[derive(Debug)]
pub struct KmsState<D: KmsDevice, R: RenderBackend, C> {
    // surfaces release their buffers before the renderer goes away
    surfaces: Vec<Surface<D, R::Buffer>>,
    content: C,
    renderer: R,
}

impl<D, R, C> KmsState<D, R, C>
where
    D: KmsDevice + ExportFramebuffer<R::Buffer>,
    R: RenderBackend,
    C: FrameContent,
{
    /// Claims a crtc for every usable connector and allocates its buffers.
    pub fn new(device: D, mut renderer: R, content: C) -> Result<Self> {
        let bindings = drm_helpers::display_configuration(&device)?;
        if bindings.is_empty() {
            return Err(Error::NoOutputs.into());
        }

        let surfaces = bindings
            .into_iter()
            .map(|binding| Surface::new(&device, &mut renderer, binding))
            .collect::<Result<Vec<_>>>()?;

        Ok(KmsState {
            surfaces,
            content,
            renderer,
        })
    }

    pub fn surfaces(&self) -> &[Surface<D, R::Buffer>] {
        &self.surfaces
    }

    /// Presents the first frame on every output.
    pub fn start(&mut self) -> Result<()> {
        for surface in &mut self.surfaces {
            surface.start(&mut self.renderer, &mut self.content)?;
            info!(name = surface.name(), "Output started");
        }
        Ok(())
    }

    fn flip_complete(&mut self, crtc: crtc::Handle, sequence: u32, time: Duration) -> Result<()> {
        let Some(surface) = self.surfaces.iter_mut().find(|s| s.crtc() == crtc) else {
            debug!(?crtc, "Flip completion for unknown crtc");
            return Ok(());
        };
        trace!(name = surface.name(), sequence, "Flip complete");
        surface.on_flip_complete(&mut self.renderer, &mut self.content, sequence, time)
    }

    fn begin_teardown(&mut self) {
        for surface in &mut self.surfaces {
            surface.begin_teardown();
        }
    }

    /// Handles a single event. Returns `true` once shutdown was requested.
    pub fn handle_event(&mut self, event: LoopEvent) -> Result<bool> {
        match event {
            LoopEvent::FlipComplete {
                crtc,
                sequence,
                time,
            } => {
                self.flip_complete(crtc, sequence, time)?;
                Ok(false)
            }
            LoopEvent::Stop => {
                self.begin_teardown();
                Ok(true)
            }
        }
    }

    /// Keeps presenting until a stop is requested.
    ///
    /// After a failure the remaining events of the batch are still consumed with all
    /// outputs tearing down, so no completion that already arrived is lost.
    pub fn run<E: EventSource>(&mut self, events: &mut E) -> Result<()> {
        loop {
            let mut stop = false;
            let mut failure = None;
            for event in events.dispatch()? {
                match self.handle_event(event) {
                    Ok(requested) => stop |= requested,
                    Err(err) if failure.is_none() => {
                        self.begin_teardown();
                        failure = Some(err);
                    }
                    Err(err) => warn!(?err, "Further error while tearing down"),
                }
            }
            if let Some(err) = failure {
                return Err(err);
            }
            if stop {
                return Ok(());
            }
        }
    }

    /// Waits for the flips in flight and puts every crtc back the way we found it.
    pub fn shutdown<E: EventSource>(&mut self, events: &mut E) -> Result<()> {
        self.begin_teardown();

        while self.surfaces.iter().any(|s| !s.is_drained()) {
            for surface in self.surfaces.iter().filter(|s| !s.is_drained()) {
                debug!(name = surface.name(), "Waiting for pending flip");
            }
            for event in events.dispatch()? {
                if let LoopEvent::FlipComplete {
                    crtc,
                    sequence,
                    time,
                } = event
                {
                    self.flip_complete(crtc, sequence, time)?;
                }
            }
        }

        surface::restore_outputs(&mut self.surfaces)
    }
}

/// Opens the configured device and sets up rendering for every connected output.
pub fn init_backend(
    config: &Config,
) -> Result<(KmsState<DrmDeviceFd, GbmGlowBackend, ColorCycle>, LoopEvents)> {
    let path = config.device();
    let fd = device::open_device(path)?;
    let gbm = GbmDevice::new(fd.clone())
        .with_context(|| format!("Failed to initialize GBM device for {}", path.display()))?;
    let egl = device::init_egl(&gbm)?;
    debug!(device = ?egl.device, "Created EGL context");

    let renderer = GbmGlowBackend::new(gbm, egl.context)?;
    let content = ColorCycle::new(config.static_conf.cycle_ms);
    let state = KmsState::new(fd.clone(), renderer, content)?;
    let events = LoopEvents::new(&fd, config.static_conf.stop_on_stdin)?;

    info!(
        outputs = state.surfaces().len(),
        "Driving outputs on {}",
        path.display()
    );
    Ok((state, events))
}
