// SPDX-License-Identifier: GPL-3.0-only

use anyhow::{bail, Context, Result};
use smithay::{
    reexports::drm::control::{connector, crtc, framebuffer},
    utils::{Monotonic, Time},
};
use std::time::Duration;
use tracing::{debug, error, info, trace, warn};

use super::{
    device::{DisplayMode, ExportFramebuffer, KmsDevice},
    drm_helpers::OutputBinding,
    framebuffer::CachedBuffer,
    render::RenderBackend,
};
use crate::backend::render::FrameContent;

mod timings;
pub use self::timings::Timings;

/// Number of buffers every output renders into.
const BUFFER_COUNT: usize = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputState {
    /// Buffers are allocated, but nothing was presented yet.
    Inactive,
    /// Rendering continuously, driven by flip completions.
    Active,
    /// Shutdown requested, waiting for the last flip to complete.
    Draining,
    /// The previous configuration was restored and all buffers are released.
    Restored,
}

/// The buffers of one output. One of them is being scanned out (or about to be),
/// the other one is free to render into.
#[derive(Debug)]
struct SwapRing<D: KmsDevice, B> {
    buffers: Vec<CachedBuffer<D, B>>,
    front: usize,
}

impl<D: KmsDevice, B> SwapRing<D, B> {
    fn new<R>(device: &D, renderer: &mut R, (w, h): (u32, u32)) -> Result<Self>
    where
        R: RenderBackend<Buffer = B>,
    {
        let buffers = (0..BUFFER_COUNT)
            .map(|id| {
                renderer
                    .create_buffer(w, h)
                    .map(|buffer| CachedBuffer::new(device.clone(), id, buffer))
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(SwapRing {
            buffers,
            // so the first swap makes buffer 0 the front buffer
            front: BUFFER_COUNT - 1,
        })
    }

    fn back_mut(&mut self) -> &mut CachedBuffer<D, B> {
        let back = (self.front + 1) % self.buffers.len();
        &mut self.buffers[back]
    }

    fn swap(&mut self) -> &mut CachedBuffer<D, B> {
        self.front = (self.front + 1) % self.buffers.len();
        &mut self.buffers[self.front]
    }

    fn release(&mut self) {
        self.buffers.clear();
    }
}

/// A single driven output: its claimed crtc and its render/present cycle.
#[derive(Debug)]
pub struct Surface<D: KmsDevice, B> {
    pub(crate) binding: OutputBinding<D::Mode>,
    device: D,
    ring: SwapRing<D, B>,

    flip_pending: bool,
    tearing_down: bool,
    state: OutputState,
    timings: Timings,
}

impl<D, B> Surface<D, B>
where
    D: KmsDevice + ExportFramebuffer<B>,
{
    pub fn new<R>(device: &D, renderer: &mut R, binding: OutputBinding<D::Mode>) -> Result<Self>
    where
        R: RenderBackend<Buffer = B>,
    {
        let ring = SwapRing::new(device, renderer, binding.size)
            .with_context(|| format!("Failed to create render surface for {}", binding.name))?;
        let timings = Timings::new(binding.mode.refresh_mhz());

        Ok(Surface {
            binding,
            device: device.clone(),
            ring,
            flip_pending: false,
            tearing_down: false,
            state: OutputState::Inactive,
            timings,
        })
    }

    pub fn name(&self) -> &str {
        &self.binding.name
    }

    pub fn crtc(&self) -> crtc::Handle {
        self.binding.crtc
    }

    pub fn connector(&self) -> connector::Handle {
        self.binding.connector
    }

    pub fn state(&self) -> OutputState {
        self.state
    }

    pub fn flip_pending(&self) -> bool {
        self.flip_pending
    }

    pub fn timings(&self) -> &Timings {
        &self.timings
    }

    /// Renders the first frame, modesets the crtc to it and queues a flip, so the
    /// completion event starts the render loop.
    pub fn start<R, C>(&mut self, renderer: &mut R, content: &mut C) -> Result<()>
    where
        R: RenderBackend<Buffer = B>,
        C: FrameContent + ?Sized,
    {
        if self.state != OutputState::Inactive {
            bail!("Output {} was already started", self.binding.name);
        }

        let fb = self.render_frame(renderer, content)?;
        self.device
            .modeset(
                self.binding.crtc,
                Some(fb),
                (0, 0),
                &[self.binding.connector],
                Some(self.binding.mode),
            )
            .with_context(|| format!("Failed to set mode on {}", self.binding.name))?;
        self.queue_flip(fb)?;

        self.state = OutputState::Active;
        debug!(name = %self.binding.name, "Output active");
        Ok(())
    }

    /// Renders the next frame into the back buffer and requests a flip to it.
    pub fn present_next_frame<R, C>(&mut self, renderer: &mut R, content: &mut C) -> Result<()>
    where
        R: RenderBackend<Buffer = B>,
        C: FrameContent + ?Sized,
    {
        if self.flip_pending {
            bail!(
                "Flip requested on {} while another one is pending",
                self.binding.name
            );
        }
        if self.state != OutputState::Active {
            bail!(
                "Output {} is not active ({:?})",
                self.binding.name,
                self.state
            );
        }

        let fb = self.render_frame(renderer, content)?;
        self.queue_flip(fb)
    }

    fn render_frame<R, C>(
        &mut self,
        renderer: &mut R,
        content: &mut C,
    ) -> Result<framebuffer::Handle>
    where
        R: RenderBackend<Buffer = B>,
        C: FrameContent + ?Sized,
    {
        let color = content.frame_color();
        renderer.render(self.ring.back_mut().buffer_mut(), color)?;

        let front = self.ring.swap();
        trace!(name = %self.binding.name, buffer = front.id(), "Swapped buffers");
        front
            .framebuffer()
            .with_context(|| format!("Cannot scan out frame on {}", self.binding.name))
    }

    fn queue_flip(&mut self, fb: framebuffer::Handle) -> Result<()> {
        self.device
            .page_flip(self.binding.crtc, fb)
            .with_context(|| format!("Page flip rejected on {}", self.binding.name))?;
        self.flip_pending = true;
        Ok(())
    }

    /// Handles the completion of the pending flip, presenting the next frame
    /// unless the output is shutting down.
    pub fn on_flip_complete<R, C>(
        &mut self,
        renderer: &mut R,
        content: &mut C,
        sequence: u32,
        time: Duration,
    ) -> Result<()>
    where
        R: RenderBackend<Buffer = B>,
        C: FrameContent + ?Sized,
    {
        if !self.flip_pending {
            warn!(name = %self.binding.name, "Flip completion without pending flip");
            return Ok(());
        }
        self.flip_pending = false;
        self.timings.presented(Time::<Monotonic>::from(time), sequence);

        if self.tearing_down {
            debug!(name = %self.binding.name, "Last flip completed");
            return Ok(());
        }

        self.present_next_frame(renderer, content)
    }

    /// Stops presenting new frames. The flip in flight, if any, still has to complete.
    pub fn begin_teardown(&mut self) {
        self.tearing_down = true;
        if matches!(self.state, OutputState::Inactive | OutputState::Active) {
            self.state = OutputState::Draining;
        }
    }

    pub fn is_drained(&self) -> bool {
        self.tearing_down && !self.flip_pending
    }

    /// The crtc this output's previous configuration lights up, if any.
    pub fn restore_target(&self) -> Option<crtc::Handle> {
        self.binding
            .saved
            .filter(|saved| saved.mode.is_some())
            .map(|saved| saved.crtc)
    }

    fn ensure_drained(&self) -> Result<()> {
        if !self.is_drained() {
            bail!(
                "Output {} cannot be restored with a flip in flight",
                self.binding.name
            );
        }
        Ok(())
    }

    fn disable_crtc(&self) -> Result<()> {
        self.device
            .modeset(self.binding.crtc, None, (0, 0), &[], None)
            .with_context(|| format!("Failed to disable crtc of {}", self.binding.name))
    }

    /// Re-applies the saved configuration, driving `connectors`.
    fn apply_saved(&self, connectors: &[connector::Handle]) -> Result<()> {
        let Some(saved) = self.binding.saved else {
            return Ok(());
        };
        let Some(mode) = saved.mode else {
            return Ok(());
        };
        self.device
            .modeset(
                saved.crtc,
                saved.framebuffer,
                saved.position,
                connectors,
                Some(mode),
            )
            .with_context(|| {
                format!("Failed to restore previous mode on {}", self.binding.name)
            })
    }

    /// Drops the saved state and all buffers once the crtcs are restored.
    fn release(&mut self) {
        self.binding.saved = None;
        self.ring.release();
        self.state = OutputState::Restored;

        match self.timings.average_frame_time() {
            Some(frame_time) => info!(
                name = %self.binding.name,
                frames = self.timings.frames_presented(),
                missed = self.timings.vblanks_missed(),
                "Restored output, average frame time {:?} (refresh interval {:?})",
                frame_time,
                self.timings.refresh_interval(),
            ),
            None => info!(
                name = %self.binding.name,
                frames = self.timings.frames_presented(),
                "Restored output"
            ),
        }
    }
}

/// Puts every crtc back into the state we found it in and releases all buffers.
///
/// Claimed crtcs are switched off first, unless some output's previous configuration
/// lives on them, so one output's cleanup never undoes another one's restore. Outputs
/// that could not be restored keep their saved state and buffers.
pub fn restore_outputs<D, B>(surfaces: &mut [Surface<D, B>]) -> Result<()>
where
    D: KmsDevice + ExportFramebuffer<B>,
{
    let outstanding = surfaces
        .iter()
        .enumerate()
        .filter(|(_, s)| s.state != OutputState::Restored)
        .map(|(idx, _)| idx)
        .collect::<Vec<_>>();
    for &idx in &outstanding {
        surfaces[idx].ensure_drained()?;
    }

    let targets = outstanding
        .iter()
        .filter_map(|&idx| surfaces[idx].restore_target())
        .collect::<Vec<_>>();

    let mut failed = vec![false; surfaces.len()];
    let mut result = Ok(());

    for &idx in &outstanding {
        let surface = &surfaces[idx];
        if targets.contains(&surface.crtc()) {
            continue;
        }
        if let Err(err) = surface.disable_crtc() {
            failed[idx] = true;
            record_failure(err, &mut result);
        }
    }

    let mut restored = Vec::new();
    for &idx in &outstanding {
        let Some(target) = surfaces[idx].restore_target() else {
            continue;
        };
        if restored.contains(&target) {
            continue;
        }
        restored.push(target);

        // connectors that shared a crtc before get it back together
        let group = outstanding
            .iter()
            .copied()
            .filter(|&other| surfaces[other].restore_target() == Some(target))
            .collect::<Vec<_>>();
        let connectors = group
            .iter()
            .map(|&other| surfaces[other].connector())
            .collect::<Vec<_>>();
        if let Err(err) = surfaces[idx].apply_saved(&connectors) {
            for other in group {
                failed[other] = true;
            }
            record_failure(err, &mut result);
        }
    }

    for idx in outstanding {
        if !failed[idx] {
            surfaces[idx].release();
        }
    }
    result
}

fn record_failure(err: anyhow::Error, result: &mut Result<()>) {
    error!(?err, "Failed to restore output");
    if result.is_ok() {
        *result = Err(err);
    }
}
