// SPDX-License-Identifier: GPL-3.0-only

use anyhow::{Context, Result};
use smithay::{
    backend::{
        allocator::{
            dmabuf::{AsDmabuf, Dmabuf},
            gbm::{GbmAllocator, GbmBuffer, GbmBufferFlags, GbmConvertError, GbmDevice},
            Allocator, Fourcc, Modifier,
        },
        drm::DrmDeviceFd,
        egl::EGLContext,
        renderer::{gles::GlesError, glow::GlowRenderer, Bind, Color32F, Frame, Renderer},
    },
    reexports::drm::buffer::{Buffer as DrmBuffer, DrmFourcc, Handle as BufferHandle},
    utils::{Physical, Rectangle, Size, Transform},
};
use std::{fmt, io};
use tracing::trace;

use super::RenderBackend;

/// Errors raised by the [`GbmGlowBackend`]
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// OpenGL error
    #[error(transparent)]
    Gl(#[from] GlesError),
    /// Allocating a gbm buffer failed
    #[error("Failed to allocate {0}x{1} scan-out buffer")]
    Allocation(u32, u32, #[source] io::Error),
    /// The gbm buffer could not be exported as a dmabuf
    #[error(transparent)]
    Export(#[from] GbmConvertError),
    /// Waiting for the gpu to finish got interrupted
    #[error("Interrupted while waiting for rendering to finish")]
    Interrupted,
}

/// A gbm buffer object usable both as render target and as scan-out source.
pub struct GbmRenderBuffer {
    bo: GbmBuffer,
    dmabuf: Dmabuf,
}

impl GbmRenderBuffer {
    fn size(&self) -> Size<i32, Physical> {
        let (w, h) = DrmBuffer::size(&*self.bo);
        Size::from((w as i32, h as i32))
    }
}

impl DrmBuffer for GbmRenderBuffer {
    fn size(&self) -> (u32, u32) {
        DrmBuffer::size(&*self.bo)
    }

    fn format(&self) -> DrmFourcc {
        DrmBuffer::format(&*self.bo)
    }

    fn pitch(&self) -> u32 {
        DrmBuffer::pitch(&*self.bo)
    }

    fn handle(&self) -> BufferHandle {
        DrmBuffer::handle(&*self.bo)
    }
}

impl fmt::Debug for GbmRenderBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GbmRenderBuffer")
            .field("size", &DrmBuffer::size(self))
            .field("format", &DrmBuffer::format(self))
            .finish_non_exhaustive()
    }
}

/// Renders with OpenGL ES into buffers allocated from a gbm device.
pub struct GbmGlowBackend {
    allocator: GbmAllocator<DrmDeviceFd>,
    renderer: GlowRenderer,
}

impl fmt::Debug for GbmGlowBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GbmGlowBackend")
            .field("renderer", &self.renderer)
            .finish_non_exhaustive()
    }
}

impl GbmGlowBackend {
    pub fn new(gbm: GbmDevice<DrmDeviceFd>, context: EGLContext) -> Result<Self> {
        let renderer = unsafe { GlowRenderer::new(context) }.context("Failed to create renderer")?;
        Ok(GbmGlowBackend {
            allocator: GbmAllocator::new(
                gbm,
                GbmBufferFlags::RENDERING | GbmBufferFlags::SCANOUT,
            ),
            renderer,
        })
    }

    fn allocate(&mut self, width: u32, height: u32) -> Result<GbmRenderBuffer, Error> {
        let bo = self
            .allocator
            .create_buffer(width, height, Fourcc::Xrgb8888, &[Modifier::Invalid])
            .map_err(|err| Error::Allocation(width, height, err))?;
        let dmabuf = bo.export()?;
        Ok(GbmRenderBuffer { bo, dmabuf })
    }

    fn draw(&mut self, target: &mut GbmRenderBuffer, color: [f32; 4]) -> Result<(), Error> {
        let size = target.size();
        let mut fb = self.renderer.bind(&mut target.dmabuf)?;
        let mut frame = self.renderer.render(&mut fb, size, Transform::Normal)?;
        frame.clear(Color32F::from(color), &[Rectangle::from_size(size)])?;
        let sync = frame.finish()?;
        // the buffer goes straight to the display controller, no fences
        sync.wait().map_err(|_| Error::Interrupted)?;
        Ok(())
    }
}

impl RenderBackend for GbmGlowBackend {
    type Buffer = GbmRenderBuffer;

    fn create_buffer(&mut self, width: u32, height: u32) -> Result<GbmRenderBuffer> {
        Ok(self.allocate(width, height)?)
    }

    fn render(&mut self, target: &mut GbmRenderBuffer, color: [f32; 4]) -> Result<()> {
        trace!(?color, "Rendering frame");
        self.draw(target, color)
            .context("Failed to render frame")
    }
}
