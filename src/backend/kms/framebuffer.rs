// SPDX-License-Identifier: GPL-3.0-only

use smithay::reexports::drm::control::framebuffer;
use std::{fmt, io};
use tracing::{trace, warn};

use super::device::{ExportFramebuffer, KmsDevice};

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Failed to register a framebuffer for buffer {id}")]
    Register {
        id: usize,
        #[source]
        source: io::Error,
    },
}

/// A render buffer together with the framebuffer registered for it.
///
/// The framebuffer is created the first time the buffer gets scanned out and lives
/// exactly as long as the buffer does.
pub struct CachedBuffer<D: KmsDevice, B> {
    id: usize,
    buffer: B,
    framebuffer: Option<framebuffer::Handle>,
    device: D,
}

impl<D: KmsDevice, B> CachedBuffer<D, B> {
    pub fn new(device: D, id: usize, buffer: B) -> Self {
        CachedBuffer {
            id,
            buffer,
            framebuffer: None,
            device,
        }
    }

    pub fn id(&self) -> usize {
        self.id
    }

    pub fn buffer_mut(&mut self) -> &mut B {
        &mut self.buffer
    }

    pub fn cached_framebuffer(&self) -> Option<framebuffer::Handle> {
        self.framebuffer
    }

    /// Returns the framebuffer for this buffer, registering it on first use.
    pub fn framebuffer(&mut self) -> Result<framebuffer::Handle, Error>
    where
        D: ExportFramebuffer<B>,
    {
        if let Some(fb) = self.framebuffer {
            return Ok(fb);
        }

        let fb = self
            .device
            .add_framebuffer(&self.buffer)
            .map_err(|source| Error::Register {
                id: self.id,
                source,
            })?;
        trace!(id = self.id, ?fb, "Registered framebuffer");
        self.framebuffer = Some(fb);
        Ok(fb)
    }
}

impl<D: KmsDevice, B> Drop for CachedBuffer<D, B> {
    fn drop(&mut self) {
        if let Some(fb) = self.framebuffer.take() {
            trace!(id = self.id, ?fb, "Removing framebuffer");
            if let Err(err) = self.device.remove_framebuffer(fb) {
                warn!(?err, id = self.id, "Failed to remove framebuffer");
            }
        }
    }
}

impl<D: KmsDevice, B> fmt::Debug for CachedBuffer<D, B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CachedBuffer")
            .field("id", &self.id)
            .field("framebuffer", &self.framebuffer)
            .finish_non_exhaustive()
    }
}
