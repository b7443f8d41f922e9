// SPDX-License-Identifier: GPL-3.0-only

use anyhow::Result;

pub mod gles;

/// Produces scan-out capable buffers and draws frames into them.
///
/// There is only one rendering context, drawing into a buffer binds the context to it.
pub trait RenderBackend {
    type Buffer;

    fn create_buffer(&mut self, width: u32, height: u32) -> Result<Self::Buffer>;

    /// Fills `target` with a solid colour and waits for the gpu to finish.
    fn render(&mut self, target: &mut Self::Buffer, color: [f32; 4]) -> Result<()>;
}
