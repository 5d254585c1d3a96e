//! Render backend boundary.
//!
//! The actual renderer (draw submission, font atlases, widget drawing) is an
//! external collaborator. The host only needs this narrow surface: it calls
//! `init` exactly once before the first frame, `draw_frame` once per frame
//! between the frame context's bind and present, `resize` at frame
//! boundaries, and `end` exactly once at shutdown. None of these are ever
//! called concurrently.

use std::path::Path;

use crate::frame::GraphicsContextError;

/// The excluded rendering backend, seen from the host.
pub trait RenderBackend {
    /// One-time renderer setup. `resource_dir` points at fonts, icons and
    /// other assets; the render context is current when this is called.
    fn init(
        &mut self,
        resource_dir: &Path,
        width: u32,
        height: u32,
    ) -> Result<(), GraphicsContextError>;

    /// Compose and submit one frame's draw data.
    fn draw_frame(&mut self);

    /// Viewport dimensions changed. Only called between frames.
    fn resize(&mut self, width: u32, height: u32);

    /// One-time renderer teardown.
    fn end(&mut self) -> Result<(), GraphicsContextError>;
}
