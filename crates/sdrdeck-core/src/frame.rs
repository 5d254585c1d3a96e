//! # Frame Context
//!
//! Bind/unbind discipline around the shared render context.
//!
//! The render context is owned by the process but must only be current on
//! the frame-driving thread, and only for the duration of one frame:
//! [`FrameContext::begin_frame`] binds it and returns a [`FrameGuard`] whose
//! drop always unbinds, even when frame composition bails out early. Between
//! frames no render context is current, so other threads or processes may
//! use the device.
//!
//! Resize requests can arrive from any thread at any time; they land in an
//! atomic pending-size cell and are applied at the start of the next frame,
//! never mid-frame, so a frame is always presented with a consistent
//! viewport. Applying a resize also writes the new size back into the
//! configuration under a dirty transaction.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde_json::json;
use thiserror::Error;

use crate::backend::RenderBackend;
use crate::config::ConfigStore;

/// Sentinel meaning "no resize pending".
const NO_RESIZE: u64 = u64::MAX;

/// Errors from the shared render context. All of these are fatal: there is
/// no degraded rendering mode without a valid context.
#[derive(Debug, Error)]
pub enum GraphicsContextError {
    /// Binding the context to the frame thread failed
    #[error("failed to bind render context: {0}")]
    Bind(String),

    /// Presenting the finished frame failed
    #[error("failed to present frame: {0}")]
    Present(String),

    /// The rendering backend reported a failure
    #[error("render backend error: {0}")]
    Backend(String),
}

/// The shared native context/surface pair, provided by the windowing glue.
///
/// `make_current` and `release_current` are only ever called from the frame
/// thread, strictly paired, with `present` in between.
pub trait RenderSurface {
    /// Bind the context to the calling thread.
    fn make_current(&mut self) -> Result<(), GraphicsContextError>;

    /// Unbind the context from the calling thread.
    fn release_current(&mut self);

    /// Swap buffers, honoring the vsync request.
    fn present(&mut self, vsync: bool) -> Result<(), GraphicsContextError>;
}

/// Cloneable handle for requesting a resize from any thread.
#[derive(Clone)]
pub struct ResizeRequest {
    pending: Arc<AtomicU64>,
}

impl ResizeRequest {
    fn new() -> Self {
        Self {
            pending: Arc::new(AtomicU64::new(NO_RESIZE)),
        }
    }

    /// Record new requested dimensions; a later request overwrites an
    /// unapplied earlier one.
    pub fn request(&self, width: u32, height: u32) {
        let packed = (u64::from(width) << 32) | u64::from(height);
        self.pending.store(packed, Ordering::SeqCst);
    }

    fn take(&self) -> Option<(u32, u32)> {
        let packed = self.pending.swap(NO_RESIZE, Ordering::SeqCst);
        if packed == NO_RESIZE {
            return None;
        }
        Some(((packed >> 32) as u32, packed as u32))
    }
}

/// Owns the per-frame acquisition of the shared render context.
pub struct FrameContext {
    surface: Box<dyn RenderSurface>,
    resize: ResizeRequest,
    width: u32,
    height: u32,
    config: ConfigStore,
}

impl FrameContext {
    pub fn new(
        surface: Box<dyn RenderSurface>,
        config: ConfigStore,
        width: u32,
        height: u32,
    ) -> Self {
        Self {
            surface,
            resize: ResizeRequest::new(),
            width,
            height,
            config,
        }
    }

    /// Handle for requesting resizes from any thread.
    pub fn resize_handle(&self) -> ResizeRequest {
        self.resize.clone()
    }

    /// Current viewport dimensions.
    pub fn size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    /// Start a frame: apply a pending resize, then bind the context.
    ///
    /// A bind failure is fatal; rendering cannot proceed without a current
    /// context.
    pub fn begin_frame(
        &mut self,
        backend: &mut dyn RenderBackend,
    ) -> Result<FrameGuard<'_>, GraphicsContextError> {
        if let Some((width, height)) = self.resize.take() {
            self.width = width;
            self.height = height;
            backend.resize(width, height);

            let mut cfg = self.config.acquire();
            cfg["windowSize"]["w"] = json!(width);
            cfg["windowSize"]["h"] = json!(height);
            cfg.release(true);
            tracing::debug!("Applied resize to {}x{}", width, height);
        }

        self.surface.make_current()?;
        Ok(FrameGuard {
            ctx: self,
            presented: false,
        })
    }
}

impl std::fmt::Debug for FrameContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameContext")
            .field("width", &self.width)
            .field("height", &self.height)
            .finish()
    }
}

/// Proof that the render context is current. Dropping it unbinds the
/// context, whether or not the frame was presented.
pub struct FrameGuard<'a> {
    ctx: &'a mut FrameContext,
    presented: bool,
}

impl std::fmt::Debug for FrameGuard<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameGuard")
            .field("presented", &self.presented)
            .finish()
    }
}

impl FrameGuard<'_> {
    /// Finish the frame: present the surface, then unbind on drop.
    pub fn end(mut self, vsync: bool) -> Result<(), GraphicsContextError> {
        self.presented = true;
        self.ctx.surface.present(vsync)
    }

    /// Viewport dimensions this frame is composed at.
    pub fn size(&self) -> (u32, u32) {
        (self.ctx.width, self.ctx.height)
    }
}

impl Drop for FrameGuard<'_> {
    fn drop(&mut self) {
        if !self.presented {
            tracing::debug!("Frame dropped without present");
        }
        self.ctx.surface.release_current();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;
    use std::sync::Mutex;
    use tempfile::TempDir;

    #[derive(Default)]
    struct SurfaceLog {
        bound: bool,
        binds: usize,
        releases: usize,
        presents: Vec<bool>,
        fail_bind: bool,
    }

    #[derive(Clone, Default)]
    struct MockSurface {
        log: Arc<Mutex<SurfaceLog>>,
    }

    impl RenderSurface for MockSurface {
        fn make_current(&mut self) -> Result<(), GraphicsContextError> {
            let mut log = self.log.lock().unwrap();
            if log.fail_bind {
                return Err(GraphicsContextError::Bind("no display".to_string()));
            }
            assert!(!log.bound, "context bound twice");
            log.bound = true;
            log.binds += 1;
            Ok(())
        }

        fn release_current(&mut self) {
            let mut log = self.log.lock().unwrap();
            log.bound = false;
            log.releases += 1;
        }

        fn present(&mut self, vsync: bool) -> Result<(), GraphicsContextError> {
            let mut log = self.log.lock().unwrap();
            assert!(log.bound, "present without a current context");
            log.presents.push(vsync);
            Ok(())
        }
    }

    #[derive(Default)]
    struct MockBackend {
        resizes: Vec<(u32, u32)>,
        frames: usize,
    }

    impl RenderBackend for MockBackend {
        fn init(
            &mut self,
            _resource_dir: &Path,
            _width: u32,
            _height: u32,
        ) -> Result<(), GraphicsContextError> {
            Ok(())
        }

        fn draw_frame(&mut self) {
            self.frames += 1;
        }

        fn resize(&mut self, width: u32, height: u32) {
            self.resizes.push((width, height));
        }

        fn end(&mut self) -> Result<(), GraphicsContextError> {
            Ok(())
        }
    }

    fn store(dir: &TempDir) -> ConfigStore {
        let store = ConfigStore::new(dir.path().join("config.json"));
        store
            .load(&serde_json::json!({ "windowSize": { "w": 1280, "h": 720 } }))
            .unwrap();
        store
    }

    #[test]
    fn test_frame_binds_and_unbinds() {
        let dir = TempDir::new().unwrap();
        let surface = MockSurface::default();
        let log = Arc::clone(&surface.log);
        let mut backend = MockBackend::default();
        let mut ctx = FrameContext::new(Box::new(surface), store(&dir), 1280, 720);

        let guard = ctx.begin_frame(&mut backend).unwrap();
        backend.draw_frame();
        guard.end(true).unwrap();

        let log = log.lock().unwrap();
        assert_eq!(log.binds, 1);
        assert_eq!(log.releases, 1);
        assert!(!log.bound);
        assert_eq!(log.presents, vec![true]);
    }

    #[test]
    fn test_guard_drop_unbinds_without_present() {
        let dir = TempDir::new().unwrap();
        let surface = MockSurface::default();
        let log = Arc::clone(&surface.log);
        let mut backend = MockBackend::default();
        let mut ctx = FrameContext::new(Box::new(surface), store(&dir), 1280, 720);

        {
            let _guard = ctx.begin_frame(&mut backend).unwrap();
            // Early bail-out: no present.
        }

        let log = log.lock().unwrap();
        assert_eq!(log.releases, 1);
        assert!(log.presents.is_empty());
        assert!(!log.bound);
    }

    #[test]
    fn test_bind_failure_is_fatal() {
        let dir = TempDir::new().unwrap();
        let surface = MockSurface::default();
        surface.log.lock().unwrap().fail_bind = true;
        let log = Arc::clone(&surface.log);
        let mut backend = MockBackend::default();
        let mut ctx = FrameContext::new(Box::new(surface), store(&dir), 1280, 720);

        let err = ctx.begin_frame(&mut backend).unwrap_err();
        assert!(matches!(err, GraphicsContextError::Bind(_)));
        assert_eq!(log.lock().unwrap().releases, 0);
    }

    #[test]
    fn test_mid_frame_resize_applies_next_frame() {
        let dir = TempDir::new().unwrap();
        let config = store(&dir);
        let mut backend = MockBackend::default();
        let mut ctx = FrameContext::new(
            Box::new(MockSurface::default()),
            config.clone(),
            1280,
            720,
        );
        let resize = ctx.resize_handle();

        let guard = ctx.begin_frame(&mut backend).unwrap();
        resize.request(800, 600);
        // This frame still composes at the old viewport.
        assert_eq!(guard.size(), (1280, 720));
        guard.end(false).unwrap();
        assert!(backend.resizes.is_empty());

        let guard = ctx.begin_frame(&mut backend).unwrap();
        assert_eq!(guard.size(), (800, 600));
        guard.end(false).unwrap();
        assert_eq!(backend.resizes, vec![(800, 600)]);

        let cfg = config.acquire();
        assert_eq!(cfg["windowSize"]["w"], 800);
        assert_eq!(cfg["windowSize"]["h"], 600);
        cfg.release(false);
    }

    #[test]
    fn test_latest_resize_request_wins() {
        let dir = TempDir::new().unwrap();
        let mut backend = MockBackend::default();
        let mut ctx = FrameContext::new(
            Box::new(MockSurface::default()),
            store(&dir),
            1280,
            720,
        );
        let resize = ctx.resize_handle();

        resize.request(640, 480);
        resize.request(1920, 1080);

        let guard = ctx.begin_frame(&mut backend).unwrap();
        assert_eq!(guard.size(), (1920, 1080));
        guard.end(false).unwrap();
        assert_eq!(backend.resizes, vec![(1920, 1080)]);
    }

    #[test]
    fn test_resize_writes_config_dirty() {
        let dir = TempDir::new().unwrap();
        let config = store(&dir);
        let revision = config.revision();
        let mut backend = MockBackend::default();
        let mut ctx = FrameContext::new(
            Box::new(MockSurface::default()),
            config.clone(),
            1280,
            720,
        );

        ctx.resize_handle().request(1024, 768);
        let guard = ctx.begin_frame(&mut backend).unwrap();
        guard.end(false).unwrap();

        assert_eq!(config.revision(), revision + 1);
    }

    #[test]
    fn test_unused_value_is_not_a_resize() {
        let dir = TempDir::new().unwrap();
        let mut backend = MockBackend::default();
        let mut ctx = FrameContext::new(
            Box::new(MockSurface::default()),
            store(&dir),
            1280,
            720,
        );

        let guard = ctx.begin_frame(&mut backend).unwrap();
        guard.end(false).unwrap();
        assert!(backend.resizes.is_empty());
        assert_eq!(ctx.size(), (1280, 720));
    }

    #[test]
    fn test_present_vsync_flag_forwarded() {
        let dir = TempDir::new().unwrap();
        let surface = MockSurface::default();
        let log = Arc::clone(&surface.log);
        let mut backend = MockBackend::default();
        let mut ctx = FrameContext::new(Box::new(surface), store(&dir), 1280, 720);

        ctx.begin_frame(&mut backend).unwrap().end(false).unwrap();
        ctx.begin_frame(&mut backend).unwrap().end(true).unwrap();

        assert_eq!(log.lock().unwrap().presents, vec![false, true]);
    }

}
