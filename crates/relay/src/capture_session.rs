use std::sync::Arc;

use capture_preview_core::{PixelFormat, PreviewConfig, PreviewError, Result, Size, BUFFER_COUNT};

use crate::backend::{CaptureFrame, CaptureItem, FramePool, GraphicsDevice, HandlerToken, NotifyHandler, SessionHandle};

/// Capture behaviour that can be toggled per session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionOptions {
    pub cursor_capture: bool,
    pub border_required: bool,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            cursor_capture: true,
            border_required: true,
        }
    }
}

impl From<&PreviewConfig> for SessionOptions {
    fn from(config: &PreviewConfig) -> Self {
        Self {
            cursor_capture: config.cursor_capture,
            border_required: config.border_required,
        }
    }
}

/// Frame pool + session bound to one capture item.
pub struct CaptureSession<D: GraphicsDevice> {
    pool: Option<Arc<D::FramePool>>,
    session: Option<D::Session>,
    item: Option<D::Item>,
    pool_size: Size,
    started: bool,
}

impl<D: GraphicsDevice> CaptureSession<D> {
    pub fn create(device: &D, item: D::Item, options: SessionOptions) -> Result<Self> {
        let source_size = item.size()?;
        // A minimized source reports 0x0, which the pool cannot allocate.
        let pool_size = source_size.at_least_one();

        let pool = device.create_frame_pool(PixelFormat::Bgra8Unorm, BUFFER_COUNT, pool_size)?;
        let session = match device.create_session(&pool, &item) {
            Ok(session) => session,
            Err(e) => {
                let _ = pool.close();
                return Err(e);
            }
        };

        if let Err(e) = session.set_cursor_capture_enabled(options.cursor_capture) {
            tracing::debug!(error = %e, "cursor capture toggle not supported");
        }
        if let Err(e) = session.set_border_required(options.border_required) {
            tracing::debug!(error = %e, "capture border toggle not supported");
        }

        tracing::info!(
            source = %item.display_name(),
            size = %pool_size,
            buffers = BUFFER_COUNT,
            "capture session created"
        );

        Ok(Self {
            pool: Some(Arc::new(pool)),
            session: Some(session),
            item: Some(item),
            pool_size,
            started: false,
        })
    }

    fn pool(&self) -> Result<&Arc<D::FramePool>> {
        self.pool.as_ref().ok_or(PreviewError::disposed("capture session"))
    }

    pub fn start(&mut self) -> Result<()> {
        let session = self.session.as_ref().ok_or(PreviewError::disposed("capture session"))?;
        if self.started {
            return Err(PreviewError::AlreadyStarted);
        }

        session.start()?;
        self.started = true;
        tracing::info!("capture started");
        Ok(())
    }

    /// Reallocate the pool at `new_size`. Frames already retrieved in the
    /// current callback stay valid.
    pub fn resize_pool(&mut self, new_size: Size) -> Result<()> {
        let pool = self.pool()?;

        if new_size.is_empty() {
            tracing::debug!(size = %new_size, "pool resize deferred for empty size");
            return Ok(());
        }
        if new_size == self.pool_size {
            return Ok(());
        }

        pool.recreate(PixelFormat::Bgra8Unorm, BUFFER_COUNT, new_size)?;
        tracing::debug!(from = %self.pool_size, to = %new_size, "frame pool recreated");
        self.pool_size = new_size;
        Ok(())
    }

    pub fn try_get_next_frame(&self) -> Result<Option<ScopedFrame<D::Frame>>> {
        Ok(self.pool()?.try_get_next_frame()?.map(ScopedFrame::new))
    }

    pub fn register_frame_arrived(&self, handler: NotifyHandler) -> Result<HandlerToken> {
        self.pool()?.add_frame_arrived(handler)
    }

    pub fn unregister_frame_arrived(&self, token: HandlerToken) -> Result<()> {
        self.pool()?.remove_frame_arrived(token)
    }

    /// Shared handle on the pool, for unregistering without the relay lock.
    pub fn frame_pool(&self) -> Result<Arc<D::FramePool>> {
        self.pool().cloned()
    }

    pub fn source(&self) -> Option<&D::Item> {
        self.item.as_ref()
    }

    pub fn pool_size(&self) -> Size {
        self.pool_size
    }

    pub fn is_started(&self) -> bool {
        self.started
    }

    pub fn is_disposed(&self) -> bool {
        self.pool.is_none()
    }

    /// Stops delivery and releases the pool. Safe to call repeatedly.
    pub fn dispose(&mut self) {
        if let Some(session) = self.session.take() {
            if let Err(e) = session.close() {
                tracing::warn!(error = %e, "failed to close capture session");
            }
        }
        if let Some(pool) = self.pool.take() {
            if let Err(e) = pool.close() {
                tracing::warn!(error = %e, "failed to close frame pool");
            }
        }
        if self.item.take().is_some() {
            tracing::debug!("capture session disposed");
        }
        self.started = false;
    }
}

impl<D: GraphicsDevice> Drop for CaptureSession<D> {
    fn drop(&mut self) {
        self.dispose();
    }
}

/// A retrieved frame, closed exactly once when it goes out of scope.
pub struct ScopedFrame<F: CaptureFrame> {
    frame: F,
}

impl<F: CaptureFrame> ScopedFrame<F> {
    fn new(frame: F) -> Self {
        Self { frame }
    }

    pub fn content_size(&self) -> Result<Size> {
        self.frame.content_size()
    }

    pub fn texture(&self) -> Result<F::Texture> {
        self.frame.texture()
    }
}

impl<F: CaptureFrame> Drop for ScopedFrame<F> {
    fn drop(&mut self) {
        if let Err(e) = self.frame.close() {
            tracing::warn!(error = %e, "failed to release captured frame");
        }
    }
}
