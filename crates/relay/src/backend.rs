//! Seams between the relay and the platform graphics/capture stack.
//!
//! The relay only ever talks to these traits. On Windows they are implemented
//! by [`crate::d3d11`] (Direct3D 11 + Windows.Graphics.Capture + DXGI); tests
//! use an in-memory backend.

use capture_preview_core::{ClearColor, PixelFormat, Result, Size, SwapChainDesc};

/// Callback invoked by a notification source (frame arrived, source closed).
pub type NotifyHandler = Box<dyn Fn() + Send + Sync + 'static>;

/// Registration returned by a notification source, used to unregister.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HandlerToken(pub i64);

/// A graphics device able to feed a capture pool and own a presentation chain.
///
/// Shared read-only between the capture session and the presentation surface;
/// only the relay issues commands against it.
pub trait GraphicsDevice: Send + Sync + 'static {
    type Texture: Send + 'static;
    type Item: CaptureItem;
    type Frame: CaptureFrame<Texture = Self::Texture>;
    type FramePool: FramePool<Frame = Self::Frame>;
    type Session: SessionHandle;
    type SwapChain: SwapChain<Texture = Self::Texture>;

    fn create_frame_pool(&self, format: PixelFormat, buffer_count: u32, size: Size) -> Result<Self::FramePool>;

    fn create_session(&self, pool: &Self::FramePool, item: &Self::Item) -> Result<Self::Session>;

    fn create_swap_chain(&self, desc: &SwapChainDesc) -> Result<Self::SwapChain>;

    fn clear(&self, target: &Self::Texture, color: ClearColor) -> Result<()>;

    fn texture_size(&self, texture: &Self::Texture) -> Result<Size>;

    /// Full-resource copy. Source and destination must have the same size.
    fn copy_resource(&self, dst: &Self::Texture, src: &Self::Texture) -> Result<()>;

    /// Copy the top-left `extent` of `src` into the top-left of `dst`.
    /// `extent` must fit inside both textures.
    fn copy_region(&self, dst: &Self::Texture, src: &Self::Texture, extent: Size) -> Result<()>;
}

/// Something that can be captured: a window, a monitor.
pub trait CaptureItem: Clone + Send + Sync + 'static {
    /// Current size; changes over the item's lifetime.
    fn size(&self) -> Result<Size>;

    fn display_name(&self) -> String;

    fn add_closed(&self, handler: NotifyHandler) -> Result<HandlerToken>;

    fn remove_closed(&self, token: HandlerToken) -> Result<()>;
}

pub trait FramePool: Send + Sync + 'static {
    type Frame: CaptureFrame;

    /// Non-blocking. `Ok(None)` when nothing is queued.
    fn try_get_next_frame(&self) -> Result<Option<Self::Frame>>;

    /// Reallocate the pool buffers. Frames already handed out stay valid
    /// until released.
    fn recreate(&self, format: PixelFormat, buffer_count: u32, size: Size) -> Result<()>;

    fn add_frame_arrived(&self, handler: NotifyHandler) -> Result<HandlerToken>;

    fn remove_frame_arrived(&self, token: HandlerToken) -> Result<()>;

    fn close(&self) -> Result<()>;
}

/// One delivered frame. Must be closed to hand its slot back to the pool.
pub trait CaptureFrame: Send + 'static {
    type Texture;

    fn content_size(&self) -> Result<Size>;

    fn texture(&self) -> Result<Self::Texture>;

    fn close(&self) -> Result<()>;
}

pub trait SessionHandle: Send + 'static {
    fn start(&self) -> Result<()>;

    fn set_cursor_capture_enabled(&self, enabled: bool) -> Result<()>;

    fn set_border_required(&self, required: bool) -> Result<()>;

    fn close(&self) -> Result<()>;
}

/// Flip-model presentation chain. Dropping it releases the buffers.
pub trait SwapChain: Send + 'static {
    type Texture;

    fn resize_buffers(&self, buffer_count: u32, size: Size, format: PixelFormat) -> Result<()>;

    fn back_buffer(&self) -> Result<Self::Texture>;

    /// Blocks until `sync_interval` vertical blanks have passed.
    fn present(&self, sync_interval: u32) -> Result<()>;
}

/// Compositor able to wrap a presentation chain into something it can display.
pub trait CompositionContext<S> {
    type Surface;

    fn create_surface_for_swap_chain(&self, swap_chain: &S) -> Result<Self::Surface>;
}
