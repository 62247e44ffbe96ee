pub mod backend;
pub mod capture_session;
pub mod preview;
pub mod relay;
pub mod surface;

#[cfg(windows)]
pub mod d3d11;

#[cfg(test)]
mod testing;

pub use backend::{
    CaptureFrame, CaptureItem, CompositionContext, FramePool, GraphicsDevice, HandlerToken, NotifyHandler,
    SessionHandle, SwapChain,
};
pub use capture_session::{CaptureSession, ScopedFrame, SessionOptions};
pub use preview::CapturePreview;
pub use relay::{FrameOutcome, FrameRelay, PreviewEvent, RelayState, RelayStats};
pub use surface::{BackBuffer, PresentationSurface};
