//! In-memory backend that journals every call, for relay tests.

use std::collections::VecDeque;
use std::sync::Arc;

use capture_preview_core::{ClearColor, PixelFormat, PreviewError, Result, Size, SwapChainDesc};
use parking_lot::Mutex;

use crate::backend::{
    CaptureFrame, CaptureItem, CompositionContext, FramePool, GraphicsDevice, HandlerToken, NotifyHandler,
    SessionHandle, SwapChain,
};

type SharedHandler = Arc<dyn Fn() + Send + Sync + 'static>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Op {
    CreatePool(Size),
    CreateSession,
    CursorCapture(bool),
    BorderRequired(bool),
    SessionStarted,
    Recreate(Size),
    FrameClosed(u64),
    SessionClosed,
    PoolClosed,
    HandlerRemoved,
    CreateSwapChain(Size),
    ResizeBuffers(Size),
    Clear,
    /// `partial` when only the overlap of mismatched textures was copied.
    Copy { frame: u64, partial: bool },
    Present(u32),
    SwapChainReleased,
}

impl Op {
    pub fn kind(&self) -> &'static str {
        match self {
            Op::CreatePool(_) => "create_pool",
            Op::CreateSession => "create_session",
            Op::CursorCapture(_) => "cursor_capture",
            Op::BorderRequired(_) => "border_required",
            Op::SessionStarted => "session_started",
            Op::Recreate(_) => "recreate",
            Op::FrameClosed(_) => "frame_closed",
            Op::SessionClosed => "session_closed",
            Op::PoolClosed => "pool_closed",
            Op::HandlerRemoved => "handler_removed",
            Op::CreateSwapChain(_) => "create_swap_chain",
            Op::ResizeBuffers(_) => "resize_buffers",
            Op::Clear => "clear",
            Op::Copy { .. } => "copy",
            Op::Present(_) => "present",
            Op::SwapChainReleased => "swap_chain_released",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextureOrigin {
    BackBuffer,
    Frame { id: u64, generation: u64 },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FakeTexture {
    pub size: Size,
    pub origin: TextureOrigin,
}

#[derive(Default)]
pub struct FakeState {
    pub ops: Vec<Op>,

    pub fail_pool_creation: bool,
    pub fail_session_creation: bool,
    pub fail_swap_chain_creation: bool,
    pub fail_resizes: u32,
    /// `u32::MAX` fails every copy.
    pub fail_copies: u32,
    pub fail_presents: u32,
    pub fail_recreates: u32,
    pub device_lost: bool,

    pub queue: VecDeque<(u64, Size)>,
    pub next_frame_id: u64,
    pub frames_retrieved: u64,
    pub frames_closed: u64,
    pub pool_size: Size,
    /// Bumped on every recreate; frames stamped with an older value are stale.
    pub pool_generation: u64,
    pub pool_closed: bool,

    pub swap_chain_desc: Option<SwapChainDesc>,
    pub chain_size: Size,
    pub last_clear_color: Option<[f32; 4]>,
    pub last_copy_extent: Option<Size>,

    pub frame_handlers: Vec<(i64, SharedHandler)>,
    pub closed_handlers: Vec<(i64, SharedHandler)>,
    pub next_token: i64,
}

impl FakeState {
    fn record(&mut self, op: Op) {
        self.ops.push(op);
    }

    fn token(&mut self) -> i64 {
        self.next_token += 1;
        self.next_token
    }
}

fn countdown(counter: &mut u32) -> bool {
    match *counter {
        0 => false,
        u32::MAX => true,
        _ => {
            *counter -= 1;
            true
        }
    }
}

/// Handle on the shared fake state. Cheap to clone across threads.
#[derive(Clone, Default)]
pub struct Fake {
    state: Arc<Mutex<FakeState>>,
}

impl Fake {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn device(&self) -> FakeDevice {
        FakeDevice { state: self.state.clone() }
    }

    pub fn item(&self, size: Size) -> FakeItem {
        FakeItem {
            size,
            state: self.state.clone(),
        }
    }

    pub fn with<R>(&self, f: impl FnOnce(&mut FakeState) -> R) -> R {
        f(&mut self.state.lock())
    }

    /// Queue a frame without notifying.
    pub fn push_frame(&self, size: Size) {
        let mut state = self.state.lock();
        state.next_frame_id += 1;
        let id = state.next_frame_id;
        state.queue.push_back((id, size));
    }

    pub fn fire_frame_arrived(&self) {
        let handlers: Vec<SharedHandler> = self.state.lock().frame_handlers.iter().map(|(_, h)| h.clone()).collect();
        for handler in handlers {
            handler();
        }
    }

    /// Queue a frame and notify, like the pool does.
    pub fn deliver(&self, size: Size) {
        self.push_frame(size);
        self.fire_frame_arrived();
    }

    pub fn close_source(&self) {
        let handlers: Vec<SharedHandler> = self.state.lock().closed_handlers.iter().map(|(_, h)| h.clone()).collect();
        for handler in handlers {
            handler();
        }
    }

    pub fn ops(&self) -> Vec<Op> {
        self.state.lock().ops.clone()
    }

    pub fn clear_ops(&self) {
        self.state.lock().ops.clear();
    }

    pub fn count(&self, pred: impl Fn(&Op) -> bool) -> usize {
        self.state.lock().ops.iter().filter(|op| pred(op)).count()
    }

    pub fn position(&self, pred: impl Fn(&Op) -> bool) -> Option<usize> {
        self.nth_position(0, pred)
    }

    pub fn nth_position(&self, n: usize, pred: impl Fn(&Op) -> bool) -> Option<usize> {
        self.state
            .lock()
            .ops
            .iter()
            .enumerate()
            .filter(|(_, op)| pred(op))
            .nth(n)
            .map(|(i, _)| i)
    }

    pub fn last_position(&self, pred: impl Fn(&Op) -> bool) -> Option<usize> {
        self.state.lock().ops.iter().rposition(|op| pred(op))
    }

    /// Frames retrieved but not yet closed.
    pub fn outstanding_frames(&self) -> u64 {
        let state = self.state.lock();
        state.frames_retrieved - state.frames_closed
    }
}

pub struct FakeDevice {
    state: Arc<Mutex<FakeState>>,
}

impl GraphicsDevice for FakeDevice {
    type Texture = FakeTexture;
    type Item = FakeItem;
    type Frame = FakeFrame;
    type FramePool = FakePool;
    type Session = FakeSession;
    type SwapChain = FakeSwapChain;

    fn create_frame_pool(&self, _format: PixelFormat, _buffer_count: u32, size: Size) -> Result<FakePool> {
        let mut state = self.state.lock();
        if state.fail_pool_creation {
            return Err(PreviewError::device_binding("device does not support capture"));
        }
        state.record(Op::CreatePool(size));
        state.pool_size = size;
        Ok(FakePool { state: self.state.clone() })
    }

    fn create_session(&self, _pool: &FakePool, _item: &FakeItem) -> Result<FakeSession> {
        let mut state = self.state.lock();
        if state.fail_session_creation {
            return Err(PreviewError::device_binding("session refused"));
        }
        state.record(Op::CreateSession);
        Ok(FakeSession { state: self.state.clone() })
    }

    fn create_swap_chain(&self, desc: &SwapChainDesc) -> Result<FakeSwapChain> {
        let mut state = self.state.lock();
        if state.fail_swap_chain_creation {
            return Err(PreviewError::surface_allocation("out of video memory"));
        }
        state.record(Op::CreateSwapChain(desc.size));
        state.swap_chain_desc = Some(*desc);
        state.chain_size = desc.size;
        Ok(FakeSwapChain { state: self.state.clone() })
    }

    fn clear(&self, _target: &FakeTexture, color: ClearColor) -> Result<()> {
        let mut state = self.state.lock();
        if state.device_lost {
            return Err(PreviewError::DeviceLost { reason: "removed".into() });
        }
        state.record(Op::Clear);
        state.last_clear_color = Some(color.to_array());
        Ok(())
    }

    fn texture_size(&self, texture: &FakeTexture) -> Result<Size> {
        Ok(texture.size)
    }

    fn copy_resource(&self, dst: &FakeTexture, src: &FakeTexture) -> Result<()> {
        if dst.size != src.size {
            return Err(PreviewError::Copy {
                reason: format!("size mismatch {} -> {}", src.size, dst.size),
            });
        }
        self.copy(src, dst.size, false)
    }

    fn copy_region(&self, dst: &FakeTexture, src: &FakeTexture, extent: Size) -> Result<()> {
        if extent.is_empty() || extent.overlap(dst.size).overlap(src.size) != extent {
            return Err(PreviewError::Copy {
                reason: format!("region {extent} does not fit {} -> {}", src.size, dst.size),
            });
        }
        self.copy(src, extent, true)
    }
}

impl FakeDevice {
    fn copy(&self, src: &FakeTexture, extent: Size, partial: bool) -> Result<()> {
        let mut state = self.state.lock();
        if state.device_lost {
            return Err(PreviewError::DeviceLost { reason: "removed".into() });
        }
        if countdown(&mut state.fail_copies) {
            return Err(PreviewError::Copy { reason: "injected".into() });
        }
        let frame = match src.origin {
            TextureOrigin::Frame { id, generation } => {
                if generation != state.pool_generation {
                    return Err(PreviewError::Copy {
                        reason: format!("frame {id} outlived its pool"),
                    });
                }
                id
            }
            TextureOrigin::BackBuffer => 0,
        };
        state.record(Op::Copy { frame, partial });
        state.last_copy_extent = Some(extent);
        Ok(())
    }
}

#[derive(Clone)]
pub struct FakeItem {
    pub size: Size,
    state: Arc<Mutex<FakeState>>,
}

impl CaptureItem for FakeItem {
    fn size(&self) -> Result<Size> {
        Ok(self.size)
    }

    fn display_name(&self) -> String {
        "Fake Display".into()
    }

    fn add_closed(&self, handler: NotifyHandler) -> Result<HandlerToken> {
        let mut state = self.state.lock();
        let token = state.token();
        state.closed_handlers.push((token, Arc::from(handler)));
        Ok(HandlerToken(token))
    }

    fn remove_closed(&self, token: HandlerToken) -> Result<()> {
        self.state.lock().closed_handlers.retain(|(t, _)| *t != token.0);
        Ok(())
    }
}

pub struct FakePool {
    state: Arc<Mutex<FakeState>>,
}

impl FramePool for FakePool {
    type Frame = FakeFrame;

    fn try_get_next_frame(&self) -> Result<Option<FakeFrame>> {
        let mut state = self.state.lock();
        if state.pool_closed {
            return Ok(None);
        }
        let Some((id, size)) = state.queue.pop_front() else {
            return Ok(None);
        };
        state.frames_retrieved += 1;
        Ok(Some(FakeFrame {
            id,
            size,
            surface_size: state.pool_size,
            generation: state.pool_generation,
            state: self.state.clone(),
        }))
    }

    fn recreate(&self, _format: PixelFormat, _buffer_count: u32, size: Size) -> Result<()> {
        let mut state = self.state.lock();
        if countdown(&mut state.fail_recreates) {
            return Err(PreviewError::Platform("recreate rejected".into()));
        }
        state.record(Op::Recreate(size));
        state.pool_size = size;
        state.pool_generation += 1;
        Ok(())
    }

    fn add_frame_arrived(&self, handler: NotifyHandler) -> Result<HandlerToken> {
        let mut state = self.state.lock();
        let token = state.token();
        state.frame_handlers.push((token, Arc::from(handler)));
        Ok(HandlerToken(token))
    }

    fn remove_frame_arrived(&self, token: HandlerToken) -> Result<()> {
        let mut state = self.state.lock();
        state.record(Op::HandlerRemoved);
        state.frame_handlers.retain(|(t, _)| *t != token.0);
        Ok(())
    }

    fn close(&self) -> Result<()> {
        let mut state = self.state.lock();
        state.record(Op::PoolClosed);
        state.pool_closed = true;
        Ok(())
    }
}

pub struct FakeFrame {
    id: u64,
    size: Size,
    /// Pool size when the frame was retrieved; the texture always has it.
    surface_size: Size,
    generation: u64,
    state: Arc<Mutex<FakeState>>,
}

impl CaptureFrame for FakeFrame {
    type Texture = FakeTexture;

    fn content_size(&self) -> Result<Size> {
        Ok(self.size)
    }

    fn texture(&self) -> Result<FakeTexture> {
        Ok(FakeTexture {
            size: self.surface_size,
            origin: TextureOrigin::Frame {
                id: self.id,
                generation: self.generation,
            },
        })
    }

    fn close(&self) -> Result<()> {
        let mut state = self.state.lock();
        state.record(Op::FrameClosed(self.id));
        state.frames_closed += 1;
        Ok(())
    }
}

pub struct FakeSession {
    state: Arc<Mutex<FakeState>>,
}

impl SessionHandle for FakeSession {
    fn start(&self) -> Result<()> {
        self.state.lock().record(Op::SessionStarted);
        Ok(())
    }

    fn set_cursor_capture_enabled(&self, enabled: bool) -> Result<()> {
        self.state.lock().record(Op::CursorCapture(enabled));
        Ok(())
    }

    fn set_border_required(&self, required: bool) -> Result<()> {
        self.state.lock().record(Op::BorderRequired(required));
        Ok(())
    }

    fn close(&self) -> Result<()> {
        self.state.lock().record(Op::SessionClosed);
        Ok(())
    }
}

pub struct FakeSwapChain {
    state: Arc<Mutex<FakeState>>,
}

impl SwapChain for FakeSwapChain {
    type Texture = FakeTexture;

    fn resize_buffers(&self, _buffer_count: u32, size: Size, _format: PixelFormat) -> Result<()> {
        let mut state = self.state.lock();
        if countdown(&mut state.fail_resizes) {
            return Err(PreviewError::surface_allocation("resize rejected"));
        }
        state.record(Op::ResizeBuffers(size));
        state.chain_size = size;
        Ok(())
    }

    fn back_buffer(&self) -> Result<FakeTexture> {
        Ok(FakeTexture {
            size: self.state.lock().chain_size,
            origin: TextureOrigin::BackBuffer,
        })
    }

    fn present(&self, sync_interval: u32) -> Result<()> {
        let mut state = self.state.lock();
        if state.device_lost {
            return Err(PreviewError::DeviceLost { reason: "removed".into() });
        }
        if countdown(&mut state.fail_presents) {
            return Err(PreviewError::Present { reason: "injected".into() });
        }
        state.record(Op::Present(sync_interval));
        Ok(())
    }
}

impl Drop for FakeSwapChain {
    fn drop(&mut self) {
        self.state.lock().record(Op::SwapChainReleased);
    }
}

pub struct FakeCompositor;

pub struct FakeCompositionSurface {
    pub size: Size,
}

impl CompositionContext<FakeSwapChain> for FakeCompositor {
    type Surface = FakeCompositionSurface;

    fn create_surface_for_swap_chain(&self, swap_chain: &FakeSwapChain) -> Result<FakeCompositionSurface> {
        Ok(FakeCompositionSurface {
            size: swap_chain.state.lock().chain_size,
        })
    }
}
