use serde::{Deserialize, Serialize};

/// Frames kept in flight by the capture pool and by the presentation chain.
pub const BUFFER_COUNT: u32 = 2;

/// Vsync pacing for every present. Never 0: the relay relies on present
/// blocking to throttle a source that outruns the display.
pub const PRESENT_SYNC_INTERVAL: u32 = 1;

/// Back buffers are cleared to this before each copy.
pub const CLEAR_COLOR: ClearColor = ClearColor::OPAQUE_BLACK;

/// Pixel extent of a capture source, frame, or buffer chain.
///
/// Signed to match the platform capture APIs, which report sizes as `i32`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Size {
    pub width: i32,
    pub height: i32,
}

impl Size {
    pub const fn new(width: i32, height: i32) -> Self {
        Self { width, height }
    }

    /// True when either dimension is zero or negative (e.g. a minimized window).
    pub fn is_empty(&self) -> bool {
        self.width <= 0 || self.height <= 0
    }

    /// Smallest allocatable size that still covers `self`.
    pub fn at_least_one(self) -> Self {
        Self {
            width: self.width.max(1),
            height: self.height.max(1),
        }
    }

    /// Region covered by both `self` and `other`, anchored top-left.
    pub fn overlap(self, other: Size) -> Self {
        Self {
            width: self.width.min(other.width),
            height: self.height.min(other.height),
        }
    }

    pub fn width_u32(&self) -> u32 {
        self.width.max(0) as u32
    }

    pub fn height_u32(&self) -> u32 {
        self.height.max(0) as u32
    }
}

impl std::fmt::Display for Size {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PixelFormat {
    /// 32-bit BGRA, 8 bits per channel, normalized.
    Bgra8Unorm,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlphaMode {
    Premultiplied,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scaling {
    Stretch,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SwapEffect {
    FlipSequential,
}

/// Everything needed to allocate a presentation chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SwapChainDesc {
    pub size: Size,
    pub format: PixelFormat,
    pub buffer_count: u32,
    pub alpha_mode: AlphaMode,
    pub scaling: Scaling,
    pub swap_effect: SwapEffect,
}

impl SwapChainDesc {
    /// The one chain layout the preview uses, at `size`.
    pub fn preview(size: Size) -> Self {
        Self {
            size,
            format: PixelFormat::Bgra8Unorm,
            buffer_count: BUFFER_COUNT,
            alpha_mode: AlphaMode::Premultiplied,
            scaling: Scaling::Stretch,
            swap_effect: SwapEffect::FlipSequential,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClearColor {
    pub r: f32,
    pub g: f32,
    pub b: f32,
    pub a: f32,
}

impl ClearColor {
    pub const OPAQUE_BLACK: Self = Self { r: 0.0, g: 0.0, b: 0.0, a: 1.0 };

    pub fn to_array(self) -> [f32; 4] {
        [self.r, self.g, self.b, self.a]
    }
}
