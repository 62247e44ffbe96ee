//! Direct3D 11 backend: Windows.Graphics.Capture feeds the pool, a DXGI
//! composition swap chain presents.

use capture_preview_core::{
    AlphaMode, ClearColor, PixelFormat, PreviewError, Result, Scaling, Size, SwapChainDesc, SwapEffect,
};
use parking_lot::Mutex;
use windows::{
    core::{factory, Interface, BOOL},
    Foundation::TypedEventHandler,
    Graphics::{
        Capture::{Direct3D11CaptureFrame, Direct3D11CaptureFramePool, GraphicsCaptureItem, GraphicsCaptureSession},
        DirectX::{Direct3D11::IDirect3DDevice, DirectXPixelFormat},
        SizeInt32,
    },
    UI::Composition::{Compositor, ICompositionSurface},
    Win32::{
        Foundation::{HMODULE, HWND, LPARAM, POINT, RECT},
        Graphics::{
            Direct3D::{D3D_DRIVER_TYPE_HARDWARE, D3D_FEATURE_LEVEL, D3D_FEATURE_LEVEL_10_1, D3D_FEATURE_LEVEL_11_0, D3D_FEATURE_LEVEL_11_1},
            Direct3D11::{
                D3D11CreateDevice, ID3D11Device, ID3D11DeviceContext, ID3D11RenderTargetView, ID3D11Texture2D,
                D3D11_BOX, D3D11_CREATE_DEVICE_BGRA_SUPPORT, D3D11_SDK_VERSION, D3D11_TEXTURE2D_DESC,
            },
            DirectComposition::{DCompositionCreateDevice, IDCompositionDevice, IDCompositionTarget, IDCompositionVisual},
            Dxgi::{
                Common::{DXGI_ALPHA_MODE, DXGI_ALPHA_MODE_PREMULTIPLIED, DXGI_FORMAT, DXGI_FORMAT_B8G8R8A8_UNORM, DXGI_SAMPLE_DESC},
                IDXGIDevice, IDXGIFactory2, IDXGISwapChain1, DXGI_ERROR_DEVICE_REMOVED, DXGI_ERROR_DEVICE_RESET,
                DXGI_PRESENT, DXGI_SCALING, DXGI_SCALING_STRETCH, DXGI_SWAP_CHAIN_DESC1, DXGI_SWAP_CHAIN_FLAG,
                DXGI_SWAP_EFFECT, DXGI_SWAP_EFFECT_FLIP_SEQUENTIAL, DXGI_USAGE_RENDER_TARGET_OUTPUT,
            },
            Gdi::{EnumDisplayMonitors, MonitorFromPoint, HDC, HMONITOR, MONITOR_DEFAULTTOPRIMARY},
        },
        System::WinRT::{
            Composition::ICompositorInterop,
            Direct3D11::{CreateDirect3D11DeviceFromDXGIDevice, IDirect3DDxgiInterfaceAccess},
            Graphics::Capture::IGraphicsCaptureItemInterop,
        },
    },
};

use crate::backend::{
    CaptureFrame, CaptureItem, CompositionContext, FramePool, GraphicsDevice, HandlerToken, NotifyHandler,
    SessionHandle, SwapChain,
};

const FEATURE_LEVELS: [D3D_FEATURE_LEVEL; 3] = [D3D_FEATURE_LEVEL_11_1, D3D_FEATURE_LEVEL_11_0, D3D_FEATURE_LEVEL_10_1];

/// Device removal is the only platform error the relay cannot skip past.
fn lost_or(what: &str, e: windows::core::Error, other: impl FnOnce(String) -> PreviewError) -> PreviewError {
    let code = e.code();
    let reason = format!("{what}: {e}");
    if code == DXGI_ERROR_DEVICE_REMOVED || code == DXGI_ERROR_DEVICE_RESET {
        PreviewError::DeviceLost { reason }
    } else {
        other(reason)
    }
}

trait PlatformResult<T> {
    fn platform(self, what: &str) -> Result<T>;
}

impl<T> PlatformResult<T> for windows::core::Result<T> {
    fn platform(self, what: &str) -> Result<T> {
        self.map_err(|e| lost_or(what, e, PreviewError::Platform))
    }
}

fn size_int32(size: Size) -> SizeInt32 {
    SizeInt32 {
        Width: size.width,
        Height: size.height,
    }
}

fn winrt_format(format: PixelFormat) -> DirectXPixelFormat {
    match format {
        PixelFormat::Bgra8Unorm => DirectXPixelFormat::B8G8R8A8UIntNormalized,
    }
}

fn dxgi_format(format: PixelFormat) -> DXGI_FORMAT {
    match format {
        PixelFormat::Bgra8Unorm => DXGI_FORMAT_B8G8R8A8_UNORM,
    }
}

fn dxgi_alpha_mode(mode: AlphaMode) -> DXGI_ALPHA_MODE {
    match mode {
        AlphaMode::Premultiplied => DXGI_ALPHA_MODE_PREMULTIPLIED,
    }
}

fn dxgi_scaling(scaling: Scaling) -> DXGI_SCALING {
    match scaling {
        Scaling::Stretch => DXGI_SCALING_STRETCH,
    }
}

fn dxgi_swap_effect(effect: SwapEffect) -> DXGI_SWAP_EFFECT {
    match effect {
        SwapEffect::FlipSequential => DXGI_SWAP_EFFECT_FLIP_SEQUENTIAL,
    }
}

fn dxgi_factory(device: &ID3D11Device) -> windows::core::Result<IDXGIFactory2> {
    unsafe {
        let dxgi_device: IDXGIDevice = device.cast()?;
        let adapter = dxgi_device.GetAdapter()?;
        adapter.GetParent()
    }
}

fn desc_size(texture: &ID3D11Texture2D) -> Size {
    let mut desc = D3D11_TEXTURE2D_DESC::default();
    unsafe { texture.GetDesc(&mut desc) };
    Size::new(desc.Width as i32, desc.Height as i32)
}

/// Monitors in enumeration order.
pub fn monitors() -> Vec<HMONITOR> {
    let mut monitors: Vec<HMONITOR> = Vec::new();
    unsafe {
        let _ = EnumDisplayMonitors(
            None,
            None,
            Some(monitor_enum_proc),
            LPARAM(&mut monitors as *mut _ as isize),
        );
    }
    monitors
}

unsafe extern "system" fn monitor_enum_proc(hmonitor: HMONITOR, _hdc: HDC, _rect: *mut RECT, lparam: LPARAM) -> BOOL {
    let monitors = &mut *(lparam.0 as *mut Vec<HMONITOR>);
    monitors.push(hmonitor);
    true.into()
}

/// D3D11 texture handed between the capture pool and the swap chain.
pub struct D3d11Texture(ID3D11Texture2D);

// D3D11 resources are free-threaded; only the immediate context is not.
unsafe impl Send for D3d11Texture {}

impl D3d11Texture {
    pub fn raw(&self) -> &ID3D11Texture2D {
        &self.0
    }
}

/// Hardware D3D11 device with BGRA support, shared by capture and presentation.
pub struct D3d11Device {
    device: ID3D11Device,
    context: Mutex<ID3D11DeviceContext>,
    winrt_device: IDirect3DDevice,
}

// Every immediate-context call goes through the mutex.
unsafe impl Send for D3d11Device {}
unsafe impl Sync for D3d11Device {}

impl D3d11Device {
    pub fn new() -> Result<Self> {
        let mut device: Option<ID3D11Device> = None;
        let mut context: Option<ID3D11DeviceContext> = None;

        unsafe {
            D3D11CreateDevice(
                None,
                D3D_DRIVER_TYPE_HARDWARE,
                HMODULE::default(),
                D3D11_CREATE_DEVICE_BGRA_SUPPORT,
                Some(&FEATURE_LEVELS),
                D3D11_SDK_VERSION,
                Some(&mut device),
                None,
                Some(&mut context),
            )
        }
        .map_err(PreviewError::device_binding)?;

        let device = device.ok_or_else(|| PreviewError::device_binding("D3D11CreateDevice returned no device"))?;
        let context = context.ok_or_else(|| PreviewError::device_binding("D3D11CreateDevice returned no context"))?;

        let dxgi_device: IDXGIDevice = device.cast().map_err(PreviewError::device_binding)?;
        let winrt_device: IDirect3DDevice = unsafe { CreateDirect3D11DeviceFromDXGIDevice(&dxgi_device) }
            .and_then(|inspectable| inspectable.cast())
            .map_err(PreviewError::device_binding)?;

        tracing::info!("D3D11 device created");

        Ok(Self {
            device,
            context: Mutex::new(context),
            winrt_device,
        })
    }

    pub fn raw(&self) -> &ID3D11Device {
        &self.device
    }
}

impl GraphicsDevice for D3d11Device {
    type Texture = D3d11Texture;
    type Item = WgcItem;
    type Frame = WgcFrame;
    type FramePool = WgcFramePool;
    type Session = WgcSession;
    type SwapChain = DxgiSwapChain;

    fn create_frame_pool(&self, format: PixelFormat, buffer_count: u32, size: Size) -> Result<WgcFramePool> {
        let pool = Direct3D11CaptureFramePool::CreateFreeThreaded(
            &self.winrt_device,
            winrt_format(format),
            buffer_count as i32,
            size_int32(size),
        )
        .map_err(PreviewError::device_binding)?;

        Ok(WgcFramePool {
            pool,
            device: self.winrt_device.clone(),
        })
    }

    fn create_session(&self, pool: &WgcFramePool, item: &WgcItem) -> Result<WgcSession> {
        let session = pool
            .pool
            .CreateCaptureSession(&item.item)
            .map_err(PreviewError::device_binding)?;
        Ok(WgcSession { session })
    }

    fn create_swap_chain(&self, desc: &SwapChainDesc) -> Result<DxgiSwapChain> {
        let factory = dxgi_factory(&self.device).map_err(PreviewError::surface_allocation)?;

        let chain_desc = DXGI_SWAP_CHAIN_DESC1 {
            Width: desc.size.width_u32(),
            Height: desc.size.height_u32(),
            Format: dxgi_format(desc.format),
            SampleDesc: DXGI_SAMPLE_DESC { Count: 1, Quality: 0 },
            BufferUsage: DXGI_USAGE_RENDER_TARGET_OUTPUT,
            BufferCount: desc.buffer_count,
            Scaling: dxgi_scaling(desc.scaling),
            SwapEffect: dxgi_swap_effect(desc.swap_effect),
            AlphaMode: dxgi_alpha_mode(desc.alpha_mode),
            Flags: 0,
            ..Default::default()
        };

        let chain = unsafe { factory.CreateSwapChainForComposition(&self.device, &chain_desc, None) }
            .map_err(|e| lost_or("CreateSwapChainForComposition", e, |reason| PreviewError::SurfaceAllocation { reason }))?;

        Ok(DxgiSwapChain { chain })
    }

    fn clear(&self, target: &D3d11Texture, color: ClearColor) -> Result<()> {
        let mut view: Option<ID3D11RenderTargetView> = None;
        unsafe { self.device.CreateRenderTargetView(&target.0, None, Some(&mut view)) }
            .platform("CreateRenderTargetView")?;
        let view = view.ok_or_else(|| PreviewError::Platform("CreateRenderTargetView returned no view".into()))?;

        let context = self.context.lock();
        unsafe { context.ClearRenderTargetView(&view, &color.to_array()) };
        Ok(())
    }

    fn texture_size(&self, texture: &D3d11Texture) -> Result<Size> {
        Ok(desc_size(&texture.0))
    }

    fn copy_resource(&self, dst: &D3d11Texture, src: &D3d11Texture) -> Result<()> {
        // CopyResource silently drops mismatched copies, so check up front.
        let (dst_size, src_size) = (desc_size(&dst.0), desc_size(&src.0));
        if dst_size != src_size {
            return Err(PreviewError::Copy {
                reason: format!("source {src_size} does not match back buffer {dst_size}"),
            });
        }

        let context = self.context.lock();
        unsafe { context.CopyResource(&dst.0, &src.0) };
        Ok(())
    }

    fn copy_region(&self, dst: &D3d11Texture, src: &D3d11Texture, extent: Size) -> Result<()> {
        let fits = extent.overlap(desc_size(&dst.0)).overlap(desc_size(&src.0));
        if extent.is_empty() || fits != extent {
            return Err(PreviewError::Copy {
                reason: format!("region {extent} does not fit both textures"),
            });
        }

        let region = D3D11_BOX {
            left: 0,
            top: 0,
            front: 0,
            right: extent.width_u32(),
            bottom: extent.height_u32(),
            back: 1,
        };
        let context = self.context.lock();
        unsafe { context.CopySubresourceRegion(&dst.0, 0, 0, 0, 0, &src.0, 0, Some(&region as *const _)) };
        Ok(())
    }
}

/// A monitor or window exposed to Windows.Graphics.Capture.
#[derive(Clone)]
pub struct WgcItem {
    item: GraphicsCaptureItem,
}

unsafe impl Send for WgcItem {}
unsafe impl Sync for WgcItem {}

impl WgcItem {
    pub fn for_monitor(monitor: HMONITOR) -> Result<Self> {
        let interop = factory::<GraphicsCaptureItem, IGraphicsCaptureItemInterop>().platform("IGraphicsCaptureItemInterop")?;
        let item = unsafe { interop.CreateForMonitor(monitor) }.platform("CreateForMonitor")?;
        Ok(Self { item })
    }

    pub fn for_window(hwnd: HWND) -> Result<Self> {
        let interop = factory::<GraphicsCaptureItem, IGraphicsCaptureItemInterop>().platform("IGraphicsCaptureItemInterop")?;
        let item = unsafe { interop.CreateForWindow(hwnd) }.platform("CreateForWindow")?;
        Ok(Self { item })
    }

    pub fn primary_monitor() -> Result<Self> {
        let monitor = unsafe { MonitorFromPoint(POINT { x: 0, y: 0 }, MONITOR_DEFAULTTOPRIMARY) };
        Self::for_monitor(monitor)
    }

    /// Monitor by enumeration index, falling back to the primary monitor.
    pub fn monitor_or_primary(index: Option<usize>) -> Result<Self> {
        match index.and_then(|i| monitors().get(i).copied()) {
            Some(monitor) => Self::for_monitor(monitor),
            None => {
                if let Some(i) = index {
                    tracing::warn!(index = i, "monitor not found, using primary");
                }
                Self::primary_monitor()
            }
        }
    }
}

impl CaptureItem for WgcItem {
    fn size(&self) -> Result<Size> {
        let size = self.item.Size().platform("GraphicsCaptureItem::Size")?;
        Ok(Size::new(size.Width, size.Height))
    }

    fn display_name(&self) -> String {
        self.item.DisplayName().map(|name| name.to_string()).unwrap_or_default()
    }

    fn add_closed(&self, handler: NotifyHandler) -> Result<HandlerToken> {
        let token = self
            .item
            .Closed(&TypedEventHandler::new(move |_, _| {
                handler();
                Ok(())
            }))
            .platform("GraphicsCaptureItem::Closed")?;
        Ok(HandlerToken(token))
    }

    fn remove_closed(&self, token: HandlerToken) -> Result<()> {
        self.item.RemoveClosed(token.0).platform("GraphicsCaptureItem::RemoveClosed")
    }
}

/// Free-threaded pool: frame-arrived fires on a system worker thread.
pub struct WgcFramePool {
    pool: Direct3D11CaptureFramePool,
    device: IDirect3DDevice,
}

unsafe impl Send for WgcFramePool {}
unsafe impl Sync for WgcFramePool {}

impl FramePool for WgcFramePool {
    type Frame = WgcFrame;

    fn try_get_next_frame(&self) -> Result<Option<WgcFrame>> {
        match self.pool.TryGetNextFrame() {
            Ok(frame) => Ok(Some(WgcFrame { frame })),
            // Empty pool comes back as a null frame with a success code.
            Err(e) if e.code().is_ok() => Ok(None),
            Err(e) => Err(lost_or("TryGetNextFrame", e, PreviewError::Platform)),
        }
    }

    fn recreate(&self, format: PixelFormat, buffer_count: u32, size: Size) -> Result<()> {
        self.pool
            .Recreate(&self.device, winrt_format(format), buffer_count as i32, size_int32(size))
            .platform("Direct3D11CaptureFramePool::Recreate")
    }

    fn add_frame_arrived(&self, handler: NotifyHandler) -> Result<HandlerToken> {
        let token = self
            .pool
            .FrameArrived(&TypedEventHandler::new(move |_, _| {
                handler();
                Ok(())
            }))
            .platform("FrameArrived")?;
        Ok(HandlerToken(token))
    }

    fn remove_frame_arrived(&self, token: HandlerToken) -> Result<()> {
        self.pool.RemoveFrameArrived(token.0).platform("RemoveFrameArrived")
    }

    fn close(&self) -> Result<()> {
        self.pool.Close().platform("Direct3D11CaptureFramePool::Close")
    }
}

pub struct WgcFrame {
    frame: Direct3D11CaptureFrame,
}

unsafe impl Send for WgcFrame {}

impl CaptureFrame for WgcFrame {
    type Texture = D3d11Texture;

    fn content_size(&self) -> Result<Size> {
        let size = self.frame.ContentSize().platform("ContentSize")?;
        Ok(Size::new(size.Width, size.Height))
    }

    fn texture(&self) -> Result<D3d11Texture> {
        let surface = self.frame.Surface().platform("Direct3D11CaptureFrame::Surface")?;
        let access: IDirect3DDxgiInterfaceAccess = surface.cast().platform("IDirect3DDxgiInterfaceAccess")?;
        let texture: ID3D11Texture2D = unsafe { access.GetInterface() }.platform("GetInterface")?;
        Ok(D3d11Texture(texture))
    }

    fn close(&self) -> Result<()> {
        self.frame.Close().platform("Direct3D11CaptureFrame::Close")
    }
}

pub struct WgcSession {
    session: GraphicsCaptureSession,
}

unsafe impl Send for WgcSession {}

impl SessionHandle for WgcSession {
    fn start(&self) -> Result<()> {
        self.session.StartCapture().platform("StartCapture")
    }

    fn set_cursor_capture_enabled(&self, enabled: bool) -> Result<()> {
        self.session.SetIsCursorCaptureEnabled(enabled).platform("SetIsCursorCaptureEnabled")
    }

    // Windows 11 only; older builds return an error the caller ignores.
    fn set_border_required(&self, required: bool) -> Result<()> {
        self.session.SetIsBorderRequired(required).platform("SetIsBorderRequired")
    }

    fn close(&self) -> Result<()> {
        self.session.Close().platform("GraphicsCaptureSession::Close")
    }
}

pub struct DxgiSwapChain {
    chain: IDXGISwapChain1,
}

unsafe impl Send for DxgiSwapChain {}

impl DxgiSwapChain {
    pub fn raw(&self) -> &IDXGISwapChain1 {
        &self.chain
    }
}

impl SwapChain for DxgiSwapChain {
    type Texture = D3d11Texture;

    fn resize_buffers(&self, buffer_count: u32, size: Size, format: PixelFormat) -> Result<()> {
        unsafe {
            self.chain.ResizeBuffers(
                buffer_count,
                size.width_u32(),
                size.height_u32(),
                dxgi_format(format),
                DXGI_SWAP_CHAIN_FLAG(0),
            )
        }
        .map_err(|e| lost_or("ResizeBuffers", e, |reason| PreviewError::SurfaceAllocation { reason }))
    }

    fn back_buffer(&self) -> Result<D3d11Texture> {
        let texture: ID3D11Texture2D = unsafe { self.chain.GetBuffer(0) }.platform("GetBuffer")?;
        Ok(D3d11Texture(texture))
    }

    fn present(&self, sync_interval: u32) -> Result<()> {
        unsafe { self.chain.Present(sync_interval, DXGI_PRESENT(0)) }
            .ok()
            .map_err(|e| lost_or("Present", e, |reason| PreviewError::Present { reason }))
    }
}

/// DirectComposition tree rooted at a window.
pub struct DirectCompositionTarget {
    device: IDCompositionDevice,
    target: IDCompositionTarget,
}

impl DirectCompositionTarget {
    pub fn for_window(hwnd: HWND) -> Result<Self> {
        let device: IDCompositionDevice = unsafe { DCompositionCreateDevice(None) }.platform("DCompositionCreateDevice")?;
        let target = unsafe { device.CreateTargetForHwnd(hwnd, true) }.platform("CreateTargetForHwnd")?;
        Ok(Self { device, target })
    }

    fn attach(&self, chain: &IDXGISwapChain1) -> windows::core::Result<IDCompositionVisual> {
        unsafe {
            let visual = self.device.CreateVisual()?;
            visual.SetContent(chain)?;
            self.target.SetRoot(&visual)?;
            self.device.Commit()?;
            Ok(visual)
        }
    }
}

impl CompositionContext<DxgiSwapChain> for DirectCompositionTarget {
    type Surface = IDCompositionVisual;

    fn create_surface_for_swap_chain(&self, swap_chain: &DxgiSwapChain) -> Result<IDCompositionVisual> {
        self.attach(&swap_chain.chain).map_err(|e| lost_or("DirectComposition", e, |reason| PreviewError::SurfaceAllocation { reason }))
    }
}

/// Visual-layer compositor, for hosts built on Windows.UI.Composition.
impl CompositionContext<DxgiSwapChain> for Compositor {
    type Surface = ICompositionSurface;

    fn create_surface_for_swap_chain(&self, swap_chain: &DxgiSwapChain) -> Result<ICompositionSurface> {
        let interop: ICompositorInterop = self.cast().platform("ICompositorInterop")?;
        unsafe { interop.CreateCompositionSurfaceForSwapChain(&swap_chain.chain) }
            .map_err(|e| lost_or("CreateCompositionSurfaceForSwapChain", e, |reason| PreviewError::SurfaceAllocation { reason }))
    }
}
