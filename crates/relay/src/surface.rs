use std::marker::PhantomData;

use capture_preview_core::{PixelFormat, PreviewError, Result, Size, SwapChainDesc, BUFFER_COUNT};

use crate::backend::{CompositionContext, GraphicsDevice, SwapChain};

/// Double-buffered presentable target the relay copies frames into.
pub struct PresentationSurface<D: GraphicsDevice> {
    swap_chain: Option<D::SwapChain>,
    size: Size,
}

impl<D: GraphicsDevice> PresentationSurface<D> {
    pub fn create(device: &D, initial_size: Size) -> Result<Self> {
        let size = initial_size.at_least_one();
        let swap_chain = device.create_swap_chain(&SwapChainDesc::preview(size))?;

        tracing::info!(%size, buffers = BUFFER_COUNT, "presentation surface created");

        Ok(Self {
            swap_chain: Some(swap_chain),
            size,
        })
    }

    fn swap_chain(&self) -> Result<&D::SwapChain> {
        self.swap_chain.as_ref().ok_or(PreviewError::disposed("presentation surface"))
    }

    pub fn size(&self) -> Size {
        self.size
    }

    /// Resize the chain in place. Takes `&mut self`, so no [`BackBuffer`]
    /// can be alive across the call.
    ///
    /// Empty sizes are ignored: the chain keeps its last real size.
    pub fn resize(&mut self, new_size: Size) -> Result<()> {
        let swap_chain = self.swap_chain()?;

        if new_size.is_empty() {
            tracing::debug!(size = %new_size, "chain resize deferred for empty size");
            return Ok(());
        }
        if new_size == self.size {
            return Ok(());
        }

        swap_chain.resize_buffers(BUFFER_COUNT, new_size, PixelFormat::Bgra8Unorm)?;
        self.size = new_size;
        Ok(())
    }

    /// The back buffer for this cycle. Drop it before `present` or `resize`.
    pub fn current_back_buffer(&self) -> Result<BackBuffer<'_, D::Texture>> {
        let texture = self.swap_chain()?.back_buffer()?;
        Ok(BackBuffer {
            texture,
            _surface: PhantomData,
        })
    }

    pub fn present(&mut self, sync_interval: u32) -> Result<()> {
        self.swap_chain()?.present(sync_interval)
    }

    /// Hand the chain to a compositor. Called once by the UI layer.
    pub fn expose_as_composable_surface<C>(&self, compositor: &C) -> Result<C::Surface>
    where
        C: CompositionContext<D::SwapChain>,
    {
        compositor.create_surface_for_swap_chain(self.swap_chain()?)
    }

    pub fn is_disposed(&self) -> bool {
        self.swap_chain.is_none()
    }

    pub fn dispose(&mut self) {
        if self.swap_chain.take().is_some() {
            tracing::debug!("presentation surface disposed");
        }
    }
}

impl<D: GraphicsDevice> Drop for PresentationSurface<D> {
    fn drop(&mut self) {
        self.dispose();
    }
}

/// Borrowed back buffer of a [`PresentationSurface`].
pub struct BackBuffer<'a, T> {
    texture: T,
    _surface: PhantomData<&'a ()>,
}

impl<T> BackBuffer<'_, T> {
    pub fn texture(&self) -> &T {
        &self.texture
    }
}
