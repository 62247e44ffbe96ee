use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use capture_preview_core::{PreviewConfig, PreviewError, Result, Size};
use crossbeam_channel::{unbounded, Receiver, Sender};
use parking_lot::Mutex;

use crate::backend::{CaptureItem, CompositionContext, FramePool, GraphicsDevice, HandlerToken};
use crate::capture_session::{CaptureSession, SessionOptions};
use crate::relay::{FrameRelay, PreviewEvent, RelayState, RelayStats};
use crate::surface::PresentationSurface;

/// Live preview of one capture item.
///
/// Owns the capture session, the presentation surface and the relay between
/// them. Frames are relayed on whatever thread the platform delivers them on;
/// every other method may be called from any thread.
pub struct CapturePreview<D: GraphicsDevice> {
    relay: Arc<Mutex<FrameRelay<D>>>,
    pool: Arc<D::FramePool>,
    frame_token: Mutex<Option<HandlerToken>>,
    closed_token: Mutex<Option<HandlerToken>>,
    events_tx: Sender<PreviewEvent>,
    events_rx: Receiver<PreviewEvent>,
    disposed: AtomicBool,
}

impl<D: GraphicsDevice> CapturePreview<D> {
    pub fn new(device: Arc<D>, item: D::Item, config: &PreviewConfig) -> Result<Self> {
        let source_size = item.size()?;
        let surface = PresentationSurface::create(device.as_ref(), source_size)?;
        let session = CaptureSession::create(device.as_ref(), item, SessionOptions::from(config))?;
        let pool = session.frame_pool()?;

        let (events_tx, events_rx) = unbounded();

        let closed_token = session.source().and_then(|item| {
            let tx = events_tx.clone();
            let registered = item.add_closed(Box::new(move || {
                tracing::info!("capture source closed");
                let _ = tx.send(PreviewEvent::SourceClosed);
            }));
            match registered {
                Ok(token) => Some(token),
                Err(e) => {
                    tracing::warn!(error = %e, "source close notifications unavailable");
                    None
                }
            }
        });

        let relay = Arc::new(Mutex::new(FrameRelay::new(
            device,
            session,
            surface,
            config.max_consecutive_failures,
            events_tx.clone(),
        )));

        // Weak: the pool owns the handler, the relay owns the pool.
        let weak = Arc::downgrade(&relay);
        let frame_token = relay.lock().session().register_frame_arrived(Box::new(move || {
            let Some(relay) = weak.upgrade() else {
                return;
            };
            let mut relay = relay.lock();
            match relay.on_frame_arrived() {
                Ok(_) => {}
                Err(PreviewError::DisposedAccess { .. }) => {
                    tracing::trace!("frame arrived after dispose");
                }
                Err(e) => {
                    tracing::debug!(error = %e, "frame relay stopped");
                }
            }
        }))?;

        Ok(Self {
            relay,
            pool,
            frame_token: Mutex::new(Some(frame_token)),
            closed_token: Mutex::new(closed_token),
            events_tx,
            events_rx,
            disposed: AtomicBool::new(false),
        })
    }

    /// Begin frame delivery.
    pub fn start(&self) -> Result<()> {
        self.relay.lock().start()?;
        let _ = self.events_tx.send(PreviewEvent::Started);
        Ok(())
    }

    /// Wrap the presentation chain for the compositor. Call once.
    pub fn create_surface<C>(&self, compositor: &C) -> Result<C::Surface>
    where
        C: CompositionContext<D::SwapChain>,
    {
        self.relay.lock().create_surface(compositor)
    }

    /// The captured item, until dispose.
    pub fn target(&self) -> Option<D::Item> {
        self.relay.lock().session().source().cloned()
    }

    pub fn events(&self) -> Receiver<PreviewEvent> {
        self.events_rx.clone()
    }

    pub fn stats(&self) -> RelayStats {
        self.relay.lock().stats()
    }

    pub fn state(&self) -> RelayState {
        self.relay.lock().state()
    }

    pub fn last_known_size(&self) -> Size {
        self.relay.lock().last_known_size()
    }

    /// No new frames are relayed after this returns; a frame already being
    /// relayed finishes first. Safe to call more than once.
    pub fn dispose(&self) {
        if self.disposed.swap(true, Ordering::SeqCst) {
            return;
        }

        if let Some(token) = self.frame_token.lock().take() {
            if let Err(e) = self.pool.remove_frame_arrived(token) {
                tracing::warn!(error = %e, "failed to unregister frame handler");
            }
        }

        let mut relay = self.relay.lock();
        if let Some(token) = self.closed_token.lock().take() {
            if let Some(item) = relay.session().source() {
                if let Err(e) = item.remove_closed(token) {
                    tracing::warn!(error = %e, "failed to unregister source close handler");
                }
            }
        }
        relay.dispose();
        drop(relay);

        let _ = self.events_tx.send(PreviewEvent::Disposed);
        tracing::info!("capture preview disposed");
    }
}

impl<D: GraphicsDevice> Drop for CapturePreview<D> {
    fn drop(&mut self) {
        self.dispose();
    }
}
