//! Per-frame relay from the capture pool into the presentation chain.
//!
//! One invocation per frame-arrived notification, strictly in this order:
//!
//! ```text
//! try_get_next_frame ── none ──▶ return
//!   │
//!   ▼
//! content size != last known? ──▶ resize chain (before the copy)
//!   │
//!   ▼
//! back buffer: clear opaque black, copy frame ──▶ release back buffer
//!   │
//!   ▼
//! release frame ──▶ present(1) ──▶ pool behind last known? recreate pool
//! ```
//!
//! Recreating the pool only after present keeps the frame in hand valid for
//! its whole round trip. A pool recreate that fails is retried on the next
//! frame.
//!
//! A frame that arrives with a new size was drawn into a pool surface of the
//! old size, so only the region both textures cover is copied.

use std::sync::Arc;

use capture_preview_core::{PreviewError, Result, Size, CLEAR_COLOR, PRESENT_SYNC_INTERVAL};
use crossbeam_channel::Sender;

use crate::backend::{CompositionContext, GraphicsDevice};
use crate::capture_session::{CaptureSession, ScopedFrame};
use crate::surface::PresentationSurface;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayState {
    Idle,
    Sizing,
    Copying,
    Presenting,
    /// Fatal error seen; frames are ignored until the owner tears down.
    Faulted,
    Disposed,
}

/// What a single frame-arrived invocation did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameOutcome {
    /// Notification fired without a queued frame. Expected under load and
    /// never reported as an error.
    NoFrame,
    Presented { resized: bool, copied: bool },
    /// Relay is faulted.
    Ignored,
}

/// Notifications for the owner of a preview.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PreviewEvent {
    Started,
    /// Chain and pool now match the new source size.
    Resized { size: Size },
    SourceClosed,
    /// The relay stopped; tear down and rebuild to recover.
    Faulted { reason: String },
    Disposed,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RelayStats {
    pub frames_presented: u64,
    pub empty_notifications: u64,
    pub resizes: u64,
    pub pool_recreations: u64,
    pub deferred_frames: u64,
    /// Frames copied through the overlap of mismatched textures.
    pub partial_copies: u64,
    pub copy_failures: u64,
    pub present_failures: u64,
    pub last_known_size: Size,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SizeCheck {
    Unchanged,
    Resized,
    /// Zero-sized content; nothing to copy.
    Deferred,
    /// Chain resize or size query failed; keep the old buffers this frame.
    Skipped,
}

pub struct FrameRelay<D: GraphicsDevice> {
    device: Arc<D>,
    session: CaptureSession<D>,
    surface: PresentationSurface<D>,
    last_size: Size,
    state: RelayState,
    stats: RelayStats,
    consecutive_failures: u32,
    max_consecutive_failures: u32,
    events: Sender<PreviewEvent>,
}

impl<D: GraphicsDevice> FrameRelay<D> {
    pub fn new(
        device: Arc<D>,
        session: CaptureSession<D>,
        surface: PresentationSurface<D>,
        max_consecutive_failures: u32,
        events: Sender<PreviewEvent>,
    ) -> Self {
        let last_size = session.pool_size();
        Self {
            device,
            session,
            surface,
            last_size,
            state: RelayState::Idle,
            stats: RelayStats {
                last_known_size: last_size,
                ..Default::default()
            },
            consecutive_failures: 0,
            max_consecutive_failures: max_consecutive_failures.max(1),
            events,
        }
    }

    pub fn state(&self) -> RelayState {
        self.state
    }

    pub fn last_known_size(&self) -> Size {
        self.last_size
    }

    pub fn stats(&self) -> RelayStats {
        self.stats.clone()
    }

    pub fn session(&self) -> &CaptureSession<D> {
        &self.session
    }

    pub fn surface(&self) -> &PresentationSurface<D> {
        &self.surface
    }

    pub fn start(&mut self) -> Result<()> {
        if self.state == RelayState::Disposed {
            return Err(PreviewError::disposed("frame relay"));
        }
        self.session.start()
    }

    pub fn create_surface<C>(&self, compositor: &C) -> Result<C::Surface>
    where
        C: CompositionContext<D::SwapChain>,
    {
        if self.state == RelayState::Disposed {
            return Err(PreviewError::disposed("frame relay"));
        }
        self.surface.expose_as_composable_surface(compositor)
    }

    /// Handle one frame-arrived notification.
    ///
    /// Per-frame failures are logged and swallowed; only fatal errors (and
    /// use after dispose) come back as `Err`.
    pub fn on_frame_arrived(&mut self) -> Result<FrameOutcome> {
        match self.state {
            RelayState::Disposed => return Err(PreviewError::disposed("frame relay")),
            RelayState::Faulted => return Ok(FrameOutcome::Ignored),
            _ => {}
        }

        let frame = match self.session.try_get_next_frame() {
            Ok(Some(frame)) => frame,
            Ok(None) => {
                self.stats.empty_notifications += 1;
                tracing::trace!("frame arrived without a queued frame");
                return Ok(FrameOutcome::NoFrame);
            }
            Err(e) => {
                self.record_failure(e)?;
                return Ok(FrameOutcome::Ignored);
            }
        };

        let mut clean = true;
        let mut copied = false;

        let (check, content) = match frame.content_size() {
            Ok(content) => (self.reconcile_size(content)?, content),
            Err(e) => {
                clean = false;
                self.record_failure(e)?;
                (SizeCheck::Skipped, Size::default())
            }
        };
        if check == SizeCheck::Skipped {
            clean = false;
        }

        if matches!(check, SizeCheck::Unchanged | SizeCheck::Resized) {
            match self.copy_frame(&frame, content) {
                Ok(()) => copied = true,
                Err(e) => {
                    clean = false;
                    self.stats.copy_failures += 1;
                    self.record_failure(e)?;
                }
            }
        }

        drop(frame);

        self.state = RelayState::Presenting;
        match self.surface.present(PRESENT_SYNC_INTERVAL) {
            Ok(()) => self.stats.frames_presented += 1,
            Err(e) => {
                clean = false;
                self.stats.present_failures += 1;
                self.record_failure(e)?;
            }
        }

        let resized = check == SizeCheck::Resized;
        if self.session.pool_size() != self.last_size {
            match self.session.resize_pool(self.last_size) {
                Ok(()) => {
                    self.stats.pool_recreations += 1;
                    let _ = self.events.send(PreviewEvent::Resized { size: self.last_size });
                }
                Err(e) => {
                    clean = false;
                    self.record_failure(e)?;
                }
            }
        }

        if clean {
            self.consecutive_failures = 0;
        }
        self.state = RelayState::Idle;
        Ok(FrameOutcome::Presented { resized, copied })
    }

    fn reconcile_size(&mut self, content: Size) -> Result<SizeCheck> {
        if content.is_empty() {
            self.stats.deferred_frames += 1;
            tracing::debug!(size = %content, "empty frame, waiting for a real size");
            return Ok(SizeCheck::Deferred);
        }
        if content == self.last_size {
            return Ok(SizeCheck::Unchanged);
        }

        self.state = RelayState::Sizing;
        match self.surface.resize(content) {
            Ok(()) => {
                tracing::info!(from = %self.last_size, to = %content, "source resized");
                self.last_size = content;
                self.stats.last_known_size = content;
                self.stats.resizes += 1;
                Ok(SizeCheck::Resized)
            }
            Err(e) => {
                self.record_failure(e)?;
                Ok(SizeCheck::Skipped)
            }
        }
    }

    fn copy_frame(&mut self, frame: &ScopedFrame<D::Frame>, content: Size) -> Result<()> {
        self.state = RelayState::Copying;

        let source = frame.texture()?;
        let back_buffer = self.surface.current_back_buffer()?;
        self.device.clear(back_buffer.texture(), CLEAR_COLOR)?;

        let source_size = self.device.texture_size(&source)?;
        let target_size = self.device.texture_size(back_buffer.texture())?;
        if source_size == target_size {
            return self.device.copy_resource(back_buffer.texture(), &source);
        }

        // Pool surface still has the pre-resize size.
        let extent = content.overlap(source_size).overlap(target_size);
        if extent.is_empty() {
            return Ok(());
        }
        self.device.copy_region(back_buffer.texture(), &source, extent)?;
        self.stats.partial_copies += 1;
        tracing::trace!(source = %source_size, target = %target_size, extent = %extent, "partial frame copy");
        Ok(())
    }

    /// Count a per-frame failure. Returns `Err` once the relay has faulted.
    fn record_failure(&mut self, error: PreviewError) -> Result<()> {
        if error.is_fatal() {
            return Err(self.fault(error));
        }

        self.consecutive_failures += 1;
        if self.consecutive_failures >= self.max_consecutive_failures {
            tracing::warn!(error = %error, "last frame failure before giving up");
            return Err(self.fault(PreviewError::PersistentFailure {
                count: self.consecutive_failures,
            }));
        }

        tracing::warn!(
            error = %error,
            consecutive = self.consecutive_failures,
            "frame skipped"
        );
        Ok(())
    }

    fn fault(&mut self, error: PreviewError) -> PreviewError {
        tracing::error!(error = %error, "frame relay faulted");
        self.state = RelayState::Faulted;
        let _ = self.events.send(PreviewEvent::Faulted {
            reason: error.to_string(),
        });
        error
    }

    /// Release the chain, then the capture session. Idempotent.
    ///
    /// The frame-arrived handler must already be unregistered.
    pub fn dispose(&mut self) {
        if self.state == RelayState::Disposed {
            return;
        }
        self.state = RelayState::Disposed;
        self.surface.dispose();
        self.session.dispose();
    }
}
