use thiserror::Error;

pub type Result<T> = std::result::Result<T, PreviewError>;

#[derive(Error, Debug)]
pub enum PreviewError {
    #[error("Graphics device cannot bind to capture: {reason}")]
    DeviceBinding { reason: String },

    #[error("Presentation surface allocation failed: {reason}")]
    SurfaceAllocation { reason: String },

    #[error("{component} used after dispose")]
    DisposedAccess { component: &'static str },

    #[error("Capture session already started")]
    AlreadyStarted,

    #[error("Graphics device lost: {reason}")]
    DeviceLost { reason: String },

    #[error("Frame copy failed: {reason}")]
    Copy { reason: String },

    #[error("Present failed: {reason}")]
    Present { reason: String },

    #[error("Relay gave up after {count} consecutive frame failures")]
    PersistentFailure { count: u32 },

    #[error("Platform call failed: {0}")]
    Platform(String),
}

impl PreviewError {
    pub fn device_binding(reason: impl std::fmt::Display) -> Self {
        Self::DeviceBinding { reason: reason.to_string() }
    }

    pub fn surface_allocation(reason: impl std::fmt::Display) -> Self {
        Self::SurfaceAllocation { reason: reason.to_string() }
    }

    pub fn disposed(component: &'static str) -> Self {
        Self::DisposedAccess { component }
    }

    /// Errors after which the relay stops and the owner has to rebuild.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::DeviceLost { .. } | Self::PersistentFailure { .. })
    }
}
