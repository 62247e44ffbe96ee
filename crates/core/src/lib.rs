pub mod config;
pub mod errors;
pub mod logger;
pub mod types;

pub use config::{Config, PreviewConfig};
pub use errors::{PreviewError, Result};
pub use types::*;
